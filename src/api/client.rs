use crate::api::api_types::{
  collect_valid, ApiCustomer, ApiErrorBody, ApiProduct, ApiResponse, ApiSale, ApiSyncEnvelope,
  SyncSalesRequest,
};
use crate::api::types::{CreatedSale, Customer, Product, SaleData, SyncOutcome};
use crate::api::SalesApi;
use crate::config::Config;
use color_eyre::{eyre::eyre, Result};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// REST client for the point-of-sale backend
#[derive(Clone)]
pub struct PosClient {
  http: reqwest::Client,
  base: Url,
  token: Option<String>,
}

impl PosClient {
  pub fn new(config: &Config) -> Result<Self> {
    let base = Url::parse(&config.api.url)
      .map_err(|e| eyre!("Invalid API url {}: {}", config.api.url, e))?;

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.api.timeout_secs))
      .user_agent(concat!("possync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      token: Config::get_api_token(),
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base
  }

  /// Build `{base}/{segments...}`; segments are percent-encoded.
  fn endpoint(&self, segments: &[&str]) -> Result<Url> {
    let mut url = self.base.clone();
    url
      .path_segments_mut()
      .map_err(|_| eyre!("API url {} cannot be used as a base", self.base))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
    match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }

  async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
    let response = self
      .authorized(request)
      .send()
      .await
      .map_err(|e| eyre!("Failed to {}: {}", what, e))?;

    let response = check_status(response, what).await?;

    response
      .json::<T>()
      .await
      .map_err(|e| eyre!("Failed to parse response to {}: {}", what, e))
  }

  /// List all customers of a tenant
  pub async fn list_customers(&self, tenant: &str) -> Result<Vec<Customer>> {
    let url = self.endpoint(&[tenant, "v2", "customers"])?;
    debug!(%url, "Listing customers");

    let response: ApiResponse<Vec<ApiCustomer>> =
      self.send(self.http.get(url), "list customers").await?;

    Ok(collect_valid(
      "customer",
      response.data,
      ApiCustomer::into_customer,
    ))
  }

  /// List products of a tenant, optionally scoped to one location's stock
  pub async fn list_products(&self, tenant: &str, location: Option<&str>) -> Result<Vec<Product>> {
    let mut url = self.endpoint(&[tenant, "v2", "products"])?;
    if let Some(location) = location {
      url.query_pairs_mut().append_pair("locationId", location);
    }
    debug!(%url, "Listing products");

    let response: ApiResponse<Vec<ApiProduct>> =
      self.send(self.http.get(url), "list products").await?;

    Ok(collect_valid(
      "product",
      response.data,
      ApiProduct::into_product,
    ))
  }
}

impl SalesApi for PosClient {
  async fn create_sale(&self, tenant: &str, sale: &SaleData) -> Result<CreatedSale> {
    let url = self.endpoint(&[tenant, "sales"])?;

    let response: ApiResponse<ApiSale> = self
      .send(self.http.post(url).json(sale), "create sale")
      .await?;

    let meta = response.meta.unwrap_or_default();
    if meta.success == Some(false) {
      let reason = response
        .error
        .or(meta.message)
        .unwrap_or_else(|| "rejected without a reason".to_string());
      return Err(eyre!("Failed to create sale: {}", reason));
    }
    if let Some(message) = meta.message {
      debug!(message = message.as_str(), "Sale created");
    }

    Ok(response.data.into())
  }

  async fn sync_sales(&self, tenant: &str, request: &SyncSalesRequest) -> Result<SyncOutcome> {
    let url = self.endpoint(&["organizations", tenant, "sales", "sync"])?;
    info!(count = request.sales.len(), "Sending sales batch to sync endpoint");

    let envelope: ApiSyncEnvelope = self
      .send(self.http.post(url).json(request), "sync sales")
      .await?;

    envelope.into_inner().into_outcome(&request.ids())
  }
}

/// Turn non-2xx responses into errors carrying the backend's message.
async fn check_status(response: Response, what: &str) -> Result<Response> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }

  let body = response
    .text()
    .await
    .unwrap_or_else(|_| String::new());

  Err(eyre!(
    "Failed to {}: HTTP {}: {}",
    what,
    status,
    ApiErrorBody::message_from(&body)
  ))
}
