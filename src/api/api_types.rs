//! Serde types matching the backend's REST payloads.
//!
//! These are kept apart from the domain types so that loosely-shaped
//! responses are checked once, here, and everything past this module
//! works with validated records.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::warn;

use super::types::{
  CreatedSale, Customer, FailureKind, Product, ProductVariant, SaleData, SyncFailure, SyncOutcome,
};

// ============================================================================
// Common envelope
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
  pub data: T,
  #[serde(default)]
  pub meta: Option<ApiMeta>,
  #[serde(default)]
  pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiMeta {
  pub message: Option<String>,
  pub success: Option<bool>,
}

/// Body of a non-2xx response
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
  pub error: Option<String>,
  pub message: Option<String>,
}

impl ApiErrorBody {
  /// Best human-readable message from an error body, falling back to the raw text.
  pub fn message_from(body: &str) -> String {
    let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();
    parsed
      .error
      .or(parsed.message)
      .unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
          "An unexpected error occurred".to_string()
        } else {
          trimmed.to_string()
        }
      })
  }
}

// ============================================================================
// List endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCustomer {
  pub id: Option<String>,
  #[serde(default)]
  pub name: Option<String>,
  pub email: Option<String>,
  pub phone: Option<String>,
  pub loyalty_points: Option<i64>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl ApiCustomer {
  pub fn into_customer(self) -> Option<Customer> {
    let id = self.id.filter(|id| !id.trim().is_empty())?;
    Some(Customer {
      id,
      name: self.name.unwrap_or_default(),
      email: self.email,
      phone: self.phone,
      loyalty_points: self.loyalty_points,
      extra: self.extra,
    })
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiVariant {
  pub id: Option<String>,
  pub name: Option<String>,
  pub price: Option<f64>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiProduct {
  pub id: Option<String>,
  pub name: Option<String>,
  pub sku: Option<String>,
  pub barcode: Option<String>,
  pub is_active: Option<bool>,
  #[serde(default)]
  pub variants: Vec<ApiVariant>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl ApiProduct {
  pub fn into_product(self) -> Option<Product> {
    let id = self.id.filter(|id| !id.trim().is_empty())?;
    let variants = self
      .variants
      .into_iter()
      .filter_map(|v| {
        let id = v.id.filter(|id| !id.trim().is_empty())?;
        Some(ProductVariant {
          id,
          name: v.name.unwrap_or_default(),
          price: v.price,
          extra: v.extra,
        })
      })
      .collect();

    Some(Product {
      id,
      name: self.name.unwrap_or_default(),
      sku: self.sku,
      barcode: self.barcode,
      is_active: self.is_active.unwrap_or(true),
      variants,
      extra: self.extra,
    })
  }
}

/// Convert raw list records, dropping (and logging) any that fail validation.
pub fn collect_valid<A, T>(entity: &str, records: Vec<A>, convert: fn(A) -> Option<T>) -> Vec<T> {
  let total = records.len();
  let valid: Vec<T> = records.into_iter().filter_map(convert).collect();
  if valid.len() < total {
    warn!(
      dropped = total - valid.len(),
      total,
      "Dropped {} records without an id",
      entity
    );
  }
  valid
}

// ============================================================================
// Sales
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiSale {
  pub id: Option<String>,
}

impl From<ApiSale> for CreatedSale {
  fn from(sale: ApiSale) -> Self {
    CreatedSale { id: sale.id }
  }
}

/// One sale in a batch sync request; `id` is the offline id used as idempotency token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSaleItem {
  pub id: String,
  #[serde(flatten)]
  pub sale: SaleData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncSalesRequest {
  pub sales: Vec<SyncSaleItem>,
}

impl SyncSalesRequest {
  pub fn ids(&self) -> HashSet<&str> {
    self.sales.iter().map(|s| s.id.as_str()).collect()
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiSyncFailure {
  pub id: String,
  #[serde(default)]
  pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSyncSalesResponse {
  #[serde(default)]
  pub message: String,
  pub successfully_synced: Option<Vec<String>>,
  pub failed_to_sync: Option<Vec<ApiSyncFailure>>,
}

/// The sync endpoint has been seen both bare and wrapped in `{data: ...}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiSyncEnvelope {
  Wrapped { data: ApiSyncSalesResponse },
  Bare(ApiSyncSalesResponse),
}

impl ApiSyncEnvelope {
  pub fn into_inner(self) -> ApiSyncSalesResponse {
    match self {
      ApiSyncEnvelope::Wrapped { data } => data,
      ApiSyncEnvelope::Bare(response) => response,
    }
  }
}

impl ApiSyncSalesResponse {
  /// Validate against the ids that were actually sent.
  ///
  /// Unknown ids are ignored, duplicates collapse, and an id reported as
  /// both synced and failed counts as synced.
  pub fn into_outcome(self, requested: &HashSet<&str>) -> Result<SyncOutcome> {
    if self.successfully_synced.is_none() && self.failed_to_sync.is_none() {
      return Err(eyre!(
        "Sync response has neither successfullySynced nor failedToSync"
      ));
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut synced = Vec::new();
    for id in self.successfully_synced.unwrap_or_default() {
      if !requested.contains(id.as_str()) {
        warn!(id = id.as_str(), "Sync response reported an id that was not sent");
        continue;
      }
      if seen.insert(id.clone()) {
        synced.push(id);
      }
    }

    let mut failed = Vec::new();
    for failure in self.failed_to_sync.unwrap_or_default() {
      if !requested.contains(failure.id.as_str()) {
        warn!(
          id = failure.id.as_str(),
          "Sync response reported an id that was not sent"
        );
        continue;
      }
      if seen.insert(failure.id.clone()) {
        let kind = FailureKind::classify(&failure.reason);
        failed.push(SyncFailure {
          id: failure.id,
          reason: failure.reason,
          kind,
        });
      }
    }

    Ok(SyncOutcome {
      message: self.message,
      synced,
      failed,
    })
  }
}
