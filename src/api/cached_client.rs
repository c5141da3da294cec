//! Cached point-of-sale client that wraps PosClient with transparent list caching.

use color_eyre::Result;

use crate::cache::{CacheLayer, CacheResult, EntryInfo};
use crate::db::KvStore;

use super::cache::PosQueryKey;
use super::client::PosClient;
use super::types::{Customer, Product};

/// Point-of-sale client with read-through caching of customer and product lists.
///
/// Writes go straight to the backend; see `queue` for how failed sales are kept.
pub struct CachedPosClient<S: KvStore> {
  inner: PosClient,
  cache: CacheLayer<S>,
}

impl<S: KvStore> CachedPosClient<S> {
  pub fn new(inner: PosClient, cache: CacheLayer<S>) -> Self {
    Self { inner, cache }
  }

  /// The uncached client, for write operations.
  pub fn inner(&self) -> &PosClient {
    &self.inner
  }

  /// List customers, from cache while fresh. `refresh` drops the cached list first.
  pub async fn customers(&self, tenant: &str, refresh: bool) -> Result<CacheResult<Vec<Customer>>> {
    let key = PosQueryKey::Customers {
      tenant: tenant.to_string(),
    };

    let fetcher = || {
      let inner = self.inner.clone();
      let tenant = tenant.to_string();
      async move { inner.list_customers(&tenant).await }
    };

    if refresh {
      self.cache.refetch_list(&key, fetcher).await
    } else {
      self.cache.fetch_list(&key, fetcher).await
    }
  }

  /// List products, from cache while fresh. `refresh` drops the cached list first.
  pub async fn products(
    &self,
    tenant: &str,
    location: Option<&str>,
    refresh: bool,
  ) -> Result<CacheResult<Vec<Product>>> {
    let key = PosQueryKey::Products {
      tenant: tenant.to_string(),
      location: location.map(String::from),
    };

    let fetcher = || {
      let inner = self.inner.clone();
      let tenant = tenant.to_string();
      let location = location.map(String::from);
      async move { inner.list_products(&tenant, location.as_deref()).await }
    };

    if refresh {
      self.cache.refetch_list(&key, fetcher).await
    } else {
      self.cache.fetch_list(&key, fetcher).await
    }
  }

  /// Drop every cached customer list of a tenant.
  pub fn invalidate_customers(&self, tenant: &str) -> usize {
    self
      .cache
      .invalidate_by_prefix(&PosQueryKey::customers_prefix(tenant))
  }

  /// Drop every cached product list of a tenant, across locations.
  pub fn invalidate_products(&self, tenant: &str) -> usize {
    self
      .cache
      .invalidate_by_prefix(&PosQueryKey::products_prefix(tenant))
  }

  /// Drop everything cached for a tenant.
  pub fn invalidate_tenant(&self, tenant: &str) -> usize {
    PosQueryKey::tenant_prefixes(tenant)
      .iter()
      .map(|prefix| self.cache.invalidate_by_prefix(prefix))
      .sum()
  }

  /// Live cache entries of a tenant.
  pub fn cache_entries(&self, tenant: &str) -> Vec<EntryInfo> {
    PosQueryKey::tenant_prefixes(tenant)
      .iter()
      .flat_map(|prefix| self.cache.entries(prefix))
      .collect()
  }
}
