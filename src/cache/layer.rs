//! Cache layer that orchestrates caching logic with network fetching.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use super::storage::{EntryInfo, LocalCache};
use super::traits::{CacheResult, Cacheable, QueryKey};
use crate::db::KvStore;

/// Read-through cache for list endpoints.
///
/// Sits between the application and the network client. A fresh cached
/// list is served without touching the network; a miss fetches and stores.
pub struct CacheLayer<S: KvStore> {
  cache: Arc<LocalCache<S>>,
}

impl<S: KvStore> CacheLayer<S> {
  pub fn new(cache: LocalCache<S>) -> Self {
    Self {
      cache: Arc::new(cache),
    }
  }

  /// Fetch a list with cache-first strategy.
  ///
  /// 1. Check cache - if fresh, return immediately
  /// 2. Otherwise fetch from network
  /// 3. Store the fetched list
  ///
  /// Fetch errors propagate; expired data has already been dropped, so
  /// there is nothing stale to fall back on.
  pub async fn fetch_list<T, K, F, Fut>(&self, key: &K, fetcher: F) -> Result<CacheResult<Vec<T>>>
  where
    T: Cacheable,
    K: QueryKey + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
  {
    let cache_key = key.cache_key();

    if let Some(cached) = self.cache.get::<T>(&cache_key) {
      debug!(key = cache_key.as_str(), "Using cached data for {}", key.description());
      return Ok(CacheResult::from_cache(cached.payload, cached.stored_at));
    }

    debug!(key = cache_key.as_str(), "Fetching fresh data for {}", key.description());
    let data = fetcher().await?;
    self.cache.set(&cache_key, &data);
    Ok(CacheResult::from_network(data))
  }

  /// Drop the cached list for `key`, then fetch it again.
  pub async fn refetch_list<T, K, F, Fut>(
    &self,
    key: &K,
    fetcher: F,
  ) -> Result<CacheResult<Vec<T>>>
  where
    T: Cacheable,
    K: QueryKey + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
  {
    self.cache.invalidate(&key.cache_key());
    self.fetch_list(key, fetcher).await
  }

  pub fn invalidate_by_prefix(&self, prefix: &str) -> usize {
    self.cache.invalidate_by_prefix(prefix)
  }

  /// Size and age of every live entry under `prefix`.
  pub fn entries(&self, prefix: &str) -> Vec<EntryInfo> {
    self
      .cache
      .keys_with_prefix(prefix)
      .iter()
      .filter_map(|key| self.cache.info(key))
      .collect()
  }
}

impl<S: KvStore> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      cache: Arc::clone(&self.cache),
    }
  }
}
