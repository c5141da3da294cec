//! TTL'd list cache over a key-value store.

use chrono::{DateTime, Duration, Utc};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::traits::Cacheable;
use crate::clock::Clock;
use crate::db::KvStore;

/// How long a cached list stays fresh unless configured otherwise.
pub const DEFAULT_TTL_HOURS: i64 = 12;

/// A cached list read back from the store.
#[derive(Debug, Clone)]
pub struct CachedEntry<T> {
  pub payload: Vec<T>,
  pub stored_at: DateTime<Utc>,
}

/// Metadata about a cached list, without decoding its records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
  pub key: String,
  pub len: usize,
  pub stored_at: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
}

/// On-disk shape: `{"data": [...], "timestamp": <epoch ms>}`
#[derive(Deserialize)]
struct StoredEntry<T> {
  data: Vec<T>,
  timestamp: i64,
}

#[derive(Serialize)]
struct StoredEntryRef<'a, T> {
  data: &'a [T],
  timestamp: i64,
}

/// List cache with lazy expiry.
///
/// Every storage failure is logged and degrades to a miss or a no-op;
/// callers always have the network to fall back on.
pub struct LocalCache<S: KvStore> {
  store: S,
  clock: Arc<dyn Clock>,
  ttl: Duration,
}

impl<S: KvStore> LocalCache<S> {
  pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
    Self {
      store,
      clock,
      ttl: Duration::hours(DEFAULT_TTL_HOURS),
    }
  }

  /// Set the time-to-live for cached lists.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// Read a fresh entry. Expired or unreadable entries are deleted and read as a miss.
  pub fn get<T: Cacheable>(&self, key: &str) -> Option<CachedEntry<T>> {
    let (stored, stored_at) = self.read::<T>(key)?;
    Some(CachedEntry {
      payload: stored.data,
      stored_at,
    })
  }

  /// Like `get`, but only reports the size and age of the entry.
  pub fn info(&self, key: &str) -> Option<EntryInfo> {
    let (stored, stored_at) = self.read::<IgnoredAny>(key)?;
    Some(EntryInfo {
      key: key.to_string(),
      len: stored.data.len(),
      stored_at,
      expires_at: stored_at
        .checked_add_signed(self.ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC),
    })
  }

  /// Overwrite the entry for `key`, stamped with the current time.
  pub fn set<T: Cacheable>(&self, key: &str, payload: &[T]) {
    let entry = StoredEntryRef {
      data: payload,
      timestamp: self.clock.now_millis(),
    };

    let json = match serde_json::to_string(&entry) {
      Ok(json) => json,
      Err(e) => {
        warn!(key, error = %e, "Failed to serialize {} cache entry", T::entity_type());
        return;
      }
    };

    if let Err(e) = self.store.set(key, &json) {
      warn!(key, error = %e, "Failed to write cache entry");
      return;
    }

    debug!(key, count = payload.len(), "Cached {} list", T::entity_type());
  }

  /// Delete a single entry.
  pub fn invalidate(&self, key: &str) {
    match self.store.delete(key) {
      Ok(()) => debug!(key, "Cache invalidated"),
      Err(e) => warn!(key, error = %e, "Failed to invalidate cache entry"),
    }
  }

  /// Delete every entry whose key starts with `prefix`. Returns how many were removed.
  pub fn invalidate_by_prefix(&self, prefix: &str) -> usize {
    let keys = match self.store.keys() {
      Ok(keys) => keys,
      Err(e) => {
        warn!(prefix, error = %e, "Failed to enumerate cache keys");
        return 0;
      }
    };

    let mut removed = 0;
    for key in keys.iter().filter(|k| k.starts_with(prefix)) {
      match self.store.delete(key) {
        Ok(()) => removed += 1,
        Err(e) => warn!(key = key.as_str(), error = %e, "Failed to invalidate cache entry"),
      }
    }

    debug!(prefix, removed, "Invalidated cache entries by prefix");
    removed
  }

  /// Every stored key starting with `prefix`.
  pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
    match self.store.keys() {
      Ok(keys) => keys.into_iter().filter(|k| k.starts_with(prefix)).collect(),
      Err(e) => {
        warn!(prefix, error = %e, "Failed to enumerate cache keys");
        Vec::new()
      }
    }
  }

  fn read<T: DeserializeOwned>(&self, key: &str) -> Option<(StoredEntry<T>, DateTime<Utc>)> {
    let raw = match self.store.get(key) {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        warn!(key, error = %e, "Failed to read cache entry");
        return None;
      }
    };

    let stored: StoredEntry<T> = match serde_json::from_str(&raw) {
      Ok(stored) => stored,
      Err(e) => {
        warn!(key, error = %e, "Discarding unreadable cache entry");
        self.invalidate(key);
        return None;
      }
    };

    let Some(stored_at) = DateTime::from_timestamp_millis(stored.timestamp) else {
      warn!(key, timestamp = stored.timestamp, "Discarding cache entry with invalid timestamp");
      self.invalidate(key);
      return None;
    };

    let age = self.clock.now_millis().saturating_sub(stored.timestamp);
    if age >= self.ttl.num_milliseconds() {
      debug!(key, age_ms = age, "Cache entry expired");
      self.invalidate(key);
      return None;
    }

    Some((stored, stored_at))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::db::MemoryStore;
  use color_eyre::{eyre::eyre, Result};
  use serde::{Deserialize, Serialize};

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Item {
    id: String,
  }

  impl Cacheable for Item {
    fn entity_type() -> &'static str {
      "item"
    }
  }

  fn items(ids: &[&str]) -> Vec<Item> {
    ids.iter().map(|id| Item { id: id.to_string() }).collect()
  }

  fn cache() -> (LocalCache<Arc<MemoryStore>>, Arc<MemoryStore>, Arc<ManualClock>) {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::at_epoch());
    let cache = LocalCache::new(Arc::clone(&store), clock.clone());
    (cache, store, clock)
  }

  #[test]
  fn test_set_then_get() {
    let (cache, _, _) = cache();
    cache.set("customers_t1_all", &items(&["a", "b"]));

    let entry = cache.get::<Item>("customers_t1_all").unwrap();
    assert_eq!(entry.payload, items(&["a", "b"]));
    assert_eq!(entry.stored_at.timestamp_millis(), 0);
  }

  #[test]
  fn test_stored_layout() {
    let (cache, store, _) = cache();
    cache.set("k", &items(&["a"]));

    let raw = store.get("k").unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["timestamp"], 0);
    assert_eq!(value["data"][0]["id"], "a");
  }

  #[test]
  fn test_expired_entry_is_a_miss_and_deleted() {
    let (cache, store, clock) = cache();
    cache.set("products_t1_loc", &items(&["a"]));

    clock.advance(Duration::hours(12) + Duration::milliseconds(1));

    assert!(cache.get::<Item>("products_t1_loc").is_none());
    assert_eq!(store.get("products_t1_loc").unwrap(), None);
  }

  #[test]
  fn test_expiry_boundary() {
    let (cache, _, clock) = cache();
    cache.set("k", &items(&["a"]));

    clock.advance(Duration::hours(12) - Duration::milliseconds(1));
    assert!(cache.get::<Item>("k").is_some());

    clock.advance(Duration::milliseconds(1));
    assert!(cache.get::<Item>("k").is_none());
  }

  #[test]
  fn test_set_refreshes_timestamp() {
    let (cache, _, clock) = cache();
    cache.set("k", &items(&["a"]));
    clock.advance(Duration::hours(11));
    cache.set("k", &items(&["b"]));
    clock.advance(Duration::hours(11));

    let entry = cache.get::<Item>("k").unwrap();
    assert_eq!(entry.payload, items(&["b"]));
  }

  #[test]
  fn test_custom_ttl() {
    let (cache, _, clock) = cache();
    let cache = cache.with_ttl(Duration::minutes(5));
    cache.set("k", &items(&["a"]));
    clock.advance(Duration::minutes(5));
    assert!(cache.get::<Item>("k").is_none());
  }

  #[test]
  fn test_unreadable_entry_is_deleted() {
    let (cache, store, _) = cache();
    store.set("k", "{not json").unwrap();

    assert!(cache.get::<Item>("k").is_none());
    assert_eq!(store.get("k").unwrap(), None);
  }

  #[test]
  fn test_invalidate() {
    let (cache, _, _) = cache();
    cache.set("k", &items(&["a"]));
    cache.invalidate("k");
    assert!(cache.get::<Item>("k").is_none());
  }

  #[test]
  fn test_invalidate_by_prefix_only_touches_matching_keys() {
    let (cache, store, _) = cache();
    cache.set("products_T1_loc1", &items(&["a"]));
    cache.set("products_T1_no-location", &items(&["b"]));
    cache.set("products_T10_loc1", &items(&["c"]));
    cache.set("customers_T1_all", &items(&["d"]));
    store.set("pending_sales", "[]").unwrap();

    let removed = cache.invalidate_by_prefix("products_T1_");
    assert_eq!(removed, 2);

    let mut keys = store.keys().unwrap();
    keys.sort();
    assert_eq!(
      keys,
      vec!["customers_T1_all", "pending_sales", "products_T10_loc1"]
    );
  }

  #[test]
  fn test_info_reports_age_and_size() {
    let (cache, _, clock) = cache();
    clock.advance(Duration::seconds(10));
    cache.set("k", &items(&["a", "b", "c"]));

    let info = cache.info("k").unwrap();
    assert_eq!(info.len, 3);
    assert_eq!(info.stored_at.timestamp_millis(), 10_000);
    assert_eq!(info.expires_at, info.stored_at + Duration::hours(12));
  }

  #[test]
  fn test_info_with_huge_ttl_saturates() {
    let (cache, _, _) = cache();
    let cache = cache.with_ttl(Duration::try_days(100_000_000).unwrap());
    cache.set("k", &items(&["a"]));

    let info = cache.info("k").unwrap();
    assert_eq!(info.expires_at, DateTime::<Utc>::MAX_UTC);
  }

  struct BrokenStore;

  impl KvStore for BrokenStore {
    fn get(&self, _key: &str) -> Result<Option<String>> {
      Err(eyre!("disk on fire"))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<()> {
      Err(eyre!("disk on fire"))
    }

    fn delete(&self, _key: &str) -> Result<()> {
      Err(eyre!("disk on fire"))
    }

    fn keys(&self) -> Result<Vec<String>> {
      Err(eyre!("disk on fire"))
    }
  }

  #[test]
  fn test_storage_errors_fail_open() {
    let cache = LocalCache::new(BrokenStore, Arc::new(ManualClock::at_epoch()));
    cache.set("k", &items(&["a"]));
    assert!(cache.get::<Item>("k").is_none());
    cache.invalidate("k");
    assert_eq!(cache.invalidate_by_prefix("k"), 0);
  }
}
