//! Durable list of pending sales.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};

use super::pending::PendingSale;
use crate::clock::Clock;
use crate::db::KvStore;

/// Store key holding the JSON array of pending sales.
pub const QUEUE_KEY: &str = "pending_sales";

/// Pending sales of every tenant, stored as one JSON array.
///
/// Each mutation is a read-modify-write of the whole array, serialized
/// within this process by `lock`. Another process sharing the same store
/// can still lose updates.
pub struct SaleQueue<S: KvStore> {
  store: S,
  clock: Arc<dyn Clock>,
  lock: Mutex<()>,
}

impl<S: KvStore> SaleQueue<S> {
  pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
    Self {
      store,
      clock,
      lock: Mutex::new(()),
    }
  }

  /// Every pending sale, across tenants, oldest first.
  pub fn all(&self) -> Vec<PendingSale> {
    self.load()
  }

  /// Pending sales of one tenant.
  pub fn pending(&self, tenant: &str) -> Vec<PendingSale> {
    self
      .load()
      .into_iter()
      .filter(|s| s.tenant_id == tenant)
      .collect()
  }

  pub fn count(&self, tenant: &str) -> usize {
    self.pending(tenant).len()
  }

  /// Append a sale, or replace the one with the same id.
  pub fn enqueue(&self, sale: PendingSale) -> Result<()> {
    let id = sale.id.clone();
    self.update(|sales| match sales.iter_mut().find(|s| s.id == sale.id) {
      Some(existing) => *existing = sale,
      None => sales.push(sale),
    })?;
    debug!(id = id.as_str(), "Pending sale saved");
    Ok(())
  }

  /// Remove one sale. Returns how many entries were removed (0 or 1).
  pub fn dequeue(&self, id: &str) -> Result<usize> {
    self.dequeue_many(&[id.to_string()])
  }

  /// Remove sales by id. Returns how many entries were removed.
  pub fn dequeue_many(&self, ids: &[String]) -> Result<usize> {
    if ids.is_empty() {
      return Ok(0);
    }
    let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
    self.update(|sales| {
      let before = sales.len();
      sales.retain(|s| !ids.contains(s.id.as_str()));
      before - sales.len()
    })
  }

  /// Apply the result of a retry in one write: overwrite `updated` entries
  /// that are still queued, and drop `removed` ones.
  ///
  /// An updated sale that was dequeued meanwhile stays gone.
  pub fn commit(&self, updated: &[PendingSale], removed: &[String]) -> Result<()> {
    if updated.is_empty() && removed.is_empty() {
      return Ok(());
    }
    let removed: HashSet<&str> = removed.iter().map(String::as_str).collect();
    self.update(|sales| {
      sales.retain(|s| !removed.contains(s.id.as_str()));
      for sale in updated {
        if let Some(existing) = sales.iter_mut().find(|s| s.id == sale.id) {
          *existing = sale.clone();
        }
      }
    })
  }

  fn update<R>(&self, f: impl FnOnce(&mut Vec<PendingSale>) -> R) -> Result<R> {
    let _guard = self
      .lock
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut sales = self.load();
    let result = f(&mut sales);
    self.save(&sales)?;
    Ok(result)
  }

  fn save(&self, sales: &[PendingSale]) -> Result<()> {
    let json = serde_json::to_string(sales)
      .map_err(|e| eyre!("Failed to serialize pending sales: {}", e))?;
    self
      .store
      .set(QUEUE_KEY, &json)
      .map_err(|e| eyre!("Failed to save pending sales: {}", e))
  }

  /// Read the queue. Unreadable data is moved aside and reads as empty.
  fn load(&self) -> Vec<PendingSale> {
    let raw = match self.store.get(QUEUE_KEY) {
      Ok(Some(raw)) => raw,
      Ok(None) => return Vec::new(),
      Err(e) => {
        error!(error = %e, "Error reading pending sales");
        return Vec::new();
      }
    };

    match serde_json::from_str(&raw) {
      Ok(sales) => sales,
      Err(e) => {
        let backup = format!("{}.corrupt.{}", QUEUE_KEY, self.clock.now_millis());
        warn!(error = %e, backup = backup.as_str(), "Pending sales unreadable, moving aside");
        match self.store.set(&backup, &raw) {
          Ok(()) => {
            if let Err(e) = self.store.delete(QUEUE_KEY) {
              warn!(error = %e, "Failed to clear unreadable pending sales");
            }
          }
          Err(e) => error!(error = %e, "Failed to back up unreadable pending sales"),
        }
        Vec::new()
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::db::{Database, MemoryStore};
  use crate::queue::test_sale;
  use chrono::DateTime;

  fn queue() -> (SaleQueue<Arc<MemoryStore>>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let queue = SaleQueue::new(Arc::clone(&store), Arc::new(ManualClock::at_epoch()));
    (queue, store)
  }

  fn sale(id: &str, tenant: &str) -> PendingSale {
    let mut sale = PendingSale::new(test_sale(), tenant, DateTime::default());
    sale.id = id.to_string();
    sale
  }

  #[test]
  fn test_enqueue_and_scope_by_tenant() {
    let (queue, _) = queue();
    queue.enqueue(sale("a", "T1")).unwrap();
    queue.enqueue(sale("b", "T2")).unwrap();
    queue.enqueue(sale("c", "T1")).unwrap();

    let ids: Vec<String> = queue.pending("T1").into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["a", "c"]);
    assert_eq!(queue.count("T2"), 1);
    assert_eq!(queue.all().len(), 3);
  }

  #[test]
  fn test_enqueue_same_id_replaces() {
    let (queue, _) = queue();
    queue.enqueue(sale("a", "T1")).unwrap();

    let mut again = sale("a", "T1");
    again.attempt_count = 3;
    queue.enqueue(again).unwrap();

    let all = queue.all();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].attempt_count, 3);
  }

  #[test]
  fn test_dequeue() {
    let (queue, _) = queue();
    queue.enqueue(sale("a", "T1")).unwrap();
    queue.enqueue(sale("b", "T1")).unwrap();
    queue.enqueue(sale("c", "T1")).unwrap();

    assert_eq!(queue.dequeue("b").unwrap(), 1);
    assert_eq!(queue.dequeue("b").unwrap(), 0);
    assert_eq!(
      queue
        .dequeue_many(&["a".to_string(), "zzz".to_string()])
        .unwrap(),
      1
    );
    let ids: Vec<String> = queue.all().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["c"]);
  }

  #[test]
  fn test_commit_does_not_resurrect_removed_sales() {
    let (queue, _) = queue();
    queue.enqueue(sale("a", "T1")).unwrap();
    queue.enqueue(sale("b", "T1")).unwrap();

    let mut a = sale("a", "T1");
    a.attempt_count = 1;
    let mut gone = sale("gone", "T1");
    gone.attempt_count = 1;

    queue.commit(&[a, gone], &["b".to_string()]).unwrap();

    let all = queue.all();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, "a");
    assert_eq!(all[0].attempt_count, 1);
  }

  #[test]
  fn test_reads_queue_written_by_web_client() {
    let (queue, store) = queue();
    store
      .set(
        QUEUE_KEY,
        r#"[{"id":"pending_1_abcdefghi","data":{"cartItems":[{"variantId":"v","quantity":2}],"locationId":"l","paymentMethod":"CASH","enableStockTracking":true},"organizationId":"T1","timestamp":1,"retryCount":2}]"#,
      )
      .unwrap();

    let pending = queue.pending("T1");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempt_count, 2);
    assert_eq!(pending[0].payload.cart_items[0].quantity, 2);
  }

  #[test]
  fn test_corrupt_queue_is_moved_aside() {
    let (queue, store) = queue();
    store.set(QUEUE_KEY, "[{broken").unwrap();

    assert!(queue.all().is_empty());
    assert_eq!(store.get("pending_sales.corrupt.0").unwrap().as_deref(), Some("[{broken"));

    queue.enqueue(sale("a", "T1")).unwrap();
    assert_eq!(queue.all().len(), 1);
    assert_eq!(store.get("pending_sales.corrupt.0").unwrap().as_deref(), Some("[{broken"));
  }

  #[test]
  fn test_survives_reopen_on_sqlite() {
    let dir = std::env::temp_dir().join(format!("possync-queue-{}", uuid::Uuid::new_v4()));
    let path = dir.join("store.db");

    {
      let db = Database::open(Some(&path)).unwrap();
      let queue = SaleQueue::new(db, Arc::new(ManualClock::at_epoch()));
      queue.enqueue(sale("a", "T1")).unwrap();
    }

    let db = Database::open(Some(&path)).unwrap();
    let queue = SaleQueue::new(db, Arc::new(ManualClock::at_epoch()));
    assert_eq!(queue.count("T1"), 1);

    let _ = std::fs::remove_dir_all(&dir);
  }
}
