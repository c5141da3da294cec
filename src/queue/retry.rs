//! Submission with offline fallback, and batch retry of pending sales.

use color_eyre::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::pending::PendingSale;
use super::store::SaleQueue;
use crate::api::api_types::SyncSalesRequest;
use crate::api::cache::PosQueryKey;
use crate::api::types::{CreatedSale, FailureKind, SaleData, SyncOutcome};
use crate::api::SalesApi;
use crate::cache::CacheLayer;
use crate::clock::Clock;
use crate::db::KvStore;
use crate::notify::{Notice, Notifier};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 7;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Failed attempts after which a sale is dropped
  pub max_attempts: u32,
  /// Settle time before an automatic retry
  pub retry_delay: Duration,
  /// Drop sales the backend rejected for a non-transient reason without waiting for the ceiling
  pub drop_permanent_failures: bool,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: DEFAULT_MAX_ATTEMPTS,
      retry_delay: DEFAULT_RETRY_DELAY,
      drop_permanent_failures: false,
    }
  }
}

/// What one `retry_all` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
  /// Another retry was already running; nothing was done
  pub skipped_in_flight: bool,
  /// Sales sent in the batch
  pub attempted: usize,
  /// Confirmed by the backend and removed
  pub synced: Vec<String>,
  /// Failed and kept, with their new attempt count
  pub retrying: Vec<(String, u32)>,
  /// Failed for the last time and removed
  pub exhausted: Vec<String>,
  /// Sent but not mentioned in the response; left as they were
  pub untouched: Vec<String>,
  /// Why the whole batch failed, if it did
  pub batch_error: Option<String>,
}

impl RetryReport {
  pub fn in_flight() -> Self {
    Self {
      skipped_in_flight: true,
      ..Self::default()
    }
  }
}

/// Result of submitting a sale live.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
  /// The backend accepted it
  Submitted(CreatedSale),
  /// The backend could not be reached or refused it; it waits in the queue
  Queued(PendingSale),
}

enum Decision {
  Keep(PendingSale),
  Drop { attempts: u32 },
}

/// Drives delivery of sales: live first, queued on failure, batch-retried later.
pub struct SaleSync<S: KvStore, A: SalesApi> {
  api: A,
  queue: Arc<SaleQueue<S>>,
  cache: CacheLayer<S>,
  notifier: Arc<dyn Notifier>,
  clock: Arc<dyn Clock>,
  policy: RetryPolicy,
  in_flight: Mutex<()>,
}

impl<S: KvStore, A: SalesApi> SaleSync<S, A> {
  pub fn new(
    api: A,
    queue: Arc<SaleQueue<S>>,
    cache: CacheLayer<S>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
  ) -> Self {
    Self {
      api,
      queue,
      cache,
      notifier,
      clock,
      policy: RetryPolicy::default(),
      in_flight: Mutex::new(()),
    }
  }

  pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn policy(&self) -> &RetryPolicy {
    &self.policy
  }

  pub fn queue(&self) -> &SaleQueue<S> {
    &self.queue
  }

  /// Submit a sale; if that fails for any reason, keep it for retry.
  ///
  /// Errors only when the sale could neither be submitted nor saved locally.
  pub async fn submit(&self, tenant: &str, sale: SaleData) -> Result<SubmitOutcome> {
    match self.api.create_sale(tenant, &sale).await {
      Ok(created) => {
        info!(tenant, id = ?created.id, "Sale created");
        self.invalidate_dependent_caches(tenant);
        Ok(SubmitOutcome::Submitted(created))
      }
      Err(e) => {
        let reason = e.to_string();
        warn!(tenant, error = reason.as_str(), "Sale submission failed, queueing");

        let pending = PendingSale::new(sale, tenant, self.clock.now());
        self.queue.enqueue(pending.clone())?;

        self.notifier.notify(Notice::SavedOffline {
          id: pending.id.clone(),
          reason,
        });
        Ok(SubmitOutcome::Queued(pending))
      }
    }
  }

  /// Send every pending sale of `tenant` in one batch and reconcile the queue.
  ///
  /// Never fails: storage and network errors are logged, counted against
  /// the sales, and reported in the returned `RetryReport`.
  pub async fn retry_all(&self, tenant: &str) -> RetryReport {
    let Ok(_guard) = self.in_flight.try_lock() else {
      debug!(tenant, "Retry already in flight, skipping");
      return RetryReport::in_flight();
    };

    let pending = self.queue.pending(tenant);
    if pending.is_empty() {
      debug!(tenant, "No pending sales");
      return RetryReport::default();
    }

    info!(tenant, count = pending.len(), "Retrying pending sales");
    self.notifier.notify(Notice::SyncStarted {
      count: pending.len(),
    });

    let request = SyncSalesRequest::from_pending(&pending);
    match self.api.sync_sales(tenant, &request).await {
      Ok(outcome) => self.apply_outcome(tenant, pending, outcome),
      Err(e) => self.apply_batch_failure(pending, e.to_string()),
    }
  }

  fn apply_outcome(
    &self,
    tenant: &str,
    pending: Vec<PendingSale>,
    outcome: SyncOutcome,
  ) -> RetryReport {
    let mut report = RetryReport {
      attempted: pending.len(),
      ..RetryReport::default()
    };
    debug!(message = outcome.message.as_str(), "Sync response");

    let synced: HashSet<&str> = outcome.synced.iter().map(String::as_str).collect();
    let failed: HashSet<&str> = outcome.failed.iter().map(|f| f.id.as_str()).collect();
    let now = self.clock.now_millis();

    let mut updated = Vec::new();
    let mut removed: Vec<String> = outcome.synced.clone();

    for failure in &outcome.failed {
      let Some(sale) = pending.iter().find(|s| s.id == failure.id) else {
        continue;
      };

      match self.decide(sale.clone(), failure.kind, now) {
        Decision::Keep(sale) => {
          self.notifier.notify(Notice::RetryScheduled {
            id: sale.id.clone(),
            attempt: sale.attempt_count,
            reason: failure.reason.clone(),
          });
          report.retrying.push((sale.id.clone(), sale.attempt_count));
          updated.push(sale);
        }
        Decision::Drop { attempts } => {
          self.notifier.notify(Notice::Exhausted {
            id: sale.id.clone(),
            attempts,
            reason: failure.reason.clone(),
          });
          report.exhausted.push(sale.id.clone());
          removed.push(sale.id.clone());
        }
      }
    }

    report.untouched = pending
      .iter()
      .filter(|s| !synced.contains(s.id.as_str()) && !failed.contains(s.id.as_str()))
      .map(|s| s.id.clone())
      .collect();

    if let Err(e) = self.queue.commit(&updated, &removed) {
      warn!(error = %e, "Failed to update pending sales after sync");
    }

    if !outcome.synced.is_empty() {
      self.invalidate_dependent_caches(tenant);
      self.notifier.notify(Notice::Synced {
        count: outcome.synced.len(),
      });
    }

    info!(
      synced = outcome.synced.len(),
      retrying = report.retrying.len(),
      exhausted = report.exhausted.len(),
      untouched = report.untouched.len(),
      "Sync finished"
    );
    report.synced = outcome.synced;
    report
  }

  fn apply_batch_failure(&self, pending: Vec<PendingSale>, reason: String) -> RetryReport {
    warn!(error = reason.as_str(), count = pending.len(), "Sync call failed");

    let mut report = RetryReport {
      attempted: pending.len(),
      ..RetryReport::default()
    };
    let now = self.clock.now_millis();
    let mut updated = Vec::new();
    let mut removed = Vec::new();

    for sale in pending {
      let id = sale.id.clone();
      match self.decide(sale, FailureKind::Retryable, now) {
        Decision::Keep(sale) => {
          report.retrying.push((id, sale.attempt_count));
          updated.push(sale);
        }
        Decision::Drop { attempts } => {
          self.notifier.notify(Notice::Exhausted {
            id: id.clone(),
            attempts,
            reason: reason.clone(),
          });
          report.exhausted.push(id.clone());
          removed.push(id);
        }
      }
    }

    if let Err(e) = self.queue.commit(&updated, &removed) {
      warn!(error = %e, "Failed to update pending sales after failed sync");
    }

    self.notifier.notify(Notice::BatchFailed {
      retrying: updated.len(),
      dropped: removed.len(),
      reason: reason.clone(),
    });

    report.batch_error = Some(reason);
    report
  }

  fn decide(&self, mut sale: PendingSale, kind: FailureKind, now: i64) -> Decision {
    if kind == FailureKind::Permanent && self.policy.drop_permanent_failures {
      return Decision::Drop {
        attempts: sale.attempt_count.saturating_add(1),
      };
    }

    sale.record_failure(now);
    if sale.attempt_count >= self.policy.max_attempts {
      Decision::Drop {
        attempts: sale.attempt_count,
      }
    } else {
      Decision::Keep(sale)
    }
  }

  /// Sales move stock, so cached product lists of the tenant are stale.
  fn invalidate_dependent_caches(&self, tenant: &str) {
    let removed = self
      .cache
      .invalidate_by_prefix(&PosQueryKey::products_prefix(tenant));
    debug!(tenant, removed, "Invalidated product caches after sale");
  }
}
