use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::api_types::{SyncSaleItem, SyncSalesRequest};
use crate::api::types::SaleData;

/// A sale that failed to reach the backend and waits for a batch retry.
///
/// Serialized as `{"id", "data", "organizationId", "timestamp", "retryCount"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSale {
  /// Offline id, sent to the backend as idempotency token
  pub id: String,
  #[serde(rename = "data")]
  pub payload: SaleData,
  #[serde(rename = "organizationId")]
  pub tenant_id: String,
  /// Epoch ms; refreshed on every failed retry
  #[serde(rename = "timestamp")]
  pub created_at: i64,
  #[serde(rename = "retryCount", default)]
  pub attempt_count: u32,
}

/// Where a queued sale is in its retry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStatus {
  /// Never retried
  Created,
  /// Retried and failed this many times
  Retrying(u32),
}

impl PendingSale {
  pub fn new(payload: SaleData, tenant_id: &str, now: DateTime<Utc>) -> Self {
    Self {
      id: new_sale_id(now),
      payload,
      tenant_id: tenant_id.to_string(),
      created_at: now.timestamp_millis(),
      attempt_count: 0,
    }
  }

  pub fn status(&self) -> PendingStatus {
    match self.attempt_count {
      0 => PendingStatus::Created,
      n => PendingStatus::Retrying(n),
    }
  }

  /// Count one more failed attempt.
  pub fn record_failure(&mut self, now_millis: i64) {
    self.attempt_count = self.attempt_count.saturating_add(1);
    self.created_at = now_millis;
  }

  pub fn timestamp(&self) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(self.created_at)
  }
}

impl SyncSalesRequest {
  pub fn from_pending(sales: &[PendingSale]) -> Self {
    Self {
      sales: sales
        .iter()
        .map(|s| SyncSaleItem {
          id: s.id.clone(),
          sale: s.payload.clone(),
        })
        .collect(),
    }
  }
}

/// `pending_{epoch ms}_{9 random chars}`
pub fn new_sale_id(now: DateTime<Utc>) -> String {
  let random = Uuid::new_v4().simple().to_string();
  format!("pending_{}_{}", now.timestamp_millis(), &random[..9])
}

/// Coarse relative age, e.g. "5m ago".
pub fn format_time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
  let diff = now - then;
  if diff.num_days() > 0 {
    format!("{}d ago", diff.num_days())
  } else if diff.num_hours() > 0 {
    format!("{}h ago", diff.num_hours())
  } else if diff.num_minutes() > 0 {
    format!("{}m ago", diff.num_minutes())
  } else {
    "Just now".to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::queue::test_sale as sale_data;
  use chrono::Duration;

  #[test]
  fn test_sale_id_shape() {
    let now = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
    let id = new_sale_id(now);
    let parts: Vec<&str> = id.split('_').collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], "pending");
    assert_eq!(parts[1], "1700000000123");
    assert_eq!(parts[2].len(), 9);

    assert_ne!(new_sale_id(now), new_sale_id(now));
  }

  #[test]
  fn test_stored_layout() {
    let now = DateTime::from_timestamp_millis(42).unwrap();
    let sale = PendingSale::new(sale_data(), "org1", now);
    let json = serde_json::to_value(&sale).unwrap();
    assert_eq!(json["organizationId"], "org1");
    assert_eq!(json["timestamp"], 42);
    assert_eq!(json["retryCount"], 0);
    assert_eq!(json["data"]["locationId"], "loc1");
  }

  #[test]
  fn test_record_failure() {
    let mut sale = PendingSale::new(sale_data(), "org1", DateTime::default());
    assert_eq!(sale.status(), PendingStatus::Created);

    sale.record_failure(5_000);
    assert_eq!(sale.attempt_count, 1);
    assert_eq!(sale.created_at, 5_000);
    assert_eq!(sale.status(), PendingStatus::Retrying(1));
  }

  #[test]
  fn test_format_time_ago() {
    let now = DateTime::from_timestamp_millis(10 * 86_400_000).unwrap();
    assert_eq!(format_time_ago(now, now), "Just now");
    assert_eq!(format_time_ago(now - Duration::minutes(5), now), "5m ago");
    assert_eq!(format_time_ago(now - Duration::hours(3), now), "3h ago");
    assert_eq!(format_time_ago(now - Duration::days(2), now), "2d ago");
  }
}
