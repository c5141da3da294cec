//! Offline sale queue.
//!
//! A sale that cannot be submitted live is kept in the key-value store under
//! `pending_sales` and later sent with the rest of its tenant's backlog in one
//! batch call. Each failed attempt is counted against the sale; a sale that
//! reaches the ceiling is dropped and the operator is told.

mod pending;
mod retry;
mod store;

pub use pending::{format_time_ago, PendingSale, PendingStatus};
pub use retry::{RetryPolicy, RetryReport, SaleSync, SubmitOutcome, DEFAULT_MAX_ATTEMPTS};
pub use store::SaleQueue;

#[cfg(test)]
pub(crate) fn test_sale() -> crate::api::types::SaleData {
  use crate::api::types::{CartItem, SaleData};

  SaleData {
    cart_items: vec![CartItem {
      variant_id: "v1".to_string(),
      quantity: 1,
    }],
    location_id: "loc1".to_string(),
    customer_id: None,
    payment_method: "CASH".to_string(),
    payment_status: Some("PAID".to_string()),
    discount_amount: None,
    cash_drawer_id: None,
    notes: None,
    enable_stock_tracking: true,
  }
}
