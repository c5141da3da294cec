pub mod api_types;
pub mod cache;
pub mod cached_client;
pub mod client;
pub mod types;

use color_eyre::Result;
use std::future::Future;

use api_types::SyncSalesRequest;
use types::{CreatedSale, SaleData, SyncOutcome};

/// The write side of the backend that the offline queue talks to.
pub trait SalesApi: Send + Sync {
  /// Submit a single sale.
  fn create_sale(
    &self,
    tenant: &str,
    sale: &SaleData,
  ) -> impl Future<Output = Result<CreatedSale>> + Send;

  /// Submit previously failed sales in one batch.
  fn sync_sales(
    &self,
    tenant: &str,
    request: &SyncSalesRequest,
  ) -> impl Future<Output = Result<SyncOutcome>> + Send;
}
