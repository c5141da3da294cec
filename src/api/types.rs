use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Customer record as kept in the list cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
  pub id: String,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub loyalty_points: Option<i64>,
  /// Fields we don't model, kept so the cached record round-trips
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// Product record as kept in the list cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
  pub id: String,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sku: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub barcode: Option<String>,
  #[serde(default = "default_true")]
  pub is_active: bool,
  #[serde(default)]
  pub variants: Vec<ProductVariant>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductVariant {
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub price: Option<f64>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

fn default_true() -> bool {
  true
}

/// One line of a sale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
  pub variant_id: String,
  pub quantity: u32,
}

/// Sale transaction body, as submitted to the backend and as kept in the offline queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleData {
  pub cart_items: Vec<CartItem>,
  pub location_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub customer_id: Option<String>,
  pub payment_method: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub payment_status: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub discount_amount: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cash_drawer_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
  #[serde(default)]
  pub enable_stock_tracking: bool,
}

impl SaleData {
  /// Reject sales the backend could never accept, before they reach the queue.
  pub fn validate(&self) -> Result<()> {
    if self.cart_items.is_empty() {
      return Err(eyre!("Sale has no cart items"));
    }
    if let Some(item) = self
      .cart_items
      .iter()
      .find(|i| i.variant_id.trim().is_empty() || i.quantity == 0)
    {
      return Err(eyre!(
        "Invalid cart item (variant '{}', quantity {})",
        item.variant_id,
        item.quantity
      ));
    }
    if self.location_id.trim().is_empty() {
      return Err(eyre!("Sale has no location"));
    }
    if self.payment_method.trim().is_empty() {
      return Err(eyre!("Sale has no payment method"));
    }
    if let Some(discount) = self.discount_amount {
      if !discount.is_finite() || discount < 0.0 {
        return Err(eyre!("Invalid discount amount {}", discount));
      }
    }
    Ok(())
  }
}

/// Sale accepted by the backend
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedSale {
  pub id: Option<String>,
}

/// Whether a per-sale sync failure is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
  Retryable,
  /// The backend rejected the sale itself; resending it unchanged won't help
  Permanent,
}

impl FailureKind {
  const PERMANENT_MARKERS: &'static [&'static str] = &[
    "invalid",
    "validation",
    "not found",
    "insufficient",
    "out of stock",
    "duplicate",
    "already",
  ];

  pub fn classify(reason: &str) -> Self {
    let reason = reason.to_lowercase();
    if Self::PERMANENT_MARKERS.iter().any(|m| reason.contains(m)) {
      FailureKind::Permanent
    } else {
      FailureKind::Retryable
    }
  }
}

/// A sale the backend refused during batch sync
#[derive(Debug, Clone, PartialEq)]
pub struct SyncFailure {
  pub id: String,
  pub reason: String,
  pub kind: FailureKind,
}

/// Validated batch sync response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncOutcome {
  pub message: String,
  pub synced: Vec<String>,
  pub failed: Vec<SyncFailure>,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sale() -> SaleData {
    SaleData {
      cart_items: vec![CartItem {
        variant_id: "v1".to_string(),
        quantity: 2,
      }],
      location_id: "loc1".to_string(),
      customer_id: None,
      payment_method: "CASH".to_string(),
      payment_status: None,
      discount_amount: None,
      cash_drawer_id: None,
      notes: None,
      enable_stock_tracking: true,
    }
  }

  #[test]
  fn test_sale_wire_format() {
    let json = serde_json::to_value(sale()).unwrap();
    assert_eq!(json["cartItems"][0]["variantId"], "v1");
    assert_eq!(json["locationId"], "loc1");
    assert_eq!(json["enableStockTracking"], true);
    assert!(json.get("customerId").is_none());
  }

  #[test]
  fn test_validate() {
    assert!(sale().validate().is_ok());

    let mut empty = sale();
    empty.cart_items.clear();
    assert!(empty.validate().is_err());

    let mut zero = sale();
    zero.cart_items[0].quantity = 0;
    assert!(zero.validate().is_err());

    let mut discount = sale();
    discount.discount_amount = Some(-1.0);
    assert!(discount.validate().is_err());
  }

  #[test]
  fn test_unknown_product_fields_survive() {
    let raw = r#"{"id":"p1","name":"Sourdough","brand":"House","variants":[{"id":"v1","price":4.5,"stock":3}]}"#;
    let product: Product = serde_json::from_str(raw).unwrap();
    assert!(product.is_active);
    assert_eq!(product.extra["brand"], "House");

    let back = serde_json::to_value(&product).unwrap();
    assert_eq!(back["variants"][0]["stock"], 3);
  }

  #[test]
  fn test_classify_failure_reason() {
    assert_eq!(
      FailureKind::classify("Insufficient stock for variant v1"),
      FailureKind::Permanent
    );
    assert_eq!(
      FailureKind::classify("Validation failed: locationId"),
      FailureKind::Permanent
    );
    assert_eq!(
      FailureKind::classify("database timeout"),
      FailureKind::Retryable
    );
  }
}
