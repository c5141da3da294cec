//! Caching implementations for point-of-sale list types.

use crate::cache::{Cacheable, QueryKey};

use super::types::{Customer, Product};

// ============================================================================
// Cacheable implementations
// ============================================================================

impl Cacheable for Customer {
  fn entity_type() -> &'static str {
    "customer"
  }
}

impl Cacheable for Product {
  fn entity_type() -> &'static str {
    "product"
  }
}

// ============================================================================
// Query key types
// ============================================================================

/// Scope segment used for product lists fetched without a location.
const NO_LOCATION: &str = "no-location";

/// Cache keys for list endpoints.
///
/// Tenant and location segments are escaped so they never contain `_`,
/// and every key ends in a scope segment (`_all`, `_{location}`). So
/// `{entity}_{tenant}_` matches one tenant's entries and never a tenant
/// whose id merely starts with the same characters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PosQueryKey {
  /// All customers of a tenant
  Customers { tenant: String },
  /// Products of a tenant, with stock for one location or none
  Products {
    tenant: String,
    location: Option<String>,
  },
}

/// Form-encode a key segment, then escape `_` so it can't act as a separator.
fn segment(raw: &str) -> String {
  url::form_urlencoded::byte_serialize(raw.as_bytes())
    .collect::<String>()
    .replace('_', "%5F")
}

impl PosQueryKey {
  /// Prefix covering every customer list of a tenant
  pub fn customers_prefix(tenant: &str) -> String {
    format!("customers_{}_", segment(tenant))
  }

  /// Prefix covering every product list of a tenant, across locations
  pub fn products_prefix(tenant: &str) -> String {
    format!("products_{}_", segment(tenant))
  }

  /// Prefixes covering everything cached for a tenant
  pub fn tenant_prefixes(tenant: &str) -> [String; 2] {
    [Self::customers_prefix(tenant), Self::products_prefix(tenant)]
  }
}

impl QueryKey for PosQueryKey {
  fn cache_key(&self) -> String {
    match self {
      Self::Customers { tenant } => format!("{}all", Self::customers_prefix(tenant)),
      Self::Products { tenant, location } => format!(
        "{}{}",
        Self::products_prefix(tenant),
        location.as_deref().map(segment).as_deref().unwrap_or(NO_LOCATION)
      ),
    }
  }

  fn description(&self) -> String {
    match self {
      Self::Customers { tenant } => format!("customers of {}", tenant),
      Self::Products { tenant, location } => match location {
        Some(l) => format!("products of {} at location {}", tenant, l),
        None => format!("products of {}", tenant),
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_keys() {
    let customers = PosQueryKey::Customers {
      tenant: "T1".to_string(),
    };
    assert_eq!(customers.cache_key(), "customers_T1_all");

    let products = PosQueryKey::Products {
      tenant: "T1".to_string(),
      location: Some("loc9".to_string()),
    };
    assert_eq!(products.cache_key(), "products_T1_loc9");

    let unscoped = PosQueryKey::Products {
      tenant: "T1".to_string(),
      location: None,
    };
    assert_eq!(unscoped.cache_key(), "products_T1_no-location");
  }

  #[test]
  fn test_prefix_does_not_leak_across_tenants() {
    let other = PosQueryKey::Products {
      tenant: "T10".to_string(),
      location: None,
    };
    assert!(!other
      .cache_key()
      .starts_with(&PosQueryKey::products_prefix("T1")));

    let own = PosQueryKey::Customers {
      tenant: "T1".to_string(),
    };
    assert!(own
      .cache_key()
      .starts_with(&PosQueryKey::customers_prefix("T1")));
  }

  #[test]
  fn test_underscore_tenants_do_not_share_prefixes() {
    let longer = PosQueryKey::Products {
      tenant: "org_1_east".to_string(),
      location: Some("loc".to_string()),
    };
    assert_eq!(longer.cache_key(), "products_org%5F1%5Feast_loc");
    assert!(!longer
      .cache_key()
      .starts_with(&PosQueryKey::products_prefix("org_1")));

    let customers = PosQueryKey::Customers {
      tenant: "org_1_east".to_string(),
    };
    assert!(!customers
      .cache_key()
      .starts_with(&PosQueryKey::customers_prefix("org_1")));
  }

  #[test]
  fn test_location_segment_is_escaped() {
    let key = PosQueryKey::Products {
      tenant: "org_1".to_string(),
      location: Some("back room_2".to_string()),
    };
    assert_eq!(key.cache_key(), "products_org%5F1_back+room%5F2");
    assert!(key
      .cache_key()
      .starts_with(&PosQueryKey::products_prefix("org_1")));
  }
}
