//! Local list cache for read-mostly data (customers, products).
//!
//! This module provides an entity-agnostic caching mechanism that:
//! - Stores whole lists under a scoped key with a TTL (12 hours by default)
//! - Deletes expired entries lazily, on the read that notices them
//! - Supports invalidation by exact key or by key prefix (e.g. a whole tenant)
//! - Never fails the caller on storage errors; they read as a cache miss

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{EntryInfo, LocalCache, DEFAULT_TTL_HOURS};
pub use traits::{CacheResult, CacheSource, Cacheable, QueryKey};
