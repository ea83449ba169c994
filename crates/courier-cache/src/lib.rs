//! # courier-cache
//!
//! Read-through cache with a bounded in-process tier (moka) in front of the
//! shared backing store.
//!
//! - Tier 1 holds decoded values with a short TTL and a capacity bound.
//! - Tier 2 holds [`CacheEntry`] envelopes under `cache:{key}`; large values
//!   are gzip-compressed.
//! - Tags index keys in `cache:tag:{tag}` sets for bulk invalidation.
//!
//! Tier 1 is never kept coherent with other instances: its staleness is
//! bounded by its own TTL.

pub mod cache;
pub mod compression;
pub mod config;
pub mod entry;
pub mod error;
pub mod legacy;

pub use cache::TwoTierCache;
pub use config::CacheConfig;
pub use entry::{CacheEntry, CacheStats};
pub use error::{CacheError, CacheResult};
pub use legacy::{DynLegacyCache, LegacyCache, LocalLegacyCache};
