//! # courier-store
//!
//! Key-value, list, set and sorted-set contract shared by the queue, cache
//! and audit components.
//!
//! Components never own a connection directly. They read a [`StoreHandle`]
//! per call, so a store attached after construction is picked up immediately
//! and a detached handle puts them back into store-less (degraded) mode.

pub mod config;
pub mod connect;
pub mod error;
pub mod handle;
pub mod memory;
pub mod redis_store;
pub mod traits;

use std::sync::Arc;

pub use config::RedisConfig;
pub use connect::connect;
pub use error::{ErrorCategory, StoreError};
pub use handle::StoreHandle;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use traits::{BackingStore, BatchOp};

/// Shared, dynamically dispatched store.
pub type DynStore = Arc<dyn BackingStore>;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
