use parking_lot::RwLock;
use std::sync::Arc;

use crate::{DynStore, StoreError, StoreResult};

/// Cloneable slot holding the store currently in use, if any.
///
/// Every clone sees the same slot. Readers clone the `Arc` out before
/// awaiting, so no lock is held across a store call.
#[derive(Clone, Default)]
pub struct StoreHandle {
    slot: Arc<RwLock<Option<DynStore>>>,
}

impl StoreHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: DynStore) -> Self {
        let handle = Self::new();
        handle.attach(store);
        handle
    }

    /// Attach `store`, replacing any previous one.
    pub fn attach(&self, store: DynStore) {
        tracing::debug!(backend = store.backend_name(), "Store attached");
        *self.slot.write() = Some(store);
    }

    /// Return to store-less mode. Returns the store that was attached.
    pub fn detach(&self) -> Option<DynStore> {
        self.slot.write().take()
    }

    pub fn current(&self) -> Option<DynStore> {
        self.slot.read().clone()
    }

    /// The attached store, or [`StoreError::NotConnected`].
    pub fn require(&self) -> StoreResult<DynStore> {
        self.current().ok_or(StoreError::NotConnected)
    }

    pub fn is_attached(&self) -> bool {
        self.slot.read().is_some()
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field(
                "backend",
                &self.slot.read().as_ref().map(|s| s.backend_name()),
            )
            .finish()
    }
}
