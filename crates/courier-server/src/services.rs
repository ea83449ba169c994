//! The service objects shared by every call site of one process.

use std::sync::Arc;
use std::time::Duration;

use courier_audit::AuditRecorder;
use courier_cache::{DynLegacyCache, TwoTierCache};
use courier_config::FeatureGate;
use courier_queue::MessageQueue;
use courier_store::{StoreHandle, StoreResult};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use crate::AppConfig;

/// How often audit retention cleanup runs.
pub const RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

struct RetentionTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Audit recorder, message queue and two-tier cache sharing one store handle.
///
/// Construct once and pass by reference (or `Arc`) to call sites. Every
/// component is usable straight after [`Services::new`] in store-less mode;
/// [`Services::initialize`] attaches the backing store.
pub struct Services {
    config: AppConfig,
    gate: Arc<dyn FeatureGate>,
    store: StoreHandle,
    audit: AuditRecorder,
    queue: MessageQueue,
    cache: TwoTierCache,
    retention: Mutex<Option<RetentionTask>>,
}

impl Services {
    pub fn new(config: AppConfig, gate: Arc<dyn FeatureGate>) -> Self {
        Self::with_legacy(config, gate, None)
    }

    /// Like [`Services::new`], with a legacy cache the two-tier cache mirrors
    /// writes into and falls back to.
    pub fn with_legacy(
        config: AppConfig,
        gate: Arc<dyn FeatureGate>,
        legacy: Option<DynLegacyCache>,
    ) -> Self {
        let store = StoreHandle::new();
        let audit = AuditRecorder::new(config.audit.clone(), Arc::clone(&gate), store.clone());
        let queue = MessageQueue::new(
            config.queue.clone(),
            Arc::clone(&gate),
            store.clone(),
            Some(audit.clone()),
        );
        let cache = TwoTierCache::new(config.cache.clone(), Arc::clone(&gate), store.clone(), legacy);

        Self {
            config,
            gate,
            store,
            audit,
            queue,
            cache,
            retention: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn gate(&self) -> &Arc<dyn FeatureGate> {
        &self.gate
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn audit(&self) -> &AuditRecorder {
        &self.audit
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    pub fn cache(&self) -> &TwoTierCache {
        &self.cache
    }

    /// Connect and attach the backing store, then start the audit flush and
    /// retention tasks.
    ///
    /// The tasks start even when the store cannot be reached; the error is
    /// returned so the caller can decide whether degraded mode is acceptable.
    pub async fn initialize(&self) -> StoreResult<()> {
        let connected = courier_store::connect(&self.config.redis).await;
        match &connected {
            Ok(store) => {
                tracing::info!(backend = store.backend_name(), "Backing store attached");
                self.store.attach(Arc::clone(store));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Backing store unavailable, running degraded");
            }
        }

        self.audit.start();
        self.start_retention();

        connected.map(|_| ())
    }

    fn start_retention(&self) {
        let mut task = self.retention.lock();
        if task.is_some() {
            return;
        }

        let (shutdown, mut rx) = watch::channel(false);
        let audit = self.audit.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(RETENTION_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        audit.cleanup().await;
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        tracing::info!("Audit retention task started");
        *task = Some(RetentionTask { shutdown, handle });
    }

    pub fn is_retention_running(&self) -> bool {
        self.retention.lock().is_some()
    }

    /// Stop workers and background tasks, then flush the audit buffer.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;

        let task = self.retention.lock().take();
        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            if let Err(e) = task.handle.await {
                tracing::warn!(error = %e, "Retention task ended abnormally");
            }
        }

        let flushed = self.audit.shutdown().await;
        tracing::info!(flushed, "Services shut down");
    }
}
