//! Audit trail recorder.
//!
//! ## Storage layout
//!
//! | Key | Type | Contents |
//! |-----|------|----------|
//! | `audit:day:{YYYY-MM-DD}` | sorted set | event JSON scored by timestamp ms |
//! | `audit:actor:{actorId}` | sorted set | same, per actor |
//! | `audit:action:{action}` | sorted set | same, per action |
//! | `audit:days` | sorted set | day names scored by day start ms |
//! | `audit:actors`, `audit:actions` | set | index registries for cleanup |

use std::collections::VecDeque;
use std::sync::Arc;

use courier_config::{FeatureGate, capabilities};
use courier_core::{day_bucket, day_start_millis, generate_id, to_millis};
use courier_store::{BatchOp, DynStore, StoreHandle};
use parking_lot::Mutex;
use time::{Duration as TimeDuration, OffsetDateTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use crate::{
    AuditConfig, AuditEvent, AuditFilter, AuditResult, ExportFormat, NewAuditEvent, Redactor,
    export,
};

const DAYS_KEY: &str = "audit:days";
const ACTORS_KEY: &str = "audit:actors";
const ACTIONS_KEY: &str = "audit:actions";
const DAY_MS: i64 = 86_400_000;

fn day_key(day: &str) -> String {
    format!("audit:day:{day}")
}

fn actor_key(actor: &str) -> String {
    format!("audit:actor:{actor}")
}

fn action_key(action: &str) -> String {
    format!("audit:action:{action}")
}

struct FlushTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    config: AuditConfig,
    gate: Arc<dyn FeatureGate>,
    store: StoreHandle,
    redactor: Redactor,
    buffer: Mutex<VecDeque<AuditEvent>>,
    flush_lock: tokio::sync::Mutex<()>,
    task: Mutex<Option<FlushTask>>,
}

/// Buffered, redacting audit recorder. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AuditRecorder {
    inner: Arc<Inner>,
}

impl AuditRecorder {
    pub fn new(config: AuditConfig, gate: Arc<dyn FeatureGate>, store: StoreHandle) -> Self {
        let redactor = Redactor::new(&config.sensitive_fields);
        Self {
            inner: Arc::new(Inner {
                config,
                gate,
                store,
                redactor,
                buffer: Mutex::new(VecDeque::new()),
                flush_lock: tokio::sync::Mutex::new(()),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &AuditConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &StoreHandle {
        &self.inner.store
    }

    /// Events waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.inner.buffer.lock().len()
    }

    /// Redact and buffer `event`. Returns its id, or an empty string when
    /// auditing is gated off. Never blocks on the store.
    pub fn log(&self, event: NewAuditEvent) -> String {
        if !self.inner.gate.is_enabled(capabilities::AUDIT) {
            return String::new();
        }

        let event = AuditEvent {
            id: generate_id(),
            timestamp: OffsetDateTime::now_utc(),
            actor_id: event.actor_id,
            actor_email: event.actor_email,
            ip_address: event.ip_address,
            action: event.action,
            resource: event.resource,
            resource_id: event.resource_id,
            status: event.status,
            metadata: self.inner.redactor.redact(event.metadata),
            compliant: self.inner.config.compliance_mode,
        };
        let id = event.id.clone();

        let dropped = {
            let mut buffer = self.inner.buffer.lock();
            buffer.push_back(event);
            trim_front(&mut buffer, self.inner.config.max_buffer_size)
        };
        if dropped > 0 {
            tracing::warn!(dropped, "Audit buffer full, dropped oldest events");
            metrics::counter!("courier_audit_events_total", "outcome" => "dropped")
                .increment(dropped as u64);
        }
        metrics::counter!("courier_audit_events_total", "outcome" => "buffered").increment(1);

        id
    }

    /// Write every buffered event to the store in one batch. Returns the
    /// number written; on failure the batch goes back to the front of the buffer.
    pub async fn flush(&self) -> usize {
        let _guard = self.inner.flush_lock.lock().await;

        let Some(store) = self.inner.store.current() else {
            return 0;
        };

        let batch: Vec<AuditEvent> = self.inner.buffer.lock().drain(..).collect();
        if batch.is_empty() {
            return 0;
        }

        let ops = self.index_ops(&batch);
        match store.apply_batch(ops).await {
            Ok(()) => {
                tracing::debug!(count = batch.len(), "Audit events flushed");
                metrics::counter!("courier_audit_events_total", "outcome" => "flushed")
                    .increment(batch.len() as u64);
                batch.len()
            }
            Err(e) => {
                tracing::warn!(error = %e, count = batch.len(), "Audit flush failed, will retry");
                metrics::counter!("courier_audit_flush_failures_total").increment(1);
                let dropped = {
                    let mut buffer = self.inner.buffer.lock();
                    for event in batch.into_iter().rev() {
                        buffer.push_front(event);
                    }
                    trim_front(&mut buffer, self.inner.config.max_buffer_size)
                };
                if dropped > 0 {
                    tracing::warn!(dropped, "Audit buffer full after failed flush");
                }
                0
            }
        }
    }

    fn index_ops(&self, events: &[AuditEvent]) -> Vec<BatchOp> {
        let retention = self.inner.config.retention();
        let mut ops = Vec::with_capacity(events.len() * 6);

        for event in events {
            let member = match serde_json::to_string(event) {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!(id = %event.id, error = %e, "Skipping unserializable audit event");
                    continue;
                }
            };
            let score = to_millis(event.timestamp) as f64;
            let day = day_bucket(event.timestamp);

            let mut indexes = vec![day_key(&day), action_key(&event.action)];
            if let Some(actor) = &event.actor_id {
                indexes.push(actor_key(actor));
                ops.push(BatchOp::SAdd {
                    key: ACTORS_KEY.to_string(),
                    members: vec![actor.clone()],
                });
            }
            ops.push(BatchOp::SAdd {
                key: ACTIONS_KEY.to_string(),
                members: vec![event.action.clone()],
            });
            ops.push(BatchOp::ZAdd {
                key: DAYS_KEY.to_string(),
                member: day,
                score: day_start_millis(event.timestamp) as f64,
            });

            for key in indexes {
                ops.push(BatchOp::ZAdd {
                    key: key.clone(),
                    member: member.clone(),
                    score,
                });
                ops.push(BatchOp::Expire { key, ttl: retention });
            }
        }

        ops
    }

    /// Events matching `filter`, newest first, at most `filter.limit`
    /// (default `default_query_limit`). Empty on any store failure.
    pub async fn query(&self, filter: &AuditFilter) -> Vec<AuditEvent> {
        let Some(store) = self.inner.store.current() else {
            return Vec::new();
        };
        let limit = filter
            .limit
            .unwrap_or(self.inner.config.default_query_limit)
            .min(self.inner.config.export_max);
        if limit == 0 {
            return Vec::new();
        }

        match self.query_store(&store, filter, limit).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, "Audit query failed");
                Vec::new()
            }
        }
    }

    async fn query_store(
        &self,
        store: &DynStore,
        filter: &AuditFilter,
        limit: usize,
    ) -> AuditResult<Vec<AuditEvent>> {
        let mut found = Vec::new();

        // Most selective index first: actor, then action, then day buckets.
        let index = filter
            .actor_id
            .as_deref()
            .map(actor_key)
            .or_else(|| filter.action.as_deref().map(action_key));

        if let Some(key) = index {
            let max = filter.end_time.map_or(f64::INFINITY, |t| to_millis(t) as f64);
            let min = filter
                .start_time
                .map_or(f64::NEG_INFINITY, |t| to_millis(t) as f64);
            self.scan_index(store, &key, max, min, filter, limit, &mut found)
                .await?;
            return Ok(found);
        }

        let end = filter.end_time.unwrap_or_else(OffsetDateTime::now_utc);
        let start = filter.start_time.unwrap_or_else(|| {
            end - TimeDuration::days(i64::from(self.inner.config.query_lookback_days))
        });
        if start > end {
            return Ok(found);
        }

        let (max, min) = (to_millis(end) as f64, to_millis(start) as f64);
        let first_day = day_start_millis(start);
        let mut day = end;
        while day_start_millis(day) >= first_day && found.len() < limit {
            self.scan_index(store, &day_key(&day_bucket(day)), max, min, filter, limit, &mut found)
                .await?;
            day -= TimeDuration::days(1);
        }

        Ok(found)
    }

    #[allow(clippy::too_many_arguments)]
    async fn scan_index(
        &self,
        store: &DynStore,
        key: &str,
        max: f64,
        min: f64,
        filter: &AuditFilter,
        limit: usize,
        found: &mut Vec<AuditEvent>,
    ) -> AuditResult<()> {
        let page_size = self.inner.config.query_page_size.max(1);
        let mut offset = 0;

        while found.len() < limit {
            let page = store
                .zrevrangebyscore(key, max, min, offset, page_size)
                .await?;
            let exhausted = page.len() < page_size;
            offset += page.len();

            for member in page {
                match serde_json::from_str::<AuditEvent>(&member) {
                    Ok(event) if event.matches(filter) => {
                        found.push(event);
                        if found.len() >= limit {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(key, error = %e, "Skipping undecodable audit entry"),
                }
            }

            if exhausted {
                break;
            }
        }

        Ok(())
    }

    /// Query results (capped at `export_max`) rendered as `format`.
    /// An empty result renders as `[]` / header-only CSV.
    pub async fn export(&self, filter: &AuditFilter, format: ExportFormat) -> String {
        let cap = self.inner.config.export_max;
        let filter = AuditFilter {
            limit: Some(filter.limit.unwrap_or(cap).min(cap)),
            ..filter.clone()
        };
        let events = self.query(&filter).await;

        match export::render(&events, format) {
            Ok(out) => out,
            Err(e) => {
                tracing::warn!(error = %e, ?format, "Audit export failed");
                match format {
                    ExportFormat::Json => "[]".to_string(),
                    ExportFormat::Csv => export::CSV_HEADER.join(",") + "\n",
                }
            }
        }
    }

    /// Remove index entries older than the retention window. Returns the
    /// number of events removed from the day indexes.
    pub async fn cleanup(&self) -> usize {
        let Some(store) = self.inner.store.current() else {
            return 0;
        };
        let cutoff = OffsetDateTime::now_utc()
            - TimeDuration::days(i64::from(self.inner.config.retention_days));

        match self.cleanup_store(&store, to_millis(cutoff)).await {
            Ok(removed) => {
                tracing::info!(removed, "Audit retention cleanup finished");
                removed
            }
            Err(e) => {
                tracing::warn!(error = %e, "Audit retention cleanup failed");
                0
            }
        }
    }

    async fn cleanup_store(&self, store: &DynStore, cutoff_ms: i64) -> AuditResult<usize> {
        let older = (cutoff_ms - 1) as f64;
        let mut removed = 0u64;

        let days = store
            .zrevrangebyscore(DAYS_KEY, cutoff_ms as f64, f64::NEG_INFINITY, 0, usize::MAX)
            .await?;
        for day in &days {
            removed += store
                .zremrangebyscore(&day_key(day), f64::NEG_INFINITY, older)
                .await?;
        }
        // Days that ended before the cutoff are now empty
        store
            .zremrangebyscore(DAYS_KEY, f64::NEG_INFINITY, (cutoff_ms - DAY_MS) as f64)
            .await?;

        for (registry, key_of) in [
            (ACTORS_KEY, actor_key as fn(&str) -> String),
            (ACTIONS_KEY, action_key as fn(&str) -> String),
        ] {
            let mut emptied = Vec::new();
            for name in store.smembers(registry).await? {
                let key = key_of(&name);
                store.zremrangebyscore(&key, f64::NEG_INFINITY, older).await?;
                let remaining = store
                    .zrevrangebyscore(&key, f64::INFINITY, f64::NEG_INFINITY, 0, 1)
                    .await?;
                if remaining.is_empty() {
                    emptied.push(name);
                }
            }
            store.srem(registry, &emptied).await?;
        }

        Ok(removed as usize)
    }

    /// Start the periodic flush task. Calling again while running is a no-op.
    pub fn start(&self) {
        let mut task = self.inner.task.lock();
        if task.is_some() {
            return;
        }

        let (shutdown, mut rx) = watch::channel(false);
        let recorder = self.clone();
        let period = self.inner.config.flush_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        recorder.flush().await;
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        tracing::info!(interval_ms = period.as_millis() as u64, "Audit flush task started");
        *task = Some(FlushTask { shutdown, handle });
    }

    pub fn is_running(&self) -> bool {
        self.inner.task.lock().is_some()
    }

    /// Stop the flush task and flush whatever is still buffered.
    pub async fn shutdown(&self) -> usize {
        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            let _ = task.shutdown.send(true);
            if let Err(e) = task.handle.await {
                tracing::warn!(error = %e, "Audit flush task ended abnormally");
            }
            tracing::info!("Audit flush task stopped");
        }
        self.flush().await
    }
}

/// Drop the oldest events beyond `max`. Returns how many were dropped.
fn trim_front(buffer: &mut VecDeque<AuditEvent>, max: usize) -> usize {
    let excess = buffer.len().saturating_sub(max);
    buffer.drain(..excess);
    excess
}
