//! The message queue and its channel workers.
//!
//! ## Storage layout
//!
//! - `queue:{channel}:{priority}`: list of message JSON, consumed from the head
//! - `queue:{channel}:dlq`: list of [`DeadLetter`] JSON

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use courier_audit::{AuditEventBuilder, AuditRecorder, AuditStatus};
use courier_config::{FeatureGate, capabilities};
use courier_core::{Backoff, Ema, RateLimiter, generate_id};
use courier_store::{DynStore, StoreHandle};
use dashmap::{DashMap, DashSet};
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use crate::{
    DeadLetter, DynHandler, Message, MessageHandler, NewMessage, Priority, QueueConfig,
    QueueError, QueueResult, QueueStats,
};

fn queue_key(channel: &str, priority: Priority) -> String {
    format!("queue:{channel}:{}", priority.as_str())
}

fn dlq_key(channel: &str) -> String {
    format!("queue:{channel}:dlq")
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!("courier_queue_messages_total", "outcome" => outcome).increment(1);
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
    handler: DynHandler,
}

#[derive(Default)]
struct Counters {
    processed: u64,
    failed: u64,
    dead_letter: u64,
    processing_time: Ema,
}

struct Inner {
    config: QueueConfig,
    gate: Arc<dyn FeatureGate>,
    store: StoreHandle,
    audit: Option<AuditRecorder>,
    limiter: RateLimiter,
    backoff: Backoff,
    workers: DashMap<String, Worker>,
    channels: DashSet<String>,
    counters: Mutex<Counters>,
}

/// Priority message queue. Cheap to clone; clones share workers and stats.
#[derive(Clone)]
pub struct MessageQueue {
    inner: Arc<Inner>,
}

impl MessageQueue {
    pub fn new(
        config: QueueConfig,
        gate: Arc<dyn FeatureGate>,
        store: StoreHandle,
        audit: Option<AuditRecorder>,
    ) -> Self {
        let limiter = RateLimiter::new(config.rate_limit_max, config.rate_limit_window());
        let backoff = config.backoff();
        Self {
            inner: Arc::new(Inner {
                config,
                gate,
                store,
                audit,
                limiter,
                backoff,
                workers: DashMap::new(),
                channels: DashSet::new(),
                counters: Mutex::new(Counters::default()),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &StoreHandle {
        &self.inner.store
    }

    /// Accept a message and return its id.
    ///
    /// Fails only with [`QueueError::RateLimited`] (nothing persisted) or
    /// [`QueueError::InvalidMessage`] for a missing producer id. When the
    /// queue is gated off or the store cannot take the message, it is handed
    /// once to this process's handler for the channel instead.
    pub async fn enqueue(&self, request: NewMessage) -> QueueResult<String> {
        if request.producer_id.is_empty() {
            return Err(QueueError::invalid_message("producer id is required"));
        }
        if request.channel.is_empty() {
            return Err(QueueError::invalid_message("channel is required"));
        }

        let decision = self.inner.limiter.check(&request.producer_id);
        if !decision.allowed {
            record_outcome("rate_limited");
            tracing::debug!(producer_id = %request.producer_id, "Enqueue rate limited");
            return Err(QueueError::RateLimited {
                producer_id: request.producer_id,
                retry_after: decision.retry_after,
            });
        }

        let message = Message {
            id: generate_id(),
            producer_id: request.producer_id,
            channel: request.channel,
            kind: request.kind,
            payload: request.payload,
            priority: request.priority.unwrap_or_default(),
            created_at: OffsetDateTime::now_utc(),
            retry_count: 0,
            max_retries: request.max_retries.unwrap_or(self.inner.config.max_retries),
            last_error: None,
        };
        let id = message.id.clone();

        if !self.inner.gate.is_enabled(capabilities::QUEUE) {
            self.deliver_direct(message, "queue disabled");
            return Ok(id);
        }
        let Some(store) = self.inner.store.current() else {
            self.deliver_direct(message, "store not connected");
            return Ok(id);
        };

        if let Err(e) = self.persist(&store, &message).await {
            tracing::warn!(channel = %message.channel, error = %e, "Failed to persist message");
            self.deliver_direct(message, "persist failed");
            return Ok(id);
        }

        self.inner.channels.insert(message.channel.clone());
        record_outcome("enqueued");
        self.audit(&message, "queue.enqueue", AuditStatus::Success, None);
        Ok(id)
    }

    async fn persist(&self, store: &DynStore, message: &Message) -> QueueResult<()> {
        let json = serde_json::to_string(message)?;
        store
            .rpush(&queue_key(&message.channel, message.priority), &[json])
            .await?;
        Ok(())
    }

    /// One-shot delivery without retry or dead-lettering.
    fn deliver_direct(&self, message: Message, reason: &'static str) {
        let handler = self
            .inner
            .workers
            .get(&message.channel)
            .map(|w| Arc::clone(&w.handler));

        let Some(handler) = handler else {
            tracing::warn!(
                channel = %message.channel,
                id = %message.id,
                reason,
                "No local handler for channel, message dropped"
            );
            record_outcome("dropped");
            return;
        };

        tracing::debug!(channel = %message.channel, id = %message.id, reason, "Delivering without queue");
        record_outcome("direct");
        let queue = self.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let result = run_handler(handler.as_ref(), &message).await;
            queue.record_attempt(started);
            match result {
                Ok(()) => {
                    queue.inner.counters.lock().processed += 1;
                    queue.audit(&message, "queue.process", AuditStatus::Success, None);
                }
                Err(error) => {
                    queue.inner.counters.lock().failed += 1;
                    tracing::warn!(channel = %message.channel, id = %message.id, %error, "Direct delivery failed");
                    queue.audit(&message, "queue.process", AuditStatus::Failure, Some(error.as_str()));
                }
            }
        });
    }

    /// Begin polling `channel`. Returns `false` when a worker is already running.
    pub fn start_worker(&self, channel: &str, handler: DynHandler) -> bool {
        let vacant = match self.inner.workers.entry(channel.to_string()) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(vacant) => vacant,
        };

        let (shutdown, mut rx) = watch::channel(false);
        let queue = self.clone();
        let worker_handler = Arc::clone(&handler);
        let worker_channel = channel.to_string();
        let period = self.inner.config.poll_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                        continue;
                    }
                    _ = ticker.tick() => {}
                }
                // Outside the select so a stop request never cancels a tick midway.
                queue.run_tick(&worker_channel, worker_handler.as_ref()).await;
            }
            tracing::info!(channel = %worker_channel, "Queue worker stopped");
        });

        vacant.insert(Worker {
            shutdown,
            handle,
            handler,
        });
        self.inner.channels.insert(channel.to_string());
        tracing::info!(channel, interval_ms = period.as_millis() as u64, "Queue worker started");
        true
    }

    /// Stop polling `channel`. An in-flight tick finishes normally. Returns
    /// `false` when no worker was running.
    pub fn stop_worker(&self, channel: &str) -> bool {
        match self.inner.workers.remove(channel) {
            Some((_, worker)) => {
                let _ = worker.shutdown.send(true);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, channel: &str) -> bool {
        self.inner.workers.contains_key(channel)
    }

    /// Run one poll tick for `channel`: up to `batch_size` messages from each
    /// priority list, urgent first. Returns the number of messages handled.
    pub async fn run_tick(&self, channel: &str, handler: &dyn MessageHandler) -> usize {
        let Some(store) = self.inner.store.current() else {
            return 0;
        };
        let batch = self.inner.config.batch_size.max(1);
        let mut handled = 0;

        for priority in Priority::ALL {
            let key = queue_key(channel, priority);
            let raw = match store.lpop(&key, batch).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(channel, %priority, error = %e, "Queue poll failed");
                    return handled;
                }
            };

            for item in raw {
                match serde_json::from_str::<Message>(&item) {
                    Ok(message) => {
                        self.process(message, handler).await;
                        handled += 1;
                    }
                    Err(e) => {
                        tracing::warn!(channel, %priority, error = %e, "Discarding undecodable message");
                        self.inner.counters.lock().failed += 1;
                        record_outcome("undecodable");
                    }
                }
            }
        }

        handled
    }

    async fn process(&self, message: Message, handler: &dyn MessageHandler) {
        let started = Instant::now();
        let result = run_handler(handler, &message).await;
        self.record_attempt(started);

        match result {
            Ok(()) => {
                self.inner.counters.lock().processed += 1;
                record_outcome("processed");
                self.audit(&message, "queue.process", AuditStatus::Success, None);
            }
            Err(error) => {
                self.inner.counters.lock().failed += 1;
                record_outcome("failed");
                self.handle_failure(message, error).await;
            }
        }
    }

    fn record_attempt(&self, started: Instant) {
        let elapsed = started.elapsed();
        metrics::histogram!("courier_queue_processing_seconds").record(elapsed.as_secs_f64());
        self.inner
            .counters
            .lock()
            .processing_time
            .record(elapsed.as_secs_f64() * 1000.0);
    }

    async fn handle_failure(&self, mut message: Message, error: String) {
        let attempts = message.retry_count.saturating_add(1);
        message.retry_count = attempts.min(message.max_retries);
        message.last_error = Some(error.clone());

        if attempts < message.max_retries {
            let delay = self.inner.backoff.delay_for_retry(message.retry_count);
            tracing::debug!(
                channel = %message.channel,
                id = %message.id,
                retry_count = message.retry_count,
                delay_ms = delay.as_millis() as u64,
                "Scheduling retry"
            );
            record_outcome("retried");
            self.audit(&message, "queue.retry", AuditStatus::Warning, Some(error.as_str()));

            let queue = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let Some(store) = queue.inner.store.current() else {
                    tracing::error!(channel = %message.channel, id = %message.id, "Store gone, retry lost");
                    return;
                };
                if let Err(e) = queue.persist(&store, &message).await {
                    tracing::error!(channel = %message.channel, id = %message.id, error = %e, "Retry re-enqueue failed, message lost");
                }
            });
            return;
        }

        self.dead_letter(message, error).await;
    }

    async fn dead_letter(&self, message: Message, error: String) {
        let channel = message.channel.clone();
        let id = message.id.clone();
        let entry = DeadLetter {
            message,
            error,
            failed_at: OffsetDateTime::now_utc(),
        };

        let written = match (self.inner.store.current(), serde_json::to_string(&entry)) {
            (Some(store), Ok(json)) => store.rpush(&dlq_key(&channel), &[json]).await.map_err(QueueError::from),
            (None, _) => Err(QueueError::Store(courier_store::StoreError::NotConnected)),
            (_, Err(e)) => Err(QueueError::from(e)),
        };
        if let Err(e) = written {
            tracing::error!(channel = %channel, id = %id, error = %e, "Failed to write dead letter");
        }

        self.inner.counters.lock().dead_letter += 1;
        record_outcome("dead_lettered");
        tracing::warn!(channel = %channel, id = %id, retry_count = entry.message.retry_count, "Message dead-lettered");
        self.audit(
            &entry.message,
            "queue.dead_letter",
            AuditStatus::Failure,
            Some(entry.error.as_str()),
        );
    }

    /// Up to `limit` dead letters of `channel`, oldest first.
    pub async fn dead_letters(&self, channel: &str, limit: usize) -> Vec<DeadLetter> {
        let Some(store) = self.inner.store.current() else {
            return Vec::new();
        };
        if limit == 0 {
            return Vec::new();
        }

        match store.lrange(&dlq_key(channel), 0, limit as isize - 1).await {
            Ok(raw) => raw
                .iter()
                .filter_map(|item| match serde_json::from_str(item) {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        tracing::warn!(channel, error = %e, "Skipping undecodable dead letter");
                        None
                    }
                })
                .collect(),
            Err(e) => {
                tracing::warn!(channel, error = %e, "Failed to read dead letters");
                Vec::new()
            }
        }
    }

    /// Move every dead letter of `channel` back onto its priority list with a
    /// fresh retry budget. Returns the number requeued.
    pub async fn requeue_dead_letters(&self, channel: &str) -> usize {
        let Some(store) = self.inner.store.current() else {
            return 0;
        };
        match self.requeue_from(&store, channel).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(channel, error = %e, "Requeue of dead letters failed");
                0
            }
        }
    }

    /// Each entry is written back to its priority list before it leaves the
    /// dead-letter list, so a failure midway leaves the rest in place.
    async fn requeue_from(&self, store: &DynStore, channel: &str) -> QueueResult<usize> {
        let key = dlq_key(channel);
        let raw = store.lrange(&key, 0, -1).await?;
        if raw.is_empty() {
            return Ok(0);
        }

        let mut requeued = 0;
        for item in raw {
            let entry: DeadLetter = match serde_json::from_str(&item) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(channel, error = %e, "Dropping undecodable dead letter");
                    if let Err(e) = store.lrem(&key, 1, &item).await {
                        tracing::warn!(channel, error = %e, "Failed to drop undecodable dead letter");
                    }
                    continue;
                }
            };

            let mut message = entry.message;
            message.retry_count = 0;
            if let Err(e) = self.persist(store, &message).await {
                tracing::warn!(
                    channel,
                    id = %message.id,
                    requeued,
                    error = %e,
                    "Requeue stopped, remaining dead letters kept"
                );
                break;
            }
            self.audit(&message, "queue.requeue", AuditStatus::Success, None);
            record_outcome("requeued");
            requeued += 1;

            match store.lrem(&key, 1, &item).await {
                Ok(0) => {
                    tracing::debug!(channel, id = %message.id, "Dead letter already requeued elsewhere");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        channel,
                        id = %message.id,
                        error = %e,
                        "Requeued dead letter could not be removed, stopping"
                    );
                    break;
                }
            }
        }

        if requeued > 0 {
            self.inner.channels.insert(channel.to_string());
        }
        tracing::info!(channel, requeued, "Dead letters requeued");
        Ok(requeued)
    }

    /// Messages waiting in the four priority lists of `channel`.
    pub async fn queue_depth(&self, channel: &str) -> u64 {
        let Some(store) = self.inner.store.current() else {
            return 0;
        };
        let mut depth = 0;
        for priority in Priority::ALL {
            match store.llen(&queue_key(channel, priority)).await {
                Ok(len) => depth += len,
                Err(e) => {
                    tracing::warn!(channel, error = %e, "Failed to read queue depth");
                    return 0;
                }
            }
        }
        depth
    }

    pub async fn stats(&self) -> QueueStats {
        let channels: Vec<String> = self.inner.channels.iter().map(|c| c.key().clone()).collect();
        let mut queue_depth = 0;
        for channel in &channels {
            queue_depth += self.queue_depth(channel).await;
        }

        let counters = self.inner.counters.lock();
        QueueStats {
            total_processed: counters.processed,
            total_failed: counters.failed,
            total_dead_letter: counters.dead_letter,
            average_processing_time: counters.processing_time.value(),
            queue_depth,
            active_workers: self.inner.workers.len(),
        }
    }

    /// Stop every worker and wait for in-flight ticks to finish.
    pub async fn shutdown(&self) {
        let channels: Vec<String> = self.inner.workers.iter().map(|w| w.key().clone()).collect();
        let mut handles = Vec::with_capacity(channels.len());
        for channel in channels {
            if let Some((_, worker)) = self.inner.workers.remove(&channel) {
                let _ = worker.shutdown.send(true);
                handles.push(worker.handle);
            }
        }
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Queue worker ended abnormally");
            }
        }
    }

    fn audit(&self, message: &Message, action: &str, status: AuditStatus, error: Option<&str>) {
        let Some(audit) = &self.inner.audit else {
            return;
        };
        let mut builder = AuditEventBuilder::new(action, "queue")
            .actor(message.producer_id.as_str())
            .resource_id(message.id.as_str())
            .status(status)
            .meta("channel", message.channel.as_str())
            .meta("priority", message.priority.as_str())
            .meta("type", message.kind.as_str())
            .meta("retryCount", message.retry_count);
        if let Some(error) = error {
            builder = builder.meta("error", error);
        }
        audit.log(builder.build());
    }
}

/// Run the handler, turning errors and panics into the failure text.
async fn run_handler(handler: &dyn MessageHandler, message: &Message) -> Result<(), String> {
    match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(format!("handler panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
