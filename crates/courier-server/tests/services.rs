//! Service wiring without an external store.

use std::sync::Arc;
use std::time::Duration;

use courier_audit::{AuditEventBuilder, AuditFilter};
use courier_config::{AlwaysEnabled, SharedFeatureFlags};
use courier_queue::{Message, NewMessage, handler_fn};
use courier_server::{AppConfig, Services};
use courier_store::{BackingStore, StoreError};
use serde_json::json;

fn services(config: AppConfig) -> Services {
    Services::new(config, Arc::new(AlwaysEnabled))
}

#[tokio::test]
async fn test_components_work_before_initialize() {
    let services = services(AppConfig::default());
    assert!(!services.store().is_attached());

    services.cache().set("k", &json!({"v": 1}), None, &[]).await;
    assert_eq!(
        services.cache().get::<serde_json::Value>("k").await,
        Some(json!({"v": 1}))
    );

    let id = services
        .queue()
        .enqueue(NewMessage::new("p1", "jobs", "job.created", json!({})))
        .await
        .unwrap();
    assert!(!id.is_empty());

    let event = services
        .audit()
        .log(AuditEventBuilder::new("user.login", "session").build());
    assert!(!event.is_empty());
    assert_eq!(services.audit().buffered(), 1);
}

#[tokio::test]
async fn test_initialize_attaches_memory_store() {
    let services = services(AppConfig::default());
    services.initialize().await.unwrap();

    assert!(services.store().is_attached());
    assert!(services.audit().is_running());
    assert!(services.is_retention_running());
    assert!(services.cache().is_shared_tier_available().await);

    services.shutdown().await;
    assert!(!services.audit().is_running());
    assert!(!services.is_retention_running());
}

#[tokio::test]
async fn test_initialize_without_fallback_stays_degraded() {
    let mut config = AppConfig::default();
    config.redis.memory_fallback = false;
    let services = services(config);

    let err = services.initialize().await.unwrap_err();
    assert!(matches!(err, StoreError::Unavailable { .. }));
    assert!(!services.store().is_attached());
    assert!(services.audit().is_running());

    services.shutdown().await;
}

#[tokio::test]
async fn test_queue_transitions_reach_audit_trail() {
    let services = Services::new(
        AppConfig::default(),
        Arc::new(SharedFeatureFlags::default()),
    );
    services.initialize().await.unwrap();

    let handler = handler_fn(|_msg: Message| async { Ok(()) });
    services
        .queue()
        .enqueue(NewMessage::new("producer-7", "emails", "email.send", json!({"to": "x"})))
        .await
        .unwrap();
    assert_eq!(services.queue().run_tick("emails", handler.as_ref()).await, 1);

    services.shutdown().await;

    let events = services
        .audit()
        .query(&AuditFilter::actor("producer-7"))
        .await;
    let actions: Vec<&str> = events.iter().map(|e| e.action.as_str()).collect();
    assert!(actions.contains(&"queue.enqueue"));
    assert!(actions.contains(&"queue.process"));
}

#[tokio::test(start_paused = true)]
async fn test_retention_task_trims_expired_audit_days() {
    let mut config = AppConfig::default();
    config.audit.flush_interval_ms = 7 * 24 * 60 * 60 * 1000;
    let services = services(config);
    services.initialize().await.unwrap();

    // 2020-01-01T00:00:00Z, far outside the 90 day window
    let old_ms = 1_577_836_800_000_f64;
    let store = services.store().current().unwrap();
    store.zadd("audit:days", "2020-01-01", old_ms).await.unwrap();
    store
        .zadd("audit:day:2020-01-01", r#"{"id":"old"}"#, old_ms)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(24 * 60 * 60 + 1)).await;

    let left = store
        .zrevrangebyscore("audit:day:2020-01-01", f64::INFINITY, f64::NEG_INFINITY, 0, 10)
        .await
        .unwrap();
    assert!(left.is_empty());
    assert!(services.is_retention_running());

    services.shutdown().await;
}
