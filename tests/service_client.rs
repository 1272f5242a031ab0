//! End-to-end tests against mock HTTP backends.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use template_client::config::{ClientConfig, OperationOverride};
use template_client::resilience::CircuitState;
use template_client::upstream::{Operation, TransportError};
use template_client::{ClientError, ServiceClient, Source};

mod common;
use common::MockRequest;

fn config_for(addr: SocketAddr) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.upstream.base_url = format!("http://{}", addr);
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 20;
    config
}

/// Backend that records every request and answers from `respond`.
async fn recording_backend<F>(respond: F) -> (SocketAddr, Arc<Mutex<Vec<MockRequest>>>)
where
    F: Fn(u32, &MockRequest) -> (u16, String) + Send + Sync + 'static,
{
    let seen = Arc::new(Mutex::new(Vec::new()));
    let count = Arc::new(AtomicU32::new(0));
    let respond = Arc::new(respond);
    let log = seen.clone();
    let addr = common::start_programmable_backend(move |req| {
        let n = count.fetch_add(1, Ordering::SeqCst);
        let reply = respond(n, &req);
        log.lock().unwrap().push(req);
        async move { reply }
    })
    .await;
    (addr, seen)
}

#[tokio::test]
async fn test_categories_fetched_once_then_cached() {
    let (addr, seen) = recording_backend(|_, _| (200, r#"["Homework","Chores"]"#.into())).await;
    let client = ServiceClient::new(config_for(addr)).unwrap();

    let first = client.list_categories().await.unwrap();
    assert_eq!(first.source, Source::Upstream);
    assert_eq!(first.data, json!(["Homework", "Chores"]));

    let second = client.list_categories().await.unwrap();
    assert_eq!(second.source, Source::Cache);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "GET");
    assert_eq!(seen[0].target, "/api/templates/categories");
    assert!(seen[0].header("x-request-id").is_some());
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let (addr, seen) = recording_backend(|n, _| {
        if n < 2 {
            (503, r#"{"error":"warming up"}"#.into())
        } else {
            (200, r#"[{"id":"t-1"}]"#.into())
        }
    })
    .await;
    let client = ServiceClient::new(config_for(addr)).unwrap();

    let served = client.list_popular(5).await.unwrap();
    assert_eq!(served.source, Source::Upstream);
    assert_eq!(served.data, json!([{ "id": "t-1" }]));
    assert_eq!(seen.lock().unwrap().len(), 3);
    assert_eq!(seen.lock().unwrap()[0].target, "/api/templates/popular?limit=5");

    let metrics = client.metrics();
    assert_eq!(metrics.retries, 2);
    assert_eq!(metrics.successes, 1);
    assert_eq!(client.circuit_state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_client_errors_surface_without_retry() {
    let (addr, seen) = recording_backend(|_, _| (422, r#"{"error":"title required"}"#.into())).await;
    let client = ServiceClient::new(config_for(addr)).unwrap();

    let result = client
        .create_template("user-1", json!({ "category": "Chores" }))
        .await;
    match result {
        Err(ClientError::Upstream(TransportError::Status { status, body })) => {
            assert_eq!(status, 422);
            assert!(body.contains("title required"));
        }
        other => panic!("expected 422, got {:?}", other),
    }

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].target, "/api/templates");
    assert_eq!(seen[0].json()["user_id"], "user-1");
    assert!(seen[0].header("idempotency-key").is_none());
}

#[tokio::test]
async fn test_deduplicated_writes_reuse_idempotency_key() {
    let (addr, seen) = recording_backend(|n, _| {
        if n == 0 {
            (503, "{}".into())
        } else {
            (201, r#"{"id":"t-9"}"#.into())
        }
    })
    .await;
    let mut config = config_for(addr);
    config.retry.retry_non_idempotent = true;
    let client = ServiceClient::new(config).unwrap();

    let created = client
        .generate_from_query("user-1", "birthday party checklist")
        .await
        .unwrap();
    assert_eq!(created, json!({ "id": "t-9" }));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    let first = seen[0].header("idempotency-key").map(str::to_string);
    assert!(first.is_some());
    assert_eq!(first.as_deref(), seen[1].header("idempotency-key"));
    assert_eq!(seen[1].json()["query"], "birthday party checklist");
}

#[tokio::test]
async fn test_unreachable_upstream_opens_circuit_and_serves_fallback() {
    let addr = common::unused_addr().await;
    let mut config = config_for(addr);
    config.retry.attempts = 0;
    config.circuit_breaker.failure_threshold = 2;
    let client = ServiceClient::new(config).unwrap();

    for _ in 0..2 {
        let served = client.list_categories().await.unwrap();
        assert_eq!(served.source, Source::Fallback);
    }
    assert_eq!(client.circuit_state(), CircuitState::Open);

    let served = client.list_categories().await.unwrap();
    assert_eq!(served.source, Source::Fallback);
    assert_eq!(served.data, json!(client.config().fallback.categories));
    assert_eq!(client.metrics().circuit_rejections, 1);

    assert!(matches!(
        client.generate_from_query("user-1", "chores").await,
        Err(ClientError::CircuitOpen)
    ));
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let addr = common::start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        (200, "[]".to_string())
    })
    .await;
    let mut config = config_for(addr);
    config.retry.attempts = 0;
    config.operations.insert(
        Operation::Search,
        OperationOverride {
            timeout_ms: Some(100),
            ..Default::default()
        },
    );
    let client = ServiceClient::new(config).unwrap();

    let served = client.search("user-1", "volcano project").await.unwrap();
    assert_eq!(served.source, Source::Fallback);
    assert_eq!(client.metrics().failures, 1);
    assert_eq!(client.health().consecutive_failures, 1);
}

#[tokio::test]
async fn test_query_parameters_are_encoded() {
    let (addr, seen) = recording_backend(|_, _| (200, "[]".into())).await;
    let client = ServiceClient::new(config_for(addr)).unwrap();

    client.list_templates_by_category("Meal Planning").await.unwrap();
    client.search("user-1", "fractions & decimals").await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].target, "/api/templates?category=Meal+Planning");
    assert_eq!(seen[1].target, "/api/research/search?q=fractions+%26+decimals");
}

#[tokio::test]
async fn test_fill_posts_fields() {
    let (addr, seen) = recording_backend(|_, _| (200, r#"{"rendered":"Sam's chores"}"#.into())).await;
    let client = ServiceClient::new(config_for(addr)).unwrap();

    let filled = client
        .fill_template("user-1", "t-42", json!({ "child": "Sam" }))
        .await
        .unwrap();
    assert_eq!(filled["rendered"], "Sam's chores");

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].target, "/api/templates/t-42/fill");
    assert_eq!(seen[0].json()["fields"]["child"], "Sam");
}

#[tokio::test]
async fn test_dot_segments_are_not_resolved_into_other_endpoints() {
    let (addr, seen) = recording_backend(|_, _| (200, "[]".into())).await;
    let client = ServiceClient::new(config_for(addr)).unwrap();

    assert!(matches!(client.list_caller_templates("..").await, Err(ClientError::Validation(_))));
    assert!(matches!(client.list_caller_templates("%2e%2e").await, Err(ClientError::Validation(_))));
    assert!(matches!(
        client.fill_template("user-1", "..", json!({ "child": "Sam" })).await,
        Err(ClientError::Validation(_))
    ));

    client.list_caller_templates("user.1").await.unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].target, "/api/templates/user/user.1");
}

#[tokio::test]
async fn test_calls_after_shutdown_are_refused() {
    let addr = common::start_mock_backend("[]").await;
    let client = ServiceClient::init(config_for(addr)).unwrap();

    client.list_popular(3).await.unwrap();
    client.shutdown().await;
    client.shutdown().await;

    assert!(matches!(client.list_popular(3).await, Err(ClientError::ShutDown)));
    assert_eq!(client.health().cache_entries, 0);
}
