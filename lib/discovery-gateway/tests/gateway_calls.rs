//! End-to-end gateway calls against in-process downstream services.

mod support;

use async_trait::async_trait;
use discovery_core::{CallContext, MemoryRegistry, Registry, RegistryError};
use discovery_gateway::{
    CircuitBreakerConfig, GatewayError, GatewayMetrics, Metadata, MetadataGateway, Rating,
    RatingGateway, RatingValue, RecordId, RecordType, RequestSpec, RetryPolicy, ServiceGateway,
    TrafficPolicy, UserId,
};
use hyper::StatusCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use support::{dead_address, spawn_downstream, Reply};

const SOLARIS: &str = r#"{"metadata_id":42,"title":"Solaris","description":"Space station","director":"Andrei Tarkovsky","runtime":167}"#;

async fn registry_with(service: &str, addresses: &[String]) -> Arc<MemoryRegistry> {
    let registry = Arc::new(MemoryRegistry::new());
    for (i, address) in addresses.iter().enumerate() {
        registry
            .register(&CallContext::new(), service, &format!("{service}-{i}"), address)
            .await
            .unwrap();
    }
    registry
}

/// Registry whose backend is always down
#[derive(Default)]
struct UnreachableRegistry {
    lookups: AtomicUsize,
}

#[async_trait]
impl Registry for UnreachableRegistry {
    async fn register(&self, _: &CallContext, _: &str, _: &str, _: &str) -> discovery_core::Result<()> {
        Err(RegistryError::BackendUnavailable("connection refused".into()))
    }

    async fn deregister(&self, _: &CallContext, _: &str, _: &str) -> discovery_core::Result<()> {
        Err(RegistryError::BackendUnavailable("connection refused".into()))
    }

    async fn service_addresses(&self, _: &CallContext, _: &str) -> discovery_core::Result<Vec<String>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Err(RegistryError::BackendUnavailable("connection refused".into()))
    }

    async fn report_healthy_state(&self, _: &str, _: &str) -> discovery_core::Result<()> {
        Err(RegistryError::BackendUnavailable("connection refused".into()))
    }
}

fn fast_retries(max_retries: u32) -> TrafficPolicy {
    TrafficPolicy {
        retry: RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_get_movie_details() {
    let metadata = spawn_downstream(|_| Reply::ok(SOLARIS)).await;
    let registry = registry_with("metadata", &[metadata.address()]).await;
    let gateway = MetadataGateway::new(Arc::new(ServiceGateway::new(registry)));

    let details = gateway.get_movie_details(&CallContext::new(), 42).await.unwrap();
    assert_eq!(
        details,
        Metadata {
            metadata_id: 42,
            title: "Solaris".into(),
            description: "Space station".into(),
            director: "Andrei Tarkovsky".into(),
            runtime: 167,
        }
    );

    let requests = metadata.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/metadata");
    assert_eq!(requests[0].query.get("id").map(String::as_str), Some("42"));
}

#[tokio::test]
async fn test_not_found_is_distinct() {
    let metadata = spawn_downstream(|_| {
        Reply::new(StatusCode::NOT_FOUND, r#"{"error":"metadata not found"}"#)
    })
    .await;
    let registry = registry_with("metadata", &[metadata.address()]).await;
    let gateway = MetadataGateway::new(Arc::new(ServiceGateway::new(registry)));

    let err = gateway.get_movie_details(&CallContext::new(), 404).await.unwrap_err();
    assert_eq!(err, GatewayError::NotFound);
}

#[tokio::test]
async fn test_server_error_carries_envelope_message() {
    let rating = spawn_downstream(|_| {
        Reply::new(StatusCode::INTERNAL_SERVER_ERROR, r#"{"error":"internal server error"}"#)
    })
    .await;
    let registry = registry_with("rating", &[rating.address()]).await;
    let gateway = RatingGateway::new(Arc::new(ServiceGateway::new(registry)));

    let err = gateway
        .get_aggregated_rating(&CallContext::new(), RecordId(1), &RecordType::movie())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        GatewayError::UpstreamError {
            status: 500,
            message: "internal server error".into()
        }
    );
}

#[tokio::test]
async fn test_malformed_body() {
    let rating = spawn_downstream(|_| Reply::ok("not a number")).await;
    let registry = registry_with("rating", &[rating.address()]).await;
    let gateway = RatingGateway::new(Arc::new(ServiceGateway::new(registry)));

    let err = gateway
        .get_aggregated_rating(&CallContext::new(), RecordId(1), &RecordType::movie())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::MalformedResponse(_)), "{err:?}");
}

#[tokio::test]
async fn test_rating_gateway_round_trip() {
    let rating = spawn_downstream(|req| match req.method.as_str() {
        "GET" => Reply::ok("4.5"),
        _ => Reply::new(StatusCode::OK, ""),
    })
    .await;
    let registry = registry_with("rating", &[rating.address()]).await;
    let gateway = RatingGateway::new(Arc::new(ServiceGateway::new(registry)));
    let ctx = CallContext::new();

    let value = gateway
        .get_aggregated_rating(&ctx, RecordId(7), &RecordType::movie())
        .await
        .unwrap();
    assert_eq!(value, 4.5);

    let new_rating = Rating {
        record_id: RecordId(7),
        record_type: RecordType::movie(),
        user_id: UserId("alice".into()),
        value: RatingValue(5),
    };
    gateway
        .put_rating(&ctx, RecordId(7), &RecordType::movie(), &new_rating)
        .await
        .unwrap();

    let requests = rating.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].query.get("id").map(String::as_str), Some("7"));
    assert_eq!(requests[0].query.get("type").map(String::as_str), Some("movie"));

    let put = &requests[1];
    assert_eq!(put.method, "PUT");
    assert_eq!(put.path, "/rating");
    assert_eq!(put.query.get("id").map(String::as_str), Some("7"));
    assert_eq!(put.query.get("type").map(String::as_str), Some("movie"));
    assert_eq!(put.query.get("userId").map(String::as_str), Some("alice"));
    assert_eq!(put.query.get("value").map(String::as_str), Some("5"));
}

#[tokio::test]
async fn test_wrapped_aggregated_rating() {
    let rating = spawn_downstream(|_| Reply::ok(r#"{"rating":3.75}"#)).await;
    let registry = registry_with("rating", &[rating.address()]).await;
    let gateway = RatingGateway::new(Arc::new(ServiceGateway::new(registry)));

    let value = gateway
        .get_aggregated_rating(&CallContext::new(), RecordId(7), &RecordType::movie())
        .await
        .unwrap();
    assert_eq!(value, 3.75);
}

#[tokio::test]
async fn test_no_instances_fails_fast() {
    let gateway = ServiceGateway::new(Arc::new(MemoryRegistry::new()));

    let started = Instant::now();
    let err = gateway
        .call::<Metadata>(&CallContext::new(), "metadata", &RequestSpec::get("/metadata"))
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::DownstreamUnavailable("metadata".into()));
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn test_discovery_failure_is_distinct() {
    let registry = Arc::new(UnreachableRegistry::default());
    let gateway = ServiceGateway::new(registry.clone());

    let err = gateway
        .call::<f64>(&CallContext::new(), "rating", &RequestSpec::get("/rating"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        GatewayError::DiscoveryFailure(RegistryError::BackendUnavailable("connection refused".into()))
    );
    assert_eq!(registry.lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_discovery_failure_retried_when_enabled() {
    let registry = Arc::new(UnreachableRegistry::default());
    let gateway = ServiceGateway::new(registry.clone()).with_policy(fast_retries(2));

    let err = gateway
        .call::<f64>(&CallContext::new(), "rating", &RequestSpec::get("/rating"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::DiscoveryFailure(_)));
    assert_eq!(registry.lookups.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_cancellation_reaches_downstream_call() {
    let slow = spawn_downstream(|_| Reply::ok("1.0").after(Duration::from_secs(10))).await;
    let registry = registry_with("rating", &[slow.address()]).await;
    let gateway = ServiceGateway::new(registry);

    let ctx = CallContext::new();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let err = gateway
        .call::<f64>(&ctx, "rating", &RequestSpec::get("/rating"))
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_caller_deadline_bounds_call() {
    let slow = spawn_downstream(|_| Reply::ok("1.0").after(Duration::from_secs(10))).await;
    let registry = registry_with("rating", &[slow.address()]).await;
    let gateway = ServiceGateway::new(registry);

    let ctx = CallContext::new().with_timeout(Duration::from_millis(100));
    let err = gateway
        .call::<f64>(&ctx, "rating", &RequestSpec::get("/rating"))
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::DeadlineExceeded);
}

#[tokio::test]
async fn test_request_timeout_bounds_attempt() {
    let slow = spawn_downstream(|_| Reply::ok("1.0").after(Duration::from_secs(10))).await;
    let registry = registry_with("rating", &[slow.address()]).await;
    let gateway = ServiceGateway::new(registry).with_policy(TrafficPolicy {
        request_timeout: Some(Duration::from_millis(100)),
        ..Default::default()
    });

    let started = Instant::now();
    let err = gateway
        .call::<f64>(&CallContext::new(), "rating", &RequestSpec::get("/rating"))
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::DeadlineExceeded);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_random_selection_spreads_load() {
    let first = spawn_downstream(|_| Reply::ok(SOLARIS)).await;
    let second = spawn_downstream(|_| Reply::ok(SOLARIS)).await;
    let registry = registry_with("metadata", &[first.address(), second.address()]).await;
    let gateway = MetadataGateway::new(Arc::new(ServiceGateway::new(registry)));

    let ctx = CallContext::new();
    for _ in 0..1_000 {
        gateway.get_movie_details(&ctx, 42).await.unwrap();
    }

    assert_eq!(first.hits() + second.hits(), 1_000);
    assert!((420..=580).contains(&first.hits()), "first got {}", first.hits());
    assert!((420..=580).contains(&second.hits()), "second got {}", second.hits());
}

#[tokio::test]
async fn test_transport_error_without_retries() {
    let registry = registry_with("rating", &[dead_address().await]).await;
    let gateway = ServiceGateway::new(registry);

    let err = gateway
        .call::<f64>(&CallContext::new(), "rating", &RequestSpec::get("/rating"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Transport { .. }), "{err:?}");
}

#[tokio::test]
async fn test_transport_error_retried_and_counted() {
    let registry = registry_with("rating", &[dead_address().await]).await;
    let metrics = GatewayMetrics::new().unwrap();
    let gateway = ServiceGateway::new(registry)
        .with_policy(fast_retries(2))
        .with_metrics(metrics.clone());

    let err = gateway
        .call::<f64>(&CallContext::new(), "rating", &RequestSpec::get("/rating"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Transport { .. }));
    assert_eq!(metrics.retries_total.with_label_values(&["rating"]).get(), 2.0);
    assert_eq!(
        metrics.calls_total.with_label_values(&["rating", "transport"]).get(),
        1.0
    );
}

#[tokio::test]
async fn test_upstream_errors_open_circuit() {
    let failing = spawn_downstream(|_| {
        Reply::new(StatusCode::SERVICE_UNAVAILABLE, r#"{"error":"overloaded"}"#)
    })
    .await;
    let registry = registry_with("rating", &[failing.address()]).await;
    let gateway = ServiceGateway::new(registry).with_policy(TrafficPolicy {
        circuit_breaker: Some(CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 1,
            open_duration: Duration::from_secs(60),
        }),
        ..Default::default()
    });

    let ctx = CallContext::new();
    let spec = RequestSpec::get("/rating");
    for _ in 0..3 {
        let err = gateway.call::<f64>(&ctx, "rating", &spec).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamError { status: 503, .. }));
    }

    let err = gateway.call::<f64>(&ctx, "rating", &spec).await.unwrap_err();
    assert_eq!(err, GatewayError::CircuitOpen("rating".into()));
    assert_eq!(failing.hits(), 3);
}

#[tokio::test]
async fn test_failed_trial_call_reopens_circuit() {
    let failing = spawn_downstream(|_| Reply::new(StatusCode::BAD_GATEWAY, "")).await;
    let registry = registry_with("rating", &[failing.address()]).await;
    let gateway = ServiceGateway::new(registry.clone()).with_policy(TrafficPolicy {
        circuit_breaker: Some(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            open_duration: Duration::from_millis(50),
        }),
        ..Default::default()
    });

    let ctx = CallContext::new();
    let spec = RequestSpec::get("/rating");
    let err = gateway.call::<f64>(&ctx, "rating", &spec).await.unwrap_err();
    assert!(matches!(err, GatewayError::UpstreamError { status: 502, .. }));

    registry.deregister(&ctx, "rating-0", "rating").await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    // The trial call finds no instance; the circuit must not stay half-open.
    let err = gateway.call::<f64>(&ctx, "rating", &spec).await.unwrap_err();
    assert_eq!(err, GatewayError::DownstreamUnavailable("rating".into()));
    let err = gateway.call::<f64>(&ctx, "rating", &spec).await.unwrap_err();
    assert_eq!(err, GatewayError::CircuitOpen("rating".into()));
}

#[tokio::test]
async fn test_metrics_record_outcomes() {
    let metadata = spawn_downstream(|req| match req.query.get("id").map(String::as_str) {
        Some("42") => Reply::ok(SOLARIS),
        _ => Reply::new(StatusCode::NOT_FOUND, ""),
    })
    .await;
    let registry = registry_with("metadata", &[metadata.address()]).await;
    let metrics = GatewayMetrics::new().unwrap();
    let gateway = MetadataGateway::new(Arc::new(
        ServiceGateway::new(registry).with_metrics(metrics.clone()),
    ));

    let ctx = CallContext::new();
    gateway.get_movie_details(&ctx, 42).await.unwrap();
    gateway.get_movie_details(&ctx, 1).await.unwrap_err();

    assert_eq!(
        metrics.calls_total.with_label_values(&["metadata", "success"]).get(),
        1.0
    );
    assert_eq!(
        metrics.calls_total.with_label_values(&["metadata", "not_found"]).get(),
        1.0
    );
}
