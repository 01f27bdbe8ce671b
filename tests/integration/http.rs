//! Full HTTP compositions over the reqwest transport.

use serde_json::json;
use universal_client::prelude::*;
use universal_client_features::ConnectivityFlag;
use wiremock::matchers::{header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::common::init_tracing;

fn get_user() -> impl Feature {
    http_method("get_user", |http: Arc<dyn HttpDelegate>, args: serde_json::Value| async move {
        let id = args["id"].as_u64().unwrap_or_default();
        http.get(&format!("/users/{id}"), RequestOptions::new()).await
    })
}

// ============================================================================
// Environments + interceptors + telemetry + methods
// ============================================================================

#[tokio::test]
async fn test_full_stack_request() {
    init_tracing();
    let production = MockServer::start().await;
    let staging = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/users/1"))
        .and(query_param("lang", "en"))
        .and(header_exists("x-trace-id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1, "env": "prod"})))
        .expect(1)
        .mount(&production)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/users/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1, "env": "staging"})))
        .expect(1)
        .mount(&staging)
        .await;

    let versioned = HttpInterceptor::new().before(|ctx: RequestContext| async move {
        Ok(Some(RequestPatch::url(format!("/v2{}", ctx.url))))
    });
    let localized = HttpInterceptor::new().before(|ctx: RequestContext| async move {
        let separator = if ctx.url.contains('?') { '&' } else { '?' };
        Ok(Some(RequestPatch::url(format!("{}{separator}lang=en", ctx.url))))
    });

    let client = compose![
        delegate(HttpOptions::new("reqwest")),
        environments(
            EnvironmentsConfig::new()
                .with_environment("production", production.uri())
                .with_environment("staging", staging.uri()),
        ),
        interceptor_chain(vec![versioned, localized]),
        telemetry(TelemetryConfig::new().with_trace_header()),
        get_user(),
    ]
    .expect("composition");

    let user = client.call("get_user", json!({"id": 1})).await.expect("production call");
    assert_eq!(user["env"], "prod");

    client
        .manager::<Environments>(ENVIRONMENTS_KEY)
        .expect("environments manager")
        .set_environment("staging");
    let user = client.call("get_user", json!({"id": 1})).await.expect("staging call");
    assert_eq!(user["env"], "staging");

    let telemetry = client
        .manager::<Telemetry>(TELEMETRY_KEY)
        .expect("telemetry manager");
    let metrics = telemetry.metrics();
    assert_eq!(metrics.requests.total, 2);
    assert_eq!(metrics.requests.success, 2);
    assert!(metrics.latency.max >= metrics.latency.min);
    assert!(telemetry
        .events()
        .iter()
        .all(|event| event.operation == "GET /users/1"));
}

#[tokio::test]
async fn test_http_error_message_reaches_caller() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"error": "name is required"})))
        .mount(&mock_server)
        .await;

    let client = compose![
        delegate(HttpOptions::new("reqwest").with_base_url(mock_server.uri())),
        hooks(),
    ]
    .expect("composition");

    let err = client
        .http(DELEGATE_KEY)
        .expect("http delegate")
        .post("/users", json!({}), RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(422));
    assert_eq!(err.to_string(), "name is required");
}

#[tokio::test]
async fn test_json_literal_options() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ping"))
        .and(header("x-api-key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .mount(&mock_server)
        .await;

    let client = compose![delegate_value(json!({
        "type": "http",
        "impl": "reqwest",
        "base_url": mock_server.uri(),
        "headers": {"x-api-key": "secret"},
        "response_format": "text",
    }))]
    .expect("composition");

    let body = client
        .http(DELEGATE_KEY)
        .expect("http delegate")
        .get("/ping", RequestOptions::new())
        .await
        .expect("request");
    assert_eq!(body, "pong");
}

#[test]
fn test_unsupported_options_fail_synchronously() {
    let err = compose![delegate_value(json!({"type": "grpc"}))].unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("unsupported delegate type `grpc`"));

    let err = compose![delegate_value(json!({"type": "http", "impl": "curl"}))].unwrap_err();
    assert!(err.is_config());
}

// ============================================================================
// Offline
// ============================================================================

#[tokio::test]
async fn test_offline_cache_first_scenario() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let connectivity = Arc::new(ConnectivityFlag::new());
    let client = compose![
        delegate(HttpOptions::new("reqwest").with_base_url(mock_server.uri())),
        offline(
            OfflineConfig::new()
                .with_strategy(Strategy::CacheFirst)
                .with_connectivity(connectivity.clone()),
        ),
    ]
    .expect("composition");
    let http = client.http(DELEGATE_KEY).expect("http delegate");

    let first = http.get("/users/1", RequestOptions::new()).await.expect("network");
    connectivity.set_online(false);
    let second = http.get("/users/1", RequestOptions::new()).await.expect("cache");
    assert_eq!(first, second);

    let err = http.get("/users/2", RequestOptions::new()).await.unwrap_err();
    assert!(err.is_offline());
    assert_eq!(err.to_string(), "Offline: no cached response for GET:/users/2:");

    let cache = client.manager::<OfflineCache>(OFFLINE_KEY).expect("offline manager");
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_network_first_falls_back_to_cache() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [1, 2]})))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(503))
        .with_priority(2)
        .mount(&mock_server)
        .await;

    let client = compose![
        delegate(HttpOptions::new("reqwest").with_base_url(mock_server.uri())),
        offline(OfflineConfig::new()),
    ]
    .expect("composition");
    let http = client.http(DELEGATE_KEY).expect("http delegate");

    let fresh = http.get("/feed", RequestOptions::new()).await.expect("network");
    let fallback = http.get("/feed", RequestOptions::new()).await.expect("cached fallback");
    assert_eq!(fresh, fallback);

    let err = http
        .get("/feed", RequestOptions::new().param("page", 2))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(503));
}
