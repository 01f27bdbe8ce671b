//! WebSocket and SSE compositions over the reference transports.

use std::time::Duration;

use tokio::sync::mpsc;
use universal_client::prelude::*;
use universal_client_core::ReconnectOptions;
use universal_client_features::EventKind;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::common::{echo_server, init_tracing};

// ============================================================================
// WebSocket
// ============================================================================

#[tokio::test]
async fn test_websocket_echo_with_telemetry() {
    init_tracing();
    let url = echo_server().await;

    let client = compose![
        delegate(
            WebSocketOptions::new(url)
                .with_auto_connect(false)
                .with_reconnect(ReconnectOptions::disabled()),
        ),
        telemetry(TelemetryConfig::new()),
    ]
    .expect("composition");
    let ws = client.websocket(DELEGATE_KEY).expect("websocket delegate");

    let (open_tx, mut open_rx) = mpsc::unbounded_channel();
    let _open = ws.on_open(Arc::new(move |_: &()| {
        let _ = open_tx.send(());
    }));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _messages = ws.on_message(Arc::new(move |message: &WsMessage| {
        let _ = tx.send(message.clone());
    }));

    ws.connect().await.expect("connect");
    tokio::time::timeout(Duration::from_secs(2), open_rx.recv())
        .await
        .expect("open in time")
        .expect("open event");

    ws.send(WsMessage::from("ping")).await.expect("send");
    let echoed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("echo in time")
        .expect("echo");
    assert_eq!(echoed.as_text(), Some("ping"));

    let telemetry = client
        .manager::<Telemetry>(TELEMETRY_KEY)
        .expect("telemetry manager");
    let completed = || -> Vec<String> {
        telemetry
            .events()
            .into_iter()
            .filter(|event| event.kind == EventKind::Response)
            .map(|event| event.operation)
            .collect()
    };
    // Lifecycle observers run as detached tasks.
    tokio::time::timeout(Duration::from_secs(2), async {
        while completed().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("telemetry recorded in time");
    assert_eq!(completed(), vec!["connect", "send"]);
    assert_eq!(telemetry.metrics().requests.errors, 0);

    ws.close().await.expect("close");
}

#[tokio::test]
async fn test_websocket_json_literal_options() {
    let url = echo_server().await;

    let client = compose![delegate_value(serde_json::json!({
        "type": "websocket",
        "url": url,
        "auto_connect": false,
    }))]
    .expect("composition");

    let delegate = client.delegate(DELEGATE_KEY).expect("delegate");
    assert_eq!(delegate.capability(), Capability::WebSocket);
}

// ============================================================================
// SSE
// ============================================================================

#[tokio::test]
async fn test_sse_delegate_streams_on_first_subscription() {
    init_tracing();
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/prices"))
        .and(header("Accept", "text/event-stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(": keep-alive\n\nid: 1\ndata: {\"price\": 42}\n\nevent: halt\ndata: maintenance\n\n"),
        )
        .mount(&mock_server)
        .await;

    let client = compose![delegate(SseOptions::new(format!(
        "{}/prices",
        mock_server.uri()
    )))]
    .expect("composition");
    let sse = client.sse(DELEGATE_KEY).expect("sse delegate");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let prices = tx.clone();
    let _messages = sse.on_message(Arc::new(move |event: &SseEvent| {
        let price = event
            .json::<serde_json::Value>()
            .map(|body| body["price"].to_string())
            .unwrap_or_default();
        let _ = prices.send(format!("price:{price}"));
    }));
    let _halts = sse.subscribe(
        "halt",
        Arc::new(move |event: &SseEvent| {
            let _ = tx.send(format!("halt:{}", event.data));
        }),
    );

    let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event in time");
    assert_eq!(first.as_deref(), Some("price:42"));
    assert_eq!(rx.recv().await.as_deref(), Some("halt:maintenance"));

    sse.close();
}

#[tokio::test]
async fn test_sse_error_status_reaches_subscribers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    let client = compose![delegate(SseOptions::new(format!(
        "{}/private",
        mock_server.uri()
    )))]
    .expect("composition");
    let sse = client.sse(DELEGATE_KEY).expect("sse delegate");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _errors = sse.on_error(Arc::new(move |error: &Error| {
        let _ = tx.send(error.status());
    }));

    let status = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("error in time");
    assert_eq!(status, Some(Some(401)));
    sse.close();
}
