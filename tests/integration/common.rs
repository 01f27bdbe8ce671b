use std::sync::Once;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use universal_client::prelude::*;

static TRACING: Once = Once::new();

/// Install a test subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Feature storing a JSON value under `key`.
pub fn value(key: &'static str, value: serde_json::Value) -> impl Feature {
    move |_: &State| -> Result<State> { Ok(State::new().with(key, value.clone())) }
}

/// Start a WebSocket server echoing text and binary frames.
pub async fn echo_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind echo server");
    let addr = listener.local_addr().expect("echo server address");
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = socket.next().await {
                    if (message.is_text() || message.is_binary()) && socket.send(message).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    format!("ws://{addr}")
}
