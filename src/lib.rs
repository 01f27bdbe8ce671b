//! # universal-client
//!
//! Build one client object from an ordered list of features over a pluggable
//! HTTP, WebSocket or SSE transport.
//!
//! Cross-cutting behavior (interceptors, telemetry, offline caching,
//! environment switching) wraps the transport delegate without the features
//! knowing about each other, and `onInit` hooks run once the client is
//! assembled.
//!
//! ## Crates
//!
//! - **universal-client-core** - Composition engine, delegate contracts, middleware, lazy delegates, hooks
//! - **universal-client-features** - Interceptors, environments, telemetry, offline cache, named methods
//! - **universal-client-transport** - reqwest HTTP and SSE, tungstenite WebSocket
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use serde_json::json;
//! use universal_client::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = compose![
//!         delegate(HttpOptions::new("reqwest")),
//!         environments(
//!             EnvironmentsConfig::new()
//!                 .with_environment("production", "https://api.example.com")
//!                 .with_environment("staging", "https://staging.example.com"),
//!         ),
//!         telemetry(TelemetryConfig::new()),
//!         http_method("get_user", |http: Arc<dyn HttpDelegate>, args: serde_json::Value| async move {
//!             http.get(&format!("/users/{}", args["id"]), RequestOptions::new()).await
//!         }),
//!         on_init(|_| {
//!             tracing::info!("client ready");
//!             Ok(())
//!         }),
//!     ]?;
//!
//!     let user = client.call("get_user", json!({"id": 1})).await?;
//!     println!("{user}");
//!
//!     let metrics = client.manager::<Telemetry>(TELEMETRY_KEY).unwrap().metrics();
//!     println!("{} requests", metrics.requests.total);
//!     Ok(())
//! }
//! ```

// Re-export all crates for convenient access
pub use universal_client_features as features;
pub use universal_client_transport as transport;

// Re-export commonly used types at the top level
pub use universal_client_core::{
    compose, hooks, on_init, Client, ClientBuilder, Delegate, DelegateFactory, DelegateOptions,
    Error, ErrorKind, Feature, HttpDelegate, HttpOptions, RequestOptions, Result, SseDelegate,
    SseOptions, State, WebSocketDelegate, WebSocketOptions, DELEGATE_KEY,
};
pub use universal_client_transport::{default_registry, delegate, delegate_value, TransportConfig};

/// Everything needed to compose a client.
pub mod prelude {
    pub use std::sync::Arc;

    pub use universal_client_core::{
        compose, hooks, on_init, Capability, Client, CloseInfo, Delegate, Error, ErrorKind,
        Feature, HttpDelegate, HttpInterceptor, HttpOptions, ParamValue, RequestContext,
        RequestOptions, RequestPatch, ResponseContext, Result, SseDelegate, SseEvent, SseOptions,
        State, Subscription, WebSocketDelegate, WebSocketLifecycle, WebSocketOptions, WsMessage,
        DELEGATE_KEY,
    };
    pub use universal_client_features::{
        environments, http_method, interceptor_chain, interceptors, offline, telemetry,
        Environments, EnvironmentsConfig, OfflineCache, OfflineConfig, Strategy, Telemetry,
        TelemetryConfig, ENVIRONMENTS_KEY, OFFLINE_KEY, TELEMETRY_KEY,
    };
    pub use universal_client_transport::{delegate, delegate_value, TransportConfig};
}
