//! # universal-client-transport
//!
//! Reference transports for universal-client, registered the same way a
//! third-party adapter would be.
//!
//! | Capability | Adapter | Cargo feature |
//! |------------|---------|---------------|
//! | HTTP (`impl: "reqwest"`) | [`ReqwestDelegate`] | `http` |
//! | SSE | [`ReqwestSse`] | `sse` |
//! | WebSocket | [`TungsteniteDelegate`] | `websocket` |
//!
//! With a feature disabled the registry still knows the transport, and using
//! it fails with `ErrorKind::DependencyMissing`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use universal_client_core::compose;
//! use universal_client_transport::delegate_value;
//!
//! let client = compose![delegate_value(json!({
//!     "type": "http",
//!     "impl": "reqwest",
//!     "base_url": "https://api.example.com",
//! }))]?;
//! ```

use universal_client_core::{
    DelegateFactory, DelegateFeature, DelegateOptions, TransportRegistry,
};

#[cfg(any(feature = "http", feature = "sse"))]
mod client;
pub mod config;
#[cfg(feature = "http")]
pub mod http;
pub mod reconnect;
#[cfg(feature = "sse")]
pub mod sse;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use config::{TransportConfig, TransportConfigBuilder};
#[cfg(feature = "http")]
pub use http::ReqwestDelegate;
pub use reconnect::{BackoffStrategy, ReconnectConfig, ReconnectPolicy};
#[cfg(feature = "sse")]
pub use sse::{ReqwestSse, SseParser};
#[cfg(feature = "websocket")]
pub use websocket::TungsteniteDelegate;

/// Default User-Agent string.
pub const USER_AGENT: &str = concat!("universal-client/", env!("CARGO_PKG_VERSION"));

/// Registry name of the built-in HTTP implementation.
pub const REQWEST: &str = "reqwest";

/// Registry of the reference transports using `config`.
pub fn registry(config: TransportConfig) -> TransportRegistry {
    let registry = TransportRegistry::new();
    let registry = with_http(registry, &config);
    let registry = with_sse(registry, &config);
    with_websocket(registry, &config)
}

/// Registry of the reference transports with default settings.
pub fn default_registry() -> TransportRegistry {
    registry(TransportConfig::default())
}

/// Delegate factory over [`default_registry`].
pub fn factory() -> DelegateFactory {
    DelegateFactory::new(default_registry())
}

/// Feature installing a delegate built by [`factory`].
pub fn delegate(options: impl Into<DelegateOptions>) -> DelegateFeature {
    factory().feature(options)
}

/// Feature installing a delegate described by a JSON literal.
pub fn delegate_value(options: serde_json::Value) -> DelegateFeature {
    factory().feature_value(options)
}

#[cfg(feature = "http")]
fn with_http(registry: TransportRegistry, config: &TransportConfig) -> TransportRegistry {
    use std::sync::Arc;
    use universal_client_core::HttpDelegate;

    let config = config.clone();
    registry.with_http(REQWEST, move |options| {
        let delegate = ReqwestDelegate::new(options, config.clone());
        async move { Ok(Arc::new(delegate?) as Arc<dyn HttpDelegate>) }
    })
}

#[cfg(not(feature = "http"))]
fn with_http(registry: TransportRegistry, _config: &TransportConfig) -> TransportRegistry {
    registry.with_missing_http(REQWEST)
}

#[cfg(feature = "sse")]
fn with_sse(registry: TransportRegistry, config: &TransportConfig) -> TransportRegistry {
    use std::sync::Arc;
    use universal_client_core::SseDelegate;

    let config = config.clone();
    registry.with_sse(move |options| {
        let delegate = ReqwestSse::new(options, config.clone());
        async move { Ok(Arc::new(delegate?) as Arc<dyn SseDelegate>) }
    })
}

#[cfg(not(feature = "sse"))]
fn with_sse(registry: TransportRegistry, _config: &TransportConfig) -> TransportRegistry {
    registry
}

#[cfg(feature = "websocket")]
fn with_websocket(registry: TransportRegistry, config: &TransportConfig) -> TransportRegistry {
    use std::sync::Arc;
    use universal_client_core::WebSocketDelegate;

    let config = config.clone();
    registry.with_websocket(move |options| {
        let delegate = TungsteniteDelegate::new(options, config.clone())?;
        Ok(Arc::new(delegate) as Arc<dyn WebSocketDelegate>)
    })
}

#[cfg(not(feature = "websocket"))]
fn with_websocket(registry: TransportRegistry, _config: &TransportConfig) -> TransportRegistry {
    registry
}
