//! # universal-client-features
//!
//! Cross-cutting delegate features for universal-client.
//!
//! Every feature here follows the same shape: take the delegate out of the
//! state, build a private manager, wrap the delegate with hooks that close
//! over the manager, and put both back.
//!
//! | Feature | Manager key | Wraps |
//! |---------|-------------|-------|
//! | [`interceptors`] / [`interceptor_chain`] | none | HTTP |
//! | [`environments`] | `environments` | HTTP, WebSocket (logging only) |
//! | [`telemetry`] | `telemetry` | HTTP, WebSocket |
//! | [`offline`] | `offline` | HTTP |
//!
//! [`http_method`] registers named methods over the (possibly wrapped) HTTP
//! delegate.
//!
//! ## Example
//!
//! ```rust,ignore
//! use universal_client_features::{offline, telemetry, OfflineConfig, Strategy, TelemetryConfig};
//!
//! let client = compose![
//!     factory.feature(HttpOptions::new("reqwest").with_base_url("https://api.example.com")),
//!     telemetry(TelemetryConfig::new().with_tracing(true)),
//!     offline(OfflineConfig::new().with_strategy(Strategy::CacheFirst)),
//! ]?;
//!
//! let metrics = client.manager::<Telemetry>("telemetry").unwrap().metrics();
//! ```

pub mod environments;
pub mod interceptors;
pub mod methods;
pub mod offline;
pub mod telemetry;

pub use environments::{environments, Environments, EnvironmentsConfig, EnvironmentsFeature, ENVIRONMENTS_KEY};
pub use interceptors::{interceptor_chain, interceptors, Interceptors};
pub use methods::{http_method, HttpMethodFeature};
pub use offline::{
    offline, Connectivity, ConnectivityFlag, OfflineCache, OfflineConfig, OfflineFeature, Strategy,
    DEFAULT_TTL, OFFLINE_KEY,
};
pub use telemetry::{
    telemetry, EventKind, Latency, Metrics, RequestCounts, Telemetry, TelemetryConfig, TelemetryEvent,
    TelemetryFeature, DEFAULT_TRACE_HEADER, TELEMETRY_KEY,
};
