//! Delegate options, transport registry and factory.
//!
//! Options are a closed enum keyed by `type`. HTTP options additionally name
//! an implementation (`impl`) that is looked up in a [`TransportRegistry`].
//! Unsupported values are rejected synchronously; a registered implementation
//! whose code is not compiled in fails on first use instead.
//!
//! ```rust,ignore
//! let options = DelegateOptions::from_value(json!({
//!     "type": "http",
//!     "impl": "reqwest",
//!     "base_url": "https://api.example.com",
//! }))?;
//! let delegate = DelegateFactory::new(registry).build(options)?;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::compose::{Feature, State, DELEGATE_KEY};
use crate::delegate::{Delegate, Headers, HttpDelegate, SseDelegate, WebSocketDelegate};
use crate::error::{Error, Result};
use crate::lazy::{LazyHttp, LazySse};

/// Values accepted in the `type` field.
pub const DELEGATE_TYPES: [&str; 3] = ["http", "websocket", "server-sent-event"];

/// Transport options, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DelegateOptions {
    #[serde(rename = "http")]
    Http(HttpOptions),
    #[serde(rename = "websocket")]
    WebSocket(WebSocketOptions),
    #[serde(rename = "server-sent-event")]
    Sse(SseOptions),
}

impl DelegateOptions {
    /// Parse options from a JSON literal.
    ///
    /// An unknown `type` is reported by name before any other validation.
    pub fn from_value(value: Value) -> Result<Self> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::config("delegate options require a string `type`"))?
            .to_string();
        if !DELEGATE_TYPES.contains(&kind.as_str()) {
            return Err(Error::config(format!("unsupported delegate type `{kind}`")));
        }
        serde_json::from_value(value)
            .map_err(|e| Error::config(format!("invalid {kind} delegate options: {e}")))
    }

    /// The `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            DelegateOptions::Http(_) => "http",
            DelegateOptions::WebSocket(_) => "websocket",
            DelegateOptions::Sse(_) => "server-sent-event",
        }
    }
}

impl From<HttpOptions> for DelegateOptions {
    fn from(options: HttpOptions) -> Self {
        DelegateOptions::Http(options)
    }
}

impl From<WebSocketOptions> for DelegateOptions {
    fn from(options: WebSocketOptions) -> Self {
        DelegateOptions::WebSocket(options)
    }
}

impl From<SseOptions> for DelegateOptions {
    fn from(options: SseOptions) -> Self {
        DelegateOptions::Sse(options)
    }
}

/// How an HTTP response body is returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// Parse the body as JSON.
    #[default]
    Json,
    /// Return the body as a JSON string.
    Text,
    /// Return `{status, status_text, headers, body}`.
    Raw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpOptions {
    #[serde(rename = "impl")]
    pub implementation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
    #[serde(default)]
    pub response_format: ResponseFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Adapter-specific fields, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HttpOptions {
    pub fn new(implementation: impl Into<String>) -> Self {
        Self {
            implementation: implementation.into(),
            base_url: None,
            headers: Headers::new(),
            response_format: ResponseFormat::default(),
            timeout_ms: None,
            extra: Map::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Reconnection settings for a WebSocket delegate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectOptions {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl ReconnectOptions {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketOptions {
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protocols: Vec<String>,
    /// Connect as soon as the delegate is built.
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    #[serde(default)]
    pub reconnect: ReconnectOptions,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WebSocketOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            protocols: Vec::new(),
            auto_connect: true,
            reconnect: ReconnectOptions::default(),
            extra: Map::new(),
        }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectOptions) -> Self {
        self.reconnect = reconnect;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SseOptions {
    pub url: String,
    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SseOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Headers::new(),
            extra: Map::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

pub type HttpConstructor =
    Arc<dyn Fn(HttpOptions) -> BoxFuture<'static, Result<Arc<dyn HttpDelegate>>> + Send + Sync>;
pub type WebSocketConstructor =
    Arc<dyn Fn(WebSocketOptions) -> Result<Arc<dyn WebSocketDelegate>> + Send + Sync>;
pub type SseConstructor =
    Arc<dyn Fn(SseOptions) -> BoxFuture<'static, Result<Arc<dyn SseDelegate>>> + Send + Sync>;

/// Named transport constructors.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    http: BTreeMap<String, HttpConstructor>,
    websocket: Option<WebSocketConstructor>,
    sse: Option<SseConstructor>,
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("http", &self.http.keys().collect::<Vec<_>>())
            .field("websocket", &self.websocket.is_some())
            .field("sse", &self.sse.is_some())
            .finish()
    }
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an HTTP implementation under `name`.
    pub fn with_http<F, Fut>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(HttpOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn HttpDelegate>>> + Send + 'static,
    {
        self.http
            .insert(name.into(), Arc::new(move |options| constructor(options).boxed()));
        self
    }

    /// Register a known HTTP implementation whose code is not available.
    ///
    /// Building succeeds; the first request fails with
    /// [`ErrorKind::DependencyMissing`](crate::ErrorKind::DependencyMissing).
    pub fn with_missing_http(self, name: impl Into<String>) -> Self {
        let name = name.into();
        let transport = format!("HTTP ({name})");
        self.with_http(name, move |_| {
            let transport = transport.clone();
            async move { Err(Error::dependency_missing(transport)) }
        })
    }

    pub fn with_websocket<F>(mut self, constructor: F) -> Self
    where
        F: Fn(WebSocketOptions) -> Result<Arc<dyn WebSocketDelegate>> + Send + Sync + 'static,
    {
        self.websocket = Some(Arc::new(constructor));
        self
    }

    pub fn with_sse<F, Fut>(mut self, constructor: F) -> Self
    where
        F: Fn(SseOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn SseDelegate>>> + Send + 'static,
    {
        self.sse = Some(Arc::new(move |options| constructor(options).boxed()));
        self
    }

    /// Registered HTTP implementation names, sorted.
    pub fn http_names(&self) -> Vec<&str> {
        self.http.keys().map(String::as_str).collect()
    }

    fn http(&self, name: &str) -> Result<HttpConstructor> {
        self.http.get(name).cloned().ok_or_else(|| {
            Error::config(format!(
                "unsupported HTTP implementation `{name}` (expected one of: {})",
                self.http_names().join(", ")
            ))
        })
    }
}

/// Builds delegates from options.
#[derive(Debug, Clone, Default)]
pub struct DelegateFactory {
    registry: TransportRegistry,
}

impl DelegateFactory {
    pub fn new(registry: TransportRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TransportRegistry {
        &self.registry
    }

    /// Build a delegate.
    ///
    /// HTTP and SSE delegates are returned as lazy proxies; WebSocket
    /// delegates are built immediately.
    #[instrument(skip_all, fields(kind = options.kind()))]
    pub fn build(&self, options: DelegateOptions) -> Result<Delegate> {
        match options {
            DelegateOptions::Http(options) => {
                let constructor = self.registry.http(&options.implementation)?;
                debug!(implementation = %options.implementation, "deferring HTTP delegate construction");
                Ok(Delegate::Http(Arc::new(LazyHttp::new(move || {
                    constructor(options)
                }))))
            }
            DelegateOptions::WebSocket(options) => {
                let constructor = self
                    .registry
                    .websocket
                    .clone()
                    .ok_or_else(|| Error::dependency_missing("WebSocket"))?;
                debug!(url = %options.url, "building WebSocket delegate");
                Ok(Delegate::WebSocket(constructor(options)?))
            }
            DelegateOptions::Sse(options) => {
                let constructor = self.registry.sse.clone();
                Ok(Delegate::Sse(Arc::new(LazySse::new(move || async move {
                    match constructor {
                        Some(constructor) => constructor(options).await,
                        None => Err(Error::dependency_missing("SSE")),
                    }
                }))))
            }
        }
    }

    /// Parse a JSON literal and build it.
    pub fn build_value(&self, value: Value) -> Result<Delegate> {
        self.build(DelegateOptions::from_value(value)?)
    }

    /// Feature storing the built delegate under `"delegate"`.
    pub fn feature(&self, options: impl Into<DelegateOptions>) -> DelegateFeature {
        DelegateFeature {
            factory: self.clone(),
            options: Source::Typed(options.into()),
            key: DELEGATE_KEY.to_string(),
        }
    }

    /// Like [`feature`](Self::feature), parsing the options when applied.
    pub fn feature_value(&self, value: Value) -> DelegateFeature {
        DelegateFeature {
            factory: self.clone(),
            options: Source::Raw(value),
            key: DELEGATE_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum Source {
    Typed(DelegateOptions),
    Raw(Value),
}

/// Feature that installs a freshly built delegate.
///
/// Each composition builds its own delegate.
#[derive(Debug, Clone)]
pub struct DelegateFeature {
    factory: DelegateFactory,
    options: Source,
    key: String,
}

impl DelegateFeature {
    pub fn on_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

impl Feature for DelegateFeature {
    fn apply(&self, _state: &State) -> Result<State> {
        let delegate = match &self.options {
            Source::Typed(options) => self.factory.build(options.clone())?,
            Source::Raw(value) => self.factory.build_value(value.clone())?,
        };
        Ok(State::new().with(self.key.clone(), delegate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::compose;
    use crate::delegate::{Capability, RequestOptions};
    use crate::testing::{MockHttp, MockSse, MockWebSocket};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry(constructed: &Arc<AtomicUsize>) -> TransportRegistry {
        let constructed = Arc::clone(constructed);
        TransportRegistry::new()
            .with_http("mock", move |_| {
                constructed.fetch_add(1, Ordering::SeqCst);
                async { Ok(Arc::new(MockHttp::new()) as Arc<dyn HttpDelegate>) }
            })
            .with_missing_http("ky")
            .with_websocket(|_| Ok(Arc::new(MockWebSocket::new()) as Arc<dyn WebSocketDelegate>))
            .with_sse(|_| async { Ok(Arc::new(MockSse::new()) as Arc<dyn SseDelegate>) })
    }

    #[test]
    fn test_parse_http_options() {
        let options = DelegateOptions::from_value(json!({
            "type": "http",
            "impl": "reqwest",
            "base_url": "https://api.example.com",
            "headers": {"X-Api-Key": "k"},
            "response_format": "raw",
            "retries": 3,
        }))
        .unwrap();

        let DelegateOptions::Http(http) = options else {
            panic!("expected HTTP options");
        };
        assert_eq!(http.implementation, "reqwest");
        assert_eq!(http.base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(http.headers.get("X-Api-Key"), Some(&"k".to_string()));
        assert_eq!(http.response_format, ResponseFormat::Raw);
        assert_eq!(http.extra.get("retries"), Some(&json!(3)));
    }

    #[test]
    fn test_websocket_option_defaults() {
        let options = DelegateOptions::from_value(json!({
            "type": "websocket",
            "url": "wss://stream.example.com",
        }))
        .unwrap();

        assert_eq!(
            options,
            DelegateOptions::WebSocket(WebSocketOptions::new("wss://stream.example.com"))
        );
    }

    #[test]
    fn test_unsupported_type_is_named() {
        let err = DelegateOptions::from_value(json!({"type": "grpc"})).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("`grpc`"));

        let err = DelegateOptions::from_value(json!({"impl": "reqwest"})).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_http_requires_impl() {
        let err = DelegateOptions::from_value(json!({"type": "http"})).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("impl"));
    }

    #[test]
    fn test_unknown_impl_fails_synchronously() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let factory = DelegateFactory::new(registry(&constructed));

        let err = factory.build(HttpOptions::new("curl").into()).unwrap_err();
        assert!(err.is_config());
        assert_eq!(
            err.to_string(),
            "Configuration error: unsupported HTTP implementation `curl` (expected one of: ky, mock)"
        );
    }

    #[tokio::test]
    async fn test_http_delegate_is_built_on_first_use() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let factory = DelegateFactory::new(registry(&constructed));

        let delegate = factory.build(HttpOptions::new("mock").into()).unwrap();
        assert_eq!(delegate.capability(), Capability::Http);
        assert_eq!(constructed.load(Ordering::SeqCst), 0);

        let http = delegate.as_http().unwrap();
        http.get("/a", RequestOptions::new()).await.unwrap();
        http.get("/b", RequestOptions::new()).await.unwrap();
        assert_eq!(constructed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_impl_fails_at_load_time() {
        let factory = DelegateFactory::new(registry(&Arc::new(AtomicUsize::new(0))));
        let delegate = factory
            .build_value(json!({"type": "http", "impl": "ky"}))
            .unwrap();

        let err = delegate
            .as_http()
            .unwrap()
            .get("/x", RequestOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_dependency_missing());
        assert_eq!(err.to_string(), "HTTP (ky) transport is not installed");
    }

    #[test]
    fn test_websocket_without_constructor() {
        let err = DelegateFactory::default()
            .build(WebSocketOptions::new("ws://localhost").into())
            .unwrap_err();
        assert!(err.is_dependency_missing());
    }

    #[tokio::test]
    async fn test_sse_is_lazy() {
        let factory = DelegateFactory::new(registry(&Arc::new(AtomicUsize::new(0))));
        let delegate = factory.build(SseOptions::new("http://localhost/events").into()).unwrap();
        assert_eq!(delegate.capability(), Capability::Sse);
    }

    #[test]
    fn test_feature_on_key() {
        let factory = DelegateFactory::new(registry(&Arc::new(AtomicUsize::new(0))));
        let client = compose(vec![
            Box::new(factory.feature(HttpOptions::new("mock")).on_key("api")) as Box<dyn Feature>,
            Box::new(factory.feature(WebSocketOptions::new("ws://localhost"))),
        ])
        .unwrap();

        assert!(client.http("api").is_some());
        assert!(client.websocket(DELEGATE_KEY).is_some());
    }

    #[test]
    fn test_feature_value_reports_bad_options_from_compose() {
        let factory = DelegateFactory::default();
        let err = compose(vec![
            Box::new(factory.feature_value(json!({"type": "ftp"}))) as Box<dyn Feature>
        ])
        .unwrap_err();
        assert!(err.to_string().contains("unsupported delegate type `ftp`"));
    }
}
