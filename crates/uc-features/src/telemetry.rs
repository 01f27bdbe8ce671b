//! Request telemetry: an event log plus running metrics.
//!
//! Events are recorded synchronously from the delegate wrappers and paired by
//! the per-call id the middleware assigns, so concurrent calls to the same
//! URL get their own durations.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use universal_client_core::{
    wrap_http, wrap_websocket, Delegate, ErrorContext, Feature, HttpInterceptor, RequestContext,
    RequestPatch, ResponseContext, Result, Slot, State, WebSocketLifecycle, WsEvent,
    DELEGATE_KEY,
};
use uuid::Uuid;

/// State key of the [`Telemetry`] manager.
pub const TELEMETRY_KEY: &str = "telemetry";

/// Header carrying the trace id when one is injected.
pub const DEFAULT_TRACE_HEADER: &str = "x-trace-id";

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Record events at all.
    pub enabled: bool,
    /// Assign a random trace id to each operation.
    pub tracing: bool,
    /// Aggregate request counts and latency.
    pub metrics: bool,
    /// Oldest events are dropped beyond this many.
    pub max_events: usize,
    /// Send the trace id to the server in this header.
    pub trace_header: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tracing: false,
            metrics: true,
            max_events: 1000,
            trace_header: None,
        }
    }
}

impl TelemetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracing(mut self, tracing: bool) -> Self {
        self.tracing = tracing;
        self
    }

    pub fn with_metrics(mut self, metrics: bool) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events;
        self
    }

    /// Inject trace ids under [`DEFAULT_TRACE_HEADER`]. Implies tracing.
    pub fn with_trace_header(mut self) -> Self {
        self.tracing = true;
        self.trace_header = Some(DEFAULT_TRACE_HEADER.to_string());
        self
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Request,
    Response,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryEvent {
    pub kind: EventKind,
    /// `METHOD URL` for HTTP, the operation name for WebSocket.
    pub operation: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RequestCounts {
    pub total: u64,
    pub success: u64,
    pub errors: u64,
}

/// Latency in milliseconds over completed operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Latency {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub requests: RequestCounts,
    pub latency: Latency,
}

struct Pending {
    started: DateTime<Utc>,
    trace_id: Option<String>,
}

#[derive(Default)]
struct Inner {
    events: VecDeque<TelemetryEvent>,
    /// Started calls awaiting completion, keyed by call id. Call ids grow
    /// monotonically, so the first entry is the oldest.
    pending: BTreeMap<u64, Pending>,
    counts: RequestCounts,
    completed: u64,
    total_ms: f64,
    min_ms: Option<f64>,
    max_ms: f64,
}

/// Telemetry manager stored under [`TELEMETRY_KEY`].
pub struct Telemetry {
    config: TelemetryConfig,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("config", &self.config)
            .field("events", &self.lock().events.len())
            .finish()
    }
}

impl Telemetry {
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Recorded events, oldest first.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.lock().events.iter().cloned().collect()
    }

    /// Current metrics; all zero when metrics are disabled or nothing completed.
    pub fn metrics(&self) -> Metrics {
        if !self.config.enabled || !self.config.metrics {
            return Metrics::default();
        }
        let inner = self.lock();
        let latency = match inner.min_ms {
            Some(min) if inner.completed > 0 => Latency {
                avg: inner.total_ms / inner.completed as f64,
                min,
                max: inner.max_ms,
            },
            _ => Latency::default(),
        };
        Metrics {
            requests: inner.counts,
            latency,
        }
    }

    /// Drop events, in-flight pairings and metrics.
    pub fn clear(&self) {
        *self.lock() = Inner::default();
    }

    /// Record the start of an operation. Returns its trace id, if tracing.
    pub fn record_request(
        &self,
        call_id: u64,
        operation: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Option<String> {
        if !self.config.enabled {
            return None;
        }
        let trace_id = self.config.tracing.then(|| Uuid::new_v4().to_string());
        let mut inner = self.lock();
        inner.pending.insert(
            call_id,
            Pending {
                started: at,
                trace_id: trace_id.clone(),
            },
        );
        // Calls dropped before completing never reach `complete`.
        while inner.pending.len() > self.config.max_events {
            inner.pending.pop_first();
        }
        if self.config.metrics {
            inner.counts.total += 1;
        }
        self.push(
            &mut inner,
            TelemetryEvent {
                kind: EventKind::Request,
                operation: operation.into(),
                timestamp: at,
                trace_id: trace_id.clone(),
                duration_ms: None,
                error: None,
            },
        );
        trace_id
    }

    pub fn record_response(&self, call_id: u64, operation: impl Into<String>, at: DateTime<Utc>) {
        self.complete(call_id, operation.into(), at, None);
    }

    pub fn record_error(
        &self,
        call_id: u64,
        operation: impl Into<String>,
        at: DateTime<Utc>,
        error: impl ToString,
    ) {
        self.complete(call_id, operation.into(), at, Some(error.to_string()));
    }

    fn complete(&self, call_id: u64, operation: String, at: DateTime<Utc>, error: Option<String>) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.lock();
        let pending = inner.pending.remove(&call_id);
        let duration_ms = pending
            .as_ref()
            .map(|p| (at - p.started).num_microseconds().unwrap_or(0) as f64 / 1000.0);

        if self.config.metrics {
            if error.is_some() {
                inner.counts.errors += 1;
            } else {
                inner.counts.success += 1;
            }
            if let Some(ms) = duration_ms {
                inner.completed += 1;
                inner.total_ms += ms;
                inner.min_ms = Some(inner.min_ms.map_or(ms, |min| min.min(ms)));
                inner.max_ms = inner.max_ms.max(ms);
            }
        }

        let kind = if error.is_some() {
            EventKind::Error
        } else {
            EventKind::Response
        };
        self.push(
            &mut inner,
            TelemetryEvent {
                kind,
                operation,
                timestamp: at,
                trace_id: pending.and_then(|p| p.trace_id),
                duration_ms,
                error,
            },
        );
    }

    fn push(&self, inner: &mut Inner, event: TelemetryEvent) {
        inner.events.push_back(event);
        while inner.events.len() > self.config.max_events {
            inner.events.pop_front();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn http_interceptor(self: &Arc<Self>) -> HttpInterceptor {
        let on_request = Arc::clone(self);
        let on_response = Arc::clone(self);
        let on_error = Arc::clone(self);
        HttpInterceptor::new()
            .before(move |ctx: RequestContext| {
                let trace_id = on_request.record_request(ctx.call_id, ctx.operation(), Utc::now());
                let patch = match (&on_request.config.trace_header, trace_id) {
                    (Some(header), Some(trace_id)) => {
                        let mut headers = ctx.headers;
                        headers.insert(header.clone(), trace_id);
                        Some(RequestPatch::headers(headers))
                    }
                    _ => None,
                };
                async move { Ok(patch) }
            })
            .after(move |ctx: ResponseContext| {
                on_response.record_response(
                    ctx.call_id,
                    format!("{} {}", ctx.method, ctx.url),
                    Utc::now(),
                );
                async move { Ok(ctx.result) }
            })
            .error(move |ctx: ErrorContext| {
                on_error.record_error(
                    ctx.call_id,
                    format!("{} {}", ctx.method, ctx.url),
                    Utc::now(),
                    &ctx.error,
                );
                async {}
            })
    }

    fn websocket_lifecycle(self: &Arc<Self>) -> WebSocketLifecycle {
        let request = |telemetry: Arc<Self>| {
            move |event: WsEvent| {
                telemetry.record_request(event.call_id, event.operation.as_str(), event.at);
                async { Ok(()) }
            }
        };
        let response = |telemetry: Arc<Self>| {
            move |event: WsEvent| {
                telemetry.record_response(event.call_id, event.operation.as_str(), event.at);
                async { Ok(()) }
            }
        };
        let errors = Arc::clone(self);
        WebSocketLifecycle::new()
            .before_connect(request(Arc::clone(self)))
            .before_send(request(Arc::clone(self)))
            .before_close(request(Arc::clone(self)))
            .after_connect(response(Arc::clone(self)))
            .after_send(response(Arc::clone(self)))
            .after_close(response(Arc::clone(self)))
            .on_error(move |event: WsEvent| {
                let message = event.error.map(|e| e.to_string()).unwrap_or_default();
                errors.record_error(event.call_id, event.operation.as_str(), event.at, message);
                async { Ok(()) }
            })
    }
}

/// Feature recording telemetry for the delegate.
pub fn telemetry(config: TelemetryConfig) -> TelemetryFeature {
    TelemetryFeature {
        config,
        key: DELEGATE_KEY.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryFeature {
    config: TelemetryConfig,
    key: String,
}

impl TelemetryFeature {
    pub fn on_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

impl Feature for TelemetryFeature {
    fn apply(&self, state: &State) -> Result<State> {
        let (delegate, _) = state.split_delegate(&self.key)?;
        let manager = Arc::new(Telemetry::new(self.config.clone()));
        let delegate = match delegate {
            Delegate::Http(http) => Delegate::Http(wrap_http(http, manager.http_interceptor())),
            Delegate::WebSocket(ws) => {
                Delegate::WebSocket(wrap_websocket(ws, manager.websocket_lifecycle()))
            }
            sse @ Delegate::Sse(_) => {
                debug!("telemetry does not instrument SSE delegates");
                sse
            }
        };
        Ok(State::new()
            .with(self.key.clone(), delegate)
            .with(TELEMETRY_KEY, Slot::manager(manager)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use universal_client_core::testing::{MockHttp, MockWebSocket};
    use universal_client_core::{compose, Error, ErrorKind, RequestOptions, WsMessage};

    fn http(mock: &Arc<MockHttp>) -> impl Feature {
        let delegate = Delegate::Http(mock.clone());
        move |_: &State| -> Result<State> { Ok(State::new().with(DELEGATE_KEY, delegate.clone())) }
    }

    #[test]
    fn test_metrics_pair_by_call_id() {
        let telemetry = Telemetry::new(TelemetryConfig::default());
        let t0 = Utc::now();

        telemetry.record_request(1, "GET /a", t0);
        telemetry.record_request(2, "GET /a", t0 + Duration::milliseconds(5));
        telemetry.record_response(2, "GET /a", t0 + Duration::milliseconds(15));
        telemetry.record_error(1, "GET /a", t0 + Duration::milliseconds(30), "boom");

        let metrics = telemetry.metrics();
        assert_eq!(
            metrics.requests,
            RequestCounts {
                total: 2,
                success: 1,
                errors: 1
            }
        );
        assert_eq!(metrics.latency.min, 10.0);
        assert_eq!(metrics.latency.max, 30.0);
        assert_eq!(metrics.latency.avg, 20.0);

        let kinds: Vec<_> = telemetry.events().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Request, EventKind::Request, EventKind::Response, EventKind::Error]
        );
    }

    #[test]
    fn test_metrics_zeroed_when_disabled() {
        let telemetry = Telemetry::new(TelemetryConfig::default().with_metrics(false));
        telemetry.record_request(1, "GET /a", Utc::now());
        telemetry.record_response(1, "GET /a", Utc::now());

        assert_eq!(telemetry.metrics(), Metrics::default());
        assert_eq!(telemetry.events().len(), 2);
    }

    #[test]
    fn test_trace_ids_only_when_tracing() {
        let plain = Telemetry::new(TelemetryConfig::default());
        assert_eq!(plain.record_request(1, "x", Utc::now()), None);

        let traced = Telemetry::new(TelemetryConfig::default().with_tracing(true));
        let id = traced.record_request(1, "x", Utc::now()).unwrap();
        traced.record_response(1, "x", Utc::now());
        assert!(Uuid::parse_str(&id).is_ok());
        assert!(traced.events().iter().all(|e| e.trace_id.as_deref() == Some(id.as_str())));
    }

    #[test]
    fn test_event_buffer_is_bounded() {
        let telemetry = Telemetry::new(TelemetryConfig::default().with_max_events(3));
        for id in 0..5 {
            telemetry.record_request(id, format!("GET /{id}"), Utc::now());
        }
        let operations: Vec<_> = telemetry.events().into_iter().map(|e| e.operation).collect();
        assert_eq!(operations, vec!["GET /2", "GET /3", "GET /4"]);

        telemetry.clear();
        assert!(telemetry.events().is_empty());
        assert_eq!(telemetry.metrics(), Metrics::default());
    }

    #[test]
    fn test_abandoned_calls_are_evicted() {
        let telemetry = Telemetry::new(TelemetryConfig::default().with_max_events(3));
        for id in 0..10 {
            telemetry.record_request(id, format!("GET /{id}"), Utc::now());
        }
        assert_eq!(telemetry.lock().pending.len(), 3);

        telemetry.record_response(0, "GET /0", Utc::now());
        telemetry.record_response(9, "GET /9", Utc::now());
        let timed: Vec<_> = telemetry
            .events()
            .into_iter()
            .filter(|e| e.kind == EventKind::Response)
            .map(|e| e.duration_ms.is_some())
            .collect();
        assert_eq!(timed, vec![false, true]);
        assert_eq!(telemetry.lock().pending.len(), 2);
    }

    #[tokio::test]
    async fn test_http_calls_are_recorded() {
        let mock = Arc::new(MockHttp::failing_on("/fail", |_| {
            Error::new(ErrorKind::Http {
                status: 503,
                message: "unavailable".into(),
            })
        }));
        let client = compose![http(&mock), telemetry(TelemetryConfig::default())].unwrap();
        let delegate = client.http(DELEGATE_KEY).unwrap();

        delegate.get("/ok", RequestOptions::new()).await.unwrap();
        let _ = delegate.get("/fail", RequestOptions::new()).await;

        let telemetry = client.manager::<Telemetry>(TELEMETRY_KEY).unwrap();
        let events = telemetry.events();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].operation, "GET /ok");
        assert_eq!(events[3].kind, EventKind::Error);
        assert_eq!(events[3].error.as_deref(), Some("unavailable"));
        assert_eq!(telemetry.metrics().requests.errors, 1);
    }

    #[tokio::test]
    async fn test_trace_header_injected() {
        let mock = Arc::new(MockHttp::new());
        let client = compose![
            http(&mock),
            telemetry(TelemetryConfig::default().with_trace_header())
        ]
        .unwrap();

        client
            .http(DELEGATE_KEY)
            .unwrap()
            .get("/x", RequestOptions::new())
            .await
            .unwrap();

        let header = mock.last_call().unwrap().headers[DEFAULT_TRACE_HEADER].clone();
        let telemetry = client.manager::<Telemetry>(TELEMETRY_KEY).unwrap();
        assert_eq!(telemetry.events()[0].trace_id.as_deref(), Some(header.as_str()));
    }

    #[tokio::test]
    async fn test_websocket_operations_are_recorded() {
        let ws = Arc::new(MockWebSocket::new());
        let delegate = Delegate::WebSocket(ws.clone());
        let client = compose![
            move |_: &State| -> Result<State> { Ok(State::new().with(DELEGATE_KEY, delegate.clone())) },
            telemetry(TelemetryConfig::default()),
        ]
        .unwrap();

        let socket = client.websocket(DELEGATE_KEY).unwrap();
        socket.connect().await.unwrap();
        socket.send(WsMessage::from("ping")).await.unwrap();

        let telemetry = client.manager::<Telemetry>(TELEMETRY_KEY).unwrap();
        let operations: Vec<_> = telemetry
            .events()
            .into_iter()
            .map(|e| (e.kind, e.operation))
            .collect();
        assert_eq!(
            operations,
            vec![
                (EventKind::Request, "connect".to_string()),
                (EventKind::Response, "connect".to_string()),
                (EventKind::Request, "send".to_string()),
                (EventKind::Response, "send".to_string()),
            ]
        );
        assert_eq!(telemetry.metrics().requests.success, 2);
    }

    #[test]
    fn test_disabled_records_nothing() {
        let telemetry = Telemetry::new(TelemetryConfig::disabled());
        telemetry.record_request(1, "GET /", Utc::now());
        assert!(telemetry.events().is_empty());
    }
}
