//! Recording mock delegates for tests.
//!
//! Available to this crate's tests and, through the `test-util` feature, to
//! downstream crates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::delegate::{
    CloseInfo, Headers, HttpDelegate, HttpMethod, RequestOptions, SseDelegate, SseEvent,
    WebSocketDelegate, WsMessage,
};
use crate::error::{Error, Result};
use crate::listeners::{Callback, Listeners, Subscription};
use crate::query::ParamValue;

/// One call received by [`MockHttp`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub params: Vec<(String, ParamValue)>,
    pub body: Option<Value>,
}

type Responder = Arc<dyn Fn(&RecordedCall) -> Result<Value> + Send + Sync>;

/// HTTP delegate that records calls and answers from a responder.
///
/// The default responder echoes `{method, url, body}`.
pub struct MockHttp {
    calls: Mutex<Vec<RecordedCall>>,
    responder: Responder,
}

impl Default for MockHttp {
    fn default() -> Self {
        Self::responding(|call| {
            Ok(json!({
                "method": call.method.as_str(),
                "url": call.url,
                "body": call.body.clone().unwrap_or(Value::Null),
            }))
        })
    }
}

impl MockHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn responding<F>(responder: F) -> Self
    where
        F: Fn(&RecordedCall) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            calls: Mutex::new(Vec::new()),
            responder: Arc::new(responder),
        }
    }

    /// Fail every call with the error built by `error`.
    pub fn failing<F>(error: F) -> Self
    where
        F: Fn(&RecordedCall) -> Error + Send + Sync + 'static,
    {
        Self::responding(move |call| Err(error(call)))
    }

    /// Echo like [`MockHttp::new`], except for calls to exactly `url`.
    pub fn failing_on<F>(url: &str, error: F) -> Self
    where
        F: Fn(&RecordedCall) -> Error + Send + Sync + 'static,
    {
        let url = url.to_string();
        let echo = Self::new().responder;
        Self::responding(move |call| {
            if call.url == url {
                Err(error(call))
            } else {
                echo(call)
            }
        })
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().len()
    }

    pub fn last_call(&self) -> Option<RecordedCall> {
        self.lock().last().cloned()
    }

    pub fn last_url(&self) -> Option<String> {
        self.last_call().map(|call| call.url)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RecordedCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value> {
        let call = RecordedCall {
            method,
            url: url.to_string(),
            headers: options.headers,
            params: options.params,
            body,
        };
        self.lock().push(call.clone());
        (self.responder)(&call)
    }
}

#[async_trait]
impl HttpDelegate for MockHttp {
    async fn get(&self, url: &str, options: RequestOptions) -> Result<Value> {
        self.record(HttpMethod::Get, url, None, options)
    }

    async fn post(&self, url: &str, body: Value, options: RequestOptions) -> Result<Value> {
        self.record(HttpMethod::Post, url, Some(body), options)
    }

    async fn put(&self, url: &str, body: Value, options: RequestOptions) -> Result<Value> {
        self.record(HttpMethod::Put, url, Some(body), options)
    }

    async fn patch(&self, url: &str, body: Value, options: RequestOptions) -> Result<Value> {
        self.record(HttpMethod::Patch, url, Some(body), options)
    }

    async fn delete(&self, url: &str, options: RequestOptions) -> Result<Value> {
        self.record(HttpMethod::Delete, url, None, options)
    }
}

/// WebSocket delegate that records sent messages.
#[derive(Default)]
pub struct MockWebSocket {
    connected: AtomicBool,
    sent: Mutex<Vec<WsMessage>>,
    next_send_error: Mutex<Option<Error>>,
    open: Listeners<()>,
    close: Listeners<CloseInfo>,
    error: Listeners<Error>,
    message: Listeners<WsMessage>,
}

impl MockWebSocket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<WsMessage> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Make the next `send` fail with `error`.
    pub fn fail_next_send(&self, error: Error) {
        *self
            .next_send_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Deliver an incoming message to subscribers.
    pub fn receive(&self, message: WsMessage) {
        self.message.emit(&message);
    }
}

#[async_trait]
impl WebSocketDelegate for MockWebSocket {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        self.open.emit(&());
        Ok(())
    }

    async fn send(&self, message: WsMessage) -> Result<()> {
        let failure = self
            .next_send_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(error) = failure {
            self.error.emit(&error);
            return Err(error);
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.close.emit(&CloseInfo {
            code: Some(1000),
            reason: String::new(),
        });
        Ok(())
    }

    fn on_open(&self, callback: Callback<()>) -> Subscription {
        self.open.add(callback)
    }

    fn on_close(&self, callback: Callback<CloseInfo>) -> Subscription {
        self.close.add(callback)
    }

    fn on_error(&self, callback: Callback<Error>) -> Subscription {
        self.error.add(callback)
    }

    fn on_message(&self, callback: Callback<WsMessage>) -> Subscription {
        self.message.add(callback)
    }
}

/// SSE delegate driven by the test.
#[derive(Default)]
pub struct MockSse {
    closed: AtomicBool,
    open: Listeners<()>,
    error: Listeners<Error>,
    message: Listeners<SseEvent>,
    named: Mutex<HashMap<String, Listeners<SseEvent>>>,
}

impl MockSse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn open(&self) {
        self.open.emit(&());
    }

    pub fn fail(&self, error: Error) {
        self.error.emit(&error);
    }

    /// Dispatch an event to `on_message` or to the matching `subscribe` list.
    pub fn emit(&self, event: SseEvent) {
        if event.is_default() {
            self.message.emit(&event);
            return;
        }
        let listeners = self
            .named
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.event)
            .cloned();
        if let Some(listeners) = listeners {
            listeners.emit(&event);
        }
    }
}

impl SseDelegate for MockSse {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn on_open(&self, callback: Callback<()>) -> Subscription {
        self.open.add(callback)
    }

    fn on_error(&self, callback: Callback<Error>) -> Subscription {
        self.error.add(callback)
    }

    fn on_message(&self, callback: Callback<SseEvent>) -> Subscription {
        self.message.add(callback)
    }

    fn subscribe(&self, event: &str, callback: Callback<SseEvent>) -> Subscription {
        self.named
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.to_string())
            .or_default()
            .add(callback)
    }
}
