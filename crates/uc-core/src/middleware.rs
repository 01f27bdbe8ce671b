//! Delegate middleware.
//!
//! [`wrap_http`] and [`wrap_websocket`] produce a new delegate of the same
//! capability that runs hooks around every call. Wrapping an already wrapped
//! delegate nests like an onion: the outermost wrap's pre-hook runs first and
//! its post-hook runs last.
//!
//! ```text
//!   caller ─▶ outer.before ─▶ inner.before ─▶ transport
//!   caller ◀─ outer.after  ◀─ inner.after  ◀─┘
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::delegate::{
    dispatch, CloseInfo, Headers, HttpDelegate, HttpMethod, RequestOptions, WebSocketDelegate,
    WsMessage,
};
use crate::error::{Error, Result};
use crate::listeners::{Callback, Subscription};

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique token identifying one delegate call.
pub fn next_call_id() -> u64 {
    NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed)
}

/// What a `before` hook sees.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub call_id: u64,
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    /// `None` for `GET` and `DELETE`.
    pub body: Option<Value>,
}

impl RequestContext {
    /// Shallow-merge a patch returned by a `before` hook.
    pub fn apply(&mut self, patch: RequestPatch) {
        if let Some(url) = patch.url {
            self.url = url;
        }
        if let Some(headers) = patch.headers {
            self.headers = headers;
        }
        if let Some(body) = patch.body {
            self.body = Some(body);
        }
    }

    /// `METHOD URL`, the operation name used in logs and telemetry.
    pub fn operation(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

/// Partial override returned from a `before` hook.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestPatch {
    pub url: Option<String>,
    pub headers: Option<Headers>,
    pub body: Option<Value>,
}

impl RequestPatch {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn headers(headers: Headers) -> Self {
        Self {
            headers: Some(headers),
            ..Self::default()
        }
    }

    pub fn body(body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::default()
        }
    }
}

/// What an `after` hook sees. `url` is the URL after `before` ran.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseContext {
    pub call_id: u64,
    pub method: HttpMethod,
    pub url: String,
    pub result: Value,
    pub body: Option<Value>,
}

/// What an `error` hook sees.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub call_id: u64,
    pub method: HttpMethod,
    pub url: String,
    pub error: Error,
    pub body: Option<Value>,
}

pub type BeforeHook =
    Arc<dyn Fn(RequestContext) -> BoxFuture<'static, Result<Option<RequestPatch>>> + Send + Sync>;
pub type AfterHook = Arc<dyn Fn(ResponseContext) -> BoxFuture<'static, Result<Value>> + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(ErrorContext) -> BoxFuture<'static, ()> + Send + Sync>;

/// A `{before, after, error}` hook set for an HTTP delegate.
///
/// - `before` may return a [`RequestPatch`] that is merged into the request.
/// - `after` receives the result and its return value replaces it.
/// - `error` observes failures; the original error is always returned.
#[derive(Clone, Default)]
pub struct HttpInterceptor {
    pub before: Option<BeforeHook>,
    pub after: Option<AfterHook>,
    pub error: Option<ErrorHook>,
}

impl fmt::Debug for HttpInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpInterceptor")
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

impl HttpInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<RequestPatch>>> + Send + 'static,
    {
        self.before = Some(Arc::new(move |ctx| hook(ctx).boxed()));
        self
    }

    pub fn after<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ResponseContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.after = Some(Arc::new(move |ctx| hook(ctx).boxed()));
        self
    }

    pub fn error<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ErrorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.error = Some(Arc::new(move |ctx| hook(ctx).boxed()));
        self
    }
}

/// Wrap an HTTP delegate with an interceptor.
pub fn wrap_http(delegate: Arc<dyn HttpDelegate>, interceptor: HttpInterceptor) -> Arc<dyn HttpDelegate> {
    Arc::new(InterceptedHttp {
        inner: delegate,
        interceptor,
    })
}

struct InterceptedHttp {
    inner: Arc<dyn HttpDelegate>,
    interceptor: HttpInterceptor,
}

impl InterceptedHttp {
    async fn intercept(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value> {
        let RequestOptions { headers, params } = options;
        let mut context = RequestContext {
            call_id: next_call_id(),
            method,
            url: url.to_string(),
            headers,
            body,
        };

        if let Some(before) = &self.interceptor.before {
            if let Some(patch) = before(context.clone()).await? {
                context.apply(patch);
            }
        }

        let RequestContext {
            call_id,
            url,
            headers,
            body,
            ..
        } = context;
        let options = RequestOptions { headers, params };

        match dispatch(self.inner.as_ref(), method, &url, body.clone(), options).await {
            Ok(result) => match &self.interceptor.after {
                Some(after) => {
                    after(ResponseContext {
                        call_id,
                        method,
                        url,
                        result,
                        body,
                    })
                    .await
                }
                None => Ok(result),
            },
            Err(error) => {
                if let Some(hook) = &self.interceptor.error {
                    hook(ErrorContext {
                        call_id,
                        method,
                        url,
                        error: error.clone(),
                        body,
                    })
                    .await;
                }
                Err(error)
            }
        }
    }
}

#[async_trait]
impl HttpDelegate for InterceptedHttp {
    async fn get(&self, url: &str, options: RequestOptions) -> Result<Value> {
        self.intercept(HttpMethod::Get, url, None, options).await
    }

    async fn post(&self, url: &str, body: Value, options: RequestOptions) -> Result<Value> {
        self.intercept(HttpMethod::Post, url, Some(body), options).await
    }

    async fn put(&self, url: &str, body: Value, options: RequestOptions) -> Result<Value> {
        self.intercept(HttpMethod::Put, url, Some(body), options).await
    }

    async fn patch(&self, url: &str, body: Value, options: RequestOptions) -> Result<Value> {
        self.intercept(HttpMethod::Patch, url, Some(body), options).await
    }

    async fn delete(&self, url: &str, options: RequestOptions) -> Result<Value> {
        self.intercept(HttpMethod::Delete, url, None, options).await
    }
}

/// WebSocket operation observed by lifecycle hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WsOperation {
    Connect,
    Send,
    Close,
}

impl WsOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            WsOperation::Connect => "connect",
            WsOperation::Send => "send",
            WsOperation::Close => "close",
        }
    }
}

impl fmt::Display for WsOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a WebSocket lifecycle hook sees.
#[derive(Debug, Clone)]
pub struct WsEvent {
    pub call_id: u64,
    pub operation: WsOperation,
    /// When the wrapper observed the event, not when the hook ran.
    pub at: DateTime<Utc>,
    /// The outgoing message for `send`.
    pub message: Option<WsMessage>,
    /// Set for `on_error`.
    pub error: Option<Error>,
}

pub type LifecycleHook = Arc<dyn Fn(WsEvent) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Best-effort observers around WebSocket operations.
///
/// Hooks are spawned as detached tasks: they are never awaited, cannot change
/// what is sent, and their failures are only logged.
#[derive(Clone, Default)]
pub struct WebSocketLifecycle {
    pub before_connect: Option<LifecycleHook>,
    pub after_connect: Option<LifecycleHook>,
    pub before_send: Option<LifecycleHook>,
    pub after_send: Option<LifecycleHook>,
    pub before_close: Option<LifecycleHook>,
    pub after_close: Option<LifecycleHook>,
    pub on_error: Option<LifecycleHook>,
}

fn lifecycle_hook<F, Fut>(hook: F) -> LifecycleHook
where
    F: Fn(WsEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |event| hook(event).boxed())
}

macro_rules! lifecycle_setters {
    ($($name:ident),* $(,)?) => {
        $(
            pub fn $name<F, Fut>(mut self, hook: F) -> Self
            where
                F: Fn(WsEvent) -> Fut + Send + Sync + 'static,
                Fut: Future<Output = Result<()>> + Send + 'static,
            {
                self.$name = Some(lifecycle_hook(hook));
                self
            }
        )*
    };
}

impl WebSocketLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    lifecycle_setters!(
        before_connect,
        after_connect,
        before_send,
        after_send,
        before_close,
        after_close,
        on_error,
    );
}

impl fmt::Debug for WebSocketLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketLifecycle").finish_non_exhaustive()
    }
}

/// Wrap a WebSocket delegate with lifecycle observers.
pub fn wrap_websocket(
    delegate: Arc<dyn WebSocketDelegate>,
    lifecycle: WebSocketLifecycle,
) -> Arc<dyn WebSocketDelegate> {
    Arc::new(ObservedWebSocket {
        inner: delegate,
        lifecycle,
    })
}

/// Run a lifecycle hook detached from the caller, logging failures.
fn observe(name: &'static str, hook: &Option<LifecycleHook>, event: WsEvent) {
    let Some(hook) = hook else {
        return;
    };
    let future = hook(event);
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(err) = future.await {
                    warn!(hook = name, error = %err, "WebSocket lifecycle hook failed");
                }
            });
        }
        Err(_) => debug!(hook = name, "no async runtime, skipping WebSocket lifecycle hook"),
    }
}

struct ObservedWebSocket {
    inner: Arc<dyn WebSocketDelegate>,
    lifecycle: WebSocketLifecycle,
}

impl ObservedWebSocket {
    fn event(call_id: u64, operation: WsOperation, message: Option<WsMessage>) -> WsEvent {
        WsEvent {
            call_id,
            operation,
            at: Utc::now(),
            message,
            error: None,
        }
    }

    fn observe_outcome(
        &self,
        after_name: &'static str,
        after: &Option<LifecycleHook>,
        call_id: u64,
        operation: WsOperation,
        message: Option<WsMessage>,
        outcome: &Result<()>,
    ) {
        match outcome {
            Ok(()) => observe(after_name, after, Self::event(call_id, operation, message)),
            Err(err) => {
                let mut event = Self::event(call_id, operation, message);
                event.error = Some(err.clone());
                observe("on_error", &self.lifecycle.on_error, event);
            }
        }
    }
}

#[async_trait]
impl WebSocketDelegate for ObservedWebSocket {
    async fn connect(&self) -> Result<()> {
        let call_id = next_call_id();
        let operation = WsOperation::Connect;
        observe(
            "before_connect",
            &self.lifecycle.before_connect,
            Self::event(call_id, operation, None),
        );
        let outcome = self.inner.connect().await;
        self.observe_outcome("after_connect", &self.lifecycle.after_connect, call_id, operation, None, &outcome);
        outcome
    }

    async fn send(&self, message: WsMessage) -> Result<()> {
        let call_id = next_call_id();
        let operation = WsOperation::Send;
        observe(
            "before_send",
            &self.lifecycle.before_send,
            Self::event(call_id, operation, Some(message.clone())),
        );
        let outcome = self.inner.send(message.clone()).await;
        self.observe_outcome(
            "after_send",
            &self.lifecycle.after_send,
            call_id,
            operation,
            Some(message),
            &outcome,
        );
        outcome
    }

    async fn close(&self) -> Result<()> {
        let call_id = next_call_id();
        let operation = WsOperation::Close;
        observe(
            "before_close",
            &self.lifecycle.before_close,
            Self::event(call_id, operation, None),
        );
        let outcome = self.inner.close().await;
        self.observe_outcome("after_close", &self.lifecycle.after_close, call_id, operation, None, &outcome);
        outcome
    }

    fn on_open(&self, callback: Callback<()>) -> Subscription {
        self.inner.on_open(callback)
    }

    fn on_close(&self, callback: Callback<CloseInfo>) -> Subscription {
        self.inner.on_close(callback)
    }

    fn on_error(&self, callback: Callback<Error>) -> Subscription {
        self.inner.on_error(callback)
    }

    fn on_message(&self, callback: Callback<WsMessage>) -> Subscription {
        self.inner.on_message(callback)
    }
}
