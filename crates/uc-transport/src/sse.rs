//! Server-sent events over a streaming reqwest response.
//!
//! [`SseParser`] turns `text/event-stream` bytes into [`SseEvent`]s:
//!
//! - `event:` sets the type of the next dispatched event (default `message`)
//! - `data:` lines accumulate, joined by `\n`
//! - `id:` sets the last event id, which persists across events
//! - `retry:` sets the reconnection delay in milliseconds
//! - lines starting with `:` are comments
//! - a blank line dispatches the pending event
//!
//! [`ReqwestSse`] reconnects after the stream ends, sending `Last-Event-ID`
//! and waiting for the server's `retry` hint when one was given.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use universal_client_core::query::error_message;
use universal_client_core::{
    Callback, Error, ErrorKind, Listeners, Result, SseDelegate, SseEvent, SseOptions,
    Subscription, DEFAULT_EVENT,
};

use crate::client::{build_client, transport_error};
use crate::config::TransportConfig;
use crate::reconnect::ReconnectPolicy;

/// Incremental `text/event-stream` parser.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    skip_lf: bool,
    event: Option<String>,
    data: String,
    has_data: bool,
    last_event_id: Option<String>,
    retry: Option<u64>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// The id of the most recent event, sent back as `Last-Event-ID`.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// The server's reconnection delay, if it sent one.
    pub fn retry(&self) -> Option<Duration> {
        self.retry.map(Duration::from_millis)
    }

    /// Discard a partially received line or event when a connection ends.
    /// The last event id and retry delay carry over to the next connection.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.skip_lf = false;
        self.event = None;
        self.data.clear();
        self.has_data = false;
    }

    /// Feed a chunk and return every event it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for &byte in chunk {
            if self.skip_lf {
                self.skip_lf = false;
                if byte == b'\n' {
                    continue;
                }
            }
            match byte {
                b'\r' | b'\n' => {
                    self.skip_lf = byte == b'\r';
                    let line = std::mem::take(&mut self.buffer);
                    let line = String::from_utf8_lossy(&line);
                    if let Some(event) = self.line(&line) {
                        events.push(event);
                    }
                }
                other => self.buffer.push(other),
            }
        }
        events
    }

    fn line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "id" if !value.contains('\0') => self.last_event_id = Some(value.to_string()),
            "retry" => match value.parse::<u64>() {
                Ok(ms) => self.retry = Some(ms),
                Err(_) => debug!(value, "ignoring invalid retry field"),
            },
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if !self.has_data {
            return None;
        }
        self.has_data = false;
        let event = event
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_EVENT.to_string());
        Some(SseEvent {
            event,
            data: std::mem::take(&mut self.data),
            id: self.last_event_id.clone(),
            retry: self.retry,
        })
    }
}

struct Shared {
    client: reqwest::Client,
    options: SseOptions,
    config: TransportConfig,
    open: Listeners<()>,
    error: Listeners<Error>,
    message: Listeners<SseEvent>,
    named: Mutex<HashMap<String, Listeners<SseEvent>>>,
}

impl Shared {
    fn named(&self) -> MutexGuard<'_, HashMap<String, Listeners<SseEvent>>> {
        self.named.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: &SseEvent) {
        if event.is_default() {
            self.message.emit(event);
            return;
        }
        let listeners = self.named().get(&event.event).cloned();
        match listeners {
            Some(listeners) => listeners.emit(event),
            None => debug!(event = %event.event, "no subscribers for SSE event"),
        }
    }

    /// Read one connection to its end. Returns false if the server refused
    /// the stream and no reconnect should follow.
    async fn stream_once(&self, parser: &mut SseParser, policy: &mut ReconnectPolicy) -> bool {
        let mut req = self
            .client
            .get(&self.options.url)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache");
        for (name, value) in &self.options.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(id) = parser.last_event_id() {
            req = req.header("Last-Event-ID", id);
        }

        let response = match req.send().await {
            Ok(response) => response,
            Err(err) => {
                self.error.emit(&transport_error(err));
                return true;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let status_text = status.canonical_reason().unwrap_or_default();
            let body = response.text().await.unwrap_or_default();
            self.error.emit(&Error::new(ErrorKind::Http {
                status: status.as_u16(),
                message: error_message(status.as_u16(), status_text, &body),
            }));
            return false;
        }

        info!(url = %self.options.url, "SSE stream opened");
        parser.reset();
        policy.reset();
        self.open.emit(&());

        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for event in parser.feed(&bytes) {
                        self.emit(&event);
                    }
                }
                Err(err) => {
                    self.error.emit(&transport_error(err));
                    break;
                }
            }
        }
        true
    }

    async fn run(self: Arc<Self>) {
        let mut parser = SseParser::new();
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        while self.stream_once(&mut parser, &mut policy).await {
            let Some(delay) = policy.next_delay(parser.retry()) else {
                error!(
                    url = %self.options.url,
                    attempts = policy.attempt(),
                    "SSE reconnect attempts exhausted"
                );
                return;
            };
            warn!(
                url = %self.options.url,
                attempt = policy.attempt(),
                delay_ms = delay.as_millis() as u64,
                "SSE stream ended, reconnecting"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// SSE delegate reading a `text/event-stream` response with reqwest.
///
/// The stream starts with the first subscription and stops on [`close`].
///
/// [`close`]: SseDelegate::close
pub struct ReqwestSse {
    shared: Arc<Shared>,
    task: Mutex<Task>,
}

enum Task {
    Idle,
    Running(JoinHandle<()>),
    Closed,
}

impl ReqwestSse {
    pub fn new(options: SseOptions, config: TransportConfig) -> Result<Self> {
        url::Url::parse(&options.url)?;
        let client = build_client(&config, None)?;
        Ok(Self {
            shared: Arc::new(Shared {
                client,
                options,
                config,
                open: Listeners::new(),
                error: Listeners::new(),
                message: Listeners::new(),
                named: Mutex::new(HashMap::new()),
            }),
            task: Mutex::new(Task::Idle),
        })
    }

    fn task(&self) -> MutexGuard<'_, Task> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_started(&self) {
        let mut task = self.task();
        if !matches!(*task, Task::Idle) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                *task = Task::Running(handle.spawn(Arc::clone(&self.shared).run()));
            }
            Err(_) => {
                *task = Task::Closed;
                drop(task);
                self.shared
                    .error
                    .emit(&Error::config("SSE delegate must be used inside a tokio runtime"));
            }
        }
    }
}

impl std::fmt::Debug for ReqwestSse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match *self.task() {
            Task::Idle => "idle",
            Task::Running(_) => "running",
            Task::Closed => "closed",
        };
        f.debug_struct("ReqwestSse")
            .field("url", &self.shared.options.url)
            .field("state", &state)
            .finish()
    }
}

impl SseDelegate for ReqwestSse {
    fn close(&self) {
        let previous = std::mem::replace(&mut *self.task(), Task::Closed);
        if let Task::Running(handle) = previous {
            debug!(url = %self.shared.options.url, "closing SSE stream");
            handle.abort();
        }
    }

    fn on_open(&self, callback: Callback<()>) -> Subscription {
        let subscription = self.shared.open.add(callback);
        self.ensure_started();
        subscription
    }

    fn on_error(&self, callback: Callback<Error>) -> Subscription {
        let subscription = self.shared.error.add(callback);
        self.ensure_started();
        subscription
    }

    fn on_message(&self, callback: Callback<SseEvent>) -> Subscription {
        let subscription = self.shared.message.add(callback);
        self.ensure_started();
        subscription
    }

    fn subscribe(&self, event: &str, callback: Callback<SseEvent>) -> Subscription {
        let subscription = self
            .shared
            .named()
            .entry(event.to_string())
            .or_default()
            .add(callback);
        self.ensure_started();
        subscription
    }
}

impl Drop for ReqwestSse {
    fn drop(&mut self) {
        self.close();
    }
}
