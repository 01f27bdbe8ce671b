//! Delegate capability contracts and capability detection.
//!
//! A delegate is the transport object a client's methods ultimately call
//! into. There are exactly three capabilities, carried as an explicit tagged
//! union so that cross-cutting features can decide how to wrap a delegate
//! without inspecting it:
//!
//! | Capability | Discriminating methods |
//! |------------|------------------------|
//! | HTTP | `get`, `post`, `put`, `patch`, `delete` |
//! | WebSocket | `connect`, `send`, `close` |
//! | SSE | `on_message`, `on_error`, `on_open`, `subscribe` |
//!
//! The discriminating sets are pairwise disjoint, which keeps
//! [`detect_methods`] unambiguous.

use std::fmt;
use std::sync::Arc;

use crate::compose::Slot;

pub mod http;
pub mod sse;
pub mod websocket;

pub use http::{dispatch, Headers, HttpDelegate, HttpMethod, RequestOptions};
pub use sse::{SseDelegate, SseEvent, DEFAULT_EVENT};
pub use websocket::{CloseInfo, WebSocketDelegate, WsMessage};

/// A transport delegate tagged by capability.
#[derive(Clone)]
pub enum Delegate {
    Http(Arc<dyn HttpDelegate>),
    WebSocket(Arc<dyn WebSocketDelegate>),
    Sse(Arc<dyn SseDelegate>),
}

impl Delegate {
    pub fn capability(&self) -> Capability {
        Capability::of(self)
    }

    pub fn as_http(&self) -> Option<&Arc<dyn HttpDelegate>> {
        match self {
            Delegate::Http(delegate) => Some(delegate),
            _ => None,
        }
    }

    pub fn as_websocket(&self) -> Option<&Arc<dyn WebSocketDelegate>> {
        match self {
            Delegate::WebSocket(delegate) => Some(delegate),
            _ => None,
        }
    }

    pub fn as_sse(&self) -> Option<&Arc<dyn SseDelegate>> {
        match self {
            Delegate::Sse(delegate) => Some(delegate),
            _ => None,
        }
    }
}

impl fmt::Debug for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Delegate::{}", self.capability())
    }
}

impl From<Arc<dyn HttpDelegate>> for Delegate {
    fn from(delegate: Arc<dyn HttpDelegate>) -> Self {
        Delegate::Http(delegate)
    }
}

impl From<Arc<dyn WebSocketDelegate>> for Delegate {
    fn from(delegate: Arc<dyn WebSocketDelegate>) -> Self {
        Delegate::WebSocket(delegate)
    }
}

impl From<Arc<dyn SseDelegate>> for Delegate {
    fn from(delegate: Arc<dyn SseDelegate>) -> Self {
        Delegate::Sse(delegate)
    }
}

/// The capability a value exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Http,
    WebSocket,
    Sse,
    Unknown,
}

impl Capability {
    /// Every concrete capability, in detection order.
    pub const ALL: [Capability; 3] = [Capability::Http, Capability::WebSocket, Capability::Sse];

    /// The method names that identify this capability.
    pub const fn required_methods(self) -> &'static [&'static str] {
        match self {
            Capability::Http => &["get", "post", "put", "patch", "delete"],
            Capability::WebSocket => &["connect", "send", "close"],
            Capability::Sse => &["on_message", "on_error", "on_open", "subscribe"],
            Capability::Unknown => &[],
        }
    }

    /// Read the tag of a delegate.
    pub fn of(delegate: &Delegate) -> Self {
        match delegate {
            Delegate::Http(_) => Capability::Http,
            Delegate::WebSocket(_) => Capability::WebSocket,
            Delegate::Sse(_) => Capability::Sse,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Http => "http",
            Capability::WebSocket => "websocket",
            Capability::Sse => "sse",
            Capability::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability of a state entry; anything that is not a delegate is `Unknown`.
pub fn detect(slot: Option<&Slot>) -> Capability {
    match slot {
        Some(Slot::Delegate(delegate)) => delegate.capability(),
        _ => Capability::Unknown,
    }
}

/// Structural detection over a set of method names.
///
/// Returns the first capability whose required methods are all present.
pub fn detect_methods(methods: &[&str]) -> Capability {
    Capability::ALL
        .into_iter()
        .find(|capability| {
            capability
                .required_methods()
                .iter()
                .all(|required| methods.contains(required))
        })
        .unwrap_or(Capability::Unknown)
}
