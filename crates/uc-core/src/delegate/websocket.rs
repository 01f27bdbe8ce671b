//! WebSocket delegate capability.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::listeners::{Callback, Subscription};

/// A WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl WsMessage {
    /// Serialize a value as a JSON text message.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self> {
        Ok(WsMessage::Text(serde_json::to_string(value)?))
    }

    /// The text payload, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            WsMessage::Text(text) => Some(text),
            WsMessage::Binary(_) => None,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            WsMessage::Text(text) => text.len(),
            WsMessage::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for WsMessage {
    fn from(text: &str) -> Self {
        WsMessage::Text(text.to_string())
    }
}

impl From<String> for WsMessage {
    fn from(text: String) -> Self {
        WsMessage::Text(text)
    }
}

impl From<Vec<u8>> for WsMessage {
    fn from(bytes: Vec<u8>) -> Self {
        WsMessage::Binary(bytes)
    }
}

/// Why a socket closed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: Option<u16>,
    pub reason: String,
}

/// The WebSocket capability.
///
/// Implementations that reconnect should use capped exponential backoff with
/// a maximum attempt count. Messages sent while disconnected are dropped with
/// a warning rather than queued.
#[async_trait]
pub trait WebSocketDelegate: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn send(&self, message: WsMessage) -> Result<()>;

    async fn close(&self) -> Result<()>;

    fn on_open(&self, callback: Callback<()>) -> Subscription;

    fn on_close(&self, callback: Callback<CloseInfo>) -> Subscription;

    fn on_error(&self, callback: Callback<Error>) -> Subscription;

    fn on_message(&self, callback: Callback<WsMessage>) -> Subscription;
}
