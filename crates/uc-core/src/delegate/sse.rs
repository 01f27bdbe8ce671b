//! Server-sent events delegate capability.

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::listeners::{Callback, Subscription};

/// Event type used when the server does not name one.
pub const DEFAULT_EVENT: &str = "message";

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

impl SseEvent {
    /// A default-stream event carrying `data`.
    pub fn message(data: impl Into<String>) -> Self {
        Self::named(DEFAULT_EVENT, data)
    }

    /// An event of the given type.
    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            id: None,
            retry: None,
        }
    }

    /// Returns true if this event belongs to the default message stream.
    pub fn is_default(&self) -> bool {
        self.event == DEFAULT_EVENT
    }

    /// Deserialize the data field as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

/// The SSE capability.
pub trait SseDelegate: Send + Sync {
    fn close(&self);

    fn on_open(&self, callback: Callback<()>) -> Subscription;

    fn on_error(&self, callback: Callback<Error>) -> Subscription;

    /// Events of the default `message` type.
    fn on_message(&self, callback: Callback<SseEvent>) -> Subscription;

    /// Events of a named type beyond the default message stream.
    fn subscribe(&self, event: &str, callback: Callback<SseEvent>) -> Subscription;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json() {
        #[derive(serde::Deserialize)]
        struct Tick {
            price: u32,
        }

        let event = SseEvent::named("tick", r#"{"price": 42}"#);
        assert!(!event.is_default());
        assert_eq!(event.json::<Tick>().unwrap().price, 42);
        assert!(SseEvent::message("hi").is_default());
    }
}
