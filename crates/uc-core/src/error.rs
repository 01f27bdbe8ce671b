//! Error types for universal-client.
//!
//! Errors are cheap to clone so that a lazily constructed delegate can replay
//! a failed construction to every caller.

use std::sync::Arc;

/// Result type alias for universal-client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for universal-client operations.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional source error.
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Create a new error with the given kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    /// Create a new error with the given kind and source.
    pub fn with_source(
        kind: ErrorKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            source: Some(Arc::new(source)),
        }
    }

    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config(message.into()))
    }

    /// Shorthand for a composition error.
    pub fn composition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Composition(message.into()))
    }

    /// Shorthand for a missing optional transport.
    pub fn dependency_missing(transport: impl Into<String>) -> Self {
        Self::new(ErrorKind::DependencyMissing {
            transport: transport.into(),
        })
    }

    /// Returns the HTTP status if this is an HTTP error.
    pub fn status(&self) -> Option<u16> {
        match &self.kind {
            ErrorKind::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if this error was raised because the client is offline
    /// and nothing could be served from cache.
    pub fn is_offline(&self) -> bool {
        matches!(self.kind, ErrorKind::Offline { .. })
    }

    /// Returns true if this is a configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self.kind, ErrorKind::Config(_))
    }

    /// Returns true if an optional transport implementation is not installed.
    pub fn is_dependency_missing(&self) -> bool {
        matches!(self.kind, ErrorKind::DependencyMissing { .. })
    }
}

/// The kind of error that occurred.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ErrorKind {
    /// Non-2xx HTTP response. The message is extracted from the body when possible.
    #[error("{message}")]
    Http { status: u16, message: String },

    /// Request timeout.
    #[error("Request timeout")]
    Timeout,

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid configuration, such as an unsupported delegate type or impl.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An optional transport implementation is not available.
    #[error("{transport} transport is not installed")]
    DependencyMissing { transport: String },

    /// The client state does not satisfy a feature's precondition.
    #[error("Composition error: {0}")]
    Composition(String),

    /// Offline with no usable cached response.
    #[error("Offline: no cached response for {key}")]
    Offline { key: String },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Json(err.to_string()), err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::with_source(ErrorKind::InvalidUrl(err.to_string()), err)
    }
}
