//! Shared reqwest client construction and error mapping.

use std::time::Duration;

use universal_client_core::{Error, ErrorKind, Result};

use crate::config::TransportConfig;

/// Build a reqwest client from the transport config.
///
/// `timeout` bounds whole requests; streaming transports pass `None` so only
/// the connect timeout applies.
pub(crate) fn build_client(
    config: &TransportConfig,
    timeout: Option<Duration>,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .pool_idle_timeout(config.pool_idle_timeout)
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .user_agent(&config.user_agent)
        .gzip(config.accept_compressed)
        .deflate(config.accept_compressed);

    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }

    builder
        .build()
        .map_err(|e| Error::with_source(ErrorKind::Config(e.to_string()), e))
}

/// Map a reqwest failure onto the shared error kinds.
pub(crate) fn transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::with_source(ErrorKind::Timeout, err)
    } else if err.is_builder() {
        Error::with_source(ErrorKind::InvalidUrl(err.to_string()), err)
    } else {
        Error::with_source(ErrorKind::Connection(err.to_string()), err)
    }
}
