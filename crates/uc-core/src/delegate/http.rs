//! HTTP delegate capability.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::query::ParamValue;

/// Header map carried by requests. Ordered so logs and cache keys are stable.
pub type Headers = BTreeMap<String, String>;

/// HTTP verb of a delegate call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Returns true for verbs whose delegate method accepts a body.
    pub fn has_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call options: extra headers and query parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub headers: Headers,
    pub params: Vec<(String, ParamValue)>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add a query parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }
}

/// The HTTP capability: verb methods returning the parsed response.
///
/// Non-2xx responses must fail with [`ErrorKind::Http`](crate::ErrorKind::Http)
/// whose message comes from [`error_message`](crate::query::error_message).
#[async_trait]
pub trait HttpDelegate: Send + Sync {
    async fn get(&self, url: &str, options: RequestOptions) -> Result<Value>;

    async fn post(&self, url: &str, body: Value, options: RequestOptions) -> Result<Value>;

    async fn put(&self, url: &str, body: Value, options: RequestOptions) -> Result<Value>;

    async fn patch(&self, url: &str, body: Value, options: RequestOptions) -> Result<Value>;

    async fn delete(&self, url: &str, options: RequestOptions) -> Result<Value>;
}

/// Call the verb method matching `method` on `delegate`.
///
/// `body` is ignored for `GET` and `DELETE`; a missing body for the other
/// verbs is sent as `null`.
pub async fn dispatch(
    delegate: &dyn HttpDelegate,
    method: HttpMethod,
    url: &str,
    body: Option<Value>,
    options: RequestOptions,
) -> Result<Value> {
    let body = body.unwrap_or(Value::Null);
    match method {
        HttpMethod::Get => delegate.get(url, options).await,
        HttpMethod::Post => delegate.post(url, body, options).await,
        HttpMethod::Put => delegate.put(url, body, options).await,
        HttpMethod::Patch => delegate.patch(url, body, options).await,
        HttpMethod::Delete => delegate.delete(url, options).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names() {
        assert_eq!(HttpMethod::Get.to_string(), "GET");
        assert_eq!(HttpMethod::Delete.as_str(), "DELETE");
        assert!(HttpMethod::Patch.has_body());
        assert!(!HttpMethod::Get.has_body());
    }

    #[test]
    fn test_request_options_builder() {
        let options = RequestOptions::new()
            .header("Authorization", "Bearer t")
            .param("page", 2);

        assert_eq!(
            options.headers.get("Authorization"),
            Some(&"Bearer t".to_string())
        );
        assert_eq!(options.params, vec![("page".to_string(), ParamValue::Int(2))]);
    }
}
