//! reqwest-backed HTTP delegate.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument};
use universal_client_core::query::{append_query, error_message, is_absolute_url, join_url};
use universal_client_core::{
    Error, ErrorKind, HttpDelegate, HttpMethod, HttpOptions, RequestOptions, ResponseFormat,
    Result,
};

use crate::client::{build_client, transport_error};
use crate::config::TransportConfig;

/// HTTP delegate sending requests through a pooled reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestDelegate {
    inner: reqwest::Client,
    options: HttpOptions,
    config: TransportConfig,
}

impl ReqwestDelegate {
    /// Create a delegate. `options.timeout_ms` overrides `config.timeout`.
    pub fn new(options: HttpOptions, config: TransportConfig) -> Result<Self> {
        let timeout = options
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(config.timeout);
        let inner = build_client(&config, Some(timeout))?;
        Ok(Self {
            inner,
            options,
            config,
        })
    }

    pub fn options(&self) -> &HttpOptions {
        &self.options
    }

    /// Resolve `url` against the base URL and append the query string.
    fn resolve(&self, url: &str, options: &RequestOptions) -> String {
        let url = match &self.options.base_url {
            Some(base) if !is_absolute_url(url) => join_url(base, url),
            _ => url.to_string(),
        };
        append_query(&url, &options.params)
    }

    #[instrument(skip(self, body, options), fields(method = %method, url = %url))]
    async fn execute(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value> {
        let target = self.resolve(url, &options);
        let mut req = self.inner.request(to_reqwest(method), &target);

        // Per-call headers override the delegate defaults.
        let mut headers = self.options.headers.clone();
        headers.extend(options.headers);
        for (name, value) in &headers {
            req = req.header(name.as_str(), value.as_str());
        }

        if let Some(body) = body.filter(|b| !b.is_null()) {
            req = req.json(&body);
        }

        if self.config.enable_tracing {
            debug!(url = %target, "Sending request");
        }

        let response = req.send().await.map_err(transport_error)?;
        let status = response.status();

        if self.config.enable_tracing {
            let content_length = response.content_length();
            if status.is_success() {
                debug!(status = status.as_u16(), content_length, "Response received");
            } else {
                info!(status = status.as_u16(), content_length, "Non-success response");
            }
        }

        let status_text = status.canonical_reason().unwrap_or_default().to_string();
        let response_headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                let value = value.to_str().unwrap_or_default().to_string();
                (name.to_string(), Value::String(value))
            })
            .collect();
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(Error::new(ErrorKind::Http {
                status: status.as_u16(),
                message: error_message(status.as_u16(), &status_text, &text),
            }));
        }

        match self.options.response_format {
            ResponseFormat::Json if text.trim().is_empty() => Ok(Value::Null),
            ResponseFormat::Json => Ok(serde_json::from_str(&text)?),
            ResponseFormat::Text => Ok(Value::String(text)),
            ResponseFormat::Raw => Ok(json!({
                "status": status.as_u16(),
                "status_text": status_text,
                "headers": response_headers,
                "body": text,
            })),
        }
    }
}

fn to_reqwest(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl HttpDelegate for ReqwestDelegate {
    async fn get(&self, url: &str, options: RequestOptions) -> Result<Value> {
        self.execute(HttpMethod::Get, url, None, options).await
    }

    async fn post(&self, url: &str, body: Value, options: RequestOptions) -> Result<Value> {
        self.execute(HttpMethod::Post, url, Some(body), options).await
    }

    async fn put(&self, url: &str, body: Value, options: RequestOptions) -> Result<Value> {
        self.execute(HttpMethod::Put, url, Some(body), options).await
    }

    async fn patch(&self, url: &str, body: Value, options: RequestOptions) -> Result<Value> {
        self.execute(HttpMethod::Patch, url, Some(body), options).await
    }

    async fn delete(&self, url: &str, options: RequestOptions) -> Result<Value> {
        self.execute(HttpMethod::Delete, url, None, options).await
    }
}
