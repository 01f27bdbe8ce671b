//! Named client methods built on the HTTP delegate.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use universal_client_core::{
    Error, Feature, HttpDelegate, Method, Result, State, DELEGATE_KEY,
};

type Handler<Fut> = Arc<dyn Fn(Arc<dyn HttpDelegate>, Value) -> Fut + Send + Sync>;

/// Register `name` as a client method calling `handler` with the delegate.
///
/// The delegate is captured when the feature runs, so cross-cutting features
/// must come before method features to be in effect for them.
///
/// ```rust,ignore
/// let client = compose![
///     delegate(options),
///     http_method("get_user", |http, args| async move {
///         let id = args["id"].as_u64().unwrap_or_default();
///         http.get(&format!("/users/{id}"), RequestOptions::new()).await
///     }),
/// ]?;
/// let user = client.call("get_user", json!({"id": 1})).await?;
/// ```
pub fn http_method<F, Fut>(name: impl Into<String>, handler: F) -> HttpMethodFeature<Fut>
where
    F: Fn(Arc<dyn HttpDelegate>, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    HttpMethodFeature {
        name: name.into(),
        key: DELEGATE_KEY.to_string(),
        handler: Arc::new(handler),
    }
}

pub struct HttpMethodFeature<Fut> {
    name: String,
    key: String,
    handler: Handler<Fut>,
}

impl<Fut> HttpMethodFeature<Fut> {
    /// Use the HTTP delegate stored under `key`.
    pub fn on_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

impl<Fut> Feature for HttpMethodFeature<Fut>
where
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn apply(&self, state: &State) -> Result<State> {
        let http = state.http(&self.key).ok_or_else(|| {
            Error::composition(format!(
                "method `{}` requires an HTTP delegate under `{}`",
                self.name, self.key
            ))
        })?;
        let handler = Arc::clone(&self.handler);
        let method = Method::new(move |args| handler(Arc::clone(&http), args));
        Ok(State::new().with(self.name.clone(), method))
    }
}
