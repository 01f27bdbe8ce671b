//! Named base URLs with a switchable current environment.

use std::sync::{Arc, RwLock};

use tracing::{info, warn};
use universal_client_core::query::{is_absolute_url, join_url};
use universal_client_core::{
    wrap_http, wrap_websocket, Delegate, Error, Feature, HttpInterceptor, RequestContext,
    RequestPatch, Result, Slot, State, WebSocketLifecycle, WsEvent, DELEGATE_KEY,
};

/// State key of the [`Environments`] manager.
pub const ENVIRONMENTS_KEY: &str = "environments";

/// Environment table, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentsConfig {
    environments: Vec<(String, String)>,
    default: Option<String>,
    fallback: Option<String>,
}

impl EnvironmentsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an environment. Redeclaring a name replaces its URL in place.
    pub fn with_environment(mut self, name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let name = name.into();
        let base_url = base_url.into();
        match self.environments.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = base_url,
            None => self.environments.push((name, base_url)),
        }
        self
    }

    /// Start in `name` instead of the first declared environment.
    pub fn with_default(mut self, name: impl Into<String>) -> Self {
        self.default = Some(name.into());
        self
    }

    /// Environment used when switching to an unknown name.
    pub fn with_fallback(mut self, name: impl Into<String>) -> Self {
        self.fallback = Some(name.into());
        self
    }

    fn validate(&self) -> Result<()> {
        for (role, name) in [("default", &self.default), ("fallback", &self.fallback)] {
            if let Some(name) = name {
                if !self.environments.iter().any(|(n, _)| n == name) {
                    return Err(Error::config(format!(
                        "{role} environment `{name}` is not declared"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Environment manager stored under [`ENVIRONMENTS_KEY`].
#[derive(Debug)]
pub struct Environments {
    config: EnvironmentsConfig,
    current: RwLock<Option<String>>,
}

impl Environments {
    fn new(config: EnvironmentsConfig) -> Self {
        let current = config
            .default
            .clone()
            .or_else(|| config.environments.first().map(|(name, _)| name.clone()));
        Self {
            config,
            current: RwLock::new(current),
        }
    }

    /// Name of the current environment, if any are declared.
    pub fn current(&self) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Base URL of the current environment.
    pub fn base_url(&self) -> Option<String> {
        let current = self.current()?;
        self.lookup(&current).map(str::to_string)
    }

    /// Declared names, in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.config
            .environments
            .iter()
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Switch environments and return the one now active.
    ///
    /// An unknown name selects the fallback, or the default when no fallback
    /// is configured. This never fails.
    pub fn set_environment(&self, name: &str) -> Option<String> {
        let next = if self.lookup(name).is_some() {
            Some(name.to_string())
        } else {
            let replacement = self.config.fallback.clone().or_else(|| self.initial());
            warn!(
                requested = name,
                using = replacement.as_deref().unwrap_or("none"),
                "unknown environment"
            );
            replacement
        };
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = next.clone();
        next
    }

    /// Rewrite a relative URL against the current base URL.
    pub fn resolve(&self, url: &str) -> String {
        if is_absolute_url(url) {
            return url.to_string();
        }
        match self.base_url() {
            Some(base) => join_url(&base, url),
            None => url.to_string(),
        }
    }

    fn initial(&self) -> Option<String> {
        self.config
            .default
            .clone()
            .or_else(|| self.config.environments.first().map(|(name, _)| name.clone()))
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        self.config
            .environments
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, url)| url.as_str())
    }
}

/// Feature rewriting relative request URLs against the current environment.
pub fn environments(config: EnvironmentsConfig) -> EnvironmentsFeature {
    EnvironmentsFeature {
        config,
        key: DELEGATE_KEY.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct EnvironmentsFeature {
    config: EnvironmentsConfig,
    key: String,
}

impl EnvironmentsFeature {
    pub fn on_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

impl Feature for EnvironmentsFeature {
    fn apply(&self, state: &State) -> Result<State> {
        self.config.validate()?;
        let (delegate, _) = state.split_delegate(&self.key)?;
        let manager = Arc::new(Environments::new(self.config.clone()));

        let delegate = match delegate {
            Delegate::Http(http) => {
                let envs = Arc::clone(&manager);
                let interceptor = HttpInterceptor::new().before(move |ctx: RequestContext| {
                    let resolved = envs.resolve(&ctx.url);
                    async move {
                        Ok((resolved != ctx.url).then(|| RequestPatch::url(resolved)))
                    }
                });
                Delegate::Http(wrap_http(http, interceptor))
            }
            Delegate::WebSocket(ws) => {
                let envs = Arc::clone(&manager);
                let lifecycle = WebSocketLifecycle::new().before_connect(move |_: WsEvent| {
                    info!(
                        environment = envs.current().as_deref().unwrap_or("none"),
                        base_url = envs.base_url().as_deref().unwrap_or("none"),
                        "connecting WebSocket"
                    );
                    async { Ok(()) }
                });
                Delegate::WebSocket(wrap_websocket(ws, lifecycle))
            }
            sse @ Delegate::Sse(_) => sse,
        };

        Ok(State::new()
            .with(self.key.clone(), delegate)
            .with(ENVIRONMENTS_KEY, Slot::manager(manager)))
    }
}
