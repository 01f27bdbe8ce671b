//! Lifecycle hooks.
//!
//! Two kinds of hooks live here:
//!
//! - [`InitHook`]: callbacks stored under [`ON_INIT`] during composition and
//!   run exactly once by [`compose`](crate::compose()) after the last feature.
//! - [`HookRegistry`]: request/response/error subscribers attached to an HTTP
//!   delegate by the [`hooks`] feature.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::compose::{Feature, Slot, State, DELEGATE_KEY};
use crate::delegate::Delegate;
use crate::error::Result;
use crate::listeners::{Callback, Listeners, Subscription};
use crate::middleware::{wrap_http, ErrorContext, HttpInterceptor, RequestContext, ResponseContext};

/// State key holding the init hook.
pub const ON_INIT: &str = "onInit";

/// State key the [`hooks`] feature stores its registry under.
pub const HOOKS_KEY: &str = "hooks";

type InitCallback = Arc<dyn Fn(&State) -> Result<()> + Send + Sync>;

/// Ordered init callbacks.
#[derive(Clone, Default)]
pub struct InitHook {
    callbacks: Vec<InitCallback>,
}

impl InitHook {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&State) -> Result<()> + Send + Sync + 'static,
    {
        Self::default().then(callback)
    }

    /// Append a callback; it runs after the ones already registered.
    pub fn then<F>(mut self, callback: F) -> Self
    where
        F: Fn(&State) -> Result<()> + Send + Sync + 'static,
    {
        self.callbacks.push(Arc::new(callback));
        self
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Run every callback in order, stopping at the first failure.
    pub fn invoke(&self, state: &State) -> Result<()> {
        for callback in &self.callbacks {
            callback(state)?;
        }
        Ok(())
    }
}

impl fmt::Debug for InitHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitHook")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// Register a callback to run once the client is assembled.
///
/// Callbacks registered by earlier features are kept and run first.
pub fn on_init<F>(callback: F) -> impl Feature
where
    F: Fn(&State) -> Result<()> + Send + Sync + 'static,
{
    let callback: InitCallback = Arc::new(callback);
    move |state: &State| -> Result<State> {
        let existing = match state.get(ON_INIT) {
            Some(Slot::Hook(hook)) => hook.clone(),
            _ => InitHook::default(),
        };
        let callback = Arc::clone(&callback);
        let hook = existing.then(move |state: &State| callback(state));
        Ok(State::new().with(ON_INIT, hook))
    }
}

/// Subscribers notified around every request of a hooked HTTP delegate.
#[derive(Clone, Default, Debug)]
pub struct HookRegistry {
    request: Listeners<RequestContext>,
    response: Listeners<ResponseContext>,
    error: Listeners<ErrorContext>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_request<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&RequestContext) + Send + Sync + 'static,
    {
        self.request.add(Arc::new(callback) as Callback<RequestContext>)
    }

    pub fn on_response<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ResponseContext) + Send + Sync + 'static,
    {
        self.response.add(Arc::new(callback) as Callback<ResponseContext>)
    }

    pub fn on_error<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ErrorContext) + Send + Sync + 'static,
    {
        self.error.add(Arc::new(callback) as Callback<ErrorContext>)
    }

    /// Interceptor that reports to this registry without altering anything.
    pub fn interceptor(&self) -> HttpInterceptor {
        let request = self.request.clone();
        let response = self.response.clone();
        let error = self.error.clone();
        HttpInterceptor::new()
            .before(move |ctx: RequestContext| {
                request.emit(&ctx);
                async { Ok(None) }
            })
            .after(move |ctx: ResponseContext| {
                response.emit(&ctx);
                async move { Ok(ctx.result) }
            })
            .error(move |ctx: ErrorContext| {
                error.emit(&ctx);
                async {}
            })
    }
}

/// Feature that attaches a [`HookRegistry`] to the HTTP delegate.
///
/// Non-HTTP delegates are left as they are; the registry is stored either way.
pub fn hooks() -> HooksFeature {
    HooksFeature {
        key: DELEGATE_KEY.to_string(),
        registry: HookRegistry::new(),
    }
}

pub struct HooksFeature {
    key: String,
    registry: HookRegistry,
}

impl HooksFeature {
    /// Look for the delegate under `key` instead of `"delegate"`.
    pub fn on_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn on_request<F>(self, callback: F) -> Self
    where
        F: Fn(&RequestContext) + Send + Sync + 'static,
    {
        let _ = self.registry.on_request(callback);
        self
    }

    pub fn on_response<F>(self, callback: F) -> Self
    where
        F: Fn(&ResponseContext) + Send + Sync + 'static,
    {
        let _ = self.registry.on_response(callback);
        self
    }

    pub fn on_error<F>(self, callback: F) -> Self
    where
        F: Fn(&ErrorContext) + Send + Sync + 'static,
    {
        let _ = self.registry.on_error(callback);
        self
    }
}

impl Feature for HooksFeature {
    fn apply(&self, state: &State) -> Result<State> {
        let (delegate, _) = state.split_delegate(&self.key)?;
        let registry = Arc::new(self.registry.clone());
        let delegate = match delegate {
            Delegate::Http(http) => Delegate::Http(wrap_http(http, registry.interceptor())),
            other => {
                debug!(capability = %other.capability(), "hooks only observe HTTP delegates");
                other
            }
        };
        Ok(State::new()
            .with(self.key.clone(), delegate)
            .with(HOOKS_KEY, Slot::manager(registry)))
    }
}
