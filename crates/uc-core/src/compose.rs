//! Feature composition engine.
//!
//! A client is assembled by folding an ordered list of [`Feature`]s over an
//! accumulator ([`State`]). Each feature sees the state produced by every
//! feature before it and returns a partial state that is shallow-merged in:
//! keys in the partial state overwrite keys of the same name, everything else
//! is preserved.
//!
//! ```text
//!   {}  ──f1──▶ {delegate}  ──f2──▶ {delegate', telemetry}  ──f3──▶ {…, get_user, onInit}
//!                                                                        │
//!                                              onInit(state − onInit) ◀──┘
//! ```
//!
//! After the fold, an `onInit` entry is removed and, if it is a hook, invoked
//! once with the final state.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::delegate::{Delegate, HttpDelegate, SseDelegate, WebSocketDelegate};
use crate::error::{Error, Result};
use crate::hooks::{InitHook, ON_INIT};

/// Key under which delegate features look for the transport by default.
pub const DELEGATE_KEY: &str = "delegate";

/// Future returned by a [`Method`].
pub type MethodFuture = BoxFuture<'static, Result<Value>>;

/// A public client method taking JSON arguments.
#[derive(Clone)]
pub struct Method(Arc<dyn Fn(Value) -> MethodFuture + Send + Sync>);

impl Method {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self(Arc::new(move |args| f(args).boxed()))
    }

    pub fn call(&self, args: Value) -> MethodFuture {
        (self.0)(args)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Method")
    }
}

/// One entry of the accumulator.
#[derive(Clone)]
pub enum Slot {
    Delegate(Delegate),
    Method(Method),
    Hook(InitHook),
    /// A feature's private state object, shared with the client surface.
    Manager(Arc<dyn Any + Send + Sync>),
    Value(Value),
}

impl Slot {
    /// Wrap a manager object.
    pub fn manager<T: Any + Send + Sync>(manager: Arc<T>) -> Self {
        Slot::Manager(manager)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Slot::Delegate(_) => "delegate",
            Slot::Method(_) => "method",
            Slot::Hook(_) => "hook",
            Slot::Manager(_) => "manager",
            Slot::Value(_) => "value",
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Delegate(delegate) => fmt::Debug::fmt(delegate, f),
            Slot::Method(method) => fmt::Debug::fmt(method, f),
            Slot::Hook(hook) => fmt::Debug::fmt(hook, f),
            Slot::Manager(_) => f.write_str("Manager"),
            Slot::Value(value) => fmt::Debug::fmt(value, f),
        }
    }
}

impl From<Delegate> for Slot {
    fn from(delegate: Delegate) -> Self {
        Slot::Delegate(delegate)
    }
}

impl From<Method> for Slot {
    fn from(method: Method) -> Self {
        Slot::Method(method)
    }
}

impl From<InitHook> for Slot {
    fn from(hook: InitHook) -> Self {
        Slot::Hook(hook)
    }
}

impl From<Value> for Slot {
    fn from(value: Value) -> Self {
        Slot::Value(value)
    }
}

/// The accumulator threaded through features.
#[derive(Clone, Default)]
pub struct State {
    entries: BTreeMap<String, Slot>,
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, slot: impl Into<Slot>) -> Self {
        self.insert(key, slot);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, slot: impl Into<Slot>) -> Option<Slot> {
        self.entries.insert(key.into(), slot.into())
    }

    pub fn get(&self, key: &str) -> Option<&Slot> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Slot> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Slot)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shallow merge: every key of `partial` overwrites the same key here.
    pub fn merge(&mut self, partial: State) {
        self.entries.extend(partial.entries);
    }

    pub fn delegate(&self, key: &str) -> Option<&Delegate> {
        match self.entries.get(key) {
            Some(Slot::Delegate(delegate)) => Some(delegate),
            _ => None,
        }
    }

    pub fn http(&self, key: &str) -> Option<Arc<dyn HttpDelegate>> {
        self.delegate(key)?.as_http().cloned()
    }

    pub fn websocket(&self, key: &str) -> Option<Arc<dyn WebSocketDelegate>> {
        self.delegate(key)?.as_websocket().cloned()
    }

    pub fn sse(&self, key: &str) -> Option<Arc<dyn SseDelegate>> {
        self.delegate(key)?.as_sse().cloned()
    }

    /// Typed access to a manager stored by a feature.
    pub fn manager<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        match self.entries.get(key) {
            Some(Slot::Manager(manager)) => Arc::clone(manager).downcast::<T>().ok(),
            _ => None,
        }
    }

    pub fn method(&self, key: &str) -> Option<&Method> {
        match self.entries.get(key) {
            Some(Slot::Method(method)) => Some(method),
            _ => None,
        }
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        match self.entries.get(key) {
            Some(Slot::Value(value)) => Some(value),
            _ => None,
        }
    }

    /// Invoke a method registered under `key`.
    pub async fn call(&self, key: &str, args: Value) -> Result<Value> {
        let method = self
            .method(key)
            .ok_or_else(|| Error::composition(format!("no method named `{key}`")))?
            .clone();
        method.call(args).await
    }

    /// Split `{delegate, ...rest}` for a delegate feature.
    ///
    /// Fails with a composition error when no delegate is stored under `key`.
    pub fn split_delegate(&self, key: &str) -> Result<(Delegate, State)> {
        let delegate = self.delegate(key).cloned().ok_or_else(|| {
            let found = self.get(key).map(Slot::kind).unwrap_or("nothing");
            Error::composition(format!(
                "feature requires a delegate under `{key}`, found {found}"
            ))
        })?;
        let mut rest = self.clone();
        rest.remove(key);
        Ok((delegate, rest))
    }
}

/// A step of the composition pipeline.
///
/// Any `Fn(&State) -> Result<State>` closure is a feature.
pub trait Feature: Send + Sync {
    /// Compute the partial state to merge, given everything accumulated so far.
    fn apply(&self, state: &State) -> Result<State>;
}

impl<F> Feature for F
where
    F: Fn(&State) -> Result<State> + Send + Sync,
{
    fn apply(&self, state: &State) -> Result<State> {
        self(state)
    }
}

/// The assembled client surface.
#[derive(Clone, Debug)]
pub struct Client {
    state: State,
}

impl Client {
    pub fn into_state(self) -> State {
        self.state
    }
}

impl Deref for Client {
    type Target = State;

    fn deref(&self) -> &State {
        &self.state
    }
}

/// Fold `features` left to right and resolve the `onInit` hook.
///
/// A failing feature aborts composition and its error is returned unchanged.
#[instrument(skip_all)]
pub fn compose<I>(features: I) -> Result<Client>
where
    I: IntoIterator<Item = Box<dyn Feature>>,
{
    let mut state = State::new();
    for (index, feature) in features.into_iter().enumerate() {
        let partial = feature.apply(&state)?;
        debug!(feature = index, keys = partial.len(), "merging feature output");
        state.merge(partial);
    }

    if let Some(Slot::Hook(hook)) = state.remove(ON_INIT) {
        debug!(callbacks = hook.len(), "running init hooks");
        hook.invoke(&state)?;
    }

    Ok(Client { state })
}

/// Chaining alternative to [`compose`].
#[derive(Default)]
pub struct ClientBuilder {
    features: Vec<Box<dyn Feature>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a feature to the pipeline.
    pub fn with(mut self, feature: impl Feature + 'static) -> Self {
        self.features.push(Box::new(feature));
        self
    }

    pub fn build(self) -> Result<Client> {
        compose(self.features)
    }
}

/// Compose a heterogeneous list of features.
///
/// ```rust,ignore
/// let client = compose![delegate(options), telemetry(config), http_method("get_user", ...)]?;
/// ```
#[macro_export]
macro_rules! compose {
    ($($feature:expr),* $(,)?) => {
        $crate::compose(::std::vec![
            $(::std::boxed::Box::new($feature) as ::std::boxed::Box<dyn $crate::Feature>),*
        ])
    };
}
