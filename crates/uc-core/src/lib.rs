//! # universal-client-core
//!
//! Composition engine and delegate middleware for universal-client.
//!
//! A client is an ordered list of features folded into one [`State`]. Features
//! that need a transport find it under a key (default `"delegate"`) and may
//! replace it with a wrapped version. Wrapping nests like an onion, so
//! cross-cutting features stack without knowing about each other.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 compose![f1, f2, ...]                       │
//! │  - Folds features over State, last writer wins              │
//! │  - Runs onInit hooks once, strips the key                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          wrap_http / wrap_websocket (middleware)            │
//! │  - before / after / error around every call                 │
//! │  - Lifecycle observers for sockets                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │        Delegate::{Http, WebSocket, Sse} (transport)         │
//! │  - Built by DelegateFactory from DelegateOptions            │
//! │  - HTTP and SSE constructed lazily, single-flight           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use universal_client_core::{compose, on_init, DelegateFactory, HttpOptions};
//!
//! let factory = DelegateFactory::new(registry);
//! let client = compose![
//!     factory.feature(HttpOptions::new("reqwest").with_base_url("https://api.example.com")),
//!     on_init(|state| {
//!         tracing::info!(keys = state.len(), "client ready");
//!         Ok(())
//!     }),
//! ]?;
//!
//! let user = client.http("delegate").unwrap().get("/users/1", Default::default()).await?;
//! ```

pub mod compose;
pub mod delegate;
mod error;
pub mod factory;
pub mod hooks;
pub mod lazy;
mod listeners;
pub mod middleware;
pub mod query;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use compose::{compose, Client, ClientBuilder, Feature, Method, MethodFuture, Slot, State, DELEGATE_KEY};
pub use delegate::{
    detect, detect_methods, dispatch, Capability, CloseInfo, Delegate, Headers, HttpDelegate,
    HttpMethod, RequestOptions, SseDelegate, SseEvent, WebSocketDelegate, WsMessage,
    DEFAULT_EVENT,
};
pub use error::{Error, ErrorKind, Result};
pub use factory::{
    DelegateFactory, DelegateFeature, DelegateOptions, HttpOptions, ReconnectOptions,
    ResponseFormat, SseOptions, TransportRegistry, WebSocketOptions,
};
pub use hooks::{hooks, on_init, HookRegistry, HooksFeature, InitHook, HOOKS_KEY, ON_INIT};
pub use lazy::{LazyCell, LazyHttp, LazyPhase, LazySse};
pub use listeners::{Callback, Listeners, Subscription};
pub use middleware::{
    wrap_http, wrap_websocket, ErrorContext, HttpInterceptor, RequestContext, RequestPatch,
    ResponseContext, WebSocketLifecycle, WsEvent, WsOperation,
};
pub use query::ParamValue;
