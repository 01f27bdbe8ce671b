//! Lazily constructed delegates.
//!
//! A [`LazyCell`] defers building a value until first use and guarantees that
//! concurrent first uses share one construction:
//!
//! ```text
//!   Unstarted ──first get()──▶ InFlight(shared future) ──▶ Ready(value)
//!                                                    └──▶ Failed(error)
//! ```
//!
//! `Failed` is terminal: the error is replayed to every later caller and the
//! construction is never retried.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::delegate::{HttpDelegate, RequestOptions, SseDelegate, SseEvent};
use crate::error::{Error, ErrorKind, Result};
use crate::listeners::{Callback, Listeners, Subscription};

type InitFuture<T> = BoxFuture<'static, Result<Arc<T>>>;
type Init<T> = Box<dyn FnOnce() -> InitFuture<T> + Send>;

/// Observable phase of a [`LazyCell`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LazyPhase {
    Unstarted,
    InFlight,
    Ready,
    Failed,
}

enum Phase<T: ?Sized + 'static> {
    Unstarted(Option<Init<T>>),
    InFlight(Shared<InitFuture<T>>),
    Ready(Arc<T>),
    Failed(Error),
}

enum Step<T: ?Sized + 'static> {
    Done(Result<Arc<T>>),
    Wait(Shared<InitFuture<T>>),
}

/// Single-flight, memoized asynchronous construction.
pub struct LazyCell<T: ?Sized + 'static> {
    phase: Mutex<Phase<T>>,
}

impl<T: ?Sized + 'static> LazyCell<T> {
    pub fn phase(&self) -> LazyPhase {
        match &*self.lock() {
            Phase::Unstarted(_) => LazyPhase::Unstarted,
            Phase::InFlight(_) => LazyPhase::InFlight,
            Phase::Ready(_) => LazyPhase::Ready,
            Phase::Failed(_) => LazyPhase::Failed,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Phase<T>> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: ?Sized + Send + Sync + 'static> LazyCell<T> {
    pub fn new<F, Fut>(init: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Arc<T>>> + Send + 'static,
    {
        let init: Init<T> = Box::new(move || init().boxed());
        Self {
            phase: Mutex::new(Phase::Unstarted(Some(init))),
        }
    }

    /// The constructed value, building it on first call.
    pub async fn get(&self) -> Result<Arc<T>> {
        let shared = match self.step() {
            Step::Done(outcome) => return outcome,
            Step::Wait(shared) => shared,
        };
        let outcome = shared.await;
        self.settle(&outcome);
        outcome
    }

    fn step(&self) -> Step<T> {
        let mut phase = self.lock();
        match &mut *phase {
            Phase::Ready(value) => Step::Done(Ok(Arc::clone(value))),
            Phase::Failed(error) => Step::Done(Err(error.clone())),
            Phase::InFlight(shared) => Step::Wait(shared.clone()),
            Phase::Unstarted(init) => {
                let Some(init) = init.take() else {
                    return Step::Done(Err(Error::new(ErrorKind::Other(
                        "lazy initializer already consumed".to_string(),
                    ))));
                };
                debug!("starting lazy delegate construction");
                let shared = init().shared();
                *phase = Phase::InFlight(shared.clone());
                Step::Wait(shared)
            }
        }
    }

    fn settle(&self, outcome: &Result<Arc<T>>) {
        let mut phase = self.lock();
        if let Phase::InFlight(_) = &*phase {
            *phase = match outcome {
                Ok(value) => Phase::Ready(Arc::clone(value)),
                Err(error) => {
                    warn!(error = %error, "lazy delegate construction failed");
                    Phase::Failed(error.clone())
                }
            };
        }
    }
}

impl<T: ?Sized + 'static> fmt::Debug for LazyCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyCell").field("phase", &self.phase()).finish()
    }
}

/// HTTP delegate built on first request.
#[derive(Debug)]
pub struct LazyHttp {
    cell: LazyCell<dyn HttpDelegate>,
}

impl LazyHttp {
    pub fn new<F, Fut>(init: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Arc<dyn HttpDelegate>>> + Send + 'static,
    {
        Self {
            cell: LazyCell::new(init),
        }
    }

    pub fn phase(&self) -> LazyPhase {
        self.cell.phase()
    }
}

#[async_trait]
impl HttpDelegate for LazyHttp {
    async fn get(&self, url: &str, options: RequestOptions) -> Result<Value> {
        self.cell.get().await?.get(url, options).await
    }

    async fn post(&self, url: &str, body: Value, options: RequestOptions) -> Result<Value> {
        self.cell.get().await?.post(url, body, options).await
    }

    async fn put(&self, url: &str, body: Value, options: RequestOptions) -> Result<Value> {
        self.cell.get().await?.put(url, body, options).await
    }

    async fn patch(&self, url: &str, body: Value, options: RequestOptions) -> Result<Value> {
        self.cell.get().await?.patch(url, body, options).await
    }

    async fn delete(&self, url: &str, options: RequestOptions) -> Result<Value> {
        self.cell.get().await?.delete(url, options).await
    }
}

#[derive(Default)]
struct SseBridge {
    inner: Option<Arc<dyn SseDelegate>>,
    named: HashMap<String, Listeners<SseEvent>>,
    links: Vec<Subscription>,
    failure: Option<Error>,
    started: bool,
    closed: bool,
}

struct SseShared {
    cell: LazyCell<dyn SseDelegate>,
    bridge: Mutex<SseBridge>,
    open: Listeners<()>,
    error: Listeners<Error>,
    message: Listeners<SseEvent>,
}

impl SseShared {
    fn bridge(&self) -> MutexGuard<'_, SseBridge> {
        self.bridge.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn forward(listeners: &Listeners<SseEvent>) -> Callback<SseEvent> {
        let listeners = listeners.clone();
        Arc::new(move |event: &SseEvent| listeners.emit(event))
    }

    fn attach(&self, inner: Arc<dyn SseDelegate>) {
        let mut bridge = self.bridge();
        if bridge.closed {
            debug!("SSE delegate closed before it was ready");
            inner.close();
            return;
        }

        let open = self.open.clone();
        let error = self.error.clone();
        let mut links = vec![
            inner.on_open(Arc::new(move |_: &()| open.emit(&()))),
            inner.on_error(Arc::new(move |err: &Error| error.emit(err))),
            inner.on_message(Self::forward(&self.message)),
        ];
        for (event, listeners) in &bridge.named {
            links.push(inner.subscribe(event, Self::forward(listeners)));
        }
        bridge.links.extend(links);
        bridge.inner = Some(inner);
    }

    fn fail(&self, error: Error) {
        self.bridge().failure = Some(error.clone());
        // Listeners registered before the failure was recorded; later ones
        // get the replay in `on_error`.
        self.error.emit(&error);
    }
}

/// SSE delegate built on first subscription.
///
/// Subscriptions taken before construction finishes are kept locally and
/// bridged to the real delegate once it is ready. A construction failure is
/// delivered to current `on_error` subscribers and replayed to later ones.
pub struct LazySse {
    shared: Arc<SseShared>,
}

impl fmt::Debug for LazySse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazySse")
            .field("phase", &self.shared.cell.phase())
            .finish()
    }
}

impl LazySse {
    pub fn new<F, Fut>(init: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Arc<dyn SseDelegate>>> + Send + 'static,
    {
        Self {
            shared: Arc::new(SseShared {
                cell: LazyCell::new(init),
                bridge: Mutex::new(SseBridge::default()),
                open: Listeners::new(),
                error: Listeners::new(),
                message: Listeners::new(),
            }),
        }
    }

    pub fn phase(&self) -> LazyPhase {
        self.shared.cell.phase()
    }

    /// Start construction if this is the first use.
    fn ensure_started(&self) {
        {
            let mut bridge = self.shared.bridge();
            if bridge.started || bridge.closed {
                return;
            }
            bridge.started = true;
        }

        let shared = Arc::clone(&self.shared);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match shared.cell.get().await {
                        Ok(inner) => shared.attach(inner),
                        Err(error) => shared.fail(error),
                    }
                });
            }
            Err(_) => {
                self.shared
                    .fail(Error::config("SSE delegate must be used inside a tokio runtime"));
            }
        }
    }
}

impl SseDelegate for LazySse {
    fn close(&self) {
        let inner = {
            let mut bridge = self.shared.bridge();
            bridge.closed = true;
            bridge.inner.clone()
        };
        if let Some(inner) = inner {
            inner.close();
        }
    }

    fn on_open(&self, callback: Callback<()>) -> Subscription {
        let subscription = self.shared.open.add(callback);
        self.ensure_started();
        subscription
    }

    fn on_error(&self, callback: Callback<Error>) -> Subscription {
        // Checked and registered under the bridge lock so a concurrent
        // `fail` either replays to this callback or emits to it, never both.
        let registered = {
            let bridge = self.shared.bridge();
            match &bridge.failure {
                Some(error) => Err(error.clone()),
                None => Ok(self.shared.error.add(Arc::clone(&callback))),
            }
        };
        match registered {
            Ok(subscription) => {
                self.ensure_started();
                subscription
            }
            // Failure is terminal: nothing further will be emitted.
            Err(error) => {
                callback(&error);
                Subscription::noop()
            }
        }
    }

    fn on_message(&self, callback: Callback<SseEvent>) -> Subscription {
        let subscription = self.shared.message.add(callback);
        self.ensure_started();
        subscription
    }

    fn subscribe(&self, event: &str, callback: Callback<SseEvent>) -> Subscription {
        let subscription = {
            let mut bridge = self.shared.bridge();
            let listeners = match bridge.named.get(event) {
                Some(listeners) => listeners.clone(),
                None => {
                    let listeners = Listeners::new();
                    bridge.named.insert(event.to_string(), listeners.clone());
                    if let Some(inner) = bridge.inner.clone() {
                        let link = inner.subscribe(event, SseShared::forward(&listeners));
                        bridge.links.push(link);
                    }
                    listeners
                }
            };
            listeners.add(callback)
        };
        self.ensure_started();
        subscription
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockHttp, MockSse};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_http(count: &Arc<AtomicUsize>) -> LazyHttp {
        let count = Arc::clone(count);
        LazyHttp::new(move || async move {
            count.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(Arc::new(MockHttp::new()) as Arc<dyn HttpDelegate>)
        })
    }

    #[tokio::test]
    async fn test_concurrent_first_calls_construct_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let lazy = counting_http(&count);
        assert_eq!(lazy.phase(), LazyPhase::Unstarted);

        let (a, b) = tokio::join!(
            lazy.get("/a", RequestOptions::new()),
            lazy.get("/b", RequestOptions::new()),
        );

        assert_eq!(a.unwrap()["url"], "/a");
        assert_eq!(b.unwrap()["url"], "/b");
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(lazy.phase(), LazyPhase::Ready);

        lazy.get("/c", RequestOptions::new()).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_terminal_and_replayed() {
        let count = Arc::new(AtomicUsize::new(0));
        let lazy = {
            let count = Arc::clone(&count);
            LazyHttp::new(move || async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<Arc<dyn HttpDelegate>, _>(Error::dependency_missing("HTTP (ky)"))
            })
        };

        for _ in 0..3 {
            let err = lazy.get("/x", RequestOptions::new()).await.unwrap_err();
            assert!(err.is_dependency_missing());
            assert_eq!(err.to_string(), "HTTP (ky) transport is not installed");
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(lazy.phase(), LazyPhase::Failed);
    }

    #[tokio::test]
    async fn test_lazy_sse_bridges_early_subscribers() {
        let mock = Arc::new(MockSse::new());
        let lazy = {
            let mock = Arc::clone(&mock);
            LazySse::new(move || async move { Ok(mock as Arc<dyn SseDelegate>) })
        };

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let ticks = tx.clone();
        let _m = lazy.on_message(Arc::new(move |event: &SseEvent| {
            let _ = tx.send(format!("message:{}", event.data));
        }));
        let _t = lazy.subscribe(
            "tick",
            Arc::new(move |event: &SseEvent| {
                let _ = ticks.send(format!("tick:{}", event.data));
            }),
        );

        while lazy.phase() != LazyPhase::Ready {
            tokio::task::yield_now().await;
        }
        // The bridge is attached right after the cell settles.
        tokio::time::sleep(Duration::from_millis(10)).await;

        mock.emit(SseEvent::message("hello"));
        mock.emit(SseEvent::named("tick", "1"));

        assert_eq!(rx.recv().await.unwrap(), "message:hello");
        assert_eq!(rx.recv().await.unwrap(), "tick:1");
    }

    #[tokio::test]
    async fn test_lazy_sse_replays_failure_to_late_error_subscribers() {
        let lazy = LazySse::new(|| async { Err(Error::dependency_missing("SSE")) });

        let _m = lazy.on_message(Arc::new(|_: &SseEvent| {}));
        while lazy.phase() != LazyPhase::Failed {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _e = lazy.on_error(Arc::new(move |err: &Error| {
            sink.lock().unwrap().push(err.to_string());
        }));

        assert_eq!(*seen.lock().unwrap(), vec!["SSE transport is not installed"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lazy_sse_error_subscribers_racing_failure_see_it_once() {
        let lazy = Arc::new(LazySse::new(|| async {
            tokio::task::yield_now().await;
            Err(Error::dependency_missing("SSE"))
        }));
        let _m = lazy.on_message(Arc::new(|_: &SseEvent| {}));

        let mut counters = Vec::new();
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let counter = Arc::new(AtomicUsize::new(0));
            counters.push(Arc::clone(&counter));
            let lazy = Arc::clone(&lazy);
            tasks.push(tokio::spawn(async move {
                lazy.on_error(Arc::new(move |_: &Error| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
            }));
        }
        let mut subscriptions = Vec::new();
        for task in tasks {
            subscriptions.push(task.await.unwrap());
        }
        while lazy.phase() != LazyPhase::Failed {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        for counter in &counters {
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_close_before_ready_closes_inner() {
        let mock = Arc::new(MockSse::new());
        let lazy = {
            let mock = Arc::clone(&mock);
            LazySse::new(move || async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(mock as Arc<dyn SseDelegate>)
            })
        };

        let _m = lazy.on_message(Arc::new(|_: &SseEvent| {}));
        lazy.close();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(mock.is_closed());
    }
}
