//! In-memory response cache with offline strategies.
//!
//! | Strategy | Online | Offline |
//! |----------|--------|---------|
//! | `cache-first` | fresh cache hit, else network (and cache) | fresh cache hit, else [`ErrorKind::Offline`] |
//! | `network-first` | network (and cache), cache on failure | same; the network error is returned on a miss |
//! | `network-only` | network, cache untouched | [`ErrorKind::Offline`] |
//!
//! Entries expire after a TTL checked on read; there is no background sweep.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use universal_client_core::query::append_query;
use universal_client_core::{
    dispatch, Delegate, Error, ErrorKind, Feature, HttpDelegate, HttpMethod, RequestOptions,
    Result, Slot, State, DELEGATE_KEY,
};

/// State key of the [`OfflineCache`] manager.
pub const OFFLINE_KEY: &str = "offline";

/// Default time-to-live of a cached response.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    CacheFirst,
    #[default]
    NetworkFirst,
    NetworkOnly,
}

/// Source of the online/offline signal.
pub trait Connectivity: Send + Sync {
    /// `None` when the state is unknown, which counts as online.
    fn is_online(&self) -> Option<bool>;
}

/// Connectivity that is never known, so always treated as online.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unknown;

impl Connectivity for Unknown {
    fn is_online(&self) -> Option<bool> {
        None
    }
}

/// Connectivity flag set by the application.
#[derive(Debug, Default)]
pub struct ConnectivityFlag(AtomicU8);

const UNKNOWN: u8 = 0;
const ONLINE: u8 = 1;
const OFFLINE: u8 = 2;

impl ConnectivityFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, online: bool) {
        self.0
            .store(if online { ONLINE } else { OFFLINE }, Ordering::SeqCst);
    }

    /// Forget the last reported state.
    pub fn reset(&self) {
        self.0.store(UNKNOWN, Ordering::SeqCst);
    }
}

impl Connectivity for ConnectivityFlag {
    fn is_online(&self) -> Option<bool> {
        match self.0.load(Ordering::SeqCst) {
            ONLINE => Some(true),
            OFFLINE => Some(false),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct OfflineConfig {
    pub strategy: Strategy,
    pub ttl: Duration,
    /// Methods whose responses are cached; other methods bypass the cache.
    pub cacheable_methods: Vec<HttpMethod>,
    pub connectivity: Arc<dyn Connectivity>,
}

impl fmt::Debug for OfflineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineConfig")
            .field("strategy", &self.strategy)
            .field("ttl", &self.ttl)
            .field("cacheable_methods", &self.cacheable_methods)
            .finish_non_exhaustive()
    }
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            ttl: DEFAULT_TTL,
            cacheable_methods: vec![HttpMethod::Get],
            connectivity: Arc::new(Unknown),
        }
    }
}

impl OfflineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_cacheable_methods(mut self, methods: impl IntoIterator<Item = HttpMethod>) -> Self {
        self.cacheable_methods = methods.into_iter().collect();
        self
    }

    pub fn with_connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }
}

#[derive(Debug, Clone)]
struct Entry {
    data: Value,
    timestamp: DateTime<Utc>,
    stored: Instant,
    ttl: Duration,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.stored.elapsed() > self.ttl
    }
}

/// Cache manager stored under [`OFFLINE_KEY`].
#[derive(Debug)]
pub struct OfflineCache {
    config: OfflineConfig,
    entries: Mutex<HashMap<String, Entry>>,
}

impl OfflineCache {
    pub fn new(config: OfflineConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// `METHOD:url:serializedBody`.
    pub fn cache_key(method: HttpMethod, url: &str, body: Option<&Value>) -> String {
        let body = body.map(Value::to_string).unwrap_or_default();
        format!("{method}:{url}:{body}")
    }

    pub fn strategy(&self) -> Strategy {
        self.config.strategy
    }

    pub fn is_online(&self) -> bool {
        self.config.connectivity.is_online().unwrap_or(true)
    }

    pub fn is_cacheable(&self, method: HttpMethod) -> bool {
        self.config.cacheable_methods.contains(&method)
    }

    /// A fresh cached value. Expired entries are removed.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                debug!(key, "evicting expired cache entry");
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.data.clone()),
            None => None,
        }
    }

    /// When the fresh entry for `key` was stored.
    pub fn timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        let entries = self.lock();
        entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.timestamp)
    }

    pub fn put(&self, key: impl Into<String>, data: Value) {
        self.lock().insert(
            key.into(),
            Entry {
                data,
                timestamp: Utc::now(),
                stored: Instant::now(),
                ttl: self.config.ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Stored entries, expired ones included until they are read.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct OfflineHttp {
    inner: Arc<dyn HttpDelegate>,
    cache: Arc<OfflineCache>,
}

impl OfflineHttp {
    async fn handle(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value> {
        // Connectivity applies to every method; only cacheable ones touch the cache.
        let cacheable = self.cache.is_cacheable(method);
        let key = OfflineCache::cache_key(method, &append_query(url, &options.params), body.as_ref());
        let offline = || Err(Error::new(ErrorKind::Offline { key: key.clone() }));
        let cached = || if cacheable { self.cache.get(&key) } else { None };

        match self.cache.strategy() {
            Strategy::CacheFirst => {
                if let Some(hit) = cached() {
                    debug!(key = %key, "serving from cache");
                    return Ok(hit);
                }
                if !self.cache.is_online() {
                    return offline();
                }
                let value = dispatch(self.inner.as_ref(), method, url, body, options).await?;
                if cacheable {
                    self.cache.put(key.clone(), value.clone());
                }
                Ok(value)
            }
            Strategy::NetworkFirst => {
                match dispatch(self.inner.as_ref(), method, url, body, options).await {
                    Ok(value) => {
                        if cacheable {
                            self.cache.put(key.clone(), value.clone());
                        }
                        Ok(value)
                    }
                    Err(error) => match cached() {
                        Some(hit) => {
                            warn!(key = %key, error = %error, "network failed, serving cached response");
                            Ok(hit)
                        }
                        None => Err(error),
                    },
                }
            }
            Strategy::NetworkOnly => {
                if !self.cache.is_online() {
                    return offline();
                }
                dispatch(self.inner.as_ref(), method, url, body, options).await
            }
        }
    }
}

#[async_trait]
impl HttpDelegate for OfflineHttp {
    async fn get(&self, url: &str, options: RequestOptions) -> Result<Value> {
        self.handle(HttpMethod::Get, url, None, options).await
    }

    async fn post(&self, url: &str, body: Value, options: RequestOptions) -> Result<Value> {
        self.handle(HttpMethod::Post, url, Some(body), options).await
    }

    async fn put(&self, url: &str, body: Value, options: RequestOptions) -> Result<Value> {
        self.handle(HttpMethod::Put, url, Some(body), options).await
    }

    async fn patch(&self, url: &str, body: Value, options: RequestOptions) -> Result<Value> {
        self.handle(HttpMethod::Patch, url, Some(body), options).await
    }

    async fn delete(&self, url: &str, options: RequestOptions) -> Result<Value> {
        self.handle(HttpMethod::Delete, url, None, options).await
    }
}

/// Feature caching HTTP responses.
pub fn offline(config: OfflineConfig) -> OfflineFeature {
    OfflineFeature {
        config,
        key: DELEGATE_KEY.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct OfflineFeature {
    config: OfflineConfig,
    key: String,
}

impl OfflineFeature {
    pub fn on_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

impl Feature for OfflineFeature {
    fn apply(&self, state: &State) -> Result<State> {
        let (delegate, _) = state.split_delegate(&self.key)?;
        let cache = Arc::new(OfflineCache::new(self.config.clone()));
        let delegate = match delegate {
            Delegate::Http(inner) => Delegate::Http(Arc::new(OfflineHttp {
                inner,
                cache: Arc::clone(&cache),
            })),
            other => {
                debug!(capability = %other.capability(), "offline cache only applies to HTTP delegates");
                other
            }
        };
        Ok(State::new()
            .with(self.key.clone(), delegate)
            .with(OFFLINE_KEY, Slot::manager(cache)))
    }
}
