//! Caller-supplied HTTP interceptors.

use tracing::debug;
use universal_client_core::{
    wrap_http, Delegate, Feature, HttpInterceptor, Result, State, DELEGATE_KEY,
};

/// Feature wrapping the HTTP delegate with one or more interceptors.
#[derive(Debug, Clone)]
pub struct Interceptors {
    chain: Vec<HttpInterceptor>,
    key: String,
}

/// Wrap the delegate with a single interceptor.
pub fn interceptors(interceptor: HttpInterceptor) -> Interceptors {
    interceptor_chain(vec![interceptor])
}

/// Wrap the delegate with several interceptors; the first one is outermost.
///
/// With `[A, B]`, `A.before` sees the caller's request and `B.before` sees
/// A's patch. On the way back `B.after` runs before `A.after`.
pub fn interceptor_chain(chain: Vec<HttpInterceptor>) -> Interceptors {
    Interceptors {
        chain,
        key: DELEGATE_KEY.to_string(),
    }
}

impl Interceptors {
    pub fn on_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

impl Feature for Interceptors {
    fn apply(&self, state: &State) -> Result<State> {
        let (delegate, _) = state.split_delegate(&self.key)?;
        let delegate = match delegate {
            Delegate::Http(mut http) => {
                for interceptor in self.chain.iter().rev() {
                    http = wrap_http(http, interceptor.clone());
                }
                Delegate::Http(http)
            }
            other => {
                debug!(capability = %other.capability(), "interceptors skipped for non-HTTP delegate");
                other
            }
        };
        Ok(State::new().with(self.key.clone(), delegate))
    }
}
