//! Composition engine behavior across crates.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;
use universal_client::prelude::*;
use universal_client::ClientBuilder;
use universal_client_core::testing::{MockHttp, MockSse, RecordedCall};
use universal_client_core::{InitHook, ON_INIT};

use super::common::{init_tracing, value};

fn http(mock: &Arc<MockHttp>) -> impl Feature {
    let delegate = Delegate::Http(mock.clone());
    move |_: &State| -> Result<State> { Ok(State::new().with(DELEGATE_KEY, delegate.clone())) }
}

/// Reads `count` and writes `count + 1`.
fn increment() -> impl Feature {
    |state: &State| -> Result<State> {
        let count = state.value("count").and_then(|v| v.as_u64()).unwrap_or(0);
        Ok(State::new().with("count", json!(count + 1)))
    }
}

fn snapshot(client: &Client) -> Vec<(String, Option<serde_json::Value>)> {
    client
        .keys()
        .map(|key| (key.to_string(), client.value(key).cloned()))
        .collect()
}

// ============================================================================
// Fold
// ============================================================================

#[test]
fn test_fold_is_independent_of_split_point() {
    init_tracing();

    let flat = compose![
        value("name", json!("api")),
        increment(),
        value("name", json!("override")),
        increment(),
    ]
    .expect("flat composition");

    let prefix = |_: &State| -> Result<State> {
        Ok(compose![value("name", json!("api")), increment()]?.into_state())
    };
    let nested = compose![prefix, value("name", json!("override")), increment()]
        .expect("nested composition");

    assert_eq!(snapshot(&flat), snapshot(&nested));
    assert_eq!(flat.value("count"), Some(&json!(2)));
    assert_eq!(flat.value("name"), Some(&json!("override")));
}

#[test]
fn test_builder_matches_macro() {
    let built = ClientBuilder::new()
        .with(value("a", json!(1)))
        .with(increment())
        .build()
        .expect("builder composition");
    let macro_built = compose![value("a", json!(1)), increment()].expect("macro composition");

    assert_eq!(snapshot(&built), snapshot(&macro_built));
}

#[test]
fn test_feature_error_aborts_unchanged() {
    let ran = Arc::new(AtomicUsize::new(0));
    let after = {
        let ran = Arc::clone(&ran);
        move |_: &State| -> Result<State> {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(State::new())
        }
    };
    let failing = |_: &State| -> Result<State> { Err(Error::config("bad option")) };

    let err = compose![failing, after].unwrap_err();

    assert_eq!(err.to_string(), "Configuration error: bad option");
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

// ============================================================================
// onInit
// ============================================================================

#[test]
fn test_init_runs_once_and_is_stripped() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mock = Arc::new(MockHttp::new());

    let client = compose![
        http(&mock),
        on_init(move |state: &State| {
            assert!(state.http(DELEGATE_KEY).is_some());
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
        value("ready", json!(true)),
    ]
    .expect("composition");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(client.get(ON_INIT).is_none());
    assert!(client.contains_key("ready"));
}

#[test]
fn test_later_raw_hook_replaces_earlier() {
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let (a, b) = (Arc::clone(&first), Arc::clone(&second));

    compose![
        move |_: &State| -> Result<State> {
            let a = Arc::clone(&a);
            Ok(State::new().with(ON_INIT, InitHook::new(move |_: &State| {
                a.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })))
        },
        move |_: &State| -> Result<State> {
            let b = Arc::clone(&b);
            Ok(State::new().with(ON_INIT, InitHook::new(move |_: &State| {
                b.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })))
        },
    ]
    .expect("composition");

    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[test]
fn test_on_init_features_accumulate() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (a, b) = (Arc::clone(&calls), Arc::clone(&calls));

    compose![
        on_init(move |_: &State| {
            a.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
        on_init(move |_: &State| {
            b.fetch_add(10, Ordering::SeqCst);
            Ok(())
        }),
    ]
    .expect("composition");

    assert_eq!(calls.load(Ordering::SeqCst), 11);
}

// ============================================================================
// Delegate features
// ============================================================================

#[tokio::test]
async fn test_onion_order_across_features() {
    let mock = Arc::new(MockHttp::new());
    let versioned = HttpInterceptor::new().before(|ctx: RequestContext| async move {
        Ok(Some(RequestPatch::url(format!("/v1{}", ctx.url))))
    });
    let localized = HttpInterceptor::new().before(|ctx: RequestContext| async move {
        Ok(Some(RequestPatch::url(format!("{}?lang=en", ctx.url))))
    });

    let client = compose![http(&mock), interceptor_chain(vec![versioned, localized])]
        .expect("composition");
    client
        .http(DELEGATE_KEY)
        .expect("http delegate")
        .get("/x", RequestOptions::new())
        .await
        .expect("request");

    assert_eq!(mock.last_url().as_deref(), Some("/v1/x?lang=en"));
}

#[tokio::test]
async fn test_errors_are_observed_not_swallowed() {
    let mock = Arc::new(MockHttp::failing(|_: &RecordedCall| {
        Error::new(ErrorKind::Http {
            status: 503,
            message: "HTTP 503: Service Unavailable".into(),
        })
    }));
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);

    let client = compose![
        http(&mock),
        hooks().on_error(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
        telemetry(TelemetryConfig::new()),
    ]
    .expect("composition");

    let err = client
        .http(DELEGATE_KEY)
        .expect("http delegate")
        .get("/status", RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(503));
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    let metrics = client
        .manager::<Telemetry>(TELEMETRY_KEY)
        .expect("telemetry manager")
        .metrics();
    assert_eq!(metrics.requests.errors, 1);
}

#[test]
fn test_delegate_feature_on_wrong_capability_is_left_alone() {
    let sse = Delegate::Sse(Arc::new(MockSse::new()));
    let client = compose![
        move |_: &State| -> Result<State> { Ok(State::new().with(DELEGATE_KEY, sse.clone())) },
        interceptors(HttpInterceptor::new()),
        offline(OfflineConfig::new()),
    ]
    .expect("composition");

    assert_eq!(
        client.delegate(DELEGATE_KEY).map(Delegate::capability),
        Some(Capability::Sse)
    );
}

#[tokio::test]
async fn test_unknown_method_is_a_composition_error() {
    let client = compose![value("a", json!(1))].expect("composition");
    let err = client.call("missing", json!({})).await.unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Composition(_)));
}
