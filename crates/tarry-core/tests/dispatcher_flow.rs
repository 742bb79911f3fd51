//! End-to-end behaviour of the dispatcher against a scripted transport

mod support;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use support::{secs, settle, ScriptedTransport, Step, INITIAL};
use tarry_core::{
    Dispatcher, DispatcherConfig, Error, ErrorContext, ErrorPolicy, ParsedError, Request,
    TransportErrorKind,
};
use tokio::time::Instant;

fn dispatcher(transport: &Arc<ScriptedTransport>, max_retries: u32) -> Dispatcher {
    Dispatcher::new(DispatcherConfig::new(INITIAL, max_retries, 2), transport.clone())
}

fn request(url: &str) -> Request<Value> {
    Request::post(url, json!({"input": "hello"}))
}

#[tokio::test(start_paused = true)]
async fn first_attempt_success_never_touches_queue() {
    let transport = Arc::new(ScriptedTransport::new());
    let dispatcher = dispatcher(&transport, 7);
    dispatcher.start().unwrap();

    let response: Value = dispatcher.submit(request("https://api/ok")).await.unwrap();

    assert_eq!(response, json!({"ok": true}));
    assert_eq!(dispatcher.pending(), 0);
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn fatal_first_failure_returns_synchronously() {
    let transport = Arc::new(ScriptedTransport::new().failing("https://api/bad", 400, 1));
    let dispatcher = dispatcher(&transport, 7);
    dispatcher.start().unwrap();

    let started = Instant::now();
    let err = dispatcher.submit::<_, Value>(request("https://api/bad")).await.unwrap_err();

    assert_eq!(err.status_code(), Some(400));
    assert_eq!(dispatcher.pending(), 0);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn non_fatal_failure_waits_for_drain_loop() {
    let transport = Arc::new(ScriptedTransport::new().failing("https://api/busy", 503, 1));
    let dispatcher = dispatcher(&transport, 7);
    dispatcher.start().unwrap();

    let started = Instant::now();
    let task = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.submit::<_, Value>(request("https://api/busy")).await }
    });

    settle(|| dispatcher.pending() == 1).await;
    assert!(!task.is_finished());

    let response = task.await.unwrap().unwrap();
    assert_eq!(response, json!({"ok": true}));
    assert_eq!(dispatcher.pending(), 0);

    let sent = transport.sent_to("https://api/busy");
    assert_eq!(sent.len(), 2);
    assert_eq!(secs(started, sent[1].at), 30);
}

#[tokio::test(start_paused = true)]
async fn backoff_grows_with_each_reschedule() {
    let transport = Arc::new(ScriptedTransport::new().failing("https://api/flaky", 503, 4));
    let dispatcher = dispatcher(&transport, 7);
    dispatcher.start().unwrap();

    let started = Instant::now();
    let response: Value = dispatcher.submit(request("https://api/flaky")).await.unwrap();
    assert_eq!(response, json!({"ok": true}));

    let offsets: Vec<u64> = transport
        .sent_to("https://api/flaky")
        .iter()
        .map(|s| secs(started, s.at))
        .collect();
    // first retry after initial_delay, then gaps of initial_delay * 2^(N+1)
    assert_eq!(offsets, vec![0, 30, 30 + 120, 150 + 240, 390 + 480]);
}

#[tokio::test(start_paused = true)]
async fn transport_errors_are_retried() {
    let transport = Arc::new(ScriptedTransport::new().on(
        "https://api/flaky-net",
        [Step::Fail(TransportErrorKind::Connect)],
    ));
    let dispatcher = dispatcher(&transport, 7);
    dispatcher.start().unwrap();

    let response: Value = dispatcher.submit(request("https://api/flaky-net")).await.unwrap();
    assert_eq!(response, json!({"ok": true}));
    assert_eq!(transport.sent().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn retry_ceiling_ends_endless_failures() {
    let transport = Arc::new(ScriptedTransport::new().failing("https://api/down", 503, 100));
    let dispatcher = dispatcher(&transport, 3);
    dispatcher.start().unwrap();

    let err = dispatcher
        .submit::<_, Value>(request("https://api/down"))
        .await
        .unwrap_err();

    match err {
        Error::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert_eq!(last.status_code(), Some(503));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(transport.sent().len(), 3);
    assert_eq!(dispatcher.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_call_does_not_hold_back_its_batch() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .failing("https://api/down", 503, 100)
            .failing("https://api/busy", 503, 1),
    );
    let dispatcher = dispatcher(&transport, 2);
    dispatcher.start().unwrap();

    let down = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.submit::<_, Value>(request("https://api/down")).await }
    });
    settle(|| dispatcher.pending() == 1).await;
    let busy = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.submit::<_, Value>(request("https://api/busy")).await }
    });
    settle(|| dispatcher.pending() == 2).await;

    let started = Instant::now();
    assert!(matches!(
        down.await.unwrap(),
        Err(Error::RetriesExhausted { attempts: 2, .. })
    ));
    assert_eq!(busy.await.unwrap().unwrap(), json!({"ok": true}));

    // both were retried in the same drain cycle
    let down_at = transport.sent_to("https://api/down")[1].at;
    let busy_at = transport.sent_to("https://api/busy")[1].at;
    assert_eq!(secs(started, down_at), 30);
    let busy_offset = busy_at - started;
    assert!(busy_offset >= Duration::from_secs(40) && busy_offset < Duration::from_secs(41));
}

#[tokio::test(start_paused = true)]
async fn per_request_ceiling_overrides_dispatcher() {
    let transport = Arc::new(ScriptedTransport::new().failing("https://api/down", 503, 100));
    let dispatcher = dispatcher(&transport, 7);
    dispatcher.start().unwrap();

    let err = dispatcher
        .submit::<_, Value>(request("https://api/down").with_max_retries(2))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RetriesExhausted { attempts: 2, .. }));

    let err = dispatcher
        .submit::<_, Value>(request("https://api/down").with_max_retries(0))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(503));
    assert_eq!(transport.sent().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn abandoned_caller_stops_retries() {
    let transport = Arc::new(ScriptedTransport::new().failing("https://api/down", 503, 100));
    let dispatcher = dispatcher(&transport, 7);
    dispatcher.start().unwrap();

    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        dispatcher.submit::<_, Value>(request("https://api/down")),
    )
    .await;
    assert!(outcome.is_err());

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(transport.sent().len(), 1);
    assert_eq!(dispatcher.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn huge_initial_delay_is_capped() {
    let transport = Arc::new(ScriptedTransport::new().failing("https://api/busy", 503, 1));
    let dispatcher = Dispatcher::new(
        DispatcherConfig::new(Duration::from_secs(u64::MAX / 2), 7, 2),
        transport.clone(),
    );
    dispatcher.start().unwrap();
    assert_eq!(dispatcher.config().initial_delay, tarry_core::dispatcher::MAX_BACKOFF);

    let task = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.submit::<_, Value>(request("https://api/busy")).await }
    });
    settle(|| dispatcher.pending() == 1).await;
    assert!(!task.is_finished());
}

#[tokio::test(start_paused = true)]
async fn fatal_error_on_retry_reaches_caller() {
    let transport = Arc::new(
        ScriptedTransport::new().on("https://api/gone", [Step::status(503), Step::status(404)]),
    );
    let dispatcher = dispatcher(&transport, 7);
    dispatcher.start().unwrap();

    let err = dispatcher.submit::<_, Value>(request("https://api/gone")).await.unwrap_err();
    assert_eq!(err.status_code(), Some(404));
    assert_eq!(dispatcher.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_all_resolve() {
    const CALLERS: usize = 5;
    let mut transport = ScriptedTransport::new();
    for i in 0..CALLERS {
        transport = transport.failing(&format!("https://api/{i}"), 429, 1);
    }
    let transport = Arc::new(transport);
    let dispatcher = dispatcher(&transport, 7);
    dispatcher.start().unwrap();

    let tasks: Vec<_> = (0..CALLERS)
        .map(|i| {
            let dispatcher = dispatcher.clone();
            let url = format!("https://api/{i}");
            tokio::spawn(async move { dispatcher.submit::<_, Value>(request(&url)).await })
        })
        .collect();

    settle(|| dispatcher.pending() == CALLERS).await;
    assert!(dispatcher.pending() <= CALLERS);

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), json!({"ok": true}));
    }
    assert_eq!(dispatcher.pending(), 0);
    assert_eq!(transport.sent().len(), CALLERS * 2);
}

/// Retries everything and halves `max_tokens` on every failure
struct ShrinkOnFailure;

impl ErrorPolicy<Value> for ShrinkOnFailure {
    fn parse_error(&self, ctx: &ErrorContext<'_>, body: Option<&Value>) -> ParsedError<Value> {
        let error = Error::upstream(ctx.status, ctx.body_text());
        match body {
            Some(body) => {
                let mut patched = body.clone();
                patched["max_tokens"] = json!(body["max_tokens"].as_i64().unwrap_or(0) / 2);
                ParsedError::new(error).with_patch(patched)
            }
            None => ParsedError::new(error),
        }
    }

    fn is_fatal(&self, _error: &Error) -> bool {
        false
    }
}

#[tokio::test(start_paused = true)]
async fn patched_body_is_used_by_later_attempts() {
    let transport = Arc::new(ScriptedTransport::new().failing("https://api/chat", 400, 2));
    let dispatcher = dispatcher(&transport, 7);
    dispatcher.start().unwrap();

    let request = Request::post("https://api/chat", json!({"max_tokens": 1000}))
        .with_policy(ShrinkOnFailure);
    let _: Value = dispatcher.submit(request).await.unwrap();

    let tokens: Vec<i64> = transport
        .sent()
        .iter()
        .map(|s| s.body.as_ref().unwrap()["max_tokens"].as_i64().unwrap())
        .collect();
    assert_eq!(tokens, vec![1000, 500, 250]);
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let transport = Arc::new(ScriptedTransport::new());
    let dispatcher = dispatcher(&transport, 7);

    assert!(!dispatcher.is_started());
    dispatcher.start().unwrap();
    assert!(dispatcher.is_started());
    assert!(matches!(dispatcher.clone().start(), Err(Error::AlreadyStarted)));
}

#[test]
fn start_outside_runtime_is_rejected() {
    let transport = Arc::new(ScriptedTransport::new());
    let dispatcher = dispatcher(&transport, 7);
    assert!(matches!(dispatcher.start(), Err(Error::Configuration { .. })));
}

#[test]
fn zero_tunables_fall_back_to_defaults() {
    let transport = Arc::new(ScriptedTransport::new());
    let dispatcher = Dispatcher::new(DispatcherConfig::new(Duration::ZERO, 0, 0), transport);
    assert_eq!(dispatcher.config(), &DispatcherConfig::default());
}

#[cfg(feature = "blocking")]
mod blocking {
    use super::*;

    #[test]
    fn blocking_submit_waits_for_retry() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let transport = Arc::new(ScriptedTransport::new().failing("https://api/busy", 503, 1));
        let dispatcher = Dispatcher::new(
            DispatcherConfig::new(Duration::from_millis(20), 7, 2),
            transport.clone(),
        );
        runtime.block_on(async { dispatcher.start() }).unwrap();

        let response: Value = dispatcher.submit_blocking(request("https://api/busy")).unwrap();

        assert_eq!(response, json!({"ok": true}));
        assert_eq!(transport.sent().len(), 2);
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn blocking_submit_requires_start() {
        let transport = Arc::new(ScriptedTransport::new());
        let dispatcher = super::dispatcher(&transport, 7);
        let result = dispatcher.submit_blocking::<_, Value>(request("https://api/ok"));
        assert!(matches!(result, Err(Error::NotStarted)));
    }
}
