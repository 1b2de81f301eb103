//! Span-scoped profiling: deadline handling, correlation and flush attachment.

mod common;

use common::{
    capture_logs, client, init_test_logging, span_mode_options, EngineCall, MockEngine,
    RecordingTransport,
};
use pretty_assertions::assert_eq;
use profweave_core::capture::CaptureQueue;
use profweave_core::profiling::attach_profiles;
use profweave_core::telemetry::event::{PROFILE_CONTEXT, PROFILE_ID_KEY};
use profweave_core::{
    CaptureEngine, CorrelationKey, Envelope, LifecycleHub, ProfileFormat, ProfilingError,
    ProfilingIntegration, ProfilingMode, ProfilingOptions, Scope, SpanHandle, SpanProfiler,
    TelemetryEvent,
};
use serde_json::json;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

fn transaction_for(span: &SpanHandle) -> TelemetryEvent {
    let mut event = TelemetryEvent::transaction(span.name.clone(), 100.0, 100.5);
    span.scope.apply_to_event(&mut event);
    event
}

#[tokio::test(start_paused = true)]
async fn test_deadline_fires_before_end() {
    init_test_logging();
    let engine = MockEngine::new();
    let queue = Arc::new(CaptureQueue::new(NonZeroUsize::new(50).unwrap()));
    let profiler = SpanProfiler::new(engine.clone(), queue.clone(), Duration::from_millis(100));

    let root = SpanHandle::root("slow-job", Scope::new());
    let key = profiler.on_root_start(&root).unwrap();

    // Not yet at the deadline.
    tokio::time::sleep(Duration::from_millis(99)).await;
    assert!(queue.is_empty());
    assert_eq!(profiler.active_count(), 1);

    // The unit of work keeps running well past the cap.
    tokio::time::sleep(Duration::from_millis(401)).await;
    assert_eq!(queue.len(), 1);
    assert!(queue.contains(&key));
    assert_eq!(profiler.active_count(), 0);

    // The late end is a no-op: no second stop, no second payload.
    assert!(!profiler.on_root_end(&root));
    assert_eq!(queue.len(), 1);
    assert_eq!(
        engine.calls(),
        vec![
            EngineCall::Start(key.to_string()),
            EngineCall::Stop(key.to_string(), ProfileFormat::Thread),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_end_before_deadline_cancels_timer() {
    let engine = MockEngine::new();
    let queue = Arc::new(CaptureQueue::new(NonZeroUsize::new(50).unwrap()));
    let profiler = SpanProfiler::new(engine.clone(), queue.clone(), Duration::from_millis(100));

    let root = SpanHandle::root("fast-job", Scope::new());
    let key = profiler.on_root_start(&root).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(profiler.on_root_end(&root));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(engine.stop_count(), 1);
    assert_eq!(queue.len(), 1);
    assert!(queue.take(&key).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_roots_do_not_interfere() {
    let engine = MockEngine::new();
    let queue = Arc::new(CaptureQueue::new(NonZeroUsize::new(50).unwrap()));
    let profiler = SpanProfiler::new(engine.clone(), queue.clone(), Duration::from_millis(1_000));

    let first = SpanHandle::root("first", Scope::new());
    let second = SpanHandle::root("second", Scope::new());

    let first_key = profiler.on_root_start(&first).unwrap();
    let second_key = profiler.on_root_start(&second).unwrap();
    assert_ne!(first_key, second_key);
    assert_eq!(engine.max_concurrent(), 2);

    assert!(profiler.on_root_end(&second));
    assert_eq!(profiler.active_key(&first.span_id), Some(first_key.clone()));
    assert_eq!(
        first.scope.context(PROFILE_CONTEXT),
        Some(json!({ PROFILE_ID_KEY: first_key.as_str() }))
    );

    assert!(profiler.on_root_end(&first));
    assert!(queue.contains(&first_key));
    assert!(queue.contains(&second_key));
}

#[tokio::test(start_paused = true)]
async fn test_engine_returning_nothing_queues_nothing() {
    let engine = MockEngine::new();
    let queue = Arc::new(CaptureQueue::new(NonZeroUsize::new(50).unwrap()));
    let profiler = SpanProfiler::new(engine.clone(), queue.clone(), Duration::from_millis(100));

    let root = SpanHandle::root("job", Scope::new());
    let key = profiler.on_root_start(&root).unwrap();
    // Engine forgets the session behind the coordinator's back.
    engine.stop_capture(&key, ProfileFormat::Thread);

    assert!(!profiler.on_root_end(&root));
    assert!(queue.is_empty());
}

#[test]
fn test_mixed_batch_attaches_only_found_profiles() {
    let queue = CaptureQueue::new(NonZeroUsize::new(50).unwrap());
    let present = CorrelationKey::from("present");
    queue.put(present.clone(), common::sample_profile(4));

    let mut with_profile = TelemetryEvent::transaction("GET /a", 10.0, 11.0);
    with_profile.set_context("trace", json!({"trace_id": "trace-a"}));
    with_profile.set_context(PROFILE_CONTEXT, json!({ PROFILE_ID_KEY: "present" }));

    let mut evicted = TelemetryEvent::transaction("GET /b", 10.0, 11.0);
    evicted.set_context(PROFILE_CONTEXT, json!({ PROFILE_ID_KEY: "evicted" }));
    let evicted_before = evicted.clone();

    let mut envelope = Envelope::from_events([with_profile.clone(), evicted]);
    let (attached, logs) = capture_logs(|| {
        attach_profiles(&mut envelope, &queue, &ProfilingOptions::default())
    });
    let attached = attached.unwrap();

    assert_eq!(attached, 1);
    let missing: Vec<_> = logs
        .lines()
        .filter(|line| line.contains("Could not find queued profile"))
        .collect();
    assert_eq!(missing.len(), 1, "logs: {logs}");
    assert!(missing[0].contains("DEBUG"));
    assert!(missing[0].contains("profile_id=evicted"));
    assert_eq!(envelope.len(), 3);

    let events: Vec<_> = envelope.events().cloned().collect();
    assert!(events[0].context(PROFILE_CONTEXT).is_none());
    assert_eq!(events[1], evicted_before);

    let profiles: Vec<_> = envelope.profiles().collect();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].event_id, "present");
    assert_eq!(profiles[0].transaction.id, with_profile.event_id);
    assert_eq!(profiles[0].transaction.trace_id, "trace-a");
    assert_eq!(profiles[0].profile.samples.len(), 4);
    assert!(queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_through_hub() {
    init_test_logging();
    let engine = MockEngine::new();
    let transport = RecordingTransport::new();
    let hub = LifecycleHub::new();
    let integration =
        ProfilingIntegration::setup(client(span_mode_options(30_000), engine.clone(), transport), &hub)
            .unwrap();
    assert_eq!(integration.mode(), ProfilingMode::SpanScoped);

    let root = SpanHandle::root("GET /orders", Scope::new());
    let child = root.child("db.query");
    hub.span_started(&root);
    hub.span_started(&child);
    hub.span_ended(&child);
    tokio::time::sleep(Duration::from_millis(50)).await;
    hub.span_ended(&root);

    assert_eq!(engine.start_count(), 1);
    assert_eq!(integration.queue().len(), 1);

    let mut event = transaction_for(&root);
    hub.preprocess_event(&mut event);
    let mut envelope = Envelope::from_events([event]);
    hub.before_envelope(&mut envelope).unwrap();

    assert_eq!(envelope.profiles().count(), 1);
    let event = envelope.events().next().unwrap();
    assert!(event.context(PROFILE_CONTEXT).is_none());
    let profile = envelope.profiles().next().unwrap();
    assert_eq!(profile.transaction.trace_id, root.trace_id);
    assert_eq!(profile.transaction.name, "GET /orders");
    assert!(integration.queue().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_metadata_is_reported_and_batch_stays_sendable() {
    let engine = MockEngine::new();
    let transport = RecordingTransport::new();
    let hub = LifecycleHub::new();
    let _integration =
        ProfilingIntegration::setup(client(span_mode_options(30_000), engine, transport), &hub)
            .unwrap();

    let mut broken = TelemetryEvent::transaction("GET /broken", 1.0, 2.0);
    broken.set_context(PROFILE_CONTEXT, json!({ PROFILE_ID_KEY: "" }));
    let mut envelope = Envelope::from_events([broken, TelemetryEvent::transaction("ok", 1.0, 2.0)]);
    let before = envelope.clone();

    let result = hub.before_envelope(&mut envelope);
    assert!(matches!(
        result,
        Err(ProfilingError::MalformedCorrelation { .. })
    ));
    assert_eq!(envelope, before);
    assert_eq!(envelope.events().count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unsampled_roots_are_not_profiled() {
    let engine = MockEngine::new();
    let hub = LifecycleHub::new();
    let integration = ProfilingIntegration::setup(
        client(span_mode_options(30_000), engine.clone(), RecordingTransport::new()),
        &hub,
    )
    .unwrap();

    let root = SpanHandle::root("job", Scope::new()).with_sampled(false);
    hub.span_started(&root);
    hub.span_ended(&root);

    assert_eq!(engine.start_count(), 0);
    assert!(integration.queue().is_empty());
    assert!(root.scope.context(PROFILE_CONTEXT).is_none());
}
