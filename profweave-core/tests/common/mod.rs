//! Test helpers for integration tests
//!
//! Shared across test files using the tests/common/ pattern.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use profweave_core::capture::{ProfileSample, StackFrame};
use profweave_core::{
    CaptureEngine, ClientOptions, CorrelationKey, Envelope, ProfileFormat, ProfilingClient,
    ProfilingOptions, RawProfile, Transport,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};

/// Initialize logging for tests (only once per test run)
static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

/// In-memory sink for formatted log lines
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a thread-local subscriber and return everything it logged.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    let result = tracing::subscriber::with_default(subscriber, f);
    (result, buffer.contents())
}

/// Engine calls in the order they happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Start(String),
    Stop(String, ProfileFormat),
}

/// Capture engine that fabricates profiles and records every call
pub struct MockEngine {
    pub refuse: AtomicBool,
    pub samples_per_capture: AtomicUsize,
    active: Mutex<HashSet<String>>,
    max_concurrent: AtomicUsize,
    calls: Mutex<Vec<EngineCall>>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            refuse: AtomicBool::new(false),
            samples_per_capture: AtomicUsize::new(3),
            active: Mutex::new(HashSet::new()),
            max_concurrent: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    pub fn start_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, EngineCall::Start(_)))
            .count()
    }

    pub fn stop_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, EngineCall::Stop(..)))
            .count()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }
}

impl CaptureEngine for MockEngine {
    fn start_capture(&self, key: &CorrelationKey) -> bool {
        if self.refuse.load(Ordering::SeqCst) {
            return false;
        }
        self.calls.lock().push(EngineCall::Start(key.to_string()));
        let mut active = self.active.lock();
        active.insert(key.to_string());
        self.max_concurrent.fetch_max(active.len(), Ordering::SeqCst);
        true
    }

    fn stop_capture(&self, key: &CorrelationKey, format: ProfileFormat) -> Option<RawProfile> {
        self.calls
            .lock()
            .push(EngineCall::Stop(key.to_string(), format));
        if !self.active.lock().remove(key.as_str()) {
            return None;
        }
        Some(sample_profile(self.samples_per_capture.load(Ordering::SeqCst)))
    }
}

/// A profile with `samples` samples 10ms apart on a single stack.
pub fn sample_profile(samples: usize) -> RawProfile {
    RawProfile {
        samples: (0..samples)
            .map(|i| ProfileSample {
                stack_id: 0,
                thread_id: "0".into(),
                elapsed_since_start_ns: i as u64 * 10_000_000,
            })
            .collect(),
        stacks: vec![vec![0, 1]],
        frames: vec![
            StackFrame {
                function: Some("main".into()),
                ..Default::default()
            },
            StackFrame {
                function: Some("handle_request".into()),
                module: Some("app::server".into()),
                ..Default::default()
            },
        ],
        ..Default::default()
    }
}

/// Transport that keeps every envelope it is given
#[derive(Default)]
pub struct RecordingTransport {
    pub fail: AtomicBool,
    sent: Mutex<Vec<Envelope>>,
    attempts: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, envelope: Envelope) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("backend unavailable"));
        }
        self.sent.lock().push(envelope);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

pub fn client(
    options: ClientOptions,
    engine: Arc<MockEngine>,
    transport: Arc<RecordingTransport>,
) -> Arc<ProfilingClient> {
    Arc::new(ProfilingClient::new(options, engine, transport))
}

pub fn span_mode_options(max_profile_duration_ms: u64) -> ClientOptions {
    ClientOptions::new(ProfilingOptions {
        profiles_sample_rate: Some(1.0),
        max_profile_duration_ms,
        ..Default::default()
    })
}

pub fn continuous_options(chunk_interval_ms: u64) -> ClientOptions {
    ClientOptions::new(ProfilingOptions {
        chunk_interval_ms,
        ..Default::default()
    })
}

/// Let spawned tasks (flushes, deferred restarts) run.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
