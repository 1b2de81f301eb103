//! Continuous chunked profiling.
//!
//! ```text
//!            initialize            start()                 stop()
//!   Idle ───────────────► Idle ──────────► Running ───────────────► Stopped
//!                                          │   ▲                      │
//!                          interval fires  │   │ deferred restart     │ start()
//!                          (stop + flush)  ▼   │                      ▼
//!                                        (between chunks)          Running
//! ```
//!
//! Each chunk owns its interval timer and the thread-annotation guard. The
//! timer holds only a weak reference to the scheduler and carries the chunk
//! generation, so a timer that outlives its chunk does nothing.
//!
//! An engine refusal on an explicit `start()` leaves the scheduler stopped.
//! A refusal at a chunk boundary skips that cycle only: the scheduler stays
//! running and retries after another interval.

use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::clock::MonotonicClock;
use super::record::{build_chunk_record, new_profiler_id, ChunkMeta};
use super::thread::annotate_thread_context;
use crate::capture::{CorrelationKey, ProfileFormat};
use crate::client::ProfilingClient;
use crate::telemetry::event::{PROFILER_ID_KEY, PROFILE_CONTEXT};
use crate::telemetry::{Envelope, EnvelopeItem, SpanHandle, TelemetryEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    /// Never started (with or without a client)
    Idle,
    /// Chunks are being captured and re-armed
    Running,
    /// Halted by the caller; nothing re-arms
    Stopped,
}

/// Keeps thread annotation switched on for as long as it lives.
struct AnnotationGuard(Arc<AtomicBool>);

impl AnnotationGuard {
    fn install(flag: Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for AnnotationGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct ChunkSession {
    id: CorrelationKey,
    generation: u64,
    started_at: Option<SystemTime>,
    trace_id: Option<String>,
    timer: Option<JoinHandle<()>>,
    annotation: AnnotationGuard,
}

struct SchedulerState {
    client: Option<Arc<ProfilingClient>>,
    phase: SchedulerPhase,
    session: Option<ChunkSession>,
    generation: u64,
    /// Armed after a refused restart; retries on the next interval
    retry: Option<JoinHandle<()>>,
    /// Trace of the most recent root span
    current_trace: Option<String>,
}

impl SchedulerState {
    fn cancel_retry(&mut self) {
        if let Some(retry) = self.retry.take() {
            retry.abort();
        }
    }
}

struct SchedulerInner {
    profiler_id: String,
    clock: MonotonicClock,
    annotation: Arc<AtomicBool>,
    state: Mutex<SchedulerState>,
}

/// Scheduler for continuous-mode chunks. Cloning shares the scheduler.
#[derive(Clone)]
pub struct ContinuousProfiler {
    inner: Arc<SchedulerInner>,
}

impl ContinuousProfiler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                profiler_id: new_profiler_id(),
                clock: MonotonicClock::new(),
                annotation: Arc::new(AtomicBool::new(false)),
                state: Mutex::new(SchedulerState {
                    client: None,
                    phase: SchedulerPhase::Idle,
                    session: None,
                    generation: 0,
                    retry: None,
                    current_trace: None,
                }),
            }),
        }
    }

    /// Attach the client. Until this is called `start`/`stop` do nothing.
    pub fn initialize(&self, client: Arc<ProfilingClient>) {
        let mut state = self.inner.state.lock();
        debug!(profiler_id = %self.inner.profiler_id, "Continuous profiler initialized");
        state.client = Some(client);
    }

    /// Stable identifier stamped on every chunk from this scheduler
    pub fn profiler_id(&self) -> &str {
        &self.inner.profiler_id
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.inner.state.lock().phase
    }

    /// True while a chunk is being captured
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().session.is_some()
    }

    pub fn current_chunk_id(&self) -> Option<CorrelationKey> {
        self.inner
            .state
            .lock()
            .session
            .as_ref()
            .map(|session| session.id.clone())
    }

    /// True when a chunk interval or a restart retry is armed
    pub fn has_pending_timer(&self) -> bool {
        let state = self.inner.state.lock();
        state.retry.is_some()
            || state
                .session
                .as_ref()
                .is_some_and(|session| session.timer.is_some())
    }

    /// Trace id the next chunk will be attributed to
    pub fn current_trace_id(&self) -> Option<String> {
        self.inner.state.lock().current_trace.clone()
    }

    pub fn annotation_active(&self) -> bool {
        self.inner.annotation.load(Ordering::SeqCst)
    }

    /// Start chunked profiling, restarting the current chunk if one is active.
    pub fn start(&self) {
        let mut state = self.inner.state.lock();
        let Some(client) = state.client.clone() else {
            trace!("Continuous profiler has no client; start ignored");
            return;
        };

        state.cancel_retry();
        if state.session.is_some() {
            debug!("Chunk already running, restarting");
            self.inner.finish_chunk(&mut state, true);
        }

        state.phase = SchedulerPhase::Running;
        if !self.begin_chunk(&mut state, &client) {
            debug!("Capture engine declined to start; continuous profiler stopped");
            state.phase = SchedulerPhase::Stopped;
        }
    }

    /// Stop chunked profiling and flush the current chunk. Never restarts.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        if state.client.is_none() {
            trace!("Continuous profiler has no client; stop ignored");
            return;
        }

        if state.phase == SchedulerPhase::Running {
            state.phase = SchedulerPhase::Stopped;
        }
        state.cancel_retry();
        if state.session.is_none() {
            trace!("No active chunk to stop");
            return;
        }

        self.inner.finish_chunk(&mut state, true);
        debug!(profiler_id = %self.inner.profiler_id, "Continuous profiler stopped");
    }

    /// Stamp the synthetic thread identity while a chunk is active.
    pub fn process_event(&self, event: &mut TelemetryEvent) -> bool {
        annotate_thread_context(event, self.annotation_active())
    }

    /// Track the root span's trace and mark its scope as covered by this
    /// profiler while a chunk is running.
    ///
    /// A running chunk that has no trace yet adopts this one.
    pub fn on_root_span_start(&self, span: &SpanHandle) {
        if !span.is_root() {
            return;
        }

        let mut state = self.inner.state.lock();
        if state.client.is_none() {
            return;
        }
        state.current_trace = Some(span.trace_id.clone());
        let Some(session) = state.session.as_mut() else {
            return;
        };
        session.trace_id.get_or_insert_with(|| span.trace_id.clone());
        drop(state);

        span.scope.set_context(
            PROFILE_CONTEXT,
            json!({ PROFILER_ID_KEY: self.inner.profiler_id.as_str() }),
        );
    }

    /// Start a fresh chunk. Returns false when the engine declines.
    fn begin_chunk(&self, state: &mut SchedulerState, client: &Arc<ProfilingClient>) -> bool {
        state.generation += 1;
        let generation = state.generation;

        let id = CorrelationKey::new();
        let trace_id = state
            .current_trace
            .clone()
            .or_else(|| client.scope().trace_id());
        let started_at = Some(self.inner.clock.now());

        if !client.engine().start_capture(&id) {
            debug!(chunk_id = %id, "Capture engine declined to start chunk");
            return false;
        }

        let annotation = AnnotationGuard::install(Arc::clone(&self.inner.annotation));
        let timer = self.arm_interval(generation, client.options().profiling.chunk_interval());

        trace!(chunk_id = %id, generation, "Started chunk");
        state.session = Some(ChunkSession {
            id,
            generation,
            started_at,
            trace_id,
            timer,
            annotation,
        });
        true
    }

    fn arm_interval(&self, generation: u64, interval: Duration) -> Option<JoinHandle<()>> {
        let Ok(handle) = Handle::try_current() else {
            warn!("No async runtime available; chunk will run until stopped");
            return None;
        };

        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        Some(handle.spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(inner) = weak.upgrade() {
                ContinuousProfiler { inner }.rotate(generation);
            }
        }))
    }

    /// Try the restart for `generation` again after `interval`.
    fn arm_retry(&self, generation: u64, interval: Duration) -> Option<JoinHandle<()>> {
        let Ok(handle) = Handle::try_current() else {
            warn!("No async runtime available; continuous profiling will not retry");
            return None;
        };

        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        Some(handle.spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(inner) = weak.upgrade() {
                ContinuousProfiler { inner }.resume(generation);
            }
        }))
    }

    /// Interval fired: close the chunk, then restart from a fresh task.
    fn rotate(&self, generation: u64) {
        {
            let mut state = self.inner.state.lock();
            let current = state.session.as_ref().map(|session| session.generation);
            if current != Some(generation) || state.phase != SchedulerPhase::Running {
                trace!(generation, "Stale chunk timer");
                return;
            }
            // This task is the timer; it must not abort itself.
            self.inner.finish_chunk(&mut state, false);
        }

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            if let Some(inner) = weak.upgrade() {
                ContinuousProfiler { inner }.resume(generation);
            }
        });
    }

    fn resume(&self, generation: u64) {
        let mut state = self.inner.state.lock();
        if state.phase != SchedulerPhase::Running
            || state.session.is_some()
            || state.generation != generation
        {
            trace!(generation, "Chunk restart superseded");
            return;
        }
        // Either nothing is armed or this task is the retry itself.
        drop(state.retry.take());

        let Some(client) = state.client.clone() else {
            return;
        };
        if self.begin_chunk(&mut state, &client) {
            return;
        }

        debug!(
            generation = state.generation,
            "No capture this cycle, retrying after the next interval"
        );
        let retry_generation = state.generation;
        let interval = client.options().profiling.chunk_interval();
        state.retry = self.arm_retry(retry_generation, interval);
    }
}

impl Default for ContinuousProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerInner {
    /// Close the active chunk: cancel its timer, stop the engine, drop the
    /// annotation, then build and flush the record.
    fn finish_chunk(&self, state: &mut SchedulerState, cancel_timer: bool) {
        let Some(session) = state.session.take() else {
            return;
        };
        let ChunkSession {
            id,
            started_at,
            trace_id,
            timer,
            annotation,
            ..
        } = session;

        if let Some(timer) = timer {
            if cancel_timer {
                timer.abort();
            }
        }

        let ended_at = self.clock.now();
        let Some(client) = state.client.clone() else {
            return;
        };
        let profile = client.engine().stop_capture(&id, ProfileFormat::Chunk);
        drop(annotation);

        let Some(profile) = profile else {
            debug!(chunk_id = %id, "Capture engine returned no chunk profile");
            return;
        };

        let meta = ChunkMeta {
            chunk_id: &id,
            profiler_id: &self.profiler_id,
            trace_id: trace_id.as_deref(),
            started_at,
            ended_at,
        };
        match build_chunk_record(profile, &meta, &client.options().profiling) {
            Ok(record) => {
                debug!(
                    chunk_id = %id,
                    samples = record.profile.samples.len(),
                    "Flushing profile chunk"
                );
                client.send_detached(Envelope::new().with_item(EnvelopeItem::ProfileChunk(record)));
            }
            Err(e) => warn!(chunk_id = %id, "Discarding profile chunk: {}", e),
        }
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.cancel_retry();
        if let Some(session) = state.session.as_mut() {
            if let Some(timer) = session.timer.take() {
                timer.abort();
            }
        }
    }
}
