//! Span-scoped coordinator.
//!
//! Binds one capture to the lifetime of one root span:
//!
//! ```text
//! root start ──► engine.start_capture ──► side table[span_id] = key
//!                                        ──► scope.profile.profile_id = key
//!                                        ──► deadline timer armed
//!
//! root end  ─┐
//!            ├─► remove side table entry (first one wins)
//! deadline  ─┘       ──► cancel timer, engine.stop_capture, queue.put
//! ```
//!
//! Removing the side-table entry under the lock is what makes the second of
//! "end" and "deadline" a no-op.

use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::capture::{CaptureEngine, CaptureQueue, CorrelationKey, ProfileFormat};
use crate::telemetry::event::{PROFILE_CONTEXT, PROFILE_ID_KEY};
use crate::telemetry::SpanHandle;

struct ActiveCapture {
    key: CorrelationKey,
    deadline: Option<JoinHandle<()>>,
}

struct SpanProfilerInner {
    engine: Arc<dyn CaptureEngine>,
    queue: Arc<CaptureQueue>,
    max_duration: Duration,
    /// span_id -> capture; entries live from root start until the first stop
    active: Mutex<HashMap<String, ActiveCapture>>,
}

/// Coordinator for span-scoped profiling
#[derive(Clone)]
pub struct SpanProfiler {
    inner: Arc<SpanProfilerInner>,
}

impl SpanProfiler {
    pub fn new(
        engine: Arc<dyn CaptureEngine>,
        queue: Arc<CaptureQueue>,
        max_duration: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SpanProfilerInner {
                engine,
                queue,
                max_duration,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn queue(&self) -> &Arc<CaptureQueue> {
        &self.inner.queue
    }

    /// Number of captures currently running
    pub fn active_count(&self) -> usize {
        self.inner.active.lock().len()
    }

    /// Key currently associated with `span_id`, if a capture is running.
    pub fn active_key(&self, span_id: &str) -> Option<CorrelationKey> {
        self.inner
            .active
            .lock()
            .get(span_id)
            .map(|capture| capture.key.clone())
    }

    /// Begin a capture for a root span.
    ///
    /// Non-root spans are ignored. A root that is already being profiled
    /// keeps its existing key. Returns the key when a capture is running.
    pub fn on_root_start(&self, span: &SpanHandle) -> Option<CorrelationKey> {
        if !span.is_root() {
            trace!(span_id = %span.span_id, "Ignoring non-root span start");
            return None;
        }

        let mut active = self.inner.active.lock();
        if let Some(existing) = active.get(&span.span_id) {
            debug!(span_id = %span.span_id, "Root span already profiled");
            return Some(existing.key.clone());
        }

        let key = CorrelationKey::new();
        if !self.inner.engine.start_capture(&key) {
            debug!(span_id = %span.span_id, "Capture engine declined to start");
            return None;
        }

        span.scope
            .set_context(PROFILE_CONTEXT, json!({ PROFILE_ID_KEY: key.as_str() }));

        let deadline = self.arm_deadline(span.span_id.clone(), key.clone());
        active.insert(
            span.span_id.clone(),
            ActiveCapture {
                key: key.clone(),
                deadline,
            },
        );

        debug!(
            span_id = %span.span_id,
            profile_id = %key,
            "Started span profile"
        );
        Some(key)
    }

    /// Finish the capture for a root span.
    ///
    /// A no-op when the span was never profiled or its deadline already
    /// fired. Returns whether a payload was queued.
    pub fn on_root_end(&self, span: &SpanHandle) -> bool {
        if !span.is_root() {
            return false;
        }

        let Some(capture) = self.inner.active.lock().remove(&span.span_id) else {
            trace!(span_id = %span.span_id, "No active profile for span");
            return false;
        };

        if let Some(deadline) = capture.deadline {
            deadline.abort();
        }
        self.inner.finish(&span.span_id, capture.key, "span ended")
    }

    /// Stop every running capture, queueing whatever they produced.
    pub fn stop_all(&self) -> usize {
        let drained: Vec<(String, ActiveCapture)> = self.inner.active.lock().drain().collect();
        let count = drained.len();
        for (span_id, capture) in drained {
            if let Some(deadline) = capture.deadline {
                deadline.abort();
            }
            self.inner.finish(&span_id, capture.key, "profiler shutdown");
        }
        count
    }

    fn arm_deadline(&self, span_id: String, key: CorrelationKey) -> Option<JoinHandle<()>> {
        let Ok(handle) = Handle::try_current() else {
            warn!(
                span_id = %span_id,
                "No async runtime available; profile will only stop when the span ends"
            );
            return None;
        };

        let weak: Weak<SpanProfilerInner> = Arc::downgrade(&self.inner);
        let max_duration = self.inner.max_duration;
        Some(handle.spawn(async move {
            tokio::time::sleep(max_duration).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire(&span_id, &key);
            }
        }))
    }
}

impl SpanProfilerInner {
    /// Deadline path: stop only if the entry still belongs to `key`.
    fn expire(&self, span_id: &str, key: &CorrelationKey) {
        let capture = {
            let mut active = self.active.lock();
            let still_ours = active
                .get(span_id)
                .is_some_and(|capture| &capture.key == key);
            if still_ours {
                active.remove(span_id)
            } else {
                None
            }
        };

        if let Some(capture) = capture {
            debug!(
                span_id = %span_id,
                profile_id = %key,
                max_duration_ms = self.max_duration.as_millis() as u64,
                "Profile reached max duration, stopping early"
            );
            self.finish(span_id, capture.key, "deadline");
        }
    }

    fn finish(&self, span_id: &str, key: CorrelationKey, reason: &str) -> bool {
        match self.engine.stop_capture(&key, ProfileFormat::Thread) {
            Some(profile) => {
                debug!(
                    span_id = %span_id,
                    profile_id = %key,
                    samples = profile.samples.len(),
                    "Queued span profile ({})", reason
                );
                self.queue.put(key, profile);
                true
            }
            None => {
                debug!(
                    span_id = %span_id,
                    profile_id = %key,
                    "Capture engine returned no profile ({})", reason
                );
                false
            }
        }
    }
}
