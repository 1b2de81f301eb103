//! Integration wiring between the tracing layer and the coordinators.
//!
//! The host owns a [`LifecycleHub`] and emits span and flush notifications
//! into it. [`ProfilingIntegration::setup`] picks the profiling mode from the
//! client options and subscribes once; [`ProfilingIntegration::teardown`]
//! stops everything and unsubscribes.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::capture::CaptureQueue;
use crate::client::ProfilingClient;
use crate::config::ProfilingMode;
use crate::error::{ProfilingError, Result};
use crate::profiling::attach::attach_profiles;
use crate::profiling::sampling::should_profile;
use crate::profiling::{ContinuousProfiler, SpanProfiler};
use crate::telemetry::{Envelope, SpanHandle, TelemetryEvent};

// ============================================================================
// Lifecycle Hub
// ============================================================================

/// Receiver of tracing-layer and flush notifications
pub trait LifecycleListener: Send + Sync {
    fn on_span_start(&self, _span: &SpanHandle) {}

    fn on_span_end(&self, _span: &SpanHandle) {}

    /// Called for every event before it is put into an envelope
    fn preprocess_event(&self, _event: &mut TelemetryEvent) {}

    /// Called once per envelope immediately before transmission
    fn before_envelope(&self, _envelope: &mut Envelope) -> Result<()> {
        Ok(())
    }
}

/// Fan-out point for lifecycle notifications.
#[derive(Default)]
pub struct LifecycleHub {
    listeners: RwLock<Vec<(u64, Arc<dyn LifecycleListener>)>>,
    next_id: AtomicU64,
}

impl LifecycleHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `listener` until the returned subscription is dropped.
    pub fn subscribe(self: &Arc<Self>, listener: Arc<dyn LifecycleListener>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, listener));
        Subscription {
            hub: Arc::downgrade(self),
            id,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn LifecycleListener>> {
        self.listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    fn unsubscribe(&self, id: u64) {
        self.listeners.write().retain(|(entry, _)| *entry != id);
    }

    pub fn span_started(&self, span: &SpanHandle) {
        for listener in self.snapshot() {
            listener.on_span_start(span);
        }
    }

    pub fn span_ended(&self, span: &SpanHandle) {
        for listener in self.snapshot() {
            listener.on_span_end(span);
        }
    }

    pub fn preprocess_event(&self, event: &mut TelemetryEvent) {
        for listener in self.snapshot() {
            listener.preprocess_event(event);
        }
    }

    /// Run every listener; the first error is reported after all have run.
    pub fn before_envelope(&self, envelope: &mut Envelope) -> Result<()> {
        let mut first_error = None;
        for listener in self.snapshot() {
            if let Err(e) = listener.before_envelope(envelope) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Removes its listener from the hub when dropped.
pub struct Subscription {
    hub: Weak<LifecycleHub>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}

// ============================================================================
// Profiling Integration
// ============================================================================

/// Profiling hooked into a client, in one of the two modes
pub struct ProfilingIntegration {
    mode: ProfilingMode,
    client: Arc<ProfilingClient>,
    queue: Arc<CaptureQueue>,
    span_profiler: SpanProfiler,
    continuous: ContinuousProfiler,
    subscription: Mutex<Option<Subscription>>,
}

impl ProfilingIntegration {
    /// Choose the mode from the client options and subscribe to `hub`.
    ///
    /// Invoke once per client. Continuous mode is initialized but not
    /// started; call [`ProfilingIntegration::profiler`]`().start()`.
    pub fn setup(client: Arc<ProfilingClient>, hub: &Arc<LifecycleHub>) -> Result<Arc<Self>> {
        let options = &client.options().profiling;
        options.validate()?;

        let mode = client.options().profiling_mode();
        let queue = Arc::new(CaptureQueue::new(options.queue_capacity()));
        let span_profiler = SpanProfiler::new(
            Arc::clone(client.engine()),
            Arc::clone(&queue),
            options.max_profile_duration(),
        );
        let continuous = ContinuousProfiler::new();
        if mode == ProfilingMode::Continuous {
            continuous.initialize(Arc::clone(&client));
        }

        info!(
            mode = ?mode,
            queue_capacity = queue.capacity(),
            "Profiling integration set up"
        );

        let integration = Arc::new(Self {
            mode,
            client,
            queue,
            span_profiler,
            continuous,
            subscription: Mutex::new(None),
        });

        let listener: Arc<dyn LifecycleListener> = integration.clone();
        *integration.subscription.lock() = Some(hub.subscribe(listener));
        Ok(integration)
    }

    pub fn mode(&self) -> ProfilingMode {
        self.mode
    }

    pub fn client(&self) -> &Arc<ProfilingClient> {
        &self.client
    }

    pub fn queue(&self) -> &Arc<CaptureQueue> {
        &self.queue
    }

    pub fn span_profiler(&self) -> &SpanProfiler {
        &self.span_profiler
    }

    /// The continuous-mode `start()`/`stop()` pair.
    ///
    /// In span-scoped mode the profiler has no client, so both are no-ops.
    pub fn profiler(&self) -> &ContinuousProfiler {
        &self.continuous
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// Stop all captures and unsubscribe. Safe to call more than once.
    pub fn teardown(&self) {
        let Some(subscription) = self.subscription.lock().take() else {
            return;
        };

        self.continuous.stop();
        let stopped = self.span_profiler.stop_all();
        drop(subscription);
        debug!(stopped_span_profiles = stopped, "Profiling integration torn down");
    }
}

impl LifecycleListener for ProfilingIntegration {
    fn on_span_start(&self, span: &SpanHandle) {
        if !span.is_root() {
            return;
        }
        match self.mode {
            ProfilingMode::SpanScoped => {
                if should_profile(span, self.client.options()) {
                    self.span_profiler.on_root_start(span);
                }
            }
            ProfilingMode::Continuous => self.continuous.on_root_span_start(span),
        }
    }

    fn on_span_end(&self, span: &SpanHandle) {
        if self.mode == ProfilingMode::SpanScoped {
            self.span_profiler.on_root_end(span);
        }
    }

    fn preprocess_event(&self, event: &mut TelemetryEvent) {
        if self.mode == ProfilingMode::Continuous {
            self.continuous.process_event(event);
        }
    }

    fn before_envelope(&self, envelope: &mut Envelope) -> Result<()> {
        if self.mode != ProfilingMode::SpanScoped {
            return Ok(());
        }
        match attach_profiles(envelope, &self.queue, &self.client.options().profiling) {
            Ok(_) => Ok(()),
            Err(e @ ProfilingError::MalformedCorrelation { .. }) => {
                warn!("Skipping profile attachment for envelope: {}", e);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
