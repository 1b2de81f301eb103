//! profweave core - correlates CPU profiles with tracing spans
//!
//! Two mutually exclusive modes:
//! - **span-scoped**: one capture per root span, bounded by a deadline,
//!   queued until the span's transaction event is flushed
//! - **continuous**: fixed-length chunks, flushed as they end and re-armed
//!   until stopped

pub mod capture;
pub mod client;
pub mod config;
pub mod error;
pub mod integration;
pub mod profiling;
pub mod telemetry;
pub mod transport;

pub use capture::{CaptureEngine, CaptureQueue, CorrelationKey, ProfileFormat, RawProfile};
pub use client::ProfilingClient;
pub use config::{ClientOptions, ProfilingMode, ProfilingOptions};
pub use error::{ProfilingError, Result};
pub use integration::{LifecycleHub, LifecycleListener, ProfilingIntegration, Subscription};
pub use profiling::{ContinuousProfiler, SchedulerPhase, SpanProfiler};
pub use telemetry::{Envelope, EnvelopeItem, Scope, SpanHandle, TelemetryEvent};
pub use transport::{FileTransport, Transport};
