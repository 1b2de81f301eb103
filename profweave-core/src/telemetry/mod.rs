//! Telemetry surface the profiling hooks operate on.
//!
//! ## Architecture
//!
//! ```text
//! tracing layer ──span start/end──► LifecycleHub ──► ProfilingIntegration
//!                                        │
//! host: build events ──► preprocess_event (thread annotation)
//!                    ──► before_envelope (profile attachment)
//!                    ──► Transport::send
//! ```

pub mod envelope;
pub mod event;
pub mod span;

pub use envelope::{Envelope, EnvelopeItem};
pub use event::{EventKind, TelemetryEvent};
pub use span::{Scope, SpanHandle};
