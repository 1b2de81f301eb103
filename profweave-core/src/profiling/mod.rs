//! Profiling session coordination and correlation.
//!
//! - [`span`]: one capture per root span, bounded by a deadline
//! - [`chunk`]: continuous fixed-length chunks, re-armed until stopped
//! - [`attach`]: pairs queued profiles with outbound events
//! - [`thread`]: synthetic thread identity on profiled events

pub mod attach;
pub mod chunk;
pub mod clock;
pub mod record;
pub mod sampling;
pub mod span;
pub mod thread;

pub use attach::{attach_profiles, correlation_key};
pub use chunk::{ContinuousProfiler, SchedulerPhase};
pub use record::{ChunkRecord, ProfileRecord};
pub use span::SpanProfiler;
pub use thread::annotate_thread_context;
