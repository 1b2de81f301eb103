//! Outbound telemetry events as seen by the profiling hooks.
//!
//! Only the parts the coordinators read or write are typed. Everything a
//! host attaches beyond that rides along in `extra`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Context holding correlation metadata (`profile_id` / `profiler_id`)
pub const PROFILE_CONTEXT: &str = "profile";
/// Span-scoped correlation key inside the profile context
pub const PROFILE_ID_KEY: &str = "profile_id";
/// Continuous-mode profiler identity inside the profile context
pub const PROFILER_ID_KEY: &str = "profiler_id";
/// Trace context carrying ids and the `data` bag
pub const TRACE_CONTEXT: &str = "trace";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Transaction,
    Error,
    Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_id: String,

    #[serde(rename = "type")]
    pub kind: EventKind,

    /// Transaction name for transaction events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,

    /// Seconds since the Unix epoch
    pub timestamp: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<f64>,

    #[serde(default)]
    pub contexts: Map<String, Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TelemetryEvent {
    pub fn new(kind: EventKind, timestamp: f64) -> Self {
        Self {
            event_id: Uuid::new_v4().simple().to_string(),
            kind,
            transaction: None,
            timestamp,
            start_timestamp: None,
            contexts: Map::new(),
            extra: Map::new(),
        }
    }

    /// A transaction event covering `[start, end]` for the named root span.
    pub fn transaction(name: impl Into<String>, start: f64, end: f64) -> Self {
        let mut event = Self::new(EventKind::Transaction, end);
        event.transaction = Some(name.into());
        event.start_timestamp = Some(start);
        event
    }

    pub fn is_transaction(&self) -> bool {
        self.kind == EventKind::Transaction
    }

    pub fn context(&self, name: &str) -> Option<&Value> {
        self.contexts.get(name)
    }

    pub fn set_context(&mut self, name: impl Into<String>, value: Value) {
        self.contexts.insert(name.into(), value);
    }

    /// Trace id from the trace context, if present and a string.
    pub fn trace_id(&self) -> Option<&str> {
        self.contexts
            .get(TRACE_CONTEXT)
            .and_then(|trace| trace.get("trace_id"))
            .and_then(Value::as_str)
    }

    /// Drop `profile_id`, and the profile context with it once nothing else
    /// is left inside.
    pub fn strip_profile_id(&mut self) {
        let now_empty = match self.contexts.get_mut(PROFILE_CONTEXT) {
            Some(Value::Object(profile)) => {
                profile.remove(PROFILE_ID_KEY);
                profile.is_empty()
            }
            _ => false,
        };
        if now_empty {
            self.contexts.remove(PROFILE_CONTEXT);
        }
    }
}
