//! Span handles and request-scoped context as handed over by the tracing layer.
//!
//! ```text
//! root span (span_id == root_span_id)  <- profiled
//!   ├── child span                      <- ignored
//!   └── child span                      <- ignored
//! ```
//!
//! Handles are cheap to clone and never keep anything alive beyond the
//! shared [`Scope`]; coordinators key their bookkeeping by `span_id`.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use super::event::{TelemetryEvent, TRACE_CONTEXT};

/// Generate a unique 16-character hex span ID (8 bytes).
fn generate_span_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    uuid[16..].to_string()
}

/// Generate a 32-character hex trace ID.
fn generate_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

// ============================================================================
// Scope
// ============================================================================

/// Request-scoped contexts merged into every event captured under the scope.
///
/// Cloning shares the underlying storage.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    contexts: Arc<RwLock<Map<String, Value>>>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_context(&self, name: impl Into<String>, value: Value) {
        self.contexts.write().insert(name.into(), value);
    }

    pub fn remove_context(&self, name: &str) -> Option<Value> {
        self.contexts.write().remove(name)
    }

    pub fn context(&self, name: &str) -> Option<Value> {
        self.contexts.read().get(name).cloned()
    }

    /// Trace id of the active propagation context, if one was set.
    pub fn trace_id(&self) -> Option<String> {
        self.contexts
            .read()
            .get(TRACE_CONTEXT)
            .and_then(|trace| trace.get("trace_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Copy contexts the event does not already carry.
    pub fn apply_to_event(&self, event: &mut TelemetryEvent) {
        for (name, value) in self.contexts.read().iter() {
            event
                .contexts
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

// ============================================================================
// Span Handle
// ============================================================================

#[derive(Debug, Clone)]
pub struct SpanHandle {
    pub span_id: String,
    pub trace_id: String,
    pub parent_span_id: Option<String>,
    /// `span_id` of the root of this unit of work
    pub root_span_id: String,
    pub name: String,
    /// Tracing-level sampling decision
    pub sampled: bool,
    pub scope: Scope,
}

impl SpanHandle {
    /// Start a new trace with a root span bound to `scope`.
    ///
    /// The scope's trace context is pointed at the new trace.
    pub fn root(name: impl Into<String>, scope: Scope) -> Self {
        let span_id = generate_span_id();
        let trace_id = generate_trace_id();
        scope.set_context(
            TRACE_CONTEXT,
            serde_json::json!({"trace_id": trace_id, "span_id": span_id}),
        );
        Self {
            root_span_id: span_id.clone(),
            span_id,
            trace_id,
            parent_span_id: None,
            name: name.into(),
            sampled: true,
            scope,
        }
    }

    /// A child span in the same unit of work.
    pub fn child(&self, name: impl Into<String>) -> Self {
        Self {
            span_id: generate_span_id(),
            trace_id: self.trace_id.clone(),
            parent_span_id: Some(self.span_id.clone()),
            root_span_id: self.root_span_id.clone(),
            name: name.into(),
            sampled: self.sampled,
            scope: self.scope.clone(),
        }
    }

    pub fn with_sampled(mut self, sampled: bool) -> Self {
        self.sampled = sampled;
        self
    }

    /// True when this span is the root of its unit of work.
    pub fn is_root(&self) -> bool {
        self.span_id == self.root_span_id
    }
}
