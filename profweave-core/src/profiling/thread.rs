//! Synthetic thread identity for profiled events.
//!
//! Backends attribute stack samples to a thread; events captured while a
//! profile runs carry the same pseudo-thread so the two line up.

use serde_json::{Map, Value};

use crate::telemetry::event::{PROFILE_CONTEXT, TRACE_CONTEXT};
use crate::telemetry::TelemetryEvent;

pub const PROFILER_THREAD_ID: &str = "0";
pub const PROFILER_THREAD_NAME: &str = "main";

pub const THREAD_ID_KEY: &str = "thread.id";
pub const THREAD_NAME_KEY: &str = "thread.name";

/// Stamp `thread.id`/`thread.name` into `contexts.trace.data`.
///
/// Only events that carry a profile context are touched, and only while
/// `active`. Existing trace fields are preserved; a trace context or data bag
/// that is not an object is left alone. Returns whether the event changed.
pub fn annotate_thread_context(event: &mut TelemetryEvent, active: bool) -> bool {
    if !active || !event.contexts.contains_key(PROFILE_CONTEXT) {
        return false;
    }

    let trace = event
        .contexts
        .entry(TRACE_CONTEXT.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(trace) = trace else {
        return false;
    };

    let data = trace
        .entry("data".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(data) = data else {
        return false;
    };

    data.insert(THREAD_ID_KEY.into(), Value::from(PROFILER_THREAD_ID));
    data.insert(THREAD_NAME_KEY.into(), Value::from(PROFILER_THREAD_NAME));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn profiled_event() -> TelemetryEvent {
        let mut event = TelemetryEvent::transaction("t", 1.0, 2.0);
        event.set_context(PROFILE_CONTEXT, json!({"profiler_id": "p"}));
        event
    }

    #[test]
    fn test_inactive_is_noop() {
        let mut event = profiled_event();
        let before = event.clone();
        assert!(!annotate_thread_context(&mut event, false));
        assert_eq!(event, before);
    }

    #[test]
    fn test_unprofiled_event_untouched() {
        let mut event = TelemetryEvent::transaction("t", 1.0, 2.0);
        assert!(!annotate_thread_context(&mut event, true));
        assert!(event.context(TRACE_CONTEXT).is_none());
    }

    #[test]
    fn test_preserves_existing_trace_fields() {
        let mut event = profiled_event();
        event.set_context(
            TRACE_CONTEXT,
            json!({"trace_id": "t1", "op": "http", "data": {"route": "/a"}}),
        );

        assert!(annotate_thread_context(&mut event, true));
        assert_eq!(
            event.context(TRACE_CONTEXT),
            Some(&json!({
                "trace_id": "t1",
                "op": "http",
                "data": {"route": "/a", "thread.id": "0", "thread.name": "main"}
            }))
        );
    }

    #[test]
    fn test_creates_trace_context_when_missing() {
        let mut event = profiled_event();
        assert!(annotate_thread_context(&mut event, true));
        assert_eq!(
            event.context(TRACE_CONTEXT),
            Some(&json!({"data": {"thread.id": "0", "thread.name": "main"}}))
        );
    }

    #[test]
    fn test_non_object_trace_left_alone() {
        let mut event = profiled_event();
        event.set_context(TRACE_CONTEXT, json!("opaque"));
        assert!(!annotate_thread_context(&mut event, true));
        assert_eq!(event.context(TRACE_CONTEXT), Some(&json!("opaque")));
    }
}
