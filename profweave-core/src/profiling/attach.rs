//! Correlation & flush attacher.
//!
//! Runs once per outbound batch, right before transmission:
//!
//! 1. Validate correlation metadata on every event. Any malformed entry
//!    fails the whole pass before anything is touched, so the batch can
//!    still go out without profiles.
//! 2. For each `profile_id`, take the payload from the [`CaptureQueue`],
//!    append a [`ProfileRecord`](super::record::ProfileRecord) and strip the
//!    key from the event.

use serde_json::Value;
use tracing::{debug, trace, warn};

use super::record::build_profile_record;
use crate::capture::{CaptureQueue, CorrelationKey};
use crate::config::ProfilingOptions;
use crate::error::{ProfilingError, Result};
use crate::telemetry::event::{PROFILE_CONTEXT, PROFILE_ID_KEY};
use crate::telemetry::{Envelope, EnvelopeItem, TelemetryEvent};

/// Read the span-scoped correlation key off an event.
///
/// `Ok(None)` when the event makes no claim; an error when it claims a
/// profile but the claim is structurally broken.
pub fn correlation_key(event: &TelemetryEvent) -> Result<Option<CorrelationKey>> {
    let Some(profile) = event.context(PROFILE_CONTEXT) else {
        return Ok(None);
    };
    let Value::Object(profile) = profile else {
        return Err(malformed(event, "profile context is not an object"));
    };
    let Some(value) = profile.get(PROFILE_ID_KEY) else {
        return Ok(None);
    };

    match value {
        Value::String(id) if !id.trim().is_empty() => Ok(Some(CorrelationKey::from(id.as_str()))),
        Value::String(_) => Err(malformed(event, "profile_id is empty")),
        Value::Null => Err(malformed(event, "profile_id is null")),
        _ => Err(malformed(event, "profile_id is not a string")),
    }
}

fn malformed(event: &TelemetryEvent, reason: &str) -> ProfilingError {
    ProfilingError::MalformedCorrelation {
        event_id: event.event_id.clone(),
        reason: reason.to_string(),
    }
}

/// Attach queued profiles to the events that reference them.
///
/// Returns the number of profile records appended.
pub fn attach_profiles(
    envelope: &mut Envelope,
    queue: &CaptureQueue,
    options: &ProfilingOptions,
) -> Result<usize> {
    let mut correlated = Vec::new();
    for (index, item) in envelope.items.iter().enumerate() {
        if let EnvelopeItem::Event(event) = item {
            if let Some(key) = correlation_key(event)? {
                correlated.push((index, key));
            }
        }
    }

    if correlated.is_empty() {
        trace!("No correlated events in envelope {}", envelope.envelope_id);
        return Ok(0);
    }

    let mut records = Vec::new();
    for (index, key) in correlated {
        let EnvelopeItem::Event(event) = &mut envelope.items[index] else {
            continue;
        };

        let Some(profile) = queue.take(&key) else {
            debug!(
                profile_id = %key,
                event_id = %event.event_id,
                "Could not find queued profile for event, sending without profile"
            );
            continue;
        };

        // The payload is consumed either way; never leave a dangling key.
        event.strip_profile_id();

        match build_profile_record(&key, profile, event, options) {
            Ok(record) => records.push(EnvelopeItem::Profile(record)),
            Err(e) => warn!(
                profile_id = %key,
                event_id = %event.event_id,
                "Discarding profile: {}", e
            ),
        }
    }

    let attached = records.len();
    envelope.items.extend(records);
    debug!(
        attached,
        "Attached profiles to envelope {}", envelope.envelope_id
    );
    Ok(attached)
}
