//! Per-root-span profiling decision for span-scoped mode.

use tracing::{debug, warn};

use crate::config::{is_valid_sample_rate, ClientOptions, SamplingContext};
use crate::telemetry::SpanHandle;

/// Decide whether `span` gets profiled, drawing from the thread RNG.
pub fn should_profile(span: &SpanHandle, options: &ClientOptions) -> bool {
    should_profile_with(span, options, rand::random::<f64>())
}

/// Same as [`should_profile`] with an explicit uniform draw in `[0, 1)`.
///
/// The span must itself be sampled; the sampler wins over the static rate.
pub fn should_profile_with(span: &SpanHandle, options: &ClientOptions, draw: f64) -> bool {
    if !span.sampled {
        debug!(span_id = %span.span_id, "Span not sampled, skipping profile");
        return false;
    }

    let rate = match &options.profiles_sampler {
        Some(sampler) => sampler(&SamplingContext {
            name: span.name.clone(),
            trace_id: span.trace_id.clone(),
            parent_sampled: span.parent_span_id.as_ref().map(|_| span.sampled),
        }),
        None => match options.profiling.profiles_sample_rate {
            Some(rate) => rate,
            None => return false,
        },
    };

    if !is_valid_sample_rate(rate) {
        warn!(
            "Invalid profiles sample rate {}, expected a number between 0 and 1",
            rate
        );
        return false;
    }
    if rate == 0.0 {
        debug!(span_id = %span.span_id, "Profiles sample rate is 0, skipping profile");
        return false;
    }

    let sampled = draw < rate;
    if !sampled {
        debug!(
            span_id = %span.span_id,
            rate,
            "Span lost the profiling draw"
        );
    }
    sampled
}
