//! Synthetic capture engine for the demo host.
//!
//! Records when each capture started and, on stop, fabricates one sample
//! per sampling interval across the elapsed time, picking a random stack
//! from a small fixed call graph.

use parking_lot::Mutex;
use profweave_core::capture::{ProfileSample, StackFrame, ThreadMetadata};
use profweave_core::profiling::thread::{PROFILER_THREAD_ID, PROFILER_THREAD_NAME};
use profweave_core::{CaptureEngine, CorrelationKey, ProfileFormat, RawProfile};
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const SAMPLING_INTERVAL: Duration = Duration::from_millis(10);

/// (function, module) pairs; index is the frame id
const FRAMES: &[(&str, &str)] = &[
    ("main", "demo"),
    ("run_job", "demo::jobs"),
    ("parse_request", "demo::http"),
    ("query_orders", "demo::db"),
    ("serialize_response", "demo::http"),
];

/// Leaf-first stacks over [`FRAMES`]
const STACKS: &[&[usize]] = &[&[2, 1, 0], &[3, 1, 0], &[4, 1, 0], &[1, 0]];

#[derive(Default)]
pub struct SyntheticEngine {
    sessions: Mutex<HashMap<CorrelationKey, Instant>>,
}

impl SyntheticEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn fabricate(elapsed: Duration) -> RawProfile {
        let count = (elapsed.as_nanos() / SAMPLING_INTERVAL.as_nanos()) as usize + 1;
        let mut rng = rand::rng();
        let samples = (0..count)
            .map(|i| ProfileSample {
                stack_id: rng.random_range(0..STACKS.len()),
                thread_id: PROFILER_THREAD_ID.to_string(),
                elapsed_since_start_ns: i as u64 * SAMPLING_INTERVAL.as_nanos() as u64,
            })
            .collect();

        let frames = FRAMES
            .iter()
            .map(|(function, module)| StackFrame {
                function: Some((*function).to_string()),
                module: Some((*module).to_string()),
                ..Default::default()
            })
            .collect();

        let mut thread_metadata = BTreeMap::new();
        thread_metadata.insert(
            PROFILER_THREAD_ID.to_string(),
            ThreadMetadata {
                name: Some(PROFILER_THREAD_NAME.to_string()),
            },
        );

        RawProfile {
            samples,
            stacks: STACKS.iter().map(|stack| stack.to_vec()).collect(),
            frames,
            thread_metadata,
        }
    }
}

impl CaptureEngine for SyntheticEngine {
    fn start_capture(&self, key: &CorrelationKey) -> bool {
        trace!(profile_id = %key, "Synthetic capture started");
        self.sessions.lock().insert(key.clone(), Instant::now());
        true
    }

    fn stop_capture(&self, key: &CorrelationKey, format: ProfileFormat) -> Option<RawProfile> {
        let started = self.sessions.lock().remove(key)?;
        let profile = Self::fabricate(started.elapsed());
        debug!(
            profile_id = %key,
            format = ?format,
            samples = profile.samples.len(),
            "Synthetic capture stopped"
        );
        Some(profile)
    }
}
