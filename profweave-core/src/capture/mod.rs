//! Capture engine boundary and the payloads it produces.
//!
//! The sampler itself lives outside this crate. Coordinators only see the
//! synchronous start/stop pair of [`CaptureEngine`] and the [`RawProfile`]
//! handed back on stop.

pub mod queue;

pub use queue::CaptureQueue;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{ProfilingError, Result};

/// Opaque identifier linking a captured profile to the event it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Mint a fresh key (32 lowercase hex characters).
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationKey {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for CorrelationKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Layout the engine should produce on stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileFormat {
    /// Per-span profile, samples relative to capture start
    Thread,
    /// Continuous-mode chunk
    Chunk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSample {
    pub stack_id: usize,
    pub thread_id: String,
    /// Offset from capture start in nanoseconds
    pub elapsed_since_start_ns: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Raw profiling data returned by the capture engine.
///
/// Stacks are lists of indices into `frames`, samples reference stacks by
/// index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawProfile {
    pub samples: Vec<ProfileSample>,
    pub stacks: Vec<Vec<usize>>,
    pub frames: Vec<StackFrame>,
    #[serde(default)]
    pub thread_metadata: BTreeMap<String, ThreadMetadata>,
}

impl RawProfile {
    /// Check sample count and that every index points at something.
    pub fn validate(&self, min_samples: usize) -> Result<()> {
        if self.samples.len() < min_samples {
            return Err(ProfilingError::InvalidProfile(format!(
                "profile has {} samples, at least {} required",
                self.samples.len(),
                min_samples
            )));
        }

        if let Some(sample) = self.samples.iter().find(|s| s.stack_id >= self.stacks.len()) {
            return Err(ProfilingError::InvalidProfile(format!(
                "sample references unknown stack {}",
                sample.stack_id
            )));
        }

        let frame_count = self.frames.len();
        if self.stacks.iter().flatten().any(|&frame| frame >= frame_count) {
            return Err(ProfilingError::InvalidProfile(
                "stack references unknown frame".into(),
            ));
        }

        Ok(())
    }
}

/// The opaque sampler the coordinators drive.
///
/// Both calls are synchronous from the coordinator's point of view, even if
/// the engine samples on another thread.
pub trait CaptureEngine: Send + Sync {
    /// Begin a session for `key`. Returning `false` means the engine declined
    /// (resource limits, already busy) and no capture happens this cycle.
    fn start_capture(&self, key: &CorrelationKey) -> bool;

    /// End the session for `key` and hand back whatever was recorded.
    fn stop_capture(&self, key: &CorrelationKey, format: ProfileFormat) -> Option<RawProfile>;
}
