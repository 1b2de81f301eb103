//! Profiling records appended to outbound envelopes.
//!
//! - [`ProfileRecord`]: one span-scoped capture tied to the transaction event
//!   it was correlated with (format version "1")
//! - [`ChunkRecord`]: one continuous-mode chunk (format version "2"), with
//!   absolute sample timestamps

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;
use uuid::Uuid;

use super::clock::unix_seconds;
use super::thread::PROFILER_THREAD_ID;
use crate::capture::{CorrelationKey, RawProfile, StackFrame, ThreadMetadata};
use crate::config::ProfilingOptions;
use crate::error::{ProfilingError, Result};
use crate::telemetry::TelemetryEvent;

pub const PLATFORM: &str = "rust";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    pub name: String,
    /// `event_id` of the transaction event
    pub id: String,
    pub trace_id: String,
    pub active_thread_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub event_id: String,
    /// RFC3339 start of the profiled transaction
    pub timestamp: String,
    pub platform: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub transaction: TransactionMetadata,
    pub profile: RawProfile,
}

/// Build the record for a span-scoped capture correlated with `event`.
pub fn build_profile_record(
    key: &CorrelationKey,
    profile: RawProfile,
    event: &TelemetryEvent,
    options: &ProfilingOptions,
) -> Result<ProfileRecord> {
    profile.validate(options.min_samples)?;

    let start = event.start_timestamp.unwrap_or(event.timestamp);
    let timestamp = chrono::DateTime::from_timestamp_micros((start * 1_000_000.0) as i64)
        .ok_or_else(|| {
            ProfilingError::InvalidProfile(format!("event timestamp out of range: {start}"))
        })?
        .to_rfc3339();

    Ok(ProfileRecord {
        event_id: key.to_string(),
        timestamp,
        platform: PLATFORM.to_string(),
        version: "1".to_string(),
        release: options.release.clone(),
        environment: options.environment.clone(),
        transaction: TransactionMetadata {
            name: event.transaction.clone().unwrap_or_default(),
            id: event.event_id.clone(),
            trace_id: event.trace_id().unwrap_or_default().to_string(),
            active_thread_id: PROFILER_THREAD_ID.to_string(),
        },
        profile,
    })
}

// ============================================================================
// Chunks
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSample {
    pub stack_id: usize,
    pub thread_id: String,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkProfile {
    pub samples: Vec<ChunkSample>,
    pub stacks: Vec<Vec<usize>>,
    pub frames: Vec<StackFrame>,
    #[serde(default)]
    pub thread_metadata: BTreeMap<String, ThreadMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub profiler_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub platform: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Window start, seconds since the Unix epoch
    pub start_timestamp: f64,
    /// Window end, seconds since the Unix epoch
    pub end_timestamp: f64,
    pub profile: ChunkProfile,
}

/// Identity of the chunk being flushed
#[derive(Debug, Clone)]
pub struct ChunkMeta<'a> {
    pub chunk_id: &'a CorrelationKey,
    pub profiler_id: &'a str,
    pub trace_id: Option<&'a str>,
    pub started_at: Option<SystemTime>,
    pub ended_at: SystemTime,
}

/// Build the chunk record, rebasing sample offsets onto the chunk start.
pub fn build_chunk_record(
    profile: RawProfile,
    meta: &ChunkMeta<'_>,
    options: &ProfilingOptions,
) -> Result<ChunkRecord> {
    let started_at = meta.started_at.ok_or_else(|| {
        ProfilingError::InvalidProfile(format!(
            "chunk {} has no start timestamp",
            meta.chunk_id
        ))
    })?;
    profile.validate(options.min_samples)?;

    let start = unix_seconds(started_at);
    let RawProfile {
        samples,
        stacks,
        frames,
        thread_metadata,
    } = profile;

    let samples = samples
        .into_iter()
        .map(|sample| ChunkSample {
            stack_id: sample.stack_id,
            thread_id: sample.thread_id,
            timestamp: start + sample.elapsed_since_start_ns as f64 / 1e9,
        })
        .collect();

    Ok(ChunkRecord {
        chunk_id: meta.chunk_id.to_string(),
        profiler_id: meta.profiler_id.to_string(),
        trace_id: meta.trace_id.map(str::to_string),
        platform: PLATFORM.to_string(),
        version: "2".to_string(),
        release: options.release.clone(),
        environment: options.environment.clone(),
        start_timestamp: start,
        end_timestamp: unix_seconds(meta.ended_at).max(start),
        profile: ChunkProfile {
            samples,
            stacks,
            frames,
            thread_metadata,
        },
    })
}

/// Fresh profiler identity, stable for the lifetime of one scheduler.
pub fn new_profiler_id() -> String {
    Uuid::new_v4().simple().to_string()
}
