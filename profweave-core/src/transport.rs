//! Outbound transport boundary.
//!
//! The wire protocol is the host's concern. This module holds the trait the
//! coordinators flush through and a file-backed implementation used by the
//! CLI and for local inspection.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::telemetry::Envelope;

/// Trait for envelope transports
///
/// Sends are fire-and-forget from the profiling side: failures are logged by
/// the caller and never retried.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, envelope: Envelope) -> Result<()>;

    /// Transport identifier for logging/debugging
    fn name(&self) -> &'static str;
}

/// Writes every envelope as a single-line JSON file.
///
/// Output: `<destination>/<YYYY-mm-dd_HH-MM-SS>_<envelope_id>.json`
pub struct FileTransport {
    destination: PathBuf,
}

impl FileTransport {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    fn file_name(envelope: &Envelope) -> String {
        let datetime: DateTime<Local> = envelope.created_at.into();
        format!(
            "{}_{}.json",
            datetime.format("%Y-%m-%d_%H-%M-%S"),
            envelope.envelope_id
        )
    }
}

#[async_trait]
impl Transport for FileTransport {
    async fn send(&self, envelope: Envelope) -> Result<()> {
        // Create directory if needed
        tokio::fs::create_dir_all(&self.destination)
            .await
            .with_context(|| format!("Failed to create {:?}", self.destination))?;

        let file_path = self.destination.join(Self::file_name(&envelope));

        // Newline-terminated for log shippers
        let content = format!("{}\n", serde_json::to_string(&envelope)?);
        tokio::fs::write(&file_path, content)
            .await
            .with_context(|| format!("Failed to write envelope to {:?}", file_path))?;

        debug!(
            items = envelope.len(),
            "Wrote envelope {} to {:?}", envelope.envelope_id, file_path
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
