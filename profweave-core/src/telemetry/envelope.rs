//! Outbound batch container.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::TelemetryEvent;
use crate::profiling::record::{ChunkRecord, ProfileRecord};

/// One item in an outbound batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EnvelopeItem {
    Event(TelemetryEvent),
    Profile(ProfileRecord),
    ProfileChunk(ChunkRecord),
}

/// A batch of telemetry items sent together to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub envelope_id: String,
    pub created_at: DateTime<Utc>,
    pub items: Vec<EnvelopeItem>,
}

impl Envelope {
    pub fn new() -> Self {
        Self {
            envelope_id: Uuid::new_v4().simple().to_string(),
            created_at: Utc::now(),
            items: Vec::new(),
        }
    }

    pub fn from_events(events: impl IntoIterator<Item = TelemetryEvent>) -> Self {
        let mut envelope = Self::new();
        envelope
            .items
            .extend(events.into_iter().map(EnvelopeItem::Event));
        envelope
    }

    pub fn with_item(mut self, item: EnvelopeItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn push(&mut self, item: EnvelopeItem) {
        self.items.push(item);
    }

    pub fn events(&self) -> impl Iterator<Item = &TelemetryEvent> {
        self.items.iter().filter_map(|item| match item {
            EnvelopeItem::Event(event) => Some(event),
            _ => None,
        })
    }

    pub fn profiles(&self) -> impl Iterator<Item = &ProfileRecord> {
        self.items.iter().filter_map(|item| match item {
            EnvelopeItem::Profile(profile) => Some(profile),
            _ => None,
        })
    }

    pub fn chunks(&self) -> impl Iterator<Item = &ChunkRecord> {
        self.items.iter().filter_map(|item| match item {
            EnvelopeItem::ProfileChunk(chunk) => Some(chunk),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}
