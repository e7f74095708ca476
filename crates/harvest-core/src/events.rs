//! Outward event stream for the presentation layer.

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::TrafficEntry;

/// Capacity of the event channel. Slow subscribers lag rather than block capture.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Notifications published by the capture session and its orchestrators.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A new entry passed the filter.
    EntryCaptured { entry: TrafficEntry },
    /// The filtered view changed as a whole.
    EntriesUpdated { entries: Vec<TrafficEntry> },
    RecordingChanged { recording: bool },
    FilterChanged { pattern: String },
    ExportComplete { path: PathBuf, count: usize },
    ExportFailed { error: String },
    ImportComplete { count: usize },
    ImportFailed { error: String },
    /// Analysis finished; `irrelevant` entries were marked.
    AnalyzeComplete { irrelevant: usize },
    AnalyzeFailed { error: String },
    CreateTestComplete { suite_id: String },
    CreateTestFailed { error: String },
}

impl SessionEvent {
    /// Short name used in logs and SSE event fields.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::EntryCaptured { .. } => "entry_captured",
            SessionEvent::EntriesUpdated { .. } => "entries_updated",
            SessionEvent::RecordingChanged { .. } => "recording_changed",
            SessionEvent::FilterChanged { .. } => "filter_changed",
            SessionEvent::ExportComplete { .. } => "export_complete",
            SessionEvent::ExportFailed { .. } => "export_failed",
            SessionEvent::ImportComplete { .. } => "import_complete",
            SessionEvent::ImportFailed { .. } => "import_failed",
            SessionEvent::AnalyzeComplete { .. } => "analyze_complete",
            SessionEvent::AnalyzeFailed { .. } => "analyze_failed",
            SessionEvent::CreateTestComplete { .. } => "create_test_complete",
            SessionEvent::CreateTestFailed { .. } => "create_test_failed",
        }
    }
}

/// Broadcast fan-out of [`SessionEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Creates a bus with the default capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn publish(&self, event: SessionEvent) {
        tracing::trace!("Publishing {}", event.kind());
        let _ = self.tx.send(event);
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
