//! Capture session context.
//!
//! Owns the entry store, recording gate, filter engine, entry constructor and
//! event bus for one capture session. Components receive an `Arc<Session>`
//! instead of reaching for process-wide state.
//!
//! ## Flow
//!
//! ```text
//! Proxy callbacks → EntryConstructor → Session::record → EntryStore
//!                                            │
//!                                            └─ filter forwards? → EntryCaptured event
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::constructor::{EntryConstructor, ExchangeId};
use crate::error::{FilterError, Result};
use crate::events::{EventBus, SessionEvent};
use crate::filter::FilterEngine;
use crate::gate::RecordingGate;
use crate::kv::KeyValueStore;
use crate::model::TrafficEntry;
use crate::normalize::DEFAULT_MAX_BODY_BYTES;
use crate::store::EntryStore;
use crate::transfer::{read_har, write_har, ExportSelection};

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory exported HAR files are written to.
    pub downloads_dir: PathBuf,
    /// Per-body cap on buffered bytes.
    pub max_body_bytes: usize,
}

impl SessionConfig {
    /// Sets the downloads directory.
    pub fn with_downloads_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.downloads_dir = dir.into();
        self
    }

    /// Sets the body cap.
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// The user's downloads directory, falling back to the working directory.
    pub fn default_downloads_dir() -> PathBuf {
        directories::UserDirs::new()
            .and_then(|dirs| dirs.download_dir().map(|d| d.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            downloads_dir: Self::default_downloads_dir(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// One capture session.
pub struct Session {
    config: SessionConfig,
    gate: Arc<RecordingGate>,
    filter: FilterEngine,
    store: Mutex<EntryStore>,
    constructor: EntryConstructor,
    events: EventBus,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("recording", &self.gate.is_recording())
            .field("filter", &self.filter)
            .field("entries", &self.store.lock().len())
            .finish()
    }
}

impl Session {
    /// Creates a session with an in-memory filter.
    pub fn new(config: SessionConfig) -> Self {
        Self::build(config, FilterEngine::new())
    }

    /// Creates a session whose filter pattern is persisted in `kv`.
    pub fn with_store(config: SessionConfig, kv: Arc<dyn KeyValueStore>) -> Self {
        Self::build(config, FilterEngine::with_store(kv))
    }

    fn build(config: SessionConfig, filter: FilterEngine) -> Self {
        let gate = Arc::new(RecordingGate::new());
        let constructor = EntryConstructor::with_max_body_bytes(gate.clone(), config.max_body_bytes);
        Self {
            config,
            gate,
            filter,
            store: Mutex::new(EntryStore::new()),
            constructor,
            events: EventBus::new(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the entry constructor fed by the interception engine.
    pub fn constructor(&self) -> &EntryConstructor {
        &self.constructor
    }

    // ==================== Capture ====================

    /// Completes an exchange and records the resulting entry.
    ///
    /// The gate is checked again here, so an exchange that began while
    /// recording but finishes after recording stopped is dropped.
    pub fn complete_exchange(&self, id: ExchangeId) -> Option<Uuid> {
        let entry = self.constructor.response_end(id)?;
        if !self.gate.is_recording() {
            tracing::debug!(url = %entry.request.url, "Recording stopped mid-exchange, dropping entry");
            return None;
        }
        self.record(entry)
    }

    /// Stores an entry and forwards it live if the filter accepts its URL.
    ///
    /// Filtered-out entries are still stored so later filtered queries can
    /// reconsider them. Returns the id if the entry was stored.
    pub fn record(&self, entry: TrafficEntry) -> Option<Uuid> {
        let id = entry.id;
        let forward = self.filter.should_forward(&entry.request.url);
        let event = forward.then(|| SessionEvent::EntryCaptured {
            entry: entry.clone(),
        });

        if !self.store.lock().add(entry) {
            return None;
        }
        if let Some(event) = event {
            self.events.publish(event);
        }
        Some(id)
    }

    // ==================== Queries ====================

    /// All stored entries in insertion order.
    pub fn entries(&self) -> Vec<TrafficEntry> {
        self.store.lock().all().to_vec()
    }

    /// Entries whose URL passes the active filter.
    pub fn filtered_entries(&self) -> Vec<TrafficEntry> {
        self.store
            .lock()
            .all()
            .iter()
            .filter(|e| self.filter.should_forward(&e.request.url))
            .cloned()
            .collect()
    }

    /// Entries not marked irrelevant.
    pub fn relevant_entries(&self) -> Vec<TrafficEntry> {
        self.store.lock().all_filtered(true)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    // ==================== Mutations ====================

    /// Deletes one entry.
    pub fn delete(&self, id: &Uuid) -> bool {
        let removed = self.store.lock().delete(id);
        if removed {
            self.publish_entries();
        }
        removed
    }

    /// Deletes several entries, returning how many were removed.
    pub fn delete_many(&self, ids: &[Uuid]) -> usize {
        let removed = self.store.lock().delete_many(ids);
        self.publish_entries();
        removed
    }

    /// Removes every entry.
    pub fn clear(&self) -> usize {
        let removed = self.store.lock().clear();
        tracing::info!("Cleared {} entries", removed);
        self.publish_entries();
        removed
    }

    /// Clears the irrelevant flag on the listed entries.
    pub fn mark_relevant(&self, ids: &[Uuid]) -> usize {
        let changed = self.store.lock().mark_relevant(ids);
        self.publish_entries();
        changed
    }

    /// Flags the listed entries irrelevant (analysis results).
    pub fn apply_irrelevant(&self, ids: &[Uuid]) -> usize {
        let changed = self.store.lock().mark_irrelevant(ids);
        self.publish_entries();
        changed
    }

    // ==================== Gate & Filter ====================

    /// Returns whether capture is enabled.
    pub fn is_recording(&self) -> bool {
        self.gate.is_recording()
    }

    /// Enables or disables capture.
    pub fn set_recording(&self, recording: bool) {
        self.gate.set_recording(recording);
        self.events
            .publish(SessionEvent::RecordingChanged { recording });
    }

    /// Returns the active filter pattern.
    pub fn filter(&self) -> String {
        self.filter.pattern()
    }

    /// Returns true if the URL passes the active filter.
    pub fn should_forward(&self, url: &str) -> bool {
        self.filter.should_forward(url)
    }

    /// Replaces the filter and republishes the filtered view.
    pub fn set_filter(&self, pattern: &str) -> std::result::Result<(), FilterError> {
        self.filter.set_filter(pattern)?;
        self.events.publish(SessionEvent::FilterChanged {
            pattern: pattern.to_string(),
        });
        self.publish_entries();
        Ok(())
    }

    // ==================== Export / Import ====================

    /// Writes the selected entries to a new HAR file in the downloads directory.
    ///
    /// Publishes `ExportComplete` or `ExportFailed`; failures never affect capture.
    pub async fn export(&self, selection: &ExportSelection) -> Result<PathBuf> {
        let entries = match selection {
            ExportSelection::All => self.entries(),
            ExportSelection::Ids(ids) => self.store.lock().select(ids),
        };

        match write_har(&self.config.downloads_dir, &entries).await {
            Ok(path) => {
                tracing::info!("Exported {} entries to {:?}", entries.len(), path);
                self.events.publish(SessionEvent::ExportComplete {
                    path: path.clone(),
                    count: entries.len(),
                });
                Ok(path)
            }
            Err(e) => {
                tracing::error!("Export failed: {}", e);
                self.events.publish(SessionEvent::ExportFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Replaces the store with the contents of a HAR file.
    ///
    /// On any read or parse failure the store is left untouched and
    /// `ImportFailed` is published. The swap happens under the store lock, so
    /// no captured entry can land between the clear and the bulk insert.
    pub async fn import(&self, path: &std::path::Path) -> Result<usize> {
        let entries = match read_har(path).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Import of {:?} failed: {}", path, e);
                self.events.publish(SessionEvent::ImportFailed {
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let count = self.store.lock().replace_all(entries);
        tracing::info!("Imported {} entries from {:?}", count, path);
        self.publish_entries();
        self.events.publish(SessionEvent::ImportComplete { count });
        Ok(count)
    }

    // ==================== Events ====================

    /// Subscribes to session events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Publishes an event on behalf of an orchestrator.
    pub fn publish(&self, event: SessionEvent) {
        self.events.publish(event);
    }

    /// Publishes the current filtered view.
    pub fn publish_entries(&self) {
        self.events.publish(SessionEvent::EntriesUpdated {
            entries: self.filtered_entries(),
        });
    }
}
