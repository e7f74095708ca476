//! In-memory entry store.
//!
//! An insertion-ordered sequence of [`TrafficEntry`] values. Operations are
//! linear scans; sessions hold hundreds to low thousands of entries. Deletion
//! is immediate and irreversible.

use std::collections::HashSet;

use uuid::Uuid;

use crate::model::TrafficEntry;

/// Ordered collection of captured entries.
#[derive(Debug, Default, Clone)]
pub struct EntryStore {
    entries: Vec<TrafficEntry>,
}

impl EntryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry. Returns false (and stores nothing) if the id is already present.
    pub fn add(&mut self, entry: TrafficEntry) -> bool {
        if self.contains(&entry.id) {
            tracing::warn!("Rejected duplicate entry id {}", entry.id);
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Returns true if an entry with this id exists.
    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.iter().any(|e| &e.id == id)
    }

    /// Returns an entry by id.
    pub fn get(&self, id: &Uuid) -> Option<&TrafficEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    /// Returns all entries in insertion order.
    pub fn all(&self) -> &[TrafficEntry] {
        &self.entries
    }

    /// Returns all entries, optionally excluding those marked irrelevant.
    pub fn all_filtered(&self, only_relevant: bool) -> Vec<TrafficEntry> {
        self.entries
            .iter()
            .filter(|e| !only_relevant || e.is_relevant())
            .cloned()
            .collect()
    }

    /// Returns the entries whose ids are in `ids`, in store order.
    pub fn select(&self, ids: &[Uuid]) -> Vec<TrafficEntry> {
        let wanted: HashSet<&Uuid> = ids.iter().collect();
        self.entries
            .iter()
            .filter(|e| wanted.contains(&e.id))
            .cloned()
            .collect()
    }

    /// Removes one entry. Returns true if it existed.
    pub fn delete(&mut self, id: &Uuid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| &e.id != id);
        self.entries.len() != before
    }

    /// Removes every listed entry. Returns the number removed.
    pub fn delete_many(&mut self, ids: &[Uuid]) -> usize {
        let doomed: HashSet<&Uuid> = ids.iter().collect();
        let before = self.entries.len();
        self.entries.retain(|e| !doomed.contains(&e.id));
        before - self.entries.len()
    }

    /// Removes everything. Returns the number removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Clears the irrelevant flag on the listed entries. Returns the number changed.
    pub fn mark_relevant(&mut self, ids: &[Uuid]) -> usize {
        self.set_irrelevant(ids, None)
    }

    /// Flags the listed entries as irrelevant. Returns the number changed.
    pub fn mark_irrelevant(&mut self, ids: &[Uuid]) -> usize {
        self.set_irrelevant(ids, Some(true))
    }

    fn set_irrelevant(&mut self, ids: &[Uuid], value: Option<bool>) -> usize {
        let targets: HashSet<&Uuid> = ids.iter().collect();
        let mut changed = 0;
        for entry in self.entries.iter_mut().filter(|e| targets.contains(&e.id)) {
            if entry.irrelevant != value {
                entry.irrelevant = value;
                changed += 1;
            }
        }
        changed
    }

    /// Replaces the whole contents (clear, then bulk insert). Duplicate ids in
    /// `entries` keep their first occurrence.
    pub fn replace_all(&mut self, entries: Vec<TrafficEntry>) -> usize {
        self.entries.clear();
        for entry in entries {
            self.add(entry);
        }
        self.entries.len()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
