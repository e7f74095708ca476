//! Key-value persistence seam.
//!
//! The filter pattern is the only persisted setting; the concrete store lives
//! in `harvest-storage`.

use crate::error::KvError;

/// Minimal string key-value store.
pub trait KeyValueStore: Send + Sync {
    /// Reads a value.
    fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Writes a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> Result<(), KvError>;
}
