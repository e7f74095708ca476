//! URL filter engine.
//!
//! Holds a single regular expression over request URLs. The same predicate
//! gates live forwarding and scopes the filtered view of the store.

use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;

use crate::error::FilterError;
use crate::kv::KeyValueStore;

/// Key under which the active pattern is persisted.
pub const FILTER_KEY: &str = "traffic.filter";

struct ActiveFilter {
    source: String,
    /// `None` for the empty pattern.
    regex: Option<Regex>,
}

impl ActiveFilter {
    fn empty() -> Self {
        Self {
            source: String::new(),
            regex: None,
        }
    }

    fn compile(source: &str) -> Result<Self, regex::Error> {
        if source.is_empty() {
            return Ok(Self::empty());
        }
        Ok(Self {
            source: source.to_string(),
            regex: Some(Regex::new(source)?),
        })
    }

    fn is_match(&self, url: &str) -> bool {
        self.regex.as_ref().map_or(true, |r| r.is_match(url))
    }
}

/// Single active URL predicate. An empty pattern matches everything.
pub struct FilterEngine {
    active: RwLock<ActiveFilter>,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl std::fmt::Debug for FilterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterEngine")
            .field("pattern", &self.pattern())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl FilterEngine {
    /// Creates an in-memory engine with the empty pattern.
    pub fn new() -> Self {
        Self {
            active: RwLock::new(ActiveFilter::empty()),
            store: None,
        }
    }

    /// Creates an engine backed by a key-value store, restoring the saved pattern.
    ///
    /// A saved pattern that no longer compiles is logged and ignored.
    pub fn with_store(store: Arc<dyn KeyValueStore>) -> Self {
        let active = match store.get(FILTER_KEY) {
            Ok(Some(saved)) => match ActiveFilter::compile(&saved) {
                Ok(active) => {
                    tracing::info!("Restored traffic filter {:?}", saved);
                    active
                }
                Err(e) => {
                    tracing::warn!("Ignoring invalid saved filter {:?}: {}", saved, e);
                    ActiveFilter::empty()
                }
            },
            Ok(None) => ActiveFilter::empty(),
            Err(e) => {
                tracing::warn!("Failed to load saved filter: {}", e);
                ActiveFilter::empty()
            }
        };

        Self {
            active: RwLock::new(active),
            store: Some(store),
        }
    }

    /// Returns the active pattern source.
    pub fn pattern(&self) -> String {
        self.active.read().source.clone()
    }

    /// Replaces the active pattern.
    ///
    /// The pattern is compiled and persisted before it becomes active; on any
    /// failure the previous pattern stays in effect.
    pub fn set_filter(&self, pattern: &str) -> Result<(), FilterError> {
        let next = ActiveFilter::compile(pattern)?;

        if let Some(store) = &self.store {
            store.set(FILTER_KEY, pattern)?;
        }

        *self.active.write() = next;
        tracing::info!("Traffic filter set to {:?}", pattern);
        Ok(())
    }

    /// Returns true if the URL matches the active pattern.
    pub fn should_forward(&self, url: &str) -> bool {
        self.active.read().is_match(url)
    }
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KvError;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryStore {
        values: parking_lot::Mutex<HashMap<String, String>>,
        fail_writes: bool,
    }

    impl KeyValueStore for MemoryStore {
        fn get(&self, key: &str) -> Result<Option<String>, KvError> {
            Ok(self.values.lock().get(key).cloned())
        }

        fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
            if self.fail_writes {
                return Err(KvError("disk full".to_string()));
            }
            self.values.lock().insert(key.to_string(), value.to_string());
            Ok(())
        }
    }

    #[test]
    fn empty_pattern_matches_everything() {
        let engine = FilterEngine::new();
        assert_eq!(engine.pattern(), "");
        assert!(engine.should_forward("https://api.x.com/users"));
        assert!(engine.should_forward(""));
    }

    #[test]
    fn pattern_gates_urls() {
        let engine = FilterEngine::new();
        engine.set_filter(r"api\.x\.com").unwrap();
        assert!(engine.should_forward("https://api.x.com/users"));
        assert!(!engine.should_forward("https://cdn.y.com/app.js"));
    }

    #[test]
    fn invalid_pattern_keeps_previous() {
        let engine = FilterEngine::new();
        engine.set_filter("users").unwrap();

        let err = engine.set_filter("(unclosed").unwrap_err();
        assert!(matches!(err, FilterError::InvalidPattern(_)));
        assert_eq!(engine.pattern(), "users");
        assert!(!engine.should_forward("https://x.com/orders"));
    }

    #[test]
    fn setting_same_pattern_twice_is_idempotent() {
        let engine = FilterEngine::new();
        let urls = [
            "https://api.x.com/users",
            "https://api.x.com/orders",
            "http://localhost/users/1",
        ];

        engine.set_filter("users").unwrap();
        let first: Vec<bool> = urls.iter().map(|u| engine.should_forward(u)).collect();
        engine.set_filter("users").unwrap();
        let second: Vec<bool> = urls.iter().map(|u| engine.should_forward(u)).collect();

        assert_eq!(first, second);
        assert_eq!(first, vec![true, false, true]);
    }

    #[test]
    fn pattern_is_persisted_and_restored() {
        let store = Arc::new(MemoryStore::default());
        let engine = FilterEngine::with_store(store.clone());
        engine.set_filter("^https://").unwrap();

        let restored = FilterEngine::with_store(store);
        assert_eq!(restored.pattern(), "^https://");
        assert!(!restored.should_forward("http://plain.example"));
    }

    #[test]
    fn invalid_saved_pattern_is_ignored() {
        let store = Arc::new(MemoryStore::default());
        store.set(FILTER_KEY, "[").unwrap();

        let engine = FilterEngine::with_store(store);
        assert_eq!(engine.pattern(), "");
    }

    #[test]
    fn persistence_failure_keeps_previous() {
        let store = Arc::new(MemoryStore {
            fail_writes: true,
            ..Default::default()
        });
        let engine = FilterEngine::with_store(store);

        let err = engine.set_filter("users").unwrap_err();
        assert!(matches!(err, FilterError::Persist(_)));
        assert_eq!(engine.pattern(), "");
    }
}
