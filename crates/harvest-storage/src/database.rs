//! High-level database interface.

use std::path::PathBuf;

use directories::ProjectDirs;
use harvest_core::{KeyValueStore, KvError};
use tracing::info;

use crate::error::{Result, StorageError};
use crate::models::Setting;
use crate::pool::ConnectionPool;
use crate::repository::SettingsRepo;

/// Settings database for Harvest.
#[derive(Clone)]
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Opens the database in the default app data directory.
    pub fn new() -> Result<Self> {
        Self::with_path(Self::default_db_path()?)
    }

    /// Opens the database at a specific path.
    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening database at: {:?}", path);
        let pool = ConnectionPool::new(&path)?;

        Ok(Self { pool })
    }

    /// Creates an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let pool = ConnectionPool::in_memory()?;
        Ok(Self { pool })
    }

    /// Returns the default database path.
    pub fn default_db_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "harvest", "harvest")
            .ok_or_else(|| StorageError::Config("Could not determine app data directory".into()))?;

        Ok(proj_dirs.data_dir().join("harvest.db"))
    }

    // === Settings ===

    /// Get a setting.
    pub fn get_setting(&self, key: &str) -> Result<Option<Setting>> {
        let conn = self.pool.get()?;
        SettingsRepo::get(&conn, key)
    }

    /// Set a setting.
    pub fn set_setting(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.pool.get()?;
        SettingsRepo::set(&conn, key, value)
    }
}

impl KeyValueStore for Database {
    fn get(&self, key: &str) -> std::result::Result<Option<String>, KvError> {
        let value = self.get_setting(key)?.and_then(|setting| match setting.value {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        });
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> std::result::Result<(), KvError> {
        self.set_setting(key, &serde_json::Value::String(value.to_string()))?;
        Ok(())
    }
}
