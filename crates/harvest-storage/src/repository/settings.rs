//! Settings repository.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::models::Setting;

/// Repository for the `settings` table.
pub struct SettingsRepo;

impl SettingsRepo {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Setting> {
        let value_str: String = row.get(1)?;
        let updated_at: i64 = row.get(2)?;
        Ok(Setting {
            key: row.get(0)?,
            value: serde_json::from_str(&value_str).unwrap_or(serde_json::Value::Null),
            updated_at: DateTime::<Utc>::from_timestamp_millis(updated_at).unwrap_or_default(),
        })
    }

    /// Get a setting.
    pub fn get(conn: &Connection, key: &str) -> Result<Option<Setting>> {
        let setting = conn
            .query_row(
                "SELECT key, value, updated_at FROM settings WHERE key = ?1",
                [key],
                Self::from_row,
            )
            .optional()?;
        Ok(setting)
    }

    /// Insert or update a setting.
    pub fn set(conn: &Connection, key: &str, value: &serde_json::Value) -> Result<()> {
        let value_json = serde_json::to_string(value)?;
        let now = Utc::now().timestamp_millis();

        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, value_json, now],
        )?;

        Ok(())
    }
}
