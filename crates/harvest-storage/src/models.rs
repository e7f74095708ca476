//! Stored record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    /// Setting key, e.g. `traffic.filter`.
    pub key: String,
    /// JSON value.
    pub value: serde_json::Value,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}
