//! HAR file export and import.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::Result;
use crate::har::{from_har, parse_har, to_har, to_pretty_json};
use crate::model::TrafficEntry;

/// Extension of exported files.
pub const EXPORT_EXTENSION: &str = "har";

/// Which entries to export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportSelection {
    /// Every stored entry.
    #[default]
    All,
    /// Only the listed ids, in store order.
    Ids(Vec<Uuid>),
}

/// Generates a unique export file name such as `harvest-20240101-120000-1a2b3c4d.har`.
pub fn export_file_name() -> String {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("harvest-{}-{}.{}", stamp, &suffix[..8], EXPORT_EXTENSION)
}

/// Writes entries as a pretty-printed HAR file into `dir`, returning its path.
pub async fn write_har(dir: &Path, entries: &[TrafficEntry]) -> Result<PathBuf> {
    let json = to_pretty_json(&to_har(entries))?;
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(export_file_name());
    tokio::fs::write(&path, json).await?;
    Ok(path)
}

/// Reads and decodes a HAR file. Fails as a whole on any read or parse error.
pub async fn read_har(path: &Path) -> Result<Vec<TrafficEntry>> {
    let json = tokio::fs::read_to_string(path).await?;
    Ok(from_har(parse_har(&json)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::model::{TrafficRequest, TrafficResponse};
    use tempfile::TempDir;

    fn entry(url: &str) -> TrafficEntry {
        TrafficEntry::new(
            1_700_000_000_000,
            TrafficRequest {
                method: "GET".to_string(),
                url: url.to_string(),
                headers: vec![],
                body: None,
                description: None,
            },
            TrafficResponse {
                status: 200,
                status_text: None,
                headers: vec![],
                body: None,
            },
        )
    }

    #[test]
    fn file_names_are_unique() {
        let a = export_file_name();
        let b = export_file_name();
        assert_ne!(a, b);
        assert!(a.starts_with("harvest-"));
        assert!(a.ends_with(".har"));
    }

    #[tokio::test]
    async fn write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = write_har(dir.path(), &[entry("https://x/a"), entry("https://x/b")])
            .await
            .unwrap();
        assert!(path.starts_with(dir.path()));

        let entries = read_har(&path).await.unwrap();
        let urls: Vec<_> = entries.iter().map(|e| e.request.url.as_str()).collect();
        assert_eq!(urls, vec!["https://x/a", "https://x/b"]);
    }

    #[tokio::test]
    async fn write_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("downloads").join("harvest");
        let path = write_har(&nested, &[]).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn read_rejects_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.har");
        std::fs::write(&path, "{\"log\": {}}").unwrap();
        assert!(matches!(read_har(&path).await, Err(CoreError::Har(_))));
    }

    #[tokio::test]
    async fn read_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = read_har(&dir.path().join("nope.har")).await;
        assert!(matches!(result, Err(CoreError::Io(_))));
    }
}
