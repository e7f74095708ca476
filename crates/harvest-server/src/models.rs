//! API request and response models.

use std::path::PathBuf;

use harvest_backend::{TestSuiteTarget, WorkflowKind, WorkflowState};
use harvest_core::TrafficEntry;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// Query parameters for listing entries.
#[derive(Debug, Default, Deserialize)]
pub struct EntriesQuery {
    /// Apply the active URL filter.
    #[serde(default)]
    pub filtered: bool,
    /// Exclude entries marked irrelevant.
    #[serde(default)]
    pub only_relevant: bool,
}

/// Entry listing.
#[derive(Debug, Serialize)]
pub struct EntriesResponse {
    pub entries: Vec<TrafficEntry>,
    pub total: usize,
}

/// A list of entry ids.
#[derive(Debug, Deserialize)]
pub struct IdsRequest {
    pub ids: Vec<Uuid>,
}

/// Number of entries affected.
#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: usize,
}

/// Recording gate state.
#[derive(Debug, Serialize, Deserialize)]
pub struct RecordingBody {
    pub recording: bool,
}

/// Filter pattern.
#[derive(Debug, Serialize, Deserialize)]
pub struct FilterBody {
    pub pattern: String,
}

/// Export request; all entries when `ids` is absent.
#[derive(Debug, Default, Deserialize)]
pub struct ExportRequest {
    #[serde(default)]
    pub ids: Option<Vec<Uuid>>,
}

/// Export result.
#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub path: PathBuf,
}

/// Import request.
#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub path: PathBuf,
}

/// Test creation request. Exactly one of `suite_name` and `suite_id` is required.
#[derive(Debug, Deserialize)]
pub struct CreateTestRequest {
    #[serde(default)]
    pub suite_name: Option<String>,
    #[serde(default)]
    pub suite_id: Option<String>,
    #[serde(default)]
    pub only_relevant: bool,
}

impl CreateTestRequest {
    /// Resolves the target suite.
    pub fn target(&self) -> Result<TestSuiteTarget, ApiError> {
        let name = self.suite_name.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let id = self.suite_id.as_deref().map(str::trim).filter(|s| !s.is_empty());

        match (name, id) {
            (Some(name), None) => Ok(TestSuiteTarget::New {
                suite_name: name.to_string(),
            }),
            (None, Some(id)) => Ok(TestSuiteTarget::Existing {
                suite_id: id.to_string(),
            }),
            _ => Err(ApiError::BadRequest(
                "exactly one of suite_name or suite_id is required".to_string(),
            )),
        }
    }
}

/// A workflow was accepted and started.
#[derive(Debug, Serialize)]
pub struct WorkflowStartedResponse {
    pub workflow: WorkflowKind,
    pub state: WorkflowState,
}

/// Both workflow states.
#[derive(Debug, Serialize)]
pub struct WorkflowsResponse {
    pub analyze: WorkflowState,
    pub create_test: WorkflowState,
}

/// Proxy status.
#[derive(Debug, Serialize)]
pub struct ProxyResponse {
    pub port: u16,
    pub recording: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: Option<&str>, id: Option<&str>) -> CreateTestRequest {
        CreateTestRequest {
            suite_name: name.map(str::to_string),
            suite_id: id.map(str::to_string),
            only_relevant: false,
        }
    }

    #[test]
    fn target_requires_exactly_one() {
        assert!(matches!(
            request(Some("Smoke"), None).target(),
            Ok(TestSuiteTarget::New { .. })
        ));
        assert!(matches!(
            request(None, Some("s-1")).target(),
            Ok(TestSuiteTarget::Existing { .. })
        ));
        assert!(request(None, None).target().is_err());
        assert!(request(Some("a"), Some("b")).target().is_err());
        assert!(request(Some("  "), None).target().is_err());
    }
}
