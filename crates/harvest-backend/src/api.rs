//! Backend API seam and wire types.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Signed upload policy for staging a HAR payload in object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPolicy {
    /// Form POST target.
    pub url: String,
    /// Form fields to send ahead of the file.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Object key the upload will be stored under.
    pub key: String,
}

/// Job token returned on submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobToken {
    pub token: String,
}

/// One poll outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus<T> {
    InProgress,
    Success(T),
    Error(String),
}

/// Extraction metadata for one uploaded request, by position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestAnalysis {
    #[serde(default)]
    pub extractions: Vec<serde_json::Value>,
}

/// Result of a transform job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default)]
    pub requests: Vec<RequestAnalysis>,
}

/// Result of an import job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportResult {
    #[serde(default, alias = "suiteId")]
    pub suite_id: String,
}

/// Where generated tests go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestSuiteTarget {
    /// Create a suite with this name.
    New { suite_name: String },
    /// Append to an existing suite.
    Existing { suite_id: String },
}

/// Supplies the bearer token for backend calls.
pub trait AuthProvider: Send + Sync {
    /// Current token, or `None` when signed out.
    fn token(&self) -> Option<String>;
}

/// Fixed token, typically from the command line or environment.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl AuthProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Calls the workflows need from the backend.
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Obtains a signed upload policy.
    async fn upload_policy(&self) -> Result<UploadPolicy>;

    /// Uploads a payload using the policy.
    async fn upload(&self, policy: &UploadPolicy, file_name: &str, bytes: Vec<u8>) -> Result<()>;

    /// Submits a transform (analysis) job for an uploaded object.
    async fn submit_transform(&self, object_key: &str) -> Result<JobToken>;

    /// Submits an import (test creation) job for an uploaded object.
    async fn submit_import(&self, object_key: &str, target: &TestSuiteTarget) -> Result<JobToken>;

    /// Checks a transform job.
    async fn poll_transform(&self, token: &JobToken) -> Result<PollStatus<AnalysisResult>>;

    /// Checks an import job.
    async fn poll_import(&self, token: &JobToken) -> Result<PollStatus<ImportResult>>;
}
