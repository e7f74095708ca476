//! Harvest Backend - analysis and test-creation workflows.
//!
//! Both workflows follow the same submit-then-poll shape:
//!
//! ```text
//! entries → HAR → upload policy → signed upload → submit job → poll status
//!                                                                   │
//!                   ┌──────────────────┬────────────────┬───────────┴──────┐
//!                   ▼                  ▼                ▼                  ▼
//!               SUCCESS             ERROR          401 Unauthorized   budget spent
//!           apply result       Failed event       Failed event      TimedOut event
//! ```
//!
//! A workflow kind runs at most once at a time; a second start is rejected
//! with [`WorkflowError::AlreadyRunning`].

pub mod api;
pub mod client;
pub mod error;
pub mod orchestrator;
pub mod workflow;

pub use api::{
    AnalysisResult, AuthProvider, BackendApi, ImportResult, JobToken, PollStatus,
    RequestAnalysis, StaticToken, TestSuiteTarget, UploadPolicy,
};
pub use client::{BackendConfig, HttpBackend, DEFAULT_BASE_URL};
pub use error::{BackendError, Result, WorkflowError};
pub use orchestrator::{CreateTestOptions, Orchestrator};
pub use workflow::{PollPolicy, WorkflowHandle, WorkflowKind, WorkflowState, DEFAULT_POLL_INTERVAL};
