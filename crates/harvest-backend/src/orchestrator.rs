//! Analysis and test-creation orchestrator.
//!
//! Both workflows serialize entries as HAR, stage them through a signed
//! upload, submit a job and poll it. Every outcome is turned into a
//! [`SessionEvent`]; nothing propagates into the capture path.

use std::sync::Arc;

use harvest_core::har::{to_har, to_pretty_json};
use harvest_core::transfer::export_file_name;
use harvest_core::{Session, SessionEvent, TrafficEntry};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::api::{AnalysisResult, BackendApi, TestSuiteTarget};
use crate::error::WorkflowError;
use crate::workflow::{
    cancellable, poll_until_done, PollPolicy, RunGuard, WorkflowHandle, WorkflowKind,
    WorkflowSlot, WorkflowState,
};

/// Options for a test-creation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTestOptions {
    pub target: TestSuiteTarget,
    /// Send only entries not marked irrelevant.
    pub only_relevant: bool,
}

/// Runs backend workflows for a session.
pub struct Orchestrator {
    session: Arc<Session>,
    backend: Arc<dyn BackendApi>,
    analyze_policy: PollPolicy,
    create_test_policy: PollPolicy,
    analyze_slot: Arc<WorkflowSlot>,
    create_test_slot: Arc<WorkflowSlot>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("analyze", &self.analyze_slot.state())
            .field("create_test", &self.create_test_slot.state())
            .finish()
    }
}

impl Orchestrator {
    /// Creates an orchestrator with the default poll policies.
    pub fn new(session: Arc<Session>, backend: Arc<dyn BackendApi>) -> Self {
        Self {
            session,
            backend,
            analyze_policy: PollPolicy::analyze(),
            create_test_policy: PollPolicy::create_test(),
            analyze_slot: WorkflowSlot::new(WorkflowKind::Analyze),
            create_test_slot: WorkflowSlot::new(WorkflowKind::CreateTest),
        }
    }

    /// Overrides the poll policy for one workflow kind.
    pub fn with_policy(mut self, kind: WorkflowKind, policy: PollPolicy) -> Self {
        match kind {
            WorkflowKind::Analyze => self.analyze_policy = policy,
            WorkflowKind::CreateTest => self.create_test_policy = policy,
        }
        self
    }

    /// Current state of a workflow kind.
    pub fn state(&self, kind: WorkflowKind) -> WorkflowState {
        self.slot(kind).state()
    }

    fn slot(&self, kind: WorkflowKind) -> &Arc<WorkflowSlot> {
        match kind {
            WorkflowKind::Analyze => &self.analyze_slot,
            WorkflowKind::CreateTest => &self.create_test_slot,
        }
    }

    // ==================== Analyze ====================

    /// Runs analysis to completion, returning how many entries were marked irrelevant.
    pub async fn analyze(&self) -> Result<usize, WorkflowError> {
        let guard = self.analyze_slot.begin()?;
        self.finish_analyze(guard, None).await
    }

    /// Starts analysis in the background.
    pub fn spawn_analyze(self: &Arc<Self>) -> Result<WorkflowHandle<usize>, WorkflowError> {
        let guard = self.analyze_slot.begin()?;
        let (cancel_tx, cancel_rx) = broadcast::channel(1);
        let keep_open = cancel_tx.clone();
        let this = self.clone();

        let handle = tokio::spawn(async move {
            let _keep_open = keep_open;
            this.finish_analyze(guard, Some(cancel_rx)).await
        });
        Ok(WorkflowHandle::new(WorkflowKind::Analyze, cancel_tx, handle))
    }

    async fn finish_analyze(
        &self,
        guard: RunGuard,
        cancel: Option<broadcast::Receiver<()>>,
    ) -> Result<usize, WorkflowError> {
        let result = cancellable(self.run_analyze(&guard), cancel).await;
        guard.finish(&result);

        match &result {
            Ok(count) => self
                .session
                .publish(SessionEvent::AnalyzeComplete { irrelevant: *count }),
            Err(e) => self.session.publish(SessionEvent::AnalyzeFailed {
                error: e.to_string(),
            }),
        }
        result
    }

    async fn run_analyze(&self, guard: &RunGuard) -> Result<usize, WorkflowError> {
        let entries = self.session.entries();
        let object_key = self.stage(&entries).await?;

        let token = self.backend.submit_transform(&object_key).await?;
        tracing::info!("Submitted transform job {} for {} entries", token.token, entries.len());

        let backend = self.backend.clone();
        let result = poll_until_done(self.analyze_policy, guard, || {
            let backend = backend.clone();
            let token = token.clone();
            async move { backend.poll_transform(&token).await }
        })
        .await?;

        let ids = irrelevant_ids(&entries, &result);
        Ok(self.session.apply_irrelevant(&ids))
    }

    // ==================== Create Test ====================

    /// Runs test creation to completion, returning the suite id.
    pub async fn create_test(&self, options: CreateTestOptions) -> Result<String, WorkflowError> {
        let guard = self.create_test_slot.begin()?;
        self.finish_create_test(guard, options, None).await
    }

    /// Starts test creation in the background.
    pub fn spawn_create_test(
        self: &Arc<Self>,
        options: CreateTestOptions,
    ) -> Result<WorkflowHandle<String>, WorkflowError> {
        let guard = self.create_test_slot.begin()?;
        let (cancel_tx, cancel_rx) = broadcast::channel(1);
        let keep_open = cancel_tx.clone();
        let this = self.clone();

        let handle = tokio::spawn(async move {
            let _keep_open = keep_open;
            this.finish_create_test(guard, options, Some(cancel_rx)).await
        });
        Ok(WorkflowHandle::new(WorkflowKind::CreateTest, cancel_tx, handle))
    }

    async fn finish_create_test(
        &self,
        guard: RunGuard,
        options: CreateTestOptions,
        cancel: Option<broadcast::Receiver<()>>,
    ) -> Result<String, WorkflowError> {
        let result = cancellable(self.run_create_test(&guard, &options), cancel).await;
        guard.finish(&result);

        match &result {
            Ok(suite_id) => self.session.publish(SessionEvent::CreateTestComplete {
                suite_id: suite_id.clone(),
            }),
            Err(e) => self.session.publish(SessionEvent::CreateTestFailed {
                error: e.to_string(),
            }),
        }
        result
    }

    async fn run_create_test(
        &self,
        guard: &RunGuard,
        options: &CreateTestOptions,
    ) -> Result<String, WorkflowError> {
        let entries = if options.only_relevant {
            self.session.relevant_entries()
        } else {
            self.session.entries()
        };
        let object_key = self.stage(&entries).await?;

        let token = self.backend.submit_import(&object_key, &options.target).await?;
        tracing::info!("Submitted import job {} for {} entries", token.token, entries.len());

        let backend = self.backend.clone();
        let result = poll_until_done(self.create_test_policy, guard, || {
            let backend = backend.clone();
            let token = token.clone();
            async move { backend.poll_import(&token).await }
        })
        .await?;

        Ok(match (&options.target, result.suite_id.is_empty()) {
            (TestSuiteTarget::Existing { suite_id }, true) => suite_id.clone(),
            _ => result.suite_id,
        })
    }

    // ==================== Shared ====================

    /// Uploads entries as HAR and returns the object key.
    async fn stage(&self, entries: &[TrafficEntry]) -> Result<String, WorkflowError> {
        if entries.is_empty() {
            return Err(WorkflowError::NoEntries);
        }

        let payload = to_pretty_json(&to_har(entries))?.into_bytes();
        let policy = self.backend.upload_policy().await?;
        self.backend
            .upload(&policy, &export_file_name(), payload)
            .await?;
        Ok(policy.key)
    }
}

/// Entries whose analysis item has no extractions and whose method is GET.
///
/// Items are matched to entries by position in the uploaded HAR.
fn irrelevant_ids(entries: &[TrafficEntry], result: &AnalysisResult) -> Vec<Uuid> {
    entries
        .iter()
        .zip(&result.requests)
        .filter(|(entry, item)| {
            item.extractions.is_empty() && entry.request.method.eq_ignore_ascii_case("GET")
        })
        .map(|(entry, _)| entry.id)
        .collect()
}
