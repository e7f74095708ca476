//! Submit-then-poll workflow machinery.
//!
//! Each workflow kind owns a [`WorkflowSlot`]. Starting a run claims the slot
//! (single flight); the returned [`RunGuard`] records state transitions and
//! releases the slot when dropped, so an aborted run never wedges the kind.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::api::PollStatus;
use crate::error::{BackendError, WorkflowError};

/// Default spacing between status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Workflow kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Analyze,
    CreateTest,
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowKind::Analyze => write!(f, "analyze"),
            WorkflowKind::CreateTest => write!(f, "create-test"),
        }
    }
}

/// Observable workflow state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkflowState {
    /// Never started.
    #[default]
    Idle,
    Submitting,
    Polling { attempt: u32 },
    Succeeded,
    Failed { error: String },
    TimedOut { attempts: u32 },
    Cancelled,
}

impl WorkflowState {
    /// Returns true while a run holds the slot.
    pub fn is_active(&self) -> bool {
        matches!(self, WorkflowState::Submitting | WorkflowState::Polling { .. })
    }

    /// Terminal state for a finished run.
    pub fn from_result<T>(result: &Result<T, WorkflowError>) -> Self {
        match result {
            Ok(_) => WorkflowState::Succeeded,
            Err(WorkflowError::TimedOut { attempts }) => WorkflowState::TimedOut {
                attempts: *attempts,
            },
            Err(WorkflowError::Cancelled) => WorkflowState::Cancelled,
            Err(e) => WorkflowState::Failed {
                error: e.to_string(),
            },
        }
    }
}

/// Poll cadence and budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    /// Analysis: 20 checks, 2 s apart.
    pub fn analyze() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: 20,
        }
    }

    /// Test creation: 10 checks, 2 s apart.
    pub fn create_test() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: 10,
        }
    }

    /// Sets the interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Single-flight slot for one workflow kind.
#[derive(Debug)]
pub struct WorkflowSlot {
    kind: WorkflowKind,
    state: Mutex<WorkflowState>,
}

impl WorkflowSlot {
    /// Creates an idle slot.
    pub fn new(kind: WorkflowKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            state: Mutex::new(WorkflowState::Idle),
        })
    }

    /// Current state.
    pub fn state(&self) -> WorkflowState {
        self.state.lock().clone()
    }

    /// Claims the slot, moving it to `Submitting`.
    pub fn begin(self: &Arc<Self>) -> Result<RunGuard, WorkflowError> {
        let mut state = self.state.lock();
        if state.is_active() {
            return Err(WorkflowError::AlreadyRunning(self.kind));
        }
        *state = WorkflowState::Submitting;
        tracing::info!("{} workflow started", self.kind);

        Ok(RunGuard { slot: self.clone() })
    }
}

/// Exclusive claim on a [`WorkflowSlot`].
#[derive(Debug)]
pub struct RunGuard {
    slot: Arc<WorkflowSlot>,
}

impl RunGuard {
    /// Kind of the running workflow.
    pub fn kind(&self) -> WorkflowKind {
        self.slot.kind
    }

    /// Records an intermediate state.
    pub fn set(&self, state: WorkflowState) {
        *self.slot.state.lock() = state;
    }

    /// Records the terminal state for `result` and releases the slot.
    pub fn finish<T>(self, result: &Result<T, WorkflowError>) {
        let state = WorkflowState::from_result(result);
        match &state {
            WorkflowState::Succeeded => tracing::info!("{} workflow succeeded", self.kind()),
            other => tracing::warn!("{} workflow ended: {:?}", self.kind(), other),
        }
        self.set(state);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut state = self.slot.state.lock();
        if state.is_active() {
            *state = WorkflowState::Cancelled;
        }
    }
}

/// Polls until the job leaves `IN_PROGRESS`, issuing at most `policy.max_attempts` checks.
///
/// Each check is preceded by one interval. Transient errors are logged and
/// consume an attempt; anything else ends the loop.
pub async fn poll_until_done<T, F, Fut>(
    policy: PollPolicy,
    guard: &RunGuard,
    mut poll: F,
) -> Result<T, WorkflowError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>, BackendError>>,
{
    for attempt in 1..=policy.max_attempts {
        tokio::time::sleep(policy.interval).await;
        guard.set(WorkflowState::Polling { attempt });

        match poll().await {
            Ok(PollStatus::InProgress) => {
                tracing::debug!("{} poll {}/{}: in progress", guard.kind(), attempt, policy.max_attempts)
            }
            Ok(PollStatus::Success(value)) => return Ok(value),
            Ok(PollStatus::Error(message)) => return Err(WorkflowError::Failed(message)),
            Err(e) if e.is_transient() => {
                tracing::warn!("{} poll {}/{} failed: {}", guard.kind(), attempt, policy.max_attempts, e)
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(WorkflowError::TimedOut {
        attempts: policy.max_attempts,
    })
}

/// Handle to a spawned workflow.
pub struct WorkflowHandle<T> {
    kind: WorkflowKind,
    cancel_tx: broadcast::Sender<()>,
    handle: tokio::task::JoinHandle<Result<T, WorkflowError>>,
}

impl<T> WorkflowHandle<T> {
    pub(crate) fn new(
        kind: WorkflowKind,
        cancel_tx: broadcast::Sender<()>,
        handle: tokio::task::JoinHandle<Result<T, WorkflowError>>,
    ) -> Self {
        Self {
            kind,
            cancel_tx,
            handle,
        }
    }

    /// Kind of the workflow.
    pub fn kind(&self) -> WorkflowKind {
        self.kind
    }

    /// Requests cancellation; takes effect at the next await point.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(());
    }

    /// Waits for the workflow's result.
    pub async fn wait(self) -> Result<T, WorkflowError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("{} workflow task failed: {}", self.kind, e);
                Err(WorkflowError::Cancelled)
            }
        }
    }
}

/// Runs `fut` until it completes or a cancellation signal arrives.
pub(crate) async fn cancellable<T>(
    fut: impl Future<Output = Result<T, WorkflowError>>,
    cancel: Option<broadcast::Receiver<()>>,
) -> Result<T, WorkflowError> {
    let Some(mut cancel) = cancel else {
        return fut.await;
    };
    tokio::select! {
        result = fut => result,
        _ = cancel.recv() => Err(WorkflowError::Cancelled),
    }
}
