//! Application state for the API server.

use std::sync::Arc;

use harvest_backend::Orchestrator;
use harvest_core::Session;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Capture session.
    pub session: Arc<Session>,
    /// Backend workflows.
    pub orchestrator: Arc<Orchestrator>,
    /// Port the capture proxy listens on.
    pub proxy_port: u16,
}

impl AppState {
    /// Creates application state.
    pub fn new(session: Arc<Session>, orchestrator: Arc<Orchestrator>, proxy_port: u16) -> Self {
        Self {
            session,
            orchestrator,
            proxy_port,
        }
    }
}
