//! API route handlers.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{self, Stream};
use harvest_backend::{CreateTestOptions, WorkflowKind};
use harvest_core::ExportSelection;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ApiError, Result};
use crate::models::{
    CountResponse, CreateTestRequest, EntriesQuery, EntriesResponse, ExportRequest,
    ExportResponse, FilterBody, IdsRequest, ImportRequest, ProxyResponse, RecordingBody,
    WorkflowStartedResponse, WorkflowsResponse,
};
use crate::state::AppState;

// ==================== Entries ====================

/// GET /api/entries - List captured entries.
pub async fn list_entries(
    State(state): State<AppState>,
    Query(query): Query<EntriesQuery>,
) -> Json<EntriesResponse> {
    let mut entries = if query.filtered {
        state.session.filtered_entries()
    } else {
        state.session.entries()
    };
    if query.only_relevant {
        entries.retain(|e| e.is_relevant());
    }

    Json(EntriesResponse {
        total: state.session.len(),
        entries,
    })
}

/// DELETE /api/entries - Remove every entry.
pub async fn clear_entries(State(state): State<AppState>) -> Json<CountResponse> {
    Json(CountResponse {
        count: state.session.clear(),
    })
}

/// DELETE /api/entries/{id} - Remove one entry.
pub async fn delete_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    if state.session.delete(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("entry {}", id)))
    }
}

/// POST /api/entries/delete - Remove several entries.
pub async fn delete_entries(
    State(state): State<AppState>,
    Json(req): Json<IdsRequest>,
) -> Json<CountResponse> {
    Json(CountResponse {
        count: state.session.delete_many(&req.ids),
    })
}

/// POST /api/entries/relevant - Clear the irrelevant flag.
pub async fn mark_relevant(
    State(state): State<AppState>,
    Json(req): Json<IdsRequest>,
) -> Json<CountResponse> {
    Json(CountResponse {
        count: state.session.mark_relevant(&req.ids),
    })
}

// ==================== Recording & Filter ====================

/// GET /api/recording
pub async fn get_recording(State(state): State<AppState>) -> Json<RecordingBody> {
    Json(RecordingBody {
        recording: state.session.is_recording(),
    })
}

/// PUT /api/recording
pub async fn set_recording(
    State(state): State<AppState>,
    Json(body): Json<RecordingBody>,
) -> Json<RecordingBody> {
    state.session.set_recording(body.recording);
    Json(body)
}

/// GET /api/filter
pub async fn get_filter(State(state): State<AppState>) -> Json<FilterBody> {
    Json(FilterBody {
        pattern: state.session.filter(),
    })
}

/// PUT /api/filter - Replace the URL filter. Invalid patterns are rejected.
pub async fn set_filter(
    State(state): State<AppState>,
    Json(body): Json<FilterBody>,
) -> Result<Json<FilterBody>> {
    state.session.set_filter(&body.pattern)?;
    Ok(Json(body))
}

// ==================== Export / Import ====================

/// POST /api/export - Write a HAR file to the downloads directory.
pub async fn export(
    State(state): State<AppState>,
    body: Option<Json<ExportRequest>>,
) -> Result<Json<ExportResponse>> {
    let selection = match body.and_then(|Json(req)| req.ids) {
        Some(ids) => ExportSelection::Ids(ids),
        None => ExportSelection::All,
    };
    let path = state.session.export(&selection).await?;
    Ok(Json(ExportResponse { path }))
}

/// POST /api/import - Replace entries with the contents of a HAR file.
pub async fn import(
    State(state): State<AppState>,
    Json(req): Json<ImportRequest>,
) -> Result<Json<CountResponse>> {
    let count = state.session.import(&req.path).await?;
    Ok(Json(CountResponse { count }))
}

// ==================== Workflows ====================

/// POST /api/analyze - Start analysis in the background.
pub async fn analyze(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<WorkflowStartedResponse>)> {
    if state.session.is_empty() {
        return Err(harvest_backend::WorkflowError::NoEntries.into());
    }
    let handle = state.orchestrator.spawn_analyze()?;
    info!("Analysis started");

    Ok((
        StatusCode::ACCEPTED,
        Json(WorkflowStartedResponse {
            workflow: handle.kind(),
            state: state.orchestrator.state(WorkflowKind::Analyze),
        }),
    ))
}

/// POST /api/tests - Start test creation in the background.
pub async fn create_test(
    State(state): State<AppState>,
    Json(req): Json<CreateTestRequest>,
) -> Result<(StatusCode, Json<WorkflowStartedResponse>)> {
    let options = CreateTestOptions {
        target: req.target()?,
        only_relevant: req.only_relevant,
    };
    let handle = state.orchestrator.spawn_create_test(options)?;
    info!("Test creation started");

    Ok((
        StatusCode::ACCEPTED,
        Json(WorkflowStartedResponse {
            workflow: handle.kind(),
            state: state.orchestrator.state(WorkflowKind::CreateTest),
        }),
    ))
}

/// GET /api/workflows - Current workflow states.
pub async fn workflows(State(state): State<AppState>) -> Json<WorkflowsResponse> {
    Json(WorkflowsResponse {
        analyze: state.orchestrator.state(WorkflowKind::Analyze),
        create_test: state.orchestrator.state(WorkflowKind::CreateTest),
    })
}

// ==================== Proxy & Events ====================

/// GET /api/proxy - Proxy port and recording state.
pub async fn proxy(State(state): State<AppState>) -> Json<ProxyResponse> {
    Json(ProxyResponse {
        port: state.proxy_port,
        recording: state.session.is_recording(),
    })
}

/// GET /api/events - Server-sent session events.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    debug!("Event subscriber connected");
    let rx = state.session.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match Event::default().event(event.kind()).json_data(&event) {
                    Ok(sse) => return Some((Ok(sse), rx)),
                    Err(e) => warn!("Failed to encode {} event: {}", event.kind(), e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event subscriber lagged, {} events dropped", skipped)
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
