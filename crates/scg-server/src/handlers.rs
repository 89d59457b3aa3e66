//! REST lifecycle handlers: create/end a session, read metadata and stored
//! data. Response shapes match the streaming clients' expectations
//! (camelCase keys, `{"detail": …}` error bodies).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use scg_core::wire::ServerMessage;
use scg_core::{Sample, SessionId, SessionStatus};
use scg_store::samples::SampleRepo;
use scg_store::sessions::SessionRepo;
use scg_store::StoreError;

use crate::registry::RegistryError;
use crate::server::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub viewer_url: String,
    pub websocket_url: String,
}

impl SessionDescriptor {
    fn new(session_id: SessionId, created_at: DateTime<Utc>, status: SessionStatus) -> Self {
        let viewer_url = format!("/view/{session_id}");
        let websocket_url = format!("/ws/{session_id}");
        Self {
            session_id,
            created_at,
            status,
            viewer_url,
            websocket_url,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSummary {
    pub message: String,
    pub samples_saved: usize,
}

#[derive(Debug, Serialize)]
pub struct SamplesResponse {
    pub samples: Vec<Sample>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("session not found")]
    NotFound,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            Self::NotFound => (StatusCode::NOT_FOUND, "Session not found".to_string()),
            Self::Registry(e) => {
                tracing::error!(error = %e, "registry invariant violated");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            Self::Storage(e) => {
                tracing::error!(error = %e, "storage operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Database error: {e}"),
                )
            }
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

/// POST /api/v1/sessions — allocate a session in the registry and durable
/// storage as one logical operation.
pub async fn create_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SessionDescriptor>), ApiError> {
    let id = SessionId::new();
    let created_at = Utc::now();

    state.sessions.create(&id, created_at)?;

    let repo = SessionRepo::new(state.db.clone());
    if let Err(e) = repo.insert(&id, created_at) {
        // Keep the registry and storage in agreement: no orphaned
        // in-memory session when the durable insert fails.
        state.sessions.remove(&id);
        return Err(e.into());
    }

    tracing::info!(session_id = %id, "session created");
    Ok((
        StatusCode::CREATED,
        Json(SessionDescriptor::new(id, created_at, SessionStatus::Created)),
    ))
}

/// POST /api/v1/sessions/{id}/end — drain the buffer, mark the session
/// ended durably, and flush the drained samples.
pub async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<EndSummary>, ApiError> {
    let id = SessionId::from_raw(session_id);

    let drained = state
        .sessions
        .drain_and_end(&id)
        .map_err(|_| ApiError::NotFound)?;

    let session_repo = SessionRepo::new(state.db.clone());
    let updated = session_repo.update_status(&id, SessionStatus::Ended)?;
    if updated == 0 {
        // Registry and storage disagreed; reject rather than persist
        // samples for a session storage never saw.
        tracing::warn!(session_id = %id, "session present in registry but not in storage");
        return Err(ApiError::NotFound);
    }

    SampleRepo::new(state.db.clone()).insert_batch(&id, &drained)?;

    if let Ok(json) = serde_json::to_string(&ServerMessage::SessionEnded) {
        state.clients.broadcast_to_session(&id, &json, None);
    }

    let saved = drained.len();
    tracing::info!(session_id = %id, samples = saved, "session ended");
    Ok(Json(EndSummary {
        message: format!("Session ended successfully. {saved} samples saved."),
        samples_saved: saved,
    }))
}

/// GET /api/v1/sessions/{id} — metadata from durable storage.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDescriptor>, ApiError> {
    let id = SessionId::from_raw(session_id);
    let record = SessionRepo::new(state.db.clone())
        .get(&id)
        .map_err(not_found_or_storage)?;

    Ok(Json(SessionDescriptor::new(
        record.id,
        record.created_at,
        record.status,
    )))
}

/// GET /api/v1/sessions/{id}/data — stored samples ordered by timestamp.
/// A known session with no samples is an empty list, not a 404.
pub async fn get_session_data(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SamplesResponse>, ApiError> {
    let id = SessionId::from_raw(session_id);

    let samples = SampleRepo::new(state.db.clone()).fetch(&id)?;
    if samples.is_empty() && !SessionRepo::new(state.db.clone()).exists(&id)? {
        return Err(ApiError::NotFound);
    }

    Ok(Json(SamplesResponse { samples }))
}

/// GET /health — liveness plus a database probe.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db_status = match state.db.with_conn(|conn| {
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(StoreError::from)
    }) {
        Ok(()) => "ok",
        Err(_) => "error",
    };

    Json(serde_json::json!({ "status": "ok", "database": db_status }))
}

fn not_found_or_storage(e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound(_) => ApiError::NotFound,
        other => ApiError::Storage(other),
    }
}
