//! Main axum router and HTTP request handlers.
//!
//! Routes:
//! - `GET    /`              - Ids of all extracts (JSON array)
//! - `GET    /{id}`         - Stream the extract's artifact
//! - `POST   /`              - Create an extract, responds with its id
//! - `PUT    /{id}`         - Re-download and/or update an extract
//! - `PUT    /{id}/updates` - Update, then stream the change file
//! - `DELETE /{id}`         - Remove an extract
//! - `GET    /api/health`   - Health check
//! - `GET    /api/metrics`  - Prometheus metrics

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use tokio_util::io::ReaderStream;
use tracing::{error, instrument, warn};

use crate::error::ExtractError;
use crate::extract::{CreateRequest, UpdateRequest};
use crate::lifecycle::OpenFile;
use crate::AppState;

const PBF_CONTENT_TYPE: &str = "application/pbf";
const CHANGE_CONTENT_TYPE: &str = "application/xml";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all HTTP routes and shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/metrics", get(handle_metrics))
        .route("/", get(handle_list).post(handle_create))
        .route(
            "/{id}",
            get(handle_get).put(handle_update).delete(handle_delete),
        )
        .route("/{id}/updates", put(handle_get_updates))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /`
async fn handle_list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>, AppError> {
    let ids = state
        .manager
        .list()
        .await
        .map_err(AppError::during("listing extracts"))?;
    Ok(Json(ids))
}

/// `GET /{id}`
///
/// Streams the canonical artifact as `application/pbf`.
#[instrument(skip(state))]
async fn handle_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let artifact = state
        .manager
        .artifact(&id)
        .await
        .map_err(AppError::during("getting a file"))?;
    Ok(file_response(artifact, PBF_CONTENT_TYPE))
}

/// `POST /`
///
/// Creates the extract and performs its initial download.  Responds with the
/// extract id as plain text.
#[instrument(skip(state, request), fields(file_name = %request.file_name))]
async fn handle_create(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRequest>,
) -> Result<Response, AppError> {
    let id = state
        .manager
        .create(request)
        .await
        .map_err(AppError::during("creating an extract"))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        id,
    )
        .into_response())
}

/// `PUT /{id}`
#[instrument(skip(state))]
async fn handle_update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<UpdateRequest>,
) -> Result<StatusCode, AppError> {
    state
        .manager
        .update(&id, request)
        .await
        .map_err(AppError::during("running this update"))?;
    Ok(StatusCode::OK)
}

/// `PUT /{id}/updates`
///
/// Pulls the latest replication diffs into the artifact, then streams the
/// change file as `application/xml`.
#[instrument(skip(state))]
async fn handle_get_updates(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let changes = state
        .manager
        .get_updates(&id)
        .await
        .map_err(AppError::during("running this update"))?;
    Ok(file_response(changes, CHANGE_CONTENT_TYPE))
}

/// `DELETE /{id}`
#[instrument(skip(state))]
async fn handle_delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state
        .manager
        .delete(&id)
        .await
        .map_err(AppError::during("running delete"))?;
    Ok(StatusCode::OK)
}

/// `GET /api/health`
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health_state = crate::health::HealthState {
        config: Arc::clone(&state.config),
        store: Arc::clone(&state.store),
    };
    crate::health::health_handler(axum::extract::State(health_state)).await
}

/// `GET /api/metrics`
///
/// Returns Prometheus metrics collected by the service.
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let buf = state
        .metrics
        .encode()
        .map_err(|e| anyhow::anyhow!("metrics encoding failed: {e}"))?;

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buf,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Stream an opened extract file without buffering it in memory.
fn file_response(open: OpenFile, content_type: &'static str) -> Response {
    let disposition = format!(
        "attachment; filename=\"{}\"",
        open.file_name.replace(['"', '\r', '\n'], "")
    );
    let body = Body::from_stream(ReaderStream::new(open.file));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, open.len.to_string()),
        ],
        body,
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Application-level error type that maps cleanly to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// A lifecycle operation failed.  `action` completes the sentence shown
    /// to callers that address an extract which was never created.
    Extract {
        action: &'static str,
        error: ExtractError,
    },
    /// An unexpected internal error.
    Internal(anyhow::Error),
}

impl AppError {
    fn during(action: &'static str) -> impl FnOnce(ExtractError) -> AppError {
        move |error| AppError::Extract { action, error }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Extract { action, error } => {
                let status = match &error {
                    ExtractError::NotFound { .. }
                    | ExtractError::AlreadyExists { .. }
                    | ExtractError::InvalidConfiguration(_) => StatusCode::BAD_REQUEST,
                    ExtractError::ArtifactMissing { .. } => StatusCode::NOT_FOUND,
                    ExtractError::UpstreamFetchFailed { .. } => StatusCode::BAD_GATEWAY,
                    ExtractError::ExternalToolFailed { .. }
                    | ExtractError::Corrupt { .. }
                    | ExtractError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                };

                if status.is_server_error() {
                    error!(error = %error, kind = error.kind(), "request failed");
                } else {
                    warn!(error = %error, kind = error.kind(), "request rejected");
                }

                let message = match error {
                    ExtractError::NotFound { .. } => {
                        format!("There's a need to run POST create method before {action}")
                    }
                    other => other.to_string(),
                };
                (status, message).into_response()
            }
            AppError::Internal(err) => {
                error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal server error: {err:#}"),
                )
                    .into_response()
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}
