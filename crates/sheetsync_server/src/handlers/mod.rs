pub mod files;
pub mod update;

use axum::{
    Router,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Serialize;
use sheetsync_core::{ErrorKind, SerializableError, UpdateError};
use tracing::{error, warn};

use crate::state::AppState;

pub use files::{list_files, test_file_access};
pub use update::{update_document, update_excel, webhook};

/// Create all routes
pub fn app_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(health).post(webhook))
        .route("/health", get(health))
        .route("/update-excel", post(update_excel))
        .route("/api/documents/{document_id}/update", post(update_document))
        .route("/test_file_access", get(test_file_access))
        .route("/list_files", get(list_files))
        .with_state(state)
}

/// Liveness response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
}

/// GET / and GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        message: "API is running",
    })
}

/// HTTP status for each update failure kind
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Auth => StatusCode::UNAUTHORIZED,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Apply => StatusCode::BAD_REQUEST,
        ErrorKind::RevisionConflict => StatusCode::CONFLICT,
        ErrorKind::Decode => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Encode => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::RetryExhausted => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::RemoteStore => StatusCode::BAD_GATEWAY,
    }
}

/// Error returned by update handlers
#[derive(Debug)]
pub enum ApiError {
    /// Malformed or incomplete request
    BadRequest(&'static str),
    /// The engine rejected the update
    Update(UpdateError),
}

impl From<UpdateError> for ApiError {
    fn from(err: UpdateError) -> Self {
        ApiError::Update(err)
    }
}

#[derive(Serialize)]
struct MessageBody {
    status: &'static str,
    message: &'static str,
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    #[serde(flatten)]
    error: SerializableError,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                warn!("Rejected request: {}", message);
                (
                    StatusCode::BAD_REQUEST,
                    Json(MessageBody {
                        status: "error",
                        message,
                    }),
                )
                    .into_response()
            }
            ApiError::Update(err) => {
                let status = status_for(err.kind());
                if status.is_server_error() {
                    error!("Update failed: {}", err);
                } else {
                    warn!("Update failed: {}", err);
                }
                (
                    status,
                    Json(ErrorBody {
                        status: "error",
                        error: err.to_serializable(),
                    }),
                )
                    .into_response()
            }
        }
    }
}
