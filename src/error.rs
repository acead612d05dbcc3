use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Tagged error bubbled up from every layer below the HTTP boundary.
///
/// No layer other than `IntoResponse` below formats an HTTP response;
/// handlers, the coordinator, and the sandbox runner all return
/// `Result<_, AppError>` and propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid checksum")]
    InvalidChecksum,

    #[error("Invalid task_id")]
    InvalidTaskId,

    #[error("oss-fuzz-latest does not support this operation")]
    OssFuzzLatestUnsupported,

    #[error("Invalid metadata format")]
    InvalidMetadata,

    #[error("File too large. Maximum size allowed: {0}MB")]
    FileTooLarge(u64),

    #[error("Not found")]
    AuthFailed,

    #[error("Record not found")]
    RecordNotFound,

    #[error("No records found for this agent_id")]
    NoRecordsForAgent,

    #[error("Multiple PoC records for same agent/task/hash found")]
    DuplicateRecords,

    #[error("{0} PoC records for same poc_id found")]
    PocIdCardinality(usize),

    #[error("PoC binary not found")]
    PocBinaryMissing,

    #[error("Timeout waiting for the program")]
    DockerWaitTimeout,

    #[error("Running error: {0}")]
    DockerRunningError(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        use AppError::*;
        match self {
            InvalidChecksum
            | InvalidTaskId
            | OssFuzzLatestUnsupported
            | InvalidMetadata => StatusCode::BAD_REQUEST,
            FileTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AuthFailed | RecordNotFound | NoRecordsForAgent => StatusCode::NOT_FOUND,
            DuplicateRecords
            | PocIdCardinality(_)
            | PocBinaryMissing
            | DockerWaitTimeout
            | DockerRunningError(_)
            | Unexpected(_)
            | Database(_)
            | Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
