//! Crate-wide error type
//!
//! Unifies the distinguishable outcomes of the chunked upload protocol and
//! maps each to the HTTP status the ingest endpoint is contracted to return.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Per-chunk SHA-256 did not match the declared `chunk_hash`. Transient; the
    /// client retries the same index.
    #[error("chunk hash mismatch")]
    HashMismatch { chunk_index: u64 },

    /// The positioned write (or its fsync) failed.
    #[error("chunk write failed: {0}")]
    WriteFailure(String),

    /// No session exists for the given `upload_id`, or it did and its ttl
    /// has since elapsed — the store treats both as absent.
    #[error("unknown upload id")]
    SessionMissing,

    /// Declared size exceeds the configured cap. Reported before assembly.
    #[error("declared size exceeds the configured cap")]
    SizeExceeded,

    /// The assembled file failed the validation ruleset (size, mime, or extension).
    #[error("assembled file failed validation: {0}")]
    ValidationFailure(String),

    /// The configured storage backend is not local.
    #[error("chunked uploads require a local storage backend")]
    UnsupportedBackend,

    /// `upload_id` sanitized to the empty string.
    #[error("invalid upload id")]
    InvalidUploadId,

    /// Chunking was requested but configuration forbids it (non-local backend).
    #[error("chunking is not available for this configuration")]
    ConfigurationError,

    /// Malformed multipart shape: missing field, non-numeric index, wrong hash length, etc.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The RMW-with-verify loop exhausted its retry budget without observing
    /// its own write.
    #[error("session update did not converge after {attempts} attempts")]
    UpdateNotConverged { attempts: u32 },

    /// Request failed the (opaque) signature gate.
    #[error("invalid request signature")]
    Unauthorized,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::HashMismatch { .. } => StatusCode::CONFLICT,
            AppError::WriteFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::SessionMissing => StatusCode::NOT_FOUND,
            AppError::SizeExceeded => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::ValidationFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::UnsupportedBackend => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InvalidUploadId => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ConfigurationError => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::MalformedRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::UpdateNotConverged { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::HashMismatch { .. } => "HASH_MISMATCH",
            AppError::WriteFailure(_) => "WRITE_FAILURE",
            AppError::SessionMissing => "SESSION_MISSING",
            AppError::SizeExceeded => "SIZE_EXCEEDED",
            AppError::ValidationFailure(_) => "VALIDATION_FAILURE",
            AppError::UnsupportedBackend => "UNSUPPORTED_BACKEND",
            AppError::InvalidUploadId => "INVALID_UPLOAD_ID",
            AppError::ConfigurationError => "CONFIGURATION_ERROR",
            AppError::MalformedRequest(_) => "MALFORMED_REQUEST",
            AppError::UpdateNotConverged { .. } => "UPDATE_NOT_CONVERGED",
            AppError::Unauthorized => "UNAUTHORIZED",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashMismatchBody {
    chunk_index: u64,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let code = self.code();

        tracing::warn!(error = %self, code, "request failed");

        // The hash-mismatch retry signal has a fixed wire shape (`{chunkIndex}`)
        // that client retry logic matches on; it does not carry the generic
        // error envelope.
        if let AppError::HashMismatch { chunk_index } = self {
            return (status, Json(HashMismatchBody { chunk_index })).into_response();
        }

        let body = Json(ErrorBody {
            error: self.to_string(),
            code,
        });

        (status, body).into_response()
    }
}
