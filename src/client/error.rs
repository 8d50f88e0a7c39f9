//! Client-side dispatch errors.

use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("upload cancelled")]
    Cancelled,

    #[error("failed to read local file: {0}")]
    FileReadError(String),

    #[error("chunk {chunk_index} upload failed: {message}")]
    ChunkUploadFailed { chunk_index: u64, message: String },

    #[error("server reported hash mismatch for chunk {chunk_index}")]
    HashMismatch { chunk_index: u64 },

    #[error("maximum retries ({max_retries}) exceeded for chunk {chunk_index}")]
    MaxRetriesExceeded { chunk_index: u64, max_retries: u32 },

    #[error("server rejected initiate request: {0}")]
    InitiateFailed(String),

    #[error("http request failed: {0}")]
    HttpError(String),
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::HttpError(_) | ClientError::ChunkUploadFailed { .. } | ClientError::HashMismatch { .. }
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::HttpError(err.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::FileReadError(err.to_string())
    }
}
