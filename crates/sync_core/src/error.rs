use shared::error::{ApiError, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server rejected request with status {status}: {error}")]
    Api { status: u16, error: ApiError },
    #[error("server returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid request url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl TransportError {
    pub fn api_code(&self) -> Option<ErrorCode> {
        match self {
            TransportError::Api { error, .. } => Some(error.code),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("network: {0}")]
    Network(#[from] TransportError),
    #[error("unexpected payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("stale reference: {0}")]
    StaleReference(String),
}

impl SyncError {
    pub fn validation(message: impl Into<String>) -> Self {
        SyncError::Validation(message.into())
    }

    pub fn stale(message: impl Into<String>) -> Self {
        SyncError::StaleReference(message.into())
    }

    pub fn api_code(&self) -> Option<ErrorCode> {
        match self {
            SyncError::Network(err) => err.api_code(),
            _ => None,
        }
    }
}
