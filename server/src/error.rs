//! Error types for each upload layer.
//!
//! The chunk store and manager report low-level failures; the usecases
//! translate them into [`UploadError`], which is what the HTTP layer sees.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Chunk store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("upload container not found: {0}")]
    NotFound(String),

    #[error("offset mismatch: container is at {actual}, write requested at {requested}")]
    OffsetMismatch { requested: u64, actual: u64 },

    #[error("chunk overflows declared size {declared} (offset {offset})")]
    Overflow { offset: u64, declared: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid info sidecar: {0}")]
    Info(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Upload manager errors.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("declared size must be greater than zero")]
    InvalidSize,

    #[error("declared size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("offset mismatch, expected {expected}")]
    OffsetMismatch { expected: u64 },

    #[error("upload already completed ({size} bytes)")]
    Completed { size: u64 },

    #[error("upload is no longer active")]
    Inactive,

    #[error("upload is not complete: {offset} of {declared} bytes")]
    Incomplete { offset: u64, declared: u64 },

    #[error("unknown upload session: {0}")]
    NotFound(String),

    #[error("unknown upload scope: {0}")]
    UnknownScope(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ManagerResult<T> = std::result::Result<T, ManagerError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by the upload usecases.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or invalid bearer token. Raised by the HTTP layer only.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("access denied")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("declared size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("offset mismatch, current offset is {offset}")]
    OffsetMismatch { offset: u64 },

    #[error("upload already completed ({size} bytes)")]
    AlreadyCompleted { size: u64 },

    #[error("upload is {0}")]
    Inactive(String),

    /// The cause is kept for logs but never rendered to the client.
    #[error("internal error")]
    Internal(#[source] BoxError),
}

pub type UploadResult<T> = std::result::Result<T, UploadError>;

impl UploadError {
    pub fn internal(err: impl Into<BoxError>) -> Self {
        Self::Internal(err.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::OffsetMismatch { .. } => "offset_mismatch",
            Self::AlreadyCompleted { .. } => "already_completed",
            Self::Inactive(_) => "inactive",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::OffsetMismatch { .. } => StatusCode::CONFLICT,
            Self::AlreadyCompleted { .. } => StatusCode::GONE,
            Self::Inactive(_) => StatusCode::GONE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Offset the client should resume from, when the error carries one.
    pub fn resume_offset(&self) -> Option<u64> {
        match self {
            Self::OffsetMismatch { offset } => Some(*offset),
            Self::AlreadyCompleted { size } => Some(*size),
            _ => None,
        }
    }
}

impl From<ManagerError> for UploadError {
    fn from(err: ManagerError) -> Self {
        match err {
            ManagerError::InvalidSize => {
                Self::Validation("declared size must be greater than zero".into())
            }
            ManagerError::PayloadTooLarge { size, max } => Self::PayloadTooLarge { size, max },
            ManagerError::OffsetMismatch { expected } => Self::OffsetMismatch { offset: expected },
            ManagerError::Completed { size } => Self::AlreadyCompleted { size },
            ManagerError::Inactive => Self::Inactive("no longer active".into()),
            ManagerError::Store(StoreError::OffsetMismatch { actual, .. }) => {
                Self::OffsetMismatch { offset: actual }
            }
            ManagerError::Store(StoreError::Overflow { offset, declared }) => Self::Validation(
                format!("chunk at offset {offset} exceeds declared size {declared}"),
            ),
            other => Self::internal(other),
        }
    }
}

impl From<StoreError> for UploadError {
    fn from(err: StoreError) -> Self {
        ManagerError::Store(err).into()
    }
}

impl From<sea_orm::DbErr> for UploadError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::internal(err)
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(err)
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        if let Self::Internal(cause) = &self {
            tracing::error!("Upload request failed: {cause}");
        }
        let status = self.status_code();
        let offset = self.resume_offset();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
            offset,
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(offset) = offset {
            response
                .headers_mut()
                .insert("upload-offset", HeaderValue::from(offset));
        }
        response
    }
}
