use crate::services::{range::RangeError, storage_service::StorageError};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub headers: HeaderMap,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// 416 carrying `Content-Range: bytes */{size}`.
    pub fn range_not_satisfiable(msg: impl Into<String>, size: u64) -> Self {
        let mut err = Self::new(StatusCode::RANGE_NOT_SATISFIABLE, msg);
        if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
            err.headers.insert(header::CONTENT_RANGE, value);
        }
        err
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, self.headers, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => AppError::not_found(err.to_string()),
            StorageError::Io(io_err) => {
                // body errors from the multipart stream travel through io::Error
                if let Some(multipart) = io_err
                    .get_ref()
                    .and_then(|inner| inner.downcast_ref::<MultipartError>())
                {
                    return AppError::new(multipart.status(), multipart.body_text());
                }
                tracing::error!("storage failure: {}", io_err);
                AppError::internal("storage failure")
            }
            StorageError::Ledger(_) | StorageError::KeyCollision(_) => {
                tracing::error!("storage failure: {}", err);
                AppError::internal("storage failure")
            }
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}

/// Convert a range failure for an object of `size` bytes.
pub fn range_error(err: RangeError, size: u64) -> AppError {
    AppError::range_not_satisfiable(err.to_string(), size)
}
