//! Defines routes for file upload and retrieval.
//!
//! ## Structure
//! - `POST   /upload`     : multipart upload, returns the file descriptor
//! - `GET    /files`      : list descriptors
//! - `GET    /files/{key}`: download, honors `Range: bytes=...`
//! - `HEAD   /files/{key}`: headers only
//! - `DELETE /files/{key}`: delete file and descriptor
//! - `GET    /healthz`, `GET /readyz`: probes

use crate::{
    handlers::{
        file_handlers::{delete_file, get_file, head_file, list_files, upload_file},
        health_handlers::{healthz, readyz},
    },
    services::storage_service::StorageService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build and return the router for all file routes.
///
/// Upload bodies are capped at `max_upload_bytes`; the cap applies to the
/// upload route only.
pub fn routes(max_upload_bytes: usize) -> Router<StorageService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/upload",
            post(upload_file).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/files", get(list_files))
        .route(
            "/files/{key}",
            get(get_file).head(head_file).delete(delete_file),
        )
        .layer(TraceLayer::new_for_http())
}
