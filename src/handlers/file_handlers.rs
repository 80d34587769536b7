//! HTTP handlers for file upload, retrieval, listing and deletion.
//! Streams bodies in bounded chunks in both directions and delegates storage
//! concerns to `StorageService`.

use crate::{
    errors::{AppError, range_error},
    models::descriptor::FileDescriptor,
    services::{
        range::{ByteRange, RangeError, parse_range},
        storage_service::{StagedUpload, StorageError, StorageService, StoredFile},
        streaming::{full_stream, range_stream},
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use futures::StreamExt;
use serde::Serialize;
use std::{collections::BTreeMap, io};
use tracing::{debug, warn};

/// Multipart field carrying the file payload.
pub const FILE_FIELD: &str = "file";
const FALLBACK_FILENAME: &str = "upload.bin";

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub key: String,
    pub descriptor: Option<FileDescriptor>,
}

/// `POST /upload`: multipart body with one `file` part and any number of
/// scalar fields.
pub async fn upload_file(
    State(service): State<StorageService>,
    multipart: Multipart,
) -> Result<Json<FileDescriptor>, AppError> {
    match tokio::time::timeout(service.upload_timeout, receive_upload(&service, multipart)).await {
        Ok(result) => result.map(Json),
        Err(_) => {
            warn!("upload exceeded {:?}, aborted", service.upload_timeout);
            Err(AppError::new(
                StatusCode::REQUEST_TIMEOUT,
                "upload did not complete in time",
            ))
        }
    }
}

async fn receive_upload(
    service: &StorageService,
    mut multipart: Multipart,
) -> Result<FileDescriptor, AppError> {
    let mut staged: Option<StagedUpload> = None;
    let mut fields = BTreeMap::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == FILE_FIELD {
            if staged.is_some() {
                return Err(AppError::bad_request(format!(
                    "only one `{}` part is allowed",
                    FILE_FIELD
                )));
            }
            let original_name = field
                .file_name()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or(FALLBACK_FILENAME)
                .to_string();
            let stream = field.map(|chunk| chunk.map_err(io::Error::other));
            let upload = service.stage_upload(&original_name, stream).await?;
            debug!(
                "received `{}` ({} bytes)",
                upload.original_name(),
                upload.size_bytes()
            );
            staged = Some(upload);
        } else if name.is_empty() {
            debug!("ignoring unnamed multipart part");
        } else {
            let value = field.text().await?;
            fields.insert(name, value);
        }
    }

    let staged = staged.ok_or_else(|| {
        AppError::bad_request(format!("missing `{}` part in multipart body", FILE_FIELD))
    })?;
    Ok(service.commit_upload(staged, fields).await?)
}

/// `GET /files`: descriptors of every stored file, ordered by key.
pub async fn list_files(
    State(service): State<StorageService>,
) -> Result<Json<Vec<FileDescriptor>>, AppError> {
    Ok(Json(service.list_files().await?))
}

/// `GET /files/{key}`: whole file (200) or a single byte range (206).
pub async fn get_file(
    State(service): State<StorageService>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let StoredFile {
        descriptor,
        file,
        size,
    } = service.open_file(&key).await?;

    let range = match headers.get(header::RANGE) {
        None => None,
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| range_error(RangeError::Malformed("<non-ascii>".into()), size))?;
            let range = parse_range(value, size).map_err(|err| {
                debug!("rejecting range `{}` for `{}`: {}", value, key, err);
                range_error(err, size)
            })?;
            Some(range)
        }
    };

    let Some(range) = range else {
        let mut response = Response::new(Body::from_stream(full_stream(file)));
        *response.status_mut() = StatusCode::OK;
        set_file_headers(response.headers_mut(), &descriptor, size);
        return Ok(response);
    };

    debug!(
        "serving bytes {}-{} of `{}` ({} bytes)",
        range.start, range.end, key, size
    );
    let stream = range_stream(file, range).await.map_err(StorageError::from)?;
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::PARTIAL_CONTENT;
    set_file_headers(response.headers_mut(), &descriptor, range.len());
    set_content_range(response.headers_mut(), range, size);
    Ok(response)
}

/// `HEAD /files/{key}`: same headers as a full GET but no body.
pub async fn head_file(
    State(service): State<StorageService>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let (descriptor, size) = service.file_descriptor(&key).await?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_file_headers(response.headers_mut(), &descriptor, size);
    Ok(response)
}

/// `DELETE /files/{key}`: remove the file and its descriptor.
pub async fn delete_file(
    State(service): State<StorageService>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let descriptor = service.delete_file(&key).await?;
    Ok(Json(DeleteResponse { key, descriptor }))
}

fn set_file_headers(headers: &mut HeaderMap, meta: &FileDescriptor, length: u64) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.etag)) {
        headers.insert(header::ETAG, value);
    }

    let last_modified = meta
        .created_at
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

fn set_content_range(headers: &mut HeaderMap, range: ByteRange, size: u64) {
    if let Ok(value) = HeaderValue::from_str(&range.content_range(size)) {
        headers.insert(header::CONTENT_RANGE, value);
    }
}
