//! End-to-end checks against the assembled router.

use super::routes::routes;
use crate::{
    models::descriptor::FileDescriptor,
    services::{ledger::MemoryLedger, storage_service::StorageService},
};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response, StatusCode, header},
};
use bytes::Bytes;
use futures::{StreamExt, stream};
use std::{collections::HashSet, io, sync::Arc, time::Duration};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "----filestore-test-boundary";
const LIMIT: usize = 1024 * 1024;

enum Part<'a> {
    File(&'a str, &'a [u8]),
    Text(&'a str, &'a str),
}

fn multipart(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File(filename, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        filename
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}",
                        name, value
                    )
                    .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(body.into())
        .unwrap()
}

struct TestApp {
    _dir: TempDir,
    service: StorageService,
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        Self::with(|service| service)
    }

    fn with(configure: impl FnOnce(StorageService) -> StorageService) -> Self {
        let dir = TempDir::new().unwrap();
        let service = configure(StorageService::new(
            Arc::new(MemoryLedger::new()),
            dir.path().join("files"),
        ));
        let router = routes(LIMIT).with_state(service.clone());
        Self {
            _dir: dir,
            service,
            router,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str, range: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(range) = range {
            builder = builder.header(header::RANGE, range);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn upload(&self, filename: &str, data: &[u8]) -> FileDescriptor {
        let response = self
            .send(upload_request(multipart(&[Part::File(filename, data)])))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    async fn stored_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.service.base_path).await else {
            return names;
        };
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().into_string().unwrap());
        }
        names
    }
}

async fn body_bytes(response: Response<Body>) -> Bytes {
    to_bytes(response.into_body(), usize::MAX).await.unwrap()
}

fn header_str<'a>(response: &'a Response<Body>, name: header::HeaderName) -> &'a str {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

#[tokio::test]
async fn upload_returns_descriptor_matching_payload() {
    let app = TestApp::new();
    let data = sample(5000);
    let response = app
        .send(upload_request(multipart(&[
            Part::Text("projectId", "p-7"),
            Part::File("holiday clip.mp4", &data),
            Part::Text("ownerEmail", "ada@example.com"),
        ])))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let descriptor: FileDescriptor = serde_json::from_slice(&body_bytes(response).await).unwrap();

    assert_eq!(descriptor.size_bytes, 5000);
    assert_eq!(descriptor.original_name, "holiday clip.mp4");
    assert!(descriptor.key.ends_with("-holiday_clip.mp4"));
    assert_eq!(descriptor.content_type, "video/mp4");
    assert_eq!(descriptor.url, format!("/files/{}", descriptor.key));
    assert_eq!(descriptor.owner.as_deref(), Some("ada@example.com"));
    assert_eq!(descriptor.project_id.as_deref(), Some("p-7"));
    assert_eq!(descriptor.fields.len(), 2);
}

#[tokio::test]
async fn full_get_streams_whole_file() {
    let app = TestApp::new();
    let data = sample(200_000);
    let descriptor = app.upload("photo.JPG", &data).await;

    let response = app.get(&descriptor.url, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), "200000");
    assert_eq!(header_str(&response, header::CONTENT_TYPE), "image/jpg");
    assert_eq!(header_str(&response, header::ACCEPT_RANGES), "bytes");
    assert_eq!(
        header_str(&response, header::ETAG),
        format!("\"{}\"", descriptor.etag)
    );
    assert!(response.headers().get(header::CONTENT_RANGE).is_none());
    assert_eq!(body_bytes(response).await, data);
}

#[tokio::test]
async fn whole_range_matches_full_body() {
    let app = TestApp::new();
    let data = sample(1000);
    let descriptor = app.upload("song.webm", &data).await;

    let full = body_bytes(app.get(&descriptor.url, None).await).await;
    let response = app.get(&descriptor.url, Some("bytes=0-999")).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes 0-999/1000");
    assert_eq!(body_bytes(response).await, full);
}

#[tokio::test]
async fn partial_ranges_return_exact_slices() {
    let app = TestApp::new();
    let data = sample(150_000);
    let descriptor = app.upload("movie.mov", &data).await;

    for (start, end) in [(0usize, 0usize), (1, 1), (10, 99), (65_535, 65_536), (70_000, 149_999)] {
        let response = app
            .get(&descriptor.url, Some(&format!("bytes={}-{}", start, end)))
            .await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            header_str(&response, header::CONTENT_RANGE),
            format!("bytes {}-{}/150000", start, end)
        );
        assert_eq!(
            header_str(&response, header::CONTENT_LENGTH),
            (end - start + 1).to_string()
        );
        assert_eq!(header_str(&response, header::ACCEPT_RANGES), "bytes");
        assert_eq!(header_str(&response, header::CONTENT_TYPE), "video/mov");
        assert_eq!(body_bytes(response).await, &data[start..=end]);
    }
}

#[tokio::test]
async fn open_ended_suffix_and_clamped_ranges() {
    let app = TestApp::new();
    let descriptor = app.upload("range.txt", b"abcdefghij").await;

    let response = app.get(&descriptor.url, Some("bytes=6-")).await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes 6-9/10");
    assert_eq!(body_bytes(response).await, "ghij");

    let response = app.get(&descriptor.url, Some("bytes=-3")).await;
    assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes 7-9/10");
    assert_eq!(body_bytes(response).await, "hij");

    let response = app.get(&descriptor.url, Some("bytes=8-500")).await;
    assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes 8-9/10");
    assert_eq!(body_bytes(response).await, "ij");
}

#[tokio::test]
async fn unsatisfiable_and_malformed_ranges_get_416() {
    // 416 rather than a silent full-body 200
    let app = TestApp::new();
    let descriptor = app.upload("range.txt", b"0123456789").await;

    for range in ["bytes=10-", "bytes=5-2", "bytes=abc-", "items=0-1", "bytes=0-1,3-4"] {
        let response = app.get(&descriptor.url, Some(range)).await;
        assert_eq!(
            response.status(),
            StatusCode::RANGE_NOT_SATISFIABLE,
            "range {range}"
        );
        assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes */10");
    }
}

#[tokio::test]
async fn unknown_key_is_404_for_full_and_range_requests() {
    let app = TestApp::new();
    assert_eq!(
        app.get("/files/123-never.mp4", None).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        app.get("/files/123-never.mp4", Some("bytes=0-1")).await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        app.get("/files/..%2F..%2Fetc%2Fpasswd", None).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn head_reports_headers_without_body() {
    let app = TestApp::new();
    let descriptor = app.upload("doc.pdf", b"%PDF-1.7 body").await;

    let response = app
        .send(
            Request::builder()
                .method("HEAD")
                .uri(&descriptor.url)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), "13");
    assert_eq!(header_str(&response, header::CONTENT_TYPE), "application/pdf");
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn list_returns_uploaded_descriptors() {
    let app = TestApp::new();
    let first = app.upload("a.zip", b"one").await;
    let second = app.upload("b.tar", b"two").await;

    let response = app.get("/files", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let listed: Vec<FileDescriptor> = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(listed, vec![first, second]);
    assert_eq!(listed[0].content_type, "application/zip");
    assert_eq!(listed[1].content_type, "application/octet-stream");
}

#[tokio::test]
async fn delete_then_get_is_404() {
    let app = TestApp::new();
    let descriptor = app.upload("gone.gif", b"GIF89a").await;

    let delete = || {
        Request::builder()
            .method("DELETE")
            .uri(&descriptor.url)
            .body(Body::empty())
            .unwrap()
    };

    let response = app.send(delete()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["key"], descriptor.key.as_str());

    assert_eq!(app.get(&descriptor.url, None).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.send(delete()).await.status(), StatusCode::NOT_FOUND);

    let listed = body_bytes(app.get("/files", None).await).await;
    assert_eq!(listed, "[]");
}

#[tokio::test]
async fn delete_unknown_key_is_404() {
    let app = TestApp::new();
    let response = app
        .send(
            Request::builder()
                .method("DELETE")
                .uri("/files/1-unknown.bin")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_without_file_part_is_rejected() {
    let app = TestApp::new();
    let response = app
        .send(upload_request(multipart(&[Part::Text("projectId", "p-1")])))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.stored_names().await.is_empty());
}

#[tokio::test]
async fn upload_with_two_file_parts_is_rejected() {
    let app = TestApp::new();
    let response = app
        .send(upload_request(multipart(&[
            Part::File("a.png", b"a"),
            Part::File("b.png", b"b"),
        ])))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.stored_names().await.is_empty());
    assert!(app.service.ledger.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let app = TestApp::new();
    let data = sample(LIMIT * 2);
    let response = app
        .send(upload_request(multipart(&[Part::File("big.mp4", &data)])))
        .await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(app.stored_names().await.is_empty());
}

#[tokio::test]
async fn stalled_upload_times_out_and_cleans_up() {
    let app = TestApp::with(|service| service.with_upload_timeout(Duration::from_millis(100)));
    let head = format!(
        "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"slow.mp4\"\r\n\r\npartial",
        BOUNDARY
    );
    let chunks = stream::iter(vec![Ok::<_, io::Error>(Bytes::from(head))]).chain(stream::pending());
    let response = app.send(upload_request(Body::from_stream(chunks))).await;

    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert!(app.stored_names().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_uploads_never_collide() {
    let app = Arc::new(TestApp::new());
    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let app = app.clone();
            tokio::spawn(async move {
                let payload = format!("payload {}", i);
                app.upload("same.png", payload.as_bytes()).await
            })
        })
        .collect();

    let mut keys = HashSet::new();
    for task in tasks {
        let descriptor = task.await.unwrap();
        assert!(keys.insert(descriptor.key));
    }
    assert_eq!(keys.len(), 16);
    assert_eq!(app.stored_names().await.len(), 16);
}

#[tokio::test]
async fn probes_report_ok() {
    let app = TestApp::new();
    assert_eq!(app.get("/healthz", None).await.status(), StatusCode::OK);

    tokio::fs::create_dir_all(&app.service.base_path).await.unwrap();
    let response = app.get("/readyz", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["checks"]["ledger"]["ok"], true);
    assert_eq!(body["checks"]["disk"]["ok"], true);
    assert!(app.stored_names().await.is_empty());
}
