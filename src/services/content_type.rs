//! Maps file extensions to MIME types.

const VIDEO_EXTENSIONS: [&str; 3] = ["mp4", "mov", "webm"];
const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Resolve the content type for `filename` from its extension.
///
/// Matching is case-insensitive. Video and image types mirror the extension
/// (`video/mov`, `image/jpg`), unknown or missing extensions fall back to
/// `application/octet-stream`.
pub fn content_type_for(filename: &str) -> String {
    let ext = match filename.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return DEFAULT_CONTENT_TYPE.to_string(),
    };

    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        return format!("video/{}", ext);
    }
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return format!("image/{}", ext);
    }
    match ext.as_str() {
        "pdf" => "application/pdf",
        "zip" | "rar" => "application/zip",
        _ => DEFAULT_CONTENT_TYPE,
    }
    .to_string()
}
