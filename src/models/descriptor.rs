//! Represents the metadata record kept for every stored file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Descriptor of a single stored file.
///
/// A descriptor is created once the payload has been renamed into place and
/// is read-only afterwards. It is removed together with the file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// Storage key (sanitized, stamp-prefixed file name on disk).
    pub key: String,

    /// File name as supplied by the client.
    pub original_name: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Content type (MIME type) inferred from the file extension.
    pub content_type: String,

    /// Path under which the file can be retrieved.
    pub url: String,

    /// Uploading user, when the client supplied one.
    pub owner: Option<String>,

    /// Project the file belongs to, when the client supplied one.
    pub project_id: Option<String>,

    /// Every scalar form field sent alongside the file.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,

    /// Hex MD5 of the payload.
    pub etag: String,

    /// When the file was committed.
    pub created_at: DateTime<Utc>,
}

/// Build the retrieval path for a storage key.
pub fn file_url(key: &str) -> String {
    format!("/files/{}", key)
}
