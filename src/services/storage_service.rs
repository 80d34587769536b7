//! src/services/storage_service.rs
//!
//! StorageService: ingestion and retrieval of files kept flat on local disk
//! beneath `base_path/{key}`, with descriptors recorded through a [`Ledger`].
//!
//! Uploads are staged into `base_path/.tmp-{uuid}`, fsynced and renamed into
//! place, so readers only ever observe complete files. A staged upload that
//! is dropped before commit (error, timeout, client disconnect) removes its
//! temp file.

use crate::{
    models::descriptor::{FileDescriptor, file_url},
    services::{
        content_type::content_type_for,
        ledger::{Ledger, LedgerError},
        naming::{is_valid_key, storage_key_for},
        streaming::{CHUNK_SIZE, copy_in_chunks},
    },
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use md5::Context;
use std::{
    collections::{BTreeMap, HashMap},
    io::{self, ErrorKind},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Scalar form fields that populate dedicated descriptor attributes.
const OWNER_FIELDS: [&str; 2] = ["ownerEmail", "owner"];
const PROJECT_FIELD: &str = "projectId";
const KEY_ATTEMPTS: usize = 3;
const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file `{0}` not found")]
    NotFound(String),
    #[error("storage key `{0}` is already taken")]
    KeyCollision(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// An upload fully written to a temp file but not yet visible to readers.
///
/// Dropping it without [`StorageService::commit_upload`] deletes the temp file.
#[derive(Debug)]
pub struct StagedUpload {
    original_name: String,
    size_bytes: u64,
    etag: String,
    tmp_path: PathBuf,
    owns_tmp: bool,
}

impl StagedUpload {
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if self.owns_tmp {
            match std::fs::remove_file(&self.tmp_path) {
                Ok(_) => debug!("discarded staged upload {}", self.tmp_path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!(
                    "failed to discard staged upload {}: {}",
                    self.tmp_path.display(),
                    err
                ),
            }
        }
    }
}

/// A committed file opened for reading.
#[derive(Debug)]
pub struct StoredFile {
    pub descriptor: FileDescriptor,
    pub file: File,
    pub size: u64,
}

/// StorageService provides the file operations behind the HTTP surface:
/// - Stage + commit an upload (temp write, atomic rename, ledger append)
/// - Open a file for full or ranged reads
/// - List committed files
/// - Delete a file and its descriptor
#[derive(Clone)]
pub struct StorageService {
    /// Descriptor store shared by every request.
    pub ledger: Arc<dyn Ledger>,

    /// Base directory on disk where file payloads are stored.
    pub base_path: PathBuf,

    /// Longest an upload request may spend receiving and committing.
    pub upload_timeout: Duration,
}

impl StorageService {
    pub fn new(ledger: Arc<dyn Ledger>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            ledger,
            base_path: base_path.into(),
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }

    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    /// Stream an upload body into a temp file beneath `base_path`.
    ///
    /// Size and MD5 are computed while copying; the file is fsynced before
    /// this returns.
    pub async fn stage_upload<S>(&self, original_name: &str, stream: S) -> StorageResult<StagedUpload>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        fs::create_dir_all(&self.base_path).await?;
        let tmp_path = self.base_path.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut staged = StagedUpload {
            original_name: original_name.to_string(),
            size_bytes: 0,
            etag: String::new(),
            tmp_path,
            owns_tmp: true,
        };

        let reader = StreamReader::new(stream);
        tokio::pin!(reader);
        let mut digest = Context::new();
        staged.size_bytes =
            copy_in_chunks(reader, &mut file, CHUNK_SIZE, |chunk| digest.consume(chunk)).await?;
        file.flush().await?;
        file.sync_all().await?;
        staged.etag = format!("{:x}", digest.compute());

        debug!(
            "staged {} bytes for `{}` at {}",
            staged.size_bytes,
            staged.original_name,
            staged.tmp_path.display()
        );
        Ok(staged)
    }

    /// Move a staged upload into place and record its descriptor.
    ///
    /// If the ledger append fails, the renamed file is removed again so no
    /// payload is left without a descriptor.
    pub async fn commit_upload(
        &self,
        mut staged: StagedUpload,
        fields: BTreeMap<String, String>,
    ) -> StorageResult<FileDescriptor> {
        let (key, final_path) = self.free_key(&staged.original_name).await?;

        fs::rename(&staged.tmp_path, &final_path).await?;
        staged.owns_tmp = false;

        let owner = OWNER_FIELDS
            .iter()
            .find_map(|name| fields.get(*name))
            .cloned();
        let project_id = fields.get(PROJECT_FIELD).cloned();
        let descriptor = FileDescriptor {
            url: file_url(&key),
            content_type: content_type_for(&staged.original_name),
            key,
            original_name: staged.original_name.clone(),
            size_bytes: staged.size_bytes as i64,
            owner,
            project_id,
            fields,
            etag: std::mem::take(&mut staged.etag),
            created_at: Utc::now(),
        };

        if let Err(err) = self.ledger.append(&descriptor).await {
            warn!(
                "ledger append failed for `{}`, removing payload: {}",
                descriptor.key, err
            );
            if let Err(rm_err) = fs::remove_file(&final_path).await {
                warn!("could not remove {}: {}", final_path.display(), rm_err);
            }
            return Err(err.into());
        }

        info!(
            "stored `{}` as `{}` ({} bytes)",
            descriptor.original_name, descriptor.key, descriptor.size_bytes
        );
        Ok(descriptor)
    }

    /// Pick a storage key whose final path is unused. Keys are unique within
    /// the process; this guards against files left by earlier runs.
    async fn free_key(&self, original_name: &str) -> StorageResult<(String, PathBuf)> {
        let mut key = storage_key_for(original_name);
        for _ in 0..KEY_ATTEMPTS {
            let path = self.file_path(&key);
            if !fs::try_exists(&path).await? {
                return Ok((key, path));
            }
            debug!("storage key `{}` already on disk, retrying", key);
            key = storage_key_for(original_name);
        }
        Err(StorageError::KeyCollision(key))
    }

    /// Stage and commit in one step.
    #[cfg(test)]
    pub async fn store_upload<S>(
        &self,
        original_name: &str,
        fields: BTreeMap<String, String>,
        stream: S,
    ) -> StorageResult<FileDescriptor>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let staged = self.stage_upload(original_name, stream).await?;
        self.commit_upload(staged, fields).await
    }

    /// Open a committed file for reading.
    ///
    /// Returns NotFound for malformed keys, keys without a descriptor, and
    /// descriptors whose payload is missing.
    pub async fn open_file(&self, key: &str) -> StorageResult<StoredFile> {
        if !is_valid_key(key) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let descriptor = self
            .ledger
            .get(key)
            .await?
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        let file = File::open(self.file_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                warn!("descriptor `{}` has no payload on disk", key);
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;
        let size = file.metadata().await?.len();

        Ok(StoredFile {
            descriptor,
            file,
            size,
        })
    }

    /// Descriptor lookup without opening the payload.
    pub async fn file_descriptor(&self, key: &str) -> StorageResult<(FileDescriptor, u64)> {
        let stored = self.open_file(key).await?;
        Ok((stored.descriptor, stored.size))
    }

    /// List every committed file, ordered by key.
    ///
    /// Walks the storage directory and joins each payload with its
    /// descriptor. Temp files and payloads without a descriptor are skipped.
    pub async fn list_files(&self) -> StorageResult<Vec<FileDescriptor>> {
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') || !entry.file_type().await?.is_file() {
                continue;
            }
            keys.push(name);
        }
        keys.sort();

        let mut descriptors: HashMap<String, FileDescriptor> = self
            .ledger
            .list()
            .await?
            .into_iter()
            .map(|d| (d.key.clone(), d))
            .collect();

        let mut files = Vec::with_capacity(keys.len());
        for key in keys {
            match descriptors.remove(&key) {
                Some(descriptor) => files.push(descriptor),
                None => debug!("skipping orphaned payload `{}`", key),
            }
        }
        Ok(files)
    }

    /// Delete a file and its descriptor.
    ///
    /// Returns NotFound when no payload exists for `key`. A descriptor left
    /// behind by a missing payload is purged either way.
    pub async fn delete_file(&self, key: &str) -> StorageResult<Option<FileDescriptor>> {
        if !is_valid_key(key) {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let path = self.file_path(key);
        match fs::remove_file(&path).await {
            Ok(_) => debug!("removed physical file {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if self.ledger.remove(key).await?.is_some() {
                    warn!("purged descriptor `{}` whose payload was missing", key);
                }
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        let descriptor = self.ledger.remove(key).await?;
        info!("deleted `{}`", key);
        Ok(descriptor)
    }
}
