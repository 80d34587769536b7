//! SQLite-backed ledger.

use super::{Ledger, LedgerError, LedgerResult};
use crate::models::descriptor::FileDescriptor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;

const SCHEMA: &str = include_str!("../../../migrations/0001_init.sql");

const SELECT_COLUMNS: &str = "SELECT key, original_name, size_bytes, content_type, url, owner, \
     project_id, fields, etag, created_at FROM files";

/// Apply the embedded schema. Every statement is idempotent, so this is safe
/// to run on every startup.
pub async fn run_migrations(db: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

#[derive(FromRow)]
struct DescriptorRow {
    key: String,
    original_name: String,
    size_bytes: i64,
    content_type: String,
    url: String,
    owner: Option<String>,
    project_id: Option<String>,
    fields: String,
    etag: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<DescriptorRow> for FileDescriptor {
    type Error = LedgerError;

    fn try_from(row: DescriptorRow) -> Result<Self, Self::Error> {
        let fields = serde_json::from_str(&row.fields).map_err(|source| LedgerError::Fields {
            key: row.key.clone(),
            source,
        })?;
        Ok(FileDescriptor {
            key: row.key,
            original_name: row.original_name,
            size_bytes: row.size_bytes,
            content_type: row.content_type,
            url: row.url,
            owner: row.owner,
            project_id: row.project_id,
            fields,
            etag: row.etag,
            created_at: row.created_at,
        })
    }
}

#[derive(Clone)]
pub struct SqliteLedger {
    db: Arc<SqlitePool>,
}

impl SqliteLedger {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn append(&self, descriptor: &FileDescriptor) -> LedgerResult<()> {
        let fields = serde_json::to_string(&descriptor.fields)?;
        let result = sqlx::query(
            "INSERT INTO files (
                key, original_name, size_bytes, content_type, url,
                owner, project_id, fields, etag, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&descriptor.key)
        .bind(&descriptor.original_name)
        .bind(descriptor.size_bytes)
        .bind(&descriptor.content_type)
        .bind(&descriptor.url)
        .bind(&descriptor.owner)
        .bind(&descriptor.project_id)
        .bind(fields)
        .bind(&descriptor.etag)
        .bind(descriptor.created_at)
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(LedgerError::Duplicate(descriptor.key.clone()))
            }
            Err(err) => Err(LedgerError::Sqlx(err)),
        }
    }

    async fn get(&self, key: &str) -> LedgerResult<Option<FileDescriptor>> {
        let row = sqlx::query_as::<_, DescriptorRow>(&format!("{} WHERE key = ?", SELECT_COLUMNS))
            .bind(key)
            .fetch_optional(&*self.db)
            .await?;
        row.map(FileDescriptor::try_from).transpose()
    }

    async fn list(&self) -> LedgerResult<Vec<FileDescriptor>> {
        sqlx::query_as::<_, DescriptorRow>(&format!("{} ORDER BY key ASC", SELECT_COLUMNS))
            .fetch_all(&*self.db)
            .await?
            .into_iter()
            .map(FileDescriptor::try_from)
            .collect()
    }

    async fn remove(&self, key: &str) -> LedgerResult<Option<FileDescriptor>> {
        let row = sqlx::query_as::<_, DescriptorRow>(
            "DELETE FROM files WHERE key = ?
             RETURNING key, original_name, size_bytes, content_type, url,
                       owner, project_id, fields, etag, created_at",
        )
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;
        row.map(FileDescriptor::try_from).transpose()
    }

    async fn ping(&self) -> LedgerResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
