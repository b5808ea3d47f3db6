//! Repository for the `artifacts` table.

use chrono::Utc;
use sqlx::types::Json;
use sqlx::SqlitePool;

use smartcreate_core::types::DbId;

use crate::models::artifact::{ArtifactRow, NewArtifact};

/// Column list for `artifacts` queries.
const COLUMNS: &str = "\
    id, content_hash, file_name, block_id, block_offset, byte_size, \
    media_type, width, height, metadata, is_deleted, created_at";

/// Provides query operations for stored artifacts.
pub struct ArtifactRepo;

impl ArtifactRepo {
    /// Insert a new artifact record, returning the inserted row.
    pub async fn insert(
        pool: &SqlitePool,
        artifact: &NewArtifact,
    ) -> Result<ArtifactRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO artifacts \
                 (content_hash, file_name, block_id, block_offset, byte_size, \
                  media_type, width, height, metadata, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ArtifactRow>(&query)
            .bind(&artifact.content_hash)
            .bind(&artifact.file_name)
            .bind(artifact.block_id)
            .bind(artifact.block_offset)
            .bind(artifact.byte_size)
            .bind(&artifact.media_type)
            .bind(artifact.width)
            .bind(artifact.height)
            .bind(Json(&artifact.metadata))
            .bind(Utc::now())
            .fetch_one(pool)
            .await
    }

    /// Look up an artifact by content hash.
    ///
    /// Soft-deleted rows are included: the hash column is unique, so a
    /// re-store of deleted content must still dedup against it.
    pub async fn find_by_hash(
        pool: &SqlitePool,
        content_hash: &str,
    ) -> Result<Option<ArtifactRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM artifacts WHERE content_hash = ?");
        sqlx::query_as::<_, ArtifactRow>(&query)
            .bind(content_hash)
            .fetch_optional(pool)
            .await
    }

    /// Fetch a live (non-deleted) artifact by id.
    pub async fn find_by_id(
        pool: &SqlitePool,
        id: DbId,
    ) -> Result<Option<ArtifactRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM artifacts WHERE id = ? AND is_deleted = 0");
        sqlx::query_as::<_, ArtifactRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Fetch a live (non-deleted) artifact by stored file name.
    pub async fn find_by_file_name(
        pool: &SqlitePool,
        file_name: &str,
    ) -> Result<Option<ArtifactRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM artifacts WHERE file_name = ? AND is_deleted = 0");
        sqlx::query_as::<_, ArtifactRow>(&query)
            .bind(file_name)
            .fetch_optional(pool)
            .await
    }

    /// Whether any row (deleted or not) already claims this file name.
    pub async fn file_name_exists(
        pool: &SqlitePool,
        file_name: &str,
    ) -> Result<bool, sqlx::Error> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM artifacts WHERE file_name = ?")
                .bind(file_name)
                .fetch_one(pool)
                .await?;
        Ok(count > 0)
    }

    /// All live artifacts, newest first. This is the poll surface the
    /// gallery layer reads; no event is pushed when rows appear.
    pub async fn list(pool: &SqlitePool) -> Result<Vec<ArtifactRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM artifacts WHERE is_deleted = 0 ORDER BY id DESC"
        );
        sqlx::query_as::<_, ArtifactRow>(&query).fetch_all(pool).await
    }

    /// Soft-delete an artifact. Block bytes are append-only and stay put.
    pub async fn soft_delete(pool: &SqlitePool, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE artifacts SET is_deleted = 1 WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
