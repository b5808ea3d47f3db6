//! Artifact row models.

use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;

use smartcreate_core::types::{DbId, Timestamp};

/// A deduplicated stored output, addressed by content hash.
///
/// The `(block_id, block_offset, byte_size)` triple is the only record
/// of where the bytes live; block files carry no header or index.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ArtifactRow {
    pub id: DbId,
    pub content_hash: String,
    pub file_name: String,
    pub block_id: i64,
    pub block_offset: i64,
    pub byte_size: i64,
    pub media_type: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub metadata: Json<serde_json::Value>,
    pub is_deleted: bool,
    pub created_at: Timestamp,
}

/// Insert payload for a new artifact row.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub content_hash: String,
    pub file_name: String,
    pub block_id: i64,
    pub block_offset: i64,
    pub byte_size: i64,
    pub media_type: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub metadata: serde_json::Value,
}
