//! Content-addressed artifact store.
//!
//! Wraps the block engine with SHA-256 deduplication: identical bytes
//! are stored exactly once, whatever file name they arrive under. This
//! is also what makes the monitor loop idempotent: re-processing a
//! render after a restart short-circuits on the hash without allocating
//! storage.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use sqlx::SqlitePool;

use smartcreate_core::hashing::{sha256_hex, short_hash};
use smartcreate_core::types::DbId;
use smartcreate_db::models::{ArtifactRow, NewArtifact};
use smartcreate_db::repositories::ArtifactRepo;

use crate::block::BlockEngine;
use crate::error::StoreError;

/// Deduplicating store for generated outputs.
///
/// Constructed once at process start and shared by handle; the artifact
/// table it writes is the sole integration point the engine exposes to
/// the gallery layer, which polls it (nothing is pushed).
pub struct ArtifactStore {
    pool: SqlitePool,
    blocks: Arc<BlockEngine>,
}

impl ArtifactStore {
    pub fn new(pool: SqlitePool, blocks: Arc<BlockEngine>) -> Self {
        Self { pool, blocks }
    }

    /// Store bytes under `file_name`, returning the artifact id.
    ///
    /// If identical content already exists the pre-existing id is
    /// returned and nothing is written. A file name already taken by
    /// different content gets a short content-hash suffix.
    pub async fn store(
        &self,
        bytes: &[u8],
        file_name: &str,
        metadata: serde_json::Value,
    ) -> Result<DbId, StoreError> {
        let content_hash = sha256_hex(bytes);

        if let Some(existing) = ArtifactRepo::find_by_hash(&self.pool, &content_hash).await? {
            tracing::debug!(
                artifact_id = existing.id,
                content_hash = %content_hash,
                "Duplicate content, reusing existing artifact",
            );
            return Ok(existing.id);
        }

        let file_name = if ArtifactRepo::file_name_exists(&self.pool, file_name).await? {
            suffixed_file_name(file_name, &content_hash)
        } else {
            file_name.to_string()
        };

        let (media_type, dimensions) = sniff_media(bytes);
        let location = self.blocks.write(bytes)?;

        let row = ArtifactRepo::insert(
            &self.pool,
            &NewArtifact {
                content_hash,
                file_name,
                block_id: location.block_id as i64,
                block_offset: location.offset as i64,
                byte_size: location.size as i64,
                media_type,
                width: dimensions.map(|(w, _)| w as i64),
                height: dimensions.map(|(_, h)| h as i64),
                metadata,
            },
        )
        .await?;

        tracing::info!(
            artifact_id = row.id,
            file_name = %row.file_name,
            block_id = row.block_id,
            byte_size = row.byte_size,
            "Artifact stored",
        );
        Ok(row.id)
    }

    /// Fetch an artifact's bytes and media type by id.
    pub async fn get(&self, id: DbId) -> Result<(Vec<u8>, String), StoreError> {
        let row = ArtifactRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("artifact {id}")))?;
        self.fetch_bytes(row)
    }

    /// Fetch an artifact's bytes and media type by stored file name.
    pub async fn get_by_filename(&self, file_name: &str) -> Result<(Vec<u8>, String), StoreError> {
        let row = ArtifactRepo::find_by_file_name(&self.pool, file_name)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("artifact '{file_name}'")))?;
        self.fetch_bytes(row)
    }

    /// All live artifact records, newest first.
    pub async fn list(&self) -> Result<Vec<ArtifactRow>, StoreError> {
        Ok(ArtifactRepo::list(&self.pool).await?)
    }

    /// Soft-delete an artifact; its block bytes remain in place.
    pub async fn soft_delete(&self, id: DbId) -> Result<(), StoreError> {
        ArtifactRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("artifact {id}")))?;
        Ok(ArtifactRepo::soft_delete(&self.pool, id).await?)
    }

    fn fetch_bytes(&self, row: ArtifactRow) -> Result<(Vec<u8>, String), StoreError> {
        let bytes = self.blocks.read(
            row.block_id as u64,
            row.block_offset as u64,
            row.byte_size as u64,
        )?;
        Ok((bytes, row.media_type))
    }
}

/// Disambiguate a taken file name with a short content-hash fragment.
fn suffixed_file_name(file_name: &str, content_hash: &str) -> String {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}-{}.{ext}", short_hash(content_hash)),
        None => format!("{stem}-{}", short_hash(content_hash)),
    }
}

/// Best-effort media type and pixel dimensions from the byte header.
///
/// Unknown formats fall back to `application/octet-stream` with no
/// dimensions; storing them still succeeds.
fn sniff_media(bytes: &[u8]) -> (String, Option<(u32, u32)>) {
    match image::guess_format(bytes) {
        Ok(format) => {
            let dimensions = image::ImageReader::new(Cursor::new(bytes))
                .with_guessed_format()
                .ok()
                .and_then(|reader| reader.into_dimensions().ok());
            (format.to_mime_type().to_string(), dimensions)
        }
        Err(_) => ("application/octet-stream".to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use smartcreate_db::repositories::ArtifactRepo;

    /// Minimal valid 1x1 transparent PNG.
    const TINY_PNG: &[u8] = &[
        0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48,
        0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00,
        0x00, 0x1f, 0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x78,
        0x9c, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00,
        0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
    ];

    async fn store_on(dir: &Path) -> (ArtifactStore, SqlitePool) {
        let pool = smartcreate_db::connect_in_memory().await.unwrap();
        let blocks = Arc::new(BlockEngine::open(dir, crate::DEFAULT_MAX_BLOCK_SIZE).unwrap());
        (ArtifactStore::new(pool.clone(), blocks), pool)
    }

    fn dir_bytes(dir: &Path) -> u64 {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().metadata().unwrap().len())
            .sum()
    }

    #[tokio::test]
    async fn store_and_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _pool) = store_on(dir.path()).await;

        let id = store
            .store(TINY_PNG, "out.png", json!({"seed": 7}))
            .await
            .unwrap();
        let (bytes, media_type) = store.get(id).await.unwrap();
        assert_eq!(bytes, TINY_PNG);
        assert_eq!(media_type, "image/png");

        let (by_name, _) = store.get_by_filename("out.png").await.unwrap();
        assert_eq!(by_name, TINY_PNG);
    }

    #[tokio::test]
    async fn png_header_yields_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let (store, pool) = store_on(dir.path()).await;

        store.store(TINY_PNG, "out.png", json!({})).await.unwrap();
        let row = ArtifactRepo::find_by_file_name(&pool, "out.png")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.width, Some(1));
        assert_eq!(row.height, Some(1));
        assert_eq!(row.media_type, "image/png");
    }

    #[tokio::test]
    async fn unknown_bytes_fall_back_to_octet_stream() {
        let dir = tempfile::tempdir().unwrap();
        let (store, pool) = store_on(dir.path()).await;

        let id = store.store(b"not an image", "blob.bin", json!({})).await.unwrap();
        let row = ArtifactRepo::find_by_id(&pool, id).await.unwrap().unwrap();
        assert_eq!(row.media_type, "application/octet-stream");
        assert_eq!(row.width, None);
        assert_eq!(row.height, None);
    }

    #[tokio::test]
    async fn identical_content_is_stored_once() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _pool) = store_on(dir.path()).await;

        let first = store.store(TINY_PNG, "a.png", json!({})).await.unwrap();
        let used = dir_bytes(dir.path());

        // Same bytes under a different name: same id, no new bytes.
        let second = store.store(TINY_PNG, "b.png", json!({})).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(dir_bytes(dir.path()), used);

        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn colliding_file_name_gets_hash_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let (store, pool) = store_on(dir.path()).await;

        store.store(b"content one", "out.png", json!({})).await.unwrap();
        let second = store.store(b"content two", "out.png", json!({})).await.unwrap();

        let row = ArtifactRepo::find_by_id(&pool, second).await.unwrap().unwrap();
        let expected_fragment = short_hash(&sha256_hex(b"content two")).to_string();
        assert_eq!(row.file_name, format!("out-{expected_fragment}.png"));
    }

    #[tokio::test]
    async fn soft_delete_hides_artifact_from_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _pool) = store_on(dir.path()).await;

        let id = store.store(TINY_PNG, "out.png", json!({})).await.unwrap();
        store.soft_delete(id).await.unwrap();

        assert!(matches!(store.get(id).await, Err(StoreError::NotFound(_))));
        assert!(store.list().await.unwrap().is_empty());

        // Re-storing the same content still dedups onto the old row.
        let again = store.store(TINY_PNG, "out.png", json!({})).await.unwrap();
        assert_eq!(again, id);
    }

    #[test]
    fn suffix_preserves_extension() {
        let hash = sha256_hex(b"x");
        let fragment = short_hash(&hash).to_string();
        assert_eq!(
            suffixed_file_name("image.png", &hash),
            format!("image-{fragment}.png")
        );
        assert_eq!(
            suffixed_file_name("no_extension", &hash),
            format!("no_extension-{fragment}")
        );
    }
}
