/// Errors from the block engine and artifact store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing block file for a stored location has vanished.
    /// Fatal to the specific fetch, not to the process.
    #[error("Block {0} is missing from the storage directory")]
    BlockMissing(u64),

    /// No live artifact matches the requested id or file name.
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
