use smartcreate_core::error::CoreError;
use smartcreate_core::types::DbId;

use crate::graph::GraphError;

/// Errors surfaced by the batch engine's public entry points.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Task {0} not found")]
    TaskNotFound(DbId),

    /// The task is in the wrong lifecycle state for the requested
    /// operation (e.g. pausing a task that is not generating).
    #[error("Task {id} is '{status}', expected {expected}")]
    InvalidState {
        id: DbId,
        status: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Render server error: {0}")]
    Render(#[from] smartcreate_render::RenderError),

    #[error("Storage error: {0}")]
    Store(#[from] smartcreate_store::StoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
