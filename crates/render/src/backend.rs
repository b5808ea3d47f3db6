//! The seam between the orchestrator and the render server.
//!
//! The engine is written against this trait so tests can swap the HTTP
//! client for a scripted double that counts calls.

use async_trait::async_trait;

use crate::error::RenderError;
use crate::types::{HistoryEntry, OutputFile, QueueSnapshot};

/// Everything the orchestrator needs from a render server.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Queue a job graph for execution, returning the server-assigned
    /// prompt id.
    async fn submit(&self, graph: &serde_json::Value) -> Result<String, RenderError>;

    /// Snapshot of the live queue (running + pending prompt ids).
    async fn queue(&self) -> Result<QueueSnapshot, RenderError>;

    /// History entry for a prompt id, or `None` if the server has no
    /// record of it.
    async fn history(&self, prompt_id: &str) -> Result<Option<HistoryEntry>, RenderError>;

    /// Download the raw bytes of a finished output file.
    async fn fetch_output(&self, file: &OutputFile) -> Result<Vec<u8>, RenderError>;

    /// Ask the server to drop the given prompt ids from its queue.
    async fn delete_from_queue(&self, prompt_ids: &[String]) -> Result<(), RenderError>;

    /// Interrupt whatever is executing right now (not prompt-targeted).
    async fn interrupt(&self) -> Result<(), RenderError>;

    /// Name of the first installed checkpoint model, used when building
    /// the minimal fallback graph.
    async fn default_checkpoint(&self) -> Result<String, RenderError>;
}
