//! Task row model.

use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;

use smartcreate_core::error::CoreError;
use smartcreate_core::task::{JobRecord, PromptSpec, TaskStatus};
use smartcreate_core::types::{DbId, Timestamp};

/// A batch task as persisted in the `tasks` table.
///
/// The job list is embedded as a JSON column rather than a separate
/// table: jobs are ephemeral per-submission records that are always read
/// and written together with their task.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TaskRow {
    pub id: DbId,
    pub name: String,
    pub status: String,
    pub specs: Json<Vec<PromptSpec>>,
    pub image_size: String,
    pub variations_per_spec: i64,
    pub use_fixed_seed: bool,
    pub seed_base: i64,
    pub timeout_secs: i64,
    pub graph_template: Option<Json<serde_json::Value>>,
    pub total_count: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub jobs: Json<Vec<JobRecord>>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl TaskRow {
    /// Parse the stored status string.
    pub fn task_status(&self) -> Result<TaskStatus, CoreError> {
        TaskStatus::parse(&self.status)
    }
}
