//! Repository for the `tasks` table.

use chrono::Utc;
use sqlx::types::Json;
use sqlx::SqlitePool;

use smartcreate_core::task::{JobCounts, JobRecord, PromptSpec, TaskStatus};
use smartcreate_core::types::DbId;

use crate::models::task::TaskRow;

/// Column list for `tasks` queries.
const COLUMNS: &str = "\
    id, name, status, specs, image_size, variations_per_spec, \
    use_fixed_seed, seed_base, timeout_secs, graph_template, \
    total_count, completed_count, failed_count, jobs, error_message, \
    created_at, started_at, completed_at";

/// Execution parameters fixed at the moment a batch starts.
#[derive(Debug, Clone)]
pub struct BeginExecution {
    pub image_size: String,
    pub variations_per_spec: i64,
    pub use_fixed_seed: bool,
    pub seed_base: i64,
    pub timeout_secs: i64,
    pub graph_template: Option<serde_json::Value>,
    pub total_count: i64,
}

/// Provides query operations for batch tasks.
pub struct TaskRepo;

impl TaskRepo {
    /// Create a new pending task, returning the inserted row.
    pub async fn create(
        pool: &SqlitePool,
        name: &str,
        specs: &[PromptSpec],
    ) -> Result<TaskRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO tasks (name, specs, created_at) \
             VALUES (?, ?, ?) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(name)
            .bind(Json(specs))
            .bind(Utc::now())
            .fetch_one(pool)
            .await
    }

    /// Fetch a task by id.
    pub async fn find_by_id(pool: &SqlitePool, id: DbId) -> Result<Option<TaskRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = ?");
        sqlx::query_as::<_, TaskRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Tasks that were mid-execution: `generating` or `paused`.
    ///
    /// Scanned once at process start by crash recovery.
    pub async fn list_active(pool: &SqlitePool) -> Result<Vec<TaskRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM tasks \
             WHERE status IN ('generating', 'paused') \
             ORDER BY id"
        );
        sqlx::query_as::<_, TaskRow>(&query).fetch_all(pool).await
    }

    /// Replace the prompt list of a not-yet-started task.
    pub async fn attach_specs(
        pool: &SqlitePool,
        id: DbId,
        specs: &[PromptSpec],
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tasks SET specs = ? WHERE id = ?")
            .bind(Json(specs))
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Freeze execution parameters and move the task to `generating`.
    ///
    /// Clears any job list, counts, and error left by a previous run.
    pub async fn begin_execution(
        pool: &SqlitePool,
        id: DbId,
        params: &BeginExecution,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE tasks SET \
                 status = 'generating', \
                 image_size = ?, \
                 variations_per_spec = ?, \
                 use_fixed_seed = ?, \
                 seed_base = ?, \
                 timeout_secs = ?, \
                 graph_template = ?, \
                 total_count = ?, \
                 completed_count = 0, \
                 failed_count = 0, \
                 jobs = '[]', \
                 error_message = NULL, \
                 started_at = ?, \
                 completed_at = NULL \
             WHERE id = ?",
        )
        .bind(&params.image_size)
        .bind(params.variations_per_spec)
        .bind(params.use_fixed_seed)
        .bind(params.seed_base)
        .bind(params.timeout_secs)
        .bind(params.graph_template.as_ref().map(Json))
        .bind(params.total_count)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Update only the status string (pause/resume transitions).
    pub async fn update_status(
        pool: &SqlitePool,
        id: DbId,
        status: TaskStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tasks SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Persist the embedded job list and recomputed aggregate counts.
    ///
    /// Deliberately does not touch `status` or `error_message`: a stop
    /// request racing a monitor tick must not have its terminal status
    /// overwritten by the tick's own commit.
    pub async fn save_progress(
        pool: &SqlitePool,
        id: DbId,
        jobs: &[JobRecord],
        counts: JobCounts,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE tasks SET jobs = ?, completed_count = ?, failed_count = ? WHERE id = ?",
        )
        .bind(Json(jobs))
        .bind(counts.completed)
        .bind(counts.failed)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Move a task to a terminal status, recording the completion time
    /// and the top-level error message (if any).
    pub async fn finish(
        pool: &SqlitePool,
        id: DbId,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE tasks SET status = ?, error_message = ?, completed_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Return a failed task to `generating` for a retry pass.
    pub async fn reopen(pool: &SqlitePool, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE tasks SET status = 'generating', error_message = NULL, completed_at = NULL \
             WHERE id = ?",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }
}
