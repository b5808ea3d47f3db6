//! Idempotent schema bootstrap.
//!
//! There are no migrations: the schema is created on startup with
//! `CREATE TABLE IF NOT EXISTS`, which also makes crash recovery
//! trivial. A half-initialized database simply gets the missing tables.

use sqlx::SqlitePool;

const CREATE_TASKS: &str = "\
CREATE TABLE IF NOT EXISTS tasks (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    name                TEXT NOT NULL DEFAULT '',
    status              TEXT NOT NULL DEFAULT 'pending',
    specs               TEXT NOT NULL DEFAULT '[]',
    image_size          TEXT NOT NULL DEFAULT '512x512',
    variations_per_spec INTEGER NOT NULL DEFAULT 1,
    use_fixed_seed      INTEGER NOT NULL DEFAULT 0,
    seed_base           INTEGER NOT NULL DEFAULT 0,
    timeout_secs        INTEGER NOT NULL DEFAULT 1800,
    graph_template      TEXT,
    total_count         INTEGER NOT NULL DEFAULT 0,
    completed_count     INTEGER NOT NULL DEFAULT 0,
    failed_count        INTEGER NOT NULL DEFAULT 0,
    jobs                TEXT NOT NULL DEFAULT '[]',
    error_message       TEXT,
    created_at          TEXT NOT NULL,
    started_at          TEXT,
    completed_at        TEXT
)";

const CREATE_ARTIFACTS: &str = "\
CREATE TABLE IF NOT EXISTS artifacts (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    content_hash TEXT NOT NULL UNIQUE,
    file_name    TEXT NOT NULL UNIQUE,
    block_id     INTEGER NOT NULL,
    block_offset INTEGER NOT NULL,
    byte_size    INTEGER NOT NULL,
    media_type   TEXT NOT NULL,
    width        INTEGER,
    height       INTEGER,
    metadata     TEXT NOT NULL DEFAULT '{}',
    is_deleted   INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL
)";

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status)",
    "CREATE INDEX IF NOT EXISTS idx_artifacts_deleted ON artifacts (is_deleted)",
];

/// Create all tables and indexes if they do not exist yet.
pub async fn init(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(CREATE_TASKS).execute(pool).await?;
    sqlx::query(CREATE_ARTIFACTS).execute(pool).await?;
    for statement in CREATE_INDEXES {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::debug!("Database schema ready");
    Ok(())
}
