//! SQLite persistence for tasks and artifacts.
//!
//! The engine is a single-process system, so state lives in an embedded
//! SQLite database accessed through [`sqlx`]. Repositories follow the
//! usual shape: a unit struct per table with static async query methods
//! taking a pool reference.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

pub mod models;
pub mod repositories;
pub mod schema;

/// Open (and create if missing) a file-backed database, apply the
/// schema, and return a ready pool.
pub async fn connect(database_path: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_path)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    schema::init(&pool).await?;
    Ok(pool)
}

/// In-memory database with the schema applied.
///
/// Capped at one connection: each SQLite `:memory:` connection is its
/// own database, so a larger pool would see an empty schema.
pub async fn connect_in_memory() -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    schema::init(&pool).await?;
    Ok(pool)
}

/// Verify the database answers queries.
pub async fn health_check(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await?;
    Ok(())
}
