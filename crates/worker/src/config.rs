use std::time::Duration;

use smartcreate_pipeline::EngineConfig;

/// Worker configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Base HTTP URL of the render server (default: `http://127.0.0.1:8188`).
    pub render_url: String,
    /// SQLite database URL (default: `sqlite://smartcreate.db`).
    pub database_url: String,
    /// Directory for artifact block files (default: `data/blocks`).
    pub blocks_dir: String,
    /// Size cap per block file in bytes.
    pub max_block_size: u64,
    /// Monitor poll interval in seconds (default: `2`).
    pub poll_interval_secs: u64,
    /// Default wall-clock budget per task in seconds (default: `1800`).
    pub task_timeout_secs: i64,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var              | Default                  |
    /// |----------------------|--------------------------|
    /// | `RENDER_URL`         | `http://127.0.0.1:8188`  |
    /// | `DATABASE_URL`       | `sqlite://smartcreate.db`|
    /// | `BLOCKS_DIR`         | `data/blocks`            |
    /// | `MAX_BLOCK_SIZE`     | `67108864` (64 MiB)      |
    /// | `POLL_INTERVAL_SECS` | `2`                      |
    /// | `TASK_TIMEOUT_SECS`  | `1800`                   |
    pub fn from_env() -> Self {
        let render_url =
            std::env::var("RENDER_URL").unwrap_or_else(|_| "http://127.0.0.1:8188".into());

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://smartcreate.db".into());

        let blocks_dir = std::env::var("BLOCKS_DIR").unwrap_or_else(|_| "data/blocks".into());

        let max_block_size: u64 = std::env::var("MAX_BLOCK_SIZE")
            .unwrap_or_else(|_| smartcreate_store::DEFAULT_MAX_BLOCK_SIZE.to_string())
            .parse()
            .expect("MAX_BLOCK_SIZE must be a valid u64");

        let poll_interval_secs: u64 = std::env::var("POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| "2".into())
            .parse()
            .expect("POLL_INTERVAL_SECS must be a valid u64");

        let task_timeout_secs: i64 = std::env::var("TASK_TIMEOUT_SECS")
            .unwrap_or_else(|_| "1800".into())
            .parse()
            .expect("TASK_TIMEOUT_SECS must be a valid i64");

        Self {
            render_url,
            database_url,
            blocks_dir,
            max_block_size,
            poll_interval_secs,
            task_timeout_secs,
        }
    }

    /// Engine loop parameters derived from this config.
    pub fn engine_config(&self) -> EngineConfig {
        let poll_interval = Duration::from_secs(self.poll_interval_secs.max(1));
        // Keep the ~5 minute loss window whatever the poll interval is.
        let lost_after_ticks = (300 / poll_interval.as_secs()).max(1) as u32;

        EngineConfig {
            poll_interval,
            lost_after_ticks,
            default_timeout_secs: self.task_timeout_secs,
        }
    }
}
