use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use smartcreate_pipeline::BatchEngine;
use smartcreate_render::RenderApi;
use smartcreate_store::{ArtifactStore, BlockEngine};

mod config;

use config::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smartcreate=info,smartcreate_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env();
    tracing::info!(
        render_url = %config.render_url,
        database_url = %config.database_url,
        blocks_dir = %config.blocks_dir,
        "Worker starting",
    );

    let pool = smartcreate_db::connect(&config.database_url).await?;
    let blocks = Arc::new(BlockEngine::open(&config.blocks_dir, config.max_block_size)?);
    let artifacts = Arc::new(ArtifactStore::new(pool.clone(), blocks));
    let backend = Arc::new(RenderApi::new(config.render_url.clone()));
    let engine = BatchEngine::new(pool, backend, artifacts, config.engine_config());

    let recovered = engine.recover().await?;
    if recovered > 0 {
        tracing::info!(count = recovered, "Recovered in-flight tasks");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, exiting");
    // All task and artifact state is persisted per tick; in-flight
    // loops are simply abandoned and picked up by recovery next start.
    Ok(())
}
