//! Ingestion pipeline server binary
//!
//! Run with: cargo run --bin cardforge-server

use cardforge::{config::PipelineConfig, server::IngestServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cardforge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PipelineConfig::from_env()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Database: {}", config.mongo.db_name);
    tracing::info!("  - Embedder: {}", config.embedding.base_url);
    tracing::info!("  - Chunk size: {} words", config.chunking.max_words);
    tracing::info!("  - Max upload: {} files x {} MB", config.limits.max_files_per_upload, config.limits.max_file_mb);

    let server = IngestServer::new(config).await?;

    println!("Ingestion pipeline listening on http://{}", server.address());
    println!("  POST /upload         - Upload documents");
    println!("  GET  /upload/status  - Poll job progress");
    println!("  GET  /files          - List ingested files");
    println!("  GET  /files/chunks   - Fetch a file's chunks");
    println!("  GET  /health         - Health check");

    server.start().await?;

    Ok(())
}
