//! HTTP server for the ingestion pipeline

pub mod routes;
pub mod state;

use std::net::SocketAddr;

use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use state::AppState;

/// Ingestion HTTP server
pub struct IngestServer {
    config: PipelineConfig,
    state: AppState,
}

impl IngestServer {
    pub async fn new(config: PipelineConfig) -> Result<Self> {
        let state = AppState::new(config.clone()).await?;
        Ok(Self { config, state })
    }

    fn build_router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/health", get(health))
            .route(
                "/upload",
                post(routes::upload::upload_files)
                    .layer(DefaultBodyLimit::max(self.config.limits.max_upload_bytes())),
            )
            .route("/upload/status", get(routes::upload::upload_status))
            .route("/files", get(routes::files::list_files))
            .route("/files/chunks", get(routes::files::get_file_chunks))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(cors)
    }

    /// Bind and serve until shutdown
    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;

        let router = self.build_router();

        tracing::info!("Starting ingestion server on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("Failed to bind: {}", e)))?;

        axum::serve(listener, router)
            .await
            .map_err(|e| Error::internal(format!("Server error: {}", e)))?;

        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
    mongodb_connected: bool,
    service: &'static str,
}

/// GET /health: probes the database with a ping and an index pass
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let connected =
        state.store().ping().await.is_ok() && state.store().ensure_indexes().await.is_ok();
    Json(HealthResponse {
        ok: connected,
        mongodb_connected: connected,
        service: "ingestion_pipeline",
    })
}
