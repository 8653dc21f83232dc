//! File listing and chunk retrieval endpoints

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::server::state::AppState;
use crate::storage::{ChunkView, FileEntry};

#[derive(Debug, Deserialize)]
pub struct FilesQuery {
    pub user_id: String,
    pub project_id: String,
}

#[derive(Debug, Serialize)]
pub struct FilesListResponse {
    pub files: Vec<FileEntry>,
    pub filenames: Vec<String>,
}

/// GET /files?user_id=…&project_id=…
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<FilesQuery>,
) -> Result<Json<FilesListResponse>> {
    let files = state
        .store()
        .list_files(&query.user_id, &query.project_id)
        .await?;
    let filenames = files.iter().map(|f| f.filename.clone()).collect();
    Ok(Json(FilesListResponse { files, filenames }))
}

#[derive(Debug, Deserialize)]
pub struct ChunksQuery {
    pub user_id: String,
    pub project_id: String,
    pub filename: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct ChunksResponse {
    pub chunks: Vec<ChunkView>,
}

/// GET /files/chunks?user_id=…&project_id=…&filename=…&limit=…
pub async fn get_file_chunks(
    State(state): State<AppState>,
    Query(query): Query<ChunksQuery>,
) -> Result<Json<ChunksResponse>> {
    let chunks = state
        .store()
        .get_file_chunks(&query.user_id, &query.project_id, &query.filename, query.limit)
        .await?;
    Ok(Json(ChunksResponse { chunks }))
}
