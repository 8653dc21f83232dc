//! Gateway to the `chunks` and `files` collections

use bson::doc;
use futures_util::TryStreamExt;
use mongodb::options::{FindOptions, InsertManyOptions, UpdateOptions};
use mongodb::{Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Card, FileSummary, VECTOR_DIM};

/// Store for cards and per-file summaries.
///
/// Callers are responsible for idempotency: a replace deletes the triple's
/// prior data before new chunks are inserted.
pub struct RagStore {
    db: Database,
    chunks: Collection<Card>,
    files: Collection<FileSummary>,
    insert_batch_size: usize,
}

/// Filename + summary pair returned by file listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub filename: String,
    #[serde(default)]
    pub summary: String,
}

/// JSON-friendly chunk view: stringified id, ISO-8601 timestamp, no
/// embedding payload
#[derive(Debug, Clone, Serialize)]
pub struct ChunkView {
    pub id: String,
    pub user_id: String,
    pub project_id: String,
    pub filename: String,
    pub topic_name: String,
    pub summary: String,
    pub content: String,
    pub page_span: [u32; 2],
    pub card_id: String,
    pub created_at: String,
}

impl From<Card> for ChunkView {
    fn from(card: Card) -> Self {
        Self {
            id: card.id.map(|id| id.to_hex()).unwrap_or_default(),
            user_id: card.user_id,
            project_id: card.project_id,
            filename: card.filename,
            topic_name: card.topic_name,
            summary: card.summary,
            content: card.content,
            page_span: card.page_span,
            card_id: card.card_id,
            created_at: card.created_at.to_rfc3339(),
        }
    }
}

impl RagStore {
    pub fn new(db: Database, insert_batch_size: usize) -> Self {
        let chunks = db.collection("chunks");
        let files = db.collection("files");
        Self {
            db,
            chunks,
            files,
            insert_batch_size: insert_batch_size.max(1),
        }
    }

    /// Probe the connection
    pub async fn ping(&self) -> Result<()> {
        self.db.run_command(doc! { "ping": 1 }, None).await?;
        Ok(())
    }

    /// Bulk insert cards in bounded unordered batches so one bad record does
    /// not abort its batch. Fails up front when any embedding has the wrong
    /// dimension.
    pub async fn store_chunks(&self, cards: &[Card]) -> Result<()> {
        if cards.is_empty() {
            return Ok(());
        }
        validate_embeddings(cards)?;

        let options = InsertManyOptions::builder().ordered(false).build();
        for batch in cards.chunks(self.insert_batch_size) {
            self.chunks.insert_many(batch, options.clone()).await?;
        }
        tracing::info!("Inserted {} cards", cards.len());
        Ok(())
    }

    /// Update-or-insert the summary for a (user, project, filename) triple
    pub async fn upsert_file_summary(
        &self,
        user_id: &str,
        project_id: &str,
        filename: &str,
        summary: &str,
    ) -> Result<()> {
        let options = UpdateOptions::builder().upsert(true).build();
        self.files
            .update_one(
                doc! { "user_id": user_id, "project_id": project_id, "filename": filename },
                doc! { "$set": { "summary": summary } },
                options,
            )
            .await?;
        tracing::info!("Upserted summary for {} (user {}, project {})", filename, user_id, project_id);
        Ok(())
    }

    /// File summaries for a project, sorted by filename
    pub async fn list_files(&self, user_id: &str, project_id: &str) -> Result<Vec<FileEntry>> {
        let options = FindOptions::builder()
            .projection(doc! { "_id": 0, "filename": 1, "summary": 1 })
            .sort(doc! { "filename": 1 })
            .build();
        let mut cursor = self
            .files
            .clone_with_type::<FileEntry>()
            .find(doc! { "user_id": user_id, "project_id": project_id }, options)
            .await?;

        let mut entries = Vec::new();
        while let Some(entry) = cursor.try_next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Up to `limit` chunks for a file, in insertion order
    pub async fn get_file_chunks(
        &self,
        user_id: &str,
        project_id: &str,
        filename: &str,
        limit: i64,
    ) -> Result<Vec<ChunkView>> {
        // A find limit of 0 means unbounded, so non-positive values clamp to 1
        let options = FindOptions::builder()
            .projection(doc! { "embedding": 0 })
            .sort(doc! { "_id": 1 })
            .limit(limit.max(1))
            .build();
        let mut cursor = self
            .chunks
            .find(
                doc! { "user_id": user_id, "project_id": project_id, "filename": filename },
                options,
            )
            .await?;

        let mut views = Vec::new();
        while let Some(card) = cursor.try_next().await? {
            views.push(ChunkView::from(card));
        }
        Ok(views)
    }

    /// Delete all chunks and the summary for a triple. Idempotent.
    pub async fn delete_file_data(
        &self,
        user_id: &str,
        project_id: &str,
        filename: &str,
    ) -> Result<()> {
        let filter = doc! { "user_id": user_id, "project_id": project_id, "filename": filename };
        let chunks = self.chunks.delete_many(filter.clone(), None).await?;
        let files = self.files.delete_many(filter, None).await?;
        tracing::info!(
            "Deleted {} chunks and {} file records for {}",
            chunks.deleted_count,
            files.deleted_count,
            filename
        );
        Ok(())
    }

    /// Create the composite lookup indexes. An index that already exists
    /// with different options counts as success.
    pub async fn ensure_indexes(&self) -> Result<()> {
        let keys = doc! { "user_id": 1, "project_id": 1, "filename": 1 };
        swallow_index_conflict(
            self.chunks
                .create_index(IndexModel::builder().keys(keys.clone()).build(), None)
                .await,
        )?;
        swallow_index_conflict(
            self.files
                .create_index(IndexModel::builder().keys(keys).build(), None)
                .await,
        )?;
        Ok(())
    }
}

/// Every stored embedding must have exactly [`VECTOR_DIM`] components.
pub(crate) fn validate_embeddings(cards: &[Card]) -> Result<()> {
    for card in cards {
        if card.embedding.len() != VECTOR_DIM {
            return Err(Error::InvalidEmbedding(card.embedding.len()));
        }
    }
    Ok(())
}

fn swallow_index_conflict(
    result: mongodb::error::Result<mongodb::results::CreateIndexResult>,
) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_index_conflict(&e) => {
            tracing::warn!("Index already exists with different options; treating as success");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// IndexOptionsConflict (85) / IndexKeySpecsConflict (86)
fn is_index_conflict(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        mongodb::error::ErrorKind::Command(c) if c.code == 85 || c.code == 86
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card_with_embedding(embedding: Vec<f32>) -> Card {
        Card {
            id: None,
            user_id: "u".to_string(),
            project_id: "p".to_string(),
            filename: "f.pdf".to_string(),
            topic_name: "t".to_string(),
            summary: "s".to_string(),
            content: "c".to_string(),
            page_span: [1, 1],
            card_id: "f-pdf-c0001".to_string(),
            embedding,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_validate_embeddings_ok() {
        let cards = vec![card_with_embedding(vec![0.0; VECTOR_DIM])];
        assert!(validate_embeddings(&cards).is_ok());
    }

    #[test]
    fn test_validate_embeddings_rejects_wrong_length() {
        let cards = vec![
            card_with_embedding(vec![0.0; VECTOR_DIM]),
            card_with_embedding(vec![0.0; 16]),
        ];
        match validate_embeddings(&cards) {
            Err(Error::InvalidEmbedding(16)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_validate_embeddings_rejects_missing() {
        let cards = vec![card_with_embedding(Vec::new())];
        assert!(validate_embeddings(&cards).is_err());
    }

    #[test]
    fn test_chunk_view_from_card() {
        let mut card = card_with_embedding(vec![0.0; VECTOR_DIM]);
        card.id = Some(bson::oid::ObjectId::new());
        let view = ChunkView::from(card.clone());
        assert_eq!(view.id, card.id.unwrap().to_hex());
        assert_eq!(view.card_id, "f-pdf-c0001");
        assert!(view.created_at.contains('T'));
    }
}
