//! Cards (chunks) and file summaries, the two persisted record shapes

use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Embedding dimension produced by the remote embedder (all-MiniLM-L6-v2)
pub const VECTOR_DIM: usize = 384;

/// A retrieval-ready chunk of a document, stored in the `chunks` collection.
///
/// `card_id` is deterministic (`<slug(filename)>-c<NNNN>`, 1-based) and unique
/// within its (user, project, filename) triple; lexicographic order of the
/// ids matches emission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: String,
    pub project_id: String,
    pub filename: String,
    pub topic_name: String,
    pub summary: String,
    pub content: String,
    /// Contiguous [first, last] page span within the source file
    pub page_span: [u32; 2],
    pub card_id: String,
    /// Filled by the embedding stage; excluded from chunk listings
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

/// Per-file summary record, upserted into the `files` collection on the
/// unique (user, project, filename) key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSummary {
    pub user_id: String,
    pub project_id: String,
    pub filename: String,
    pub summary: String,
}
