//! MongoDB persistence: chunks, file summaries, and job records

pub mod jobs;
pub mod rag_store;

pub use jobs::JobStore;
pub use rag_store::{ChunkView, FileEntry, RagStore};
