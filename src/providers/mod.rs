//! Remote service clients: embedding, LLM, captioning

pub mod captioner;
pub mod embedding;
pub mod llm;

pub use captioner::Captioner;
pub use embedding::RemoteEmbeddingClient;
pub use llm::{ChatOpts, LlmClient, ModelClass};
