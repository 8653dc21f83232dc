//! Client for the remote `/embed` endpoint
//!
//! Inputs are sent in bounded batches to cap payload size and peak memory.
//! A failed batch degrades to zero vectors instead of aborting the call,
//! which preserves 1-to-1 positional correspondence with the input texts.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::config::EmbeddingConfig;
use crate::types::VECTOR_DIM;

pub struct RemoteEmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    batch_size: usize,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    vectors: Vec<Vec<f32>>,
}

impl RemoteEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            batch_size: config.batch_size.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Embed `texts`, returning one vector of length [`VECTOR_DIM`] per
    /// input, in input order. Batches that fail are replaced by zero vectors.
    pub async fn embed(&self, texts: &[String]) -> Vec<Vec<f32>> {
        if texts.is_empty() {
            return Vec::new();
        }

        let url = format!("{}/embed", self.base_url);
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(&url, batch).await);
        }

        vectors
    }

    async fn embed_batch(&self, url: &str, batch: &[String]) -> Vec<Vec<f32>> {
        let response = match self
            .http
            .post(url)
            .json(&json!({ "texts": batch }))
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Embedding request failed: {}; using zero vectors", e);
                return zero_batch(batch.len());
            }
        };

        if !response.status().is_success() {
            tracing::warn!(
                "Embedder returned HTTP {}; using zero vectors for batch of {}",
                response.status(),
                batch.len()
            );
            return zero_batch(batch.len());
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Failed to read embedder response: {}; using zero vectors", e);
                return zero_batch(batch.len());
            }
        };

        match parse_vectors(&body, batch.len()) {
            Some(vectors) => vectors,
            None => {
                tracing::warn!(
                    "Malformed embedder response for batch of {}; using zero vectors",
                    batch.len()
                );
                zero_batch(batch.len())
            }
        }
    }
}

/// Parse an embedder response body, accepting it only when the vector count
/// matches the batch size and every vector has the expected dimension.
pub(crate) fn parse_vectors(body: &str, expected: usize) -> Option<Vec<Vec<f32>>> {
    let parsed: EmbedResponse = serde_json::from_str(body).ok()?;
    if parsed.vectors.len() != expected {
        return None;
    }
    if parsed.vectors.iter().any(|v| v.len() != VECTOR_DIM) {
        return None;
    }
    Some(parsed.vectors)
}

fn zero_batch(count: usize) -> Vec<Vec<f32>> {
    vec![vec![0.0; VECTOR_DIM]; count]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vectors_body(count: usize, dim: usize) -> String {
        let vectors: Vec<Vec<f32>> = vec![vec![0.5; dim]; count];
        serde_json::to_string(&serde_json::json!({ "vectors": vectors })).unwrap()
    }

    #[test]
    fn test_parse_vectors_ok() {
        let body = vectors_body(3, VECTOR_DIM);
        let parsed = parse_vectors(&body, 3).unwrap();
        assert_eq!(parsed.len(), 3);
        assert!(parsed.iter().all(|v| v.len() == VECTOR_DIM));
    }

    #[test]
    fn test_parse_vectors_count_mismatch() {
        let body = vectors_body(2, VECTOR_DIM);
        assert!(parse_vectors(&body, 3).is_none());
    }

    #[test]
    fn test_parse_vectors_wrong_dimension() {
        let body = vectors_body(2, 16);
        assert!(parse_vectors(&body, 2).is_none());
    }

    #[test]
    fn test_parse_vectors_malformed() {
        assert!(parse_vectors("not json", 1).is_none());
        assert!(parse_vectors("{\"vectors\": \"nope\"}", 1).is_none());
    }

    #[test]
    fn test_zero_batch_dimension() {
        let batch = zero_batch(4);
        assert_eq!(batch.len(), 4);
        assert!(batch.iter().all(|v| v.len() == VECTOR_DIM && v.iter().all(|x| *x == 0.0)));
    }
}
