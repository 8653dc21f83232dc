//! Environment-driven configuration for the ingestion pipeline

use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// MongoDB configuration
    pub mongo: MongoConfig,
    /// Remote embedding service configuration
    pub embedding: EmbeddingConfig,
    /// Chunking configuration
    pub chunking: ChunkingConfig,
    /// LLM provider configuration
    pub llm: LlmConfig,
    /// Upload limits
    pub limits: UploadLimits,
    /// Parser configuration
    pub parser: ParserConfig,
}

impl PipelineConfig {
    /// Load configuration from the environment.
    ///
    /// `MONGO_URI` and `EMBED_BASE_URL` are required; everything else has a
    /// default.
    pub fn from_env() -> Result<Self> {
        let mongo_uri = env::var("MONGO_URI")
            .map_err(|_| Error::Config("MONGO_URI is required".to_string()))?;
        let embed_base_url = env::var("EMBED_BASE_URL")
            .map_err(|_| Error::Config("EMBED_BASE_URL is required".to_string()))?;

        Ok(Self {
            server: ServerConfig {
                host: env_or("HOST", "0.0.0.0"),
                port: env_parse("PORT", 7860),
            },
            mongo: MongoConfig {
                uri: mongo_uri,
                db_name: env_or("MONGO_DB", "studybuddy"),
                insert_batch_size: env_parse("MONGO_INSERT_BATCH_SIZE", 200),
            },
            embedding: EmbeddingConfig {
                base_url: embed_base_url.trim_end_matches('/').to_string(),
                batch_size: env_parse("EMBED_BATCH_SIZE", 8),
                timeout_secs: 60,
            },
            chunking: ChunkingConfig {
                max_words: env_parse("CHUNK_MAX_WORDS", 450),
                min_words: env_parse("CHUNK_MIN_WORDS", 150),
                overlap_words: env_parse("CHUNK_OVERLAP_WORDS", 50),
            },
            llm: LlmConfig {
                base_url: env_or("LLM_BASE_URL", "https://integrate.api.nvidia.com/v1")
                    .trim_end_matches('/')
                    .to_string(),
                small_model: env_or("LLM_SMALL_MODEL", "meta/llama-3.1-8b-instruct"),
                large_model: env_or("LLM_LARGE_MODEL", "openai/gpt-oss-120b"),
                caption_model: env_or(
                    "LLM_CAPTION_MODEL",
                    "meta/llama-4-maverick-17b-128e-instruct",
                ),
                key_env_names: default_key_env_names(),
                timeout_secs: 30,
            },
            limits: UploadLimits {
                max_files_per_upload: env_parse("MAX_FILES_PER_UPLOAD", 15),
                max_file_mb: env_parse("MAX_FILE_MB", 50),
            },
            parser: ParserConfig {
                use_rich_pdf: env_bool("PARSER_USE_RICH_PDF", false),
            },
        })
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7860,
        }
    }
}

/// MongoDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoConfig {
    /// Connection string
    pub uri: String,
    /// Database name
    pub db_name: String,
    /// Chunk insert batch size
    pub insert_batch_size: usize,
}

/// Remote embedding service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of the embedding service; requests go to `{base_url}/embed`
    pub base_url: String,
    /// Texts per request
    pub batch_size: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// Chunk sizing configuration (word counts)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum fresh words per chunk
    pub max_words: usize,
    /// Soft minimum; blocks below this are never split
    pub min_words: usize,
    /// Words carried over from the previous chunk
    pub overlap_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_words: 450,
            min_words: 150,
            overlap_words: 50,
        }
    }
}

/// LLM provider configuration (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL; requests go to `{base_url}/chat/completions`
    pub base_url: String,
    /// Model for short, cheap completions
    pub small_model: String,
    /// Model for long-context completions
    pub large_model: String,
    /// Multimodal model for image captions
    pub caption_model: String,
    /// Env var names probed in order for an API key
    pub key_env_names: Vec<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://integrate.api.nvidia.com/v1".to_string(),
            small_model: "meta/llama-3.1-8b-instruct".to_string(),
            large_model: "openai/gpt-oss-120b".to_string(),
            caption_model: "meta/llama-4-maverick-17b-128e-instruct".to_string(),
            key_env_names: default_key_env_names(),
            timeout_secs: 30,
        }
    }
}

/// Upload limits
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UploadLimits {
    pub max_files_per_upload: usize,
    pub max_file_mb: usize,
}

impl UploadLimits {
    /// Per-file size limit in bytes
    pub fn max_file_bytes(&self) -> usize {
        self.max_file_mb * 1024 * 1024
    }

    /// Request body limit for the upload route, with slack for form fields
    pub fn max_upload_bytes(&self) -> usize {
        self.max_file_bytes() * self.max_files_per_upload + 1024 * 1024
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_files_per_upload: 15,
            max_file_mb: 50,
        }
    }
}

/// Parser configuration
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Enable the heavier per-page PDF text extraction strategy
    pub use_rich_pdf: bool,
}

/// Primary key var first, then numbered alternates
fn default_key_env_names() -> Vec<String> {
    let mut names = vec!["LLM_API_KEY".to_string()];
    for i in 1..=6 {
        names.push(format!("LLM_API_KEY_{}", i));
    }
    names
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr + Copy>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_env_names_order() {
        let names = default_key_env_names();
        assert_eq!(names[0], "LLM_API_KEY");
        assert_eq!(names[1], "LLM_API_KEY_1");
        assert_eq!(names.len(), 7);
    }

    #[test]
    fn test_upload_limits() {
        let limits = UploadLimits::default();
        assert_eq!(limits.max_file_bytes(), 50 * 1024 * 1024);
        assert!(limits.max_upload_bytes() > limits.max_file_bytes());
    }
}
