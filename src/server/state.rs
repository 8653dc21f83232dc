//! Shared application state

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::processing::{IngestWorker, JobQueue};
use crate::providers::{Captioner, LlmClient, RemoteEmbeddingClient};
use crate::storage::{JobStore, RagStore};

/// Queue depth for pending ingestion jobs
const JOB_QUEUE_BUFFER: usize = 64;

/// Shared state handed to every route handler. Cheap to clone; all remote
/// clients live once behind the `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: PipelineConfig,
    store: Arc<RagStore>,
    jobs: Arc<JobStore>,
    queue: JobQueue,
}

impl AppState {
    /// Connect to MongoDB, ensure indexes, and spawn the background
    /// ingestion worker.
    pub async fn new(config: PipelineConfig) -> Result<Self> {
        tracing::info!("Initializing ingestion pipeline state...");

        let client = mongodb::Client::with_uri_str(&config.mongo.uri).await?;
        let db = client.database(&config.mongo.db_name);
        let store = Arc::new(RagStore::new(db.clone(), config.mongo.insert_batch_size));
        let jobs = Arc::new(JobStore::new(&db));

        match store.ping().await {
            Ok(()) => {
                tracing::info!("MongoDB connection successful");
                match store.ensure_indexes().await {
                    Ok(()) => tracing::info!("MongoDB indexes ensured"),
                    Err(e) => tracing::warn!("Index creation warning: {}", e),
                }
            }
            Err(e) => tracing::error!("MongoDB ping failed: {}", e),
        }

        let embedder = Arc::new(RemoteEmbeddingClient::new(&config.embedding));
        let llm = Arc::new(LlmClient::new(&config.llm));
        let captioner = Arc::new(Captioner::new(Arc::clone(&llm)));
        tracing::info!("Remote clients initialized (embedder at {})", config.embedding.base_url);

        let (queue, receiver) = JobQueue::new(JOB_QUEUE_BUFFER);
        let worker = Arc::new(IngestWorker::new(
            Arc::clone(&store),
            Arc::clone(&jobs),
            embedder,
            llm,
            captioner,
            config.chunking,
            config.parser,
        ));
        tokio::spawn(worker.run(receiver));

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                jobs,
                queue,
            }),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &RagStore {
        &self.inner.store
    }

    pub fn jobs(&self) -> &JobStore {
        &self.inner.jobs
    }

    pub fn queue(&self) -> &JobQueue {
        &self.inner.queue
    }
}
