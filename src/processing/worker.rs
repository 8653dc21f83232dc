//! Background worker driving the per-file ingestion state machine
//!
//! One task per job; files within a job are processed strictly sequentially
//! so a poller observes monotonically non-decreasing progress. The first
//! per-file failure marks the job failed and aborts the remaining files.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::{ChunkingConfig, ParserConfig};
use crate::error::{Error, Result};
use crate::ingestion::{build_cards_from_pages, cheap_summarize, extract_pages};
use crate::providers::{Captioner, LlmClient, RemoteEmbeddingClient};
use crate::storage::{JobStore, RagStore};
use crate::types::{Card, JobStatus, JobUpdate, Page};

/// One file of an accepted upload, under its effective (post-rename) name
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// A queued ingestion job
#[derive(Debug)]
pub struct IngestJob {
    pub job_id: Uuid,
    pub user_id: String,
    pub project_id: String,
    pub files: Vec<UploadFile>,
    /// Effective filenames whose prior stored data is purged before parsing
    pub replace: HashSet<String>,
}

/// Sending half of the job queue, held by the HTTP layer.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<IngestJob>,
}

impl JobQueue {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<IngestJob>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (Self { sender }, receiver)
    }

    /// Enqueue a job. The job record must already be persisted so the
    /// submitter can return its id immediately.
    pub async fn submit(&self, job: IngestJob) -> Result<()> {
        self.sender
            .send(job)
            .await
            .map_err(|_| Error::internal("Ingestion worker is not running"))
    }
}

/// Per-file pipeline stage. Each transition consumes the prior stage's
/// payload and returns the next, so partial progress stays inspectable.
enum FileStage {
    Reconciling,
    Parsing,
    Captioning { pages: Vec<Page> },
    Chunking { pages: Vec<Page> },
    Embedding { pages: Vec<Page>, cards: Vec<Card> },
    Persisting { pages: Vec<Page>, cards: Vec<Card> },
    Done { cards_stored: usize },
}

pub struct IngestWorker {
    store: Arc<RagStore>,
    jobs: Arc<JobStore>,
    embedder: Arc<RemoteEmbeddingClient>,
    llm: Arc<LlmClient>,
    captioner: Arc<Captioner>,
    chunking: ChunkingConfig,
    parser: ParserConfig,
}

impl IngestWorker {
    pub fn new(
        store: Arc<RagStore>,
        jobs: Arc<JobStore>,
        embedder: Arc<RemoteEmbeddingClient>,
        llm: Arc<LlmClient>,
        captioner: Arc<Captioner>,
        chunking: ChunkingConfig,
        parser: ParserConfig,
    ) -> Self {
        Self {
            store,
            jobs,
            embedder,
            llm,
            captioner,
            chunking,
            parser,
        }
    }

    /// Drain the queue until every sender is dropped. Each job runs in its
    /// own task so a panic is contained and recorded instead of killing the
    /// worker.
    pub async fn run(self: Arc<Self>, mut receiver: mpsc::Receiver<IngestJob>) {
        tracing::info!("Ingestion worker started");
        while let Some(job) = receiver.recv().await {
            let job_id = job.job_id;
            let worker = Arc::clone(&self);
            let handle = tokio::spawn(async move { worker.run_job(job).await });
            if let Err(e) = handle.await {
                tracing::error!("[{}] Job task crashed: {}", job_id, e);
                let update = JobUpdate::default()
                    .status(JobStatus::Failed)
                    .last_error(format!("background task crashed: {}", e));
                if let Err(ue) = self.jobs.update_job(job_id, update).await {
                    tracing::error!("[{}] Failed to record crash: {}", job_id, ue);
                }
            }
        }
        tracing::info!("Ingestion worker stopped");
    }

    async fn run_job(&self, job: IngestJob) {
        let total = job.files.len() as u32;
        tracing::info!("[{}] Processing {} files", job.job_id, total);

        for (idx, file) in job.files.iter().enumerate() {
            let position = idx as u32 + 1;
            tracing::info!(
                "[{}] ({}/{}) Parsing {} ({} bytes)",
                job.job_id,
                position,
                total,
                file.filename,
                file.bytes.len()
            );

            match self.process_file(&job, file).await {
                Ok(cards_stored) => {
                    tracing::info!(
                        "[{}] Completed {} ({} cards)",
                        job.job_id,
                        file.filename,
                        cards_stored
                    );
                    let status = if position == total {
                        JobStatus::Completed
                    } else {
                        JobStatus::Processing
                    };
                    let update = JobUpdate::default().completed(position).status(status);
                    if let Err(e) = self.jobs.update_job(job.job_id, update).await {
                        tracing::error!("[{}] Failed to update progress: {}", job.job_id, e);
                    }
                }
                Err(e) => {
                    tracing::error!(
                        "[{}] Failed processing {}: {}",
                        job.job_id,
                        file.filename,
                        e
                    );
                    let update = JobUpdate::default()
                        .completed(position)
                        .status(JobStatus::Failed)
                        .last_error(e.to_string());
                    if let Err(ue) = self.jobs.update_job(job.job_id, update).await {
                        tracing::error!("[{}] Failed to record error: {}", job.job_id, ue);
                    }
                    return;
                }
            }
        }

        tracing::info!("[{}] Ingestion complete for {} files", job.job_id, total);
    }

    /// Advance one file through the stage machine to completion.
    async fn process_file(&self, job: &IngestJob, file: &UploadFile) -> Result<usize> {
        let mut stage = FileStage::Reconciling;
        loop {
            stage = match stage {
                FileStage::Reconciling => {
                    if job.replace.contains(&file.filename) {
                        self.store
                            .delete_file_data(&job.user_id, &job.project_id, &file.filename)
                            .await?;
                        tracing::info!("[{}] Replaced prior data for {}", job.job_id, file.filename);
                    }
                    FileStage::Parsing
                }
                FileStage::Parsing => {
                    let pages =
                        extract_pages(&file.filename, &file.bytes, self.parser.use_rich_pdf)?;
                    FileStage::Captioning { pages }
                }
                FileStage::Captioning { mut pages } => {
                    self.caption_pages(job.job_id, &file.filename, &mut pages).await;
                    FileStage::Chunking { pages }
                }
                FileStage::Chunking { pages } => {
                    let cards = build_cards_from_pages(
                        &self.llm,
                        &self.chunking,
                        &pages,
                        &file.filename,
                        &job.user_id,
                        &job.project_id,
                    )
                    .await;
                    tracing::info!(
                        "[{}] Built {} cards for {}",
                        job.job_id,
                        cards.len(),
                        file.filename
                    );
                    FileStage::Embedding { pages, cards }
                }
                FileStage::Embedding { pages, mut cards } => {
                    let texts: Vec<String> = cards.iter().map(|c| c.content.clone()).collect();
                    let vectors = self.embedder.embed(&texts).await;
                    if vectors.len() != cards.len() {
                        return Err(Error::internal(format!(
                            "embedding count mismatch: {} vectors for {} cards",
                            vectors.len(),
                            cards.len()
                        )));
                    }
                    for (card, vector) in cards.iter_mut().zip(vectors) {
                        card.embedding = vector;
                    }
                    FileStage::Persisting { pages, cards }
                }
                FileStage::Persisting { pages, cards } => {
                    if !cards.is_empty() {
                        self.store.store_chunks(&cards).await?;
                    }
                    let full_text = pages
                        .iter()
                        .map(|p| p.text.as_str())
                        .collect::<Vec<_>>()
                        .join("\n\n");
                    let summary = cheap_summarize(&self.llm, &full_text, 6).await;
                    self.store
                        .upsert_file_summary(&job.user_id, &job.project_id, &file.filename, &summary)
                        .await?;
                    FileStage::Done {
                        cards_stored: cards.len(),
                    }
                }
                FileStage::Done { cards_stored } => return Ok(cards_stored),
            };
        }
    }

    /// Caption any page images and fold the captions into the page text.
    /// Best-effort; a missing captioner result never blocks the file.
    async fn caption_pages(&self, job_id: Uuid, filename: &str, pages: &mut [Page]) {
        let image_count: usize = pages.iter().map(|p| p.images.len()).sum();
        if image_count == 0 {
            return;
        }
        tracing::info!("[{}] Captioning {} images in {}", job_id, image_count, filename);

        for page in pages.iter_mut() {
            let mut captions = Vec::new();
            for image in &page.images {
                let caption = self.captioner.caption_image(image).await;
                if !caption.is_empty() {
                    captions.push(format!("[Image] {}", caption));
                }
            }
            if !captions.is_empty() {
                page.text = format!("{}\n\n{}", page.text.trim_end(), captions.join("\n"))
                    .trim()
                    .to_string();
            }
            // Blobs are released once captioned
            page.images.clear();
        }
    }
}
