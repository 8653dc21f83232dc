//! Background job execution

pub mod worker;

pub use worker::{IngestJob, IngestWorker, JobQueue, UploadFile};
