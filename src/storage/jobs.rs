//! Job record CRUD against the `jobs` collection

use bson::{doc, Document};
use mongodb::{Collection, Database};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{JobRecord, JobUpdate};

/// One record per upload request. The background worker is the only writer
/// after creation; updates are last-write-wins on the provided fields.
pub struct JobStore {
    jobs: Collection<JobRecord>,
}

impl JobStore {
    pub fn new(db: &Database) -> Self {
        Self {
            jobs: db.collection("jobs"),
        }
    }

    pub async fn create_job(&self, record: &JobRecord) -> Result<()> {
        self.jobs.insert_one(record, None).await?;
        tracing::info!("[{}] Created job for {} files", record.job_id, record.total);
        Ok(())
    }

    /// Apply a partial update; only the provided fields are written.
    pub async fn update_job(&self, job_id: Uuid, update: JobUpdate) -> Result<()> {
        let set = update_document(&update)?;
        if set.is_empty() {
            return Ok(());
        }
        self.jobs
            .update_one(doc! { "job_id": id_filter(job_id) }, doc! { "$set": set }, None)
            .await?;
        Ok(())
    }

    /// `None` for unknown job ids
    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        Ok(self
            .jobs
            .find_one(doc! { "job_id": id_filter(job_id) }, None)
            .await?)
    }
}

/// Filter value in the same BSON shape `JobRecord.job_id` is stored as
/// (binary uuid, per its serde helper).
fn id_filter(job_id: Uuid) -> bson::Uuid {
    bson::Uuid::from_uuid_1(job_id)
}

fn update_document(update: &JobUpdate) -> Result<Document> {
    let mut set = Document::new();
    if let Some(completed) = update.completed {
        set.insert("completed", completed as i64);
    }
    if let Some(status) = update.status {
        set.insert("status", bson::to_bson(&status)?);
    }
    if let Some(ref last_error) = update.last_error {
        set.insert("last_error", last_error.as_str());
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobStatus;

    #[test]
    fn test_update_document_partial() {
        let set = update_document(&JobUpdate::default().completed(3)).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.get_i64("completed").unwrap(), 3);

        let set = update_document(
            &JobUpdate::default()
                .status(JobStatus::Failed)
                .last_error("boom"),
        )
        .unwrap();
        assert_eq!(set.get_str("status").unwrap(), "failed");
        assert_eq!(set.get_str("last_error").unwrap(), "boom");
        assert!(set.get("completed").is_none());
    }

    #[test]
    fn test_update_document_empty() {
        let set = update_document(&JobUpdate::default()).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_job_id_shape_matches_filter() {
        // The stored job_id and the lookup filters must serialize to the
        // same BSON shape, or updates and reads silently match nothing.
        let job_id = Uuid::new_v4();
        let record = bson::to_document(&JobRecord::new(job_id, 2)).unwrap();
        let stored = record.get("job_id").unwrap();
        assert_eq!(stored, &bson::Bson::from(id_filter(job_id)));
    }
}
