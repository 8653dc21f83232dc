//! Per-upload job progress records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job status; transitions only move forward from `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

/// One record per upload request, stored in the `jobs` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Stored as a BSON binary uuid; lookups must use the same shape
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub job_id: Uuid,
    pub total: u32,
    pub completed: u32,
    pub status: JobStatus,
    pub last_error: Option<String>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job_id: Uuid, total: u32) -> Self {
        Self {
            job_id,
            total,
            completed: 0,
            status: JobStatus::Processing,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    /// Completion percentage for status responses
    pub fn progress(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        (self.completed as f32 / self.total as f32) * 100.0
    }
}

/// Partial update applied to a job record; only provided fields are written.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub completed: Option<u32>,
    pub status: Option<JobStatus>,
    pub last_error: Option<String>,
}

impl JobUpdate {
    pub fn completed(mut self, completed: u32) -> Self {
        self.completed = Some(completed);
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn last_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Processing).unwrap(),
            "\"processing\""
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::Completed).unwrap(),
            "\"completed\""
        );
        assert_eq!(serde_json::to_string(&JobStatus::Failed).unwrap(), "\"failed\"");
    }

    #[test]
    fn test_progress() {
        let mut job = JobRecord::new(Uuid::new_v4(), 4);
        assert_eq!(job.progress(), 0.0);
        job.completed = 2;
        assert_eq!(job.progress(), 50.0);
        let empty = JobRecord::new(Uuid::new_v4(), 0);
        assert_eq!(empty.progress(), 0.0);
    }
}
