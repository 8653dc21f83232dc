//! Upload acceptance and job status endpoints

use std::collections::{HashMap, HashSet};

use axum::extract::{Multipart, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::UploadLimits;
use crate::error::{Error, Result};
use crate::processing::{IngestJob, UploadFile};
use crate::server::state::AppState;
use crate::types::{JobRecord, JobStatus};

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub job_id: Uuid,
    pub status: &'static str,
    pub total_files: usize,
}

/// POST /upload: accept a multipart batch, persist the job record, and
/// schedule background processing. Returns the job id immediately.
pub async fn upload_files(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let limits = state.config().limits;

    let mut user_id = String::new();
    let mut project_id = String::new();
    let mut replace: HashSet<String> = HashSet::new();
    let mut rename: HashMap<String, String> = HashMap::new();
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("Failed to read multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();

        if let Some(filename) = field.file_name().map(|s| s.to_string()) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| Error::Validation(format!("Failed to read {}: {}", filename, e)))?;
            files.push((filename, bytes.to_vec()));
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| Error::Validation(format!("Failed to read field {}: {}", name, e)))?;
        match name.as_str() {
            "user_id" => user_id = value.trim().to_string(),
            "project_id" => project_id = value.trim().to_string(),
            // Malformed directive JSON is ignored, matching lenient intake
            "replace_filenames" => {
                if let Ok(parsed) = serde_json::from_str::<Vec<String>>(&value) {
                    replace = parsed.into_iter().collect();
                }
            }
            "rename_map" => {
                if let Ok(parsed) = serde_json::from_str::<HashMap<String, String>>(&value) {
                    rename = parsed;
                }
            }
            _ => {}
        }
    }

    validate_upload(&user_id, &project_id, &files, &rename, &limits)?;

    let effective: Vec<UploadFile> = files
        .into_iter()
        .map(|(name, bytes)| UploadFile {
            filename: rename.get(&name).cloned().unwrap_or(name),
            bytes,
        })
        .collect();

    let job_id = Uuid::new_v4();
    let total = effective.len();
    state.jobs().create_job(&JobRecord::new(job_id, total as u32)).await?;
    state
        .queue()
        .submit(IngestJob {
            job_id,
            user_id,
            project_id,
            files: effective,
            replace,
        })
        .await?;

    tracing::info!("[{}] Accepted upload of {} files", job_id, total);
    Ok(Json(UploadResponse {
        job_id,
        status: "processing",
        total_files: total,
    }))
}

/// Request-level validation; performed before the job record exists so a
/// rejected upload leaves no trace.
pub(crate) fn validate_upload(
    user_id: &str,
    project_id: &str,
    files: &[(String, Vec<u8>)],
    rename: &HashMap<String, String>,
    limits: &UploadLimits,
) -> Result<()> {
    if user_id.is_empty() || project_id.is_empty() {
        return Err(Error::Validation(
            "user_id and project_id are required".to_string(),
        ));
    }
    if files.is_empty() {
        return Err(Error::Validation("At least one file is required".to_string()));
    }
    if files.len() > limits.max_files_per_upload {
        return Err(Error::Validation(format!(
            "Too many files. Max {} allowed per upload.",
            limits.max_files_per_upload
        )));
    }
    for (filename, bytes) in files {
        if bytes.len() > limits.max_file_bytes() {
            return Err(Error::Validation(format!(
                "{} exceeds {} MB limit",
                filename, limits.max_file_mb
            )));
        }
    }

    let mut targets: HashSet<&str> = HashSet::new();
    for target in rename.values() {
        if !targets.insert(target.as_str()) {
            return Err(Error::Validation(format!(
                "rename target '{}' is not unique",
                target
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub job_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub total: u32,
    pub completed: u32,
    pub progress: f32,
    pub last_error: Option<String>,
    pub created_at: String,
}

/// GET /upload/status?job_id=…
pub async fn upload_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<JobStatusResponse>> {
    let job = state
        .jobs()
        .get_job(query.job_id)
        .await?
        .ok_or_else(|| Error::JobNotFound(query.job_id.to_string()))?;

    Ok(Json(JobStatusResponse {
        job_id: job.job_id,
        status: job.status,
        total: job.total,
        completed: job.completed,
        progress: job.progress(),
        last_error: job.last_error,
        created_at: job.created_at.to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> UploadLimits {
        UploadLimits {
            max_files_per_upload: 3,
            max_file_mb: 1,
        }
    }

    fn file(name: &str, len: usize) -> (String, Vec<u8>) {
        (name.to_string(), vec![0u8; len])
    }

    #[test]
    fn test_validate_upload_ok() {
        let files = vec![file("a.pdf", 10)];
        assert!(validate_upload("u", "p", &files, &HashMap::new(), &limits()).is_ok());
    }

    #[test]
    fn test_validate_upload_missing_ids() {
        let files = vec![file("a.pdf", 10)];
        assert!(validate_upload("", "p", &files, &HashMap::new(), &limits()).is_err());
        assert!(validate_upload("u", "", &files, &HashMap::new(), &limits()).is_err());
    }

    #[test]
    fn test_validate_upload_no_files() {
        assert!(validate_upload("u", "p", &[], &HashMap::new(), &limits()).is_err());
    }

    #[test]
    fn test_validate_upload_too_many_files() {
        let files = vec![
            file("a.pdf", 1),
            file("b.pdf", 1),
            file("c.pdf", 1),
            file("d.pdf", 1),
        ];
        let err = validate_upload("u", "p", &files, &HashMap::new(), &limits()).unwrap_err();
        assert!(err.to_string().contains("Too many files"));
    }

    #[test]
    fn test_validate_upload_oversize_message() {
        let files = vec![file("A.pdf", 1024 * 1024 + 1)];
        let err = validate_upload("u", "p", &files, &HashMap::new(), &limits()).unwrap_err();
        assert_eq!(err.to_string(), "A.pdf exceeds 1 MB limit");
    }

    #[test]
    fn test_validate_upload_duplicate_rename_targets() {
        let files = vec![file("a.pdf", 1), file("b.pdf", 1)];
        let rename: HashMap<String, String> = [
            ("a.pdf".to_string(), "same.pdf".to_string()),
            ("b.pdf".to_string(), "same.pdf".to_string()),
        ]
        .into_iter()
        .collect();
        assert!(validate_upload("u", "p", &files, &rename, &limits()).is_err());
    }
}
