//! Job status values, point-in-time status snapshots and the terminal
//! outcome derived from them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobHandle, Timestamp};
use crate::wire::StatusResponse;

/// Detail reported when the server marks a job as failed without saying why.
pub const DEFAULT_ERROR_DETAIL: &str = "Generation failed";

/// Detail reported when the status endpoint stays unreachable.
pub const STATUS_UNAVAILABLE_DETAIL: &str = "status unavailable";

/// Lifecycle status reported by `GET /api/status/{job_id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    /// `completed` and `error` end a job; nothing follows them.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "error" => Ok(JobStatus::Error),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// Result of one status poll. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub job: JobHandle,
    pub status: JobStatus,
    pub artifact_location: Option<String>,
    pub error_detail: Option<String>,
    pub observed_at: Timestamp,
}

impl StatusSnapshot {
    pub fn new(job: JobHandle, status: JobStatus) -> Self {
        Self {
            job,
            status,
            artifact_location: None,
            error_detail: None,
            observed_at: chrono::Utc::now(),
        }
    }

    pub fn with_artifact_location(mut self, location: impl Into<String>) -> Self {
        self.artifact_location = Some(location.into());
        self
    }

    pub fn with_error_detail(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    /// Build a snapshot from a status response for `job`.
    ///
    /// Rejects unknown status strings and responses that name a different
    /// job. A `completed` response without an artifact location falls back
    /// to the job's download route.
    pub fn from_response(job: &JobHandle, response: StatusResponse) -> Result<Self, CoreError> {
        if let Some(ref reported) = response.job_id {
            if reported != job.as_str() {
                return Err(CoreError::Validation(format!(
                    "status response names job {reported}, expected {job}"
                )));
            }
        }

        let status: JobStatus = response.status.parse()?;
        let artifact_location = match (status, response.artifact_location) {
            (_, Some(location)) if !location.is_empty() => Some(location),
            (JobStatus::Completed, _) => Some(download_path(job)),
            _ => None,
        };

        Ok(Self {
            job: job.clone(),
            status,
            artifact_location,
            error_detail: response.error_detail.filter(|d| !d.is_empty()),
            observed_at: chrono::Utc::now(),
        })
    }
}

/// Server-relative download route for a job's artifact.
pub fn download_path(job: &JobHandle) -> String {
    format!("/api/download/{job}")
}

/// The single, final result of a tracked job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum TerminalOutcome {
    Completed {
        #[serde(rename = "artifactLocation")]
        artifact_location: String,
    },
    Error {
        detail: String,
    },
}

impl TerminalOutcome {
    /// Derive the outcome carried by a snapshot, if its status is terminal.
    pub fn from_snapshot(snapshot: &StatusSnapshot) -> Option<Self> {
        match snapshot.status {
            JobStatus::Completed => Some(TerminalOutcome::Completed {
                artifact_location: snapshot
                    .artifact_location
                    .clone()
                    .unwrap_or_else(|| download_path(&snapshot.job)),
            }),
            JobStatus::Error => Some(TerminalOutcome::Error {
                detail: snapshot
                    .error_detail
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ERROR_DETAIL.to_string()),
            }),
            JobStatus::Pending | JobStatus::Running => None,
        }
    }

    /// Outcome used once the status endpoint has failed too many times in a row.
    pub fn status_unavailable() -> Self {
        TerminalOutcome::Error {
            detail: STATUS_UNAVAILABLE_DETAIL.to_string(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TerminalOutcome::Completed { .. })
    }
}
