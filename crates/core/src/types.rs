use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Maximum accepted length of a job identifier.
pub const MAX_JOB_ID_LEN: usize = 128;

/// Opaque identifier of one generation job, as issued by `POST /api/generate`.
///
/// The identifier is embedded verbatim in URL paths (`/api/status/{id}`,
/// `/ws/logs/{id}`), so construction rejects anything that would change
/// the shape of those paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobHandle(String);

impl JobHandle {
    /// Validate and wrap a job identifier.
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        validate_job_id(&id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for JobHandle {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<JobHandle> for String {
    fn from(handle: JobHandle) -> Self {
        handle.0
    }
}

/// Validate that a job identifier is safe to place in a URL path segment.
pub fn validate_job_id(id: &str) -> Result<(), CoreError> {
    if id.is_empty() {
        return Err(CoreError::Validation("job id must not be empty".into()));
    }
    if id.len() > MAX_JOB_ID_LEN {
        return Err(CoreError::Validation(format!(
            "job id exceeds {MAX_JOB_ID_LEN} characters"
        )));
    }
    if id.chars().all(|c| c == '.') {
        return Err(CoreError::Validation(format!(
            "job id {id:?} is a relative path segment"
        )));
    }
    if let Some(c) = id
        .chars()
        .find(|c| *c == '/' || *c == '?' || *c == '#' || c.is_whitespace() || c.is_control())
    {
        return Err(CoreError::Validation(format!(
            "job id contains invalid character {c:?}"
        )));
    }
    Ok(())
}

/// One text fragment pushed over the log channel.
///
/// `sequence` is 1-based and assigned in arrival order; the text is kept
/// exactly as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogChunk {
    pub sequence: u64,
    pub text: String,
}

impl LogChunk {
    pub fn new(sequence: u64, text: impl Into<String>) -> Self {
        Self {
            sequence,
            text: text.into(),
        }
    }
}
