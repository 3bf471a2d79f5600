//! JSON payloads exchanged with the DevCraft HTTP API.
//!
//! Request types reject blank fields before they are sent, so an empty
//! description never costs a network round trip. Lengths are left to the
//! server.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;

/// Body of `POST /api/analyze`.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct AnalyzeRequest {
    #[validate(length(min = 1))]
    pub description: String,
}

impl AnalyzeRequest {
    pub fn new(description: &str) -> Result<Self, CoreError> {
        let request = Self {
            description: description.trim().to_string(),
        };
        request.validate()?;
        Ok(request)
    }
}

/// Response of `POST /api/analyze`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub project_type: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// Body of `POST /api/generate`.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct GenerateRequest {
    #[validate(length(min = 1))]
    pub project_name: String,
    #[validate(length(min = 1))]
    pub description: String,
}

impl GenerateRequest {
    pub fn new(project_name: &str, description: &str) -> Result<Self, CoreError> {
        let request = Self {
            project_name: project_name.trim().to_string(),
            description: description.trim().to_string(),
        };
        request.validate()?;
        Ok(request)
    }
}

/// Response of `POST /api/generate`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    pub job_id: String,
}

/// Response of `GET /api/status/{job_id}`.
///
/// `status` stays a raw string here; unknown values are rejected when the
/// response is turned into a [`StatusSnapshot`](crate::status::StatusSnapshot).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub job_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub artifact_location: Option<String>,
    #[serde(default)]
    pub error_detail: Option<String>,
}
