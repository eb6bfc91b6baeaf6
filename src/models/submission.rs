//! Submission models.
//!
//! Submissions are append-only and unversioned: arbitrary JSON payloads,
//! optionally linked to a user identity, immutable once created.

use serde::{Deserialize, Serialize};

/// A stored submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_subject: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: String,
}

/// Request body for appending a submission.
///
/// `user_subject` is passed explicitly by the boundary layer; anonymous
/// submissions leave it out.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubmissionRequest {
    pub payload: serde_json::Value,
    #[serde(default)]
    pub user_subject: Option<String>,
}

/// Submission enriched with the linked user's identity, for review surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionWithUser {
    pub id: String,
    pub created_at: String,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

/// Query parameters for listing recent submissions.
#[derive(Debug, Clone, Deserialize)]
pub struct ListSubmissionsQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}
