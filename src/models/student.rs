//! Student record model and its history snapshots.

use serde::{Deserialize, Serialize};

/// A tracked student record.
///
/// `edit_token` authorizes updates in random-id mode. It is handed to the
/// caller exactly once at creation and never serialized afterwards, so read
/// and update responses can return this struct directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dob: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip)]
    pub edit_token: Option<String>,
    /// Bumped by exactly one on every successful update
    pub version: i64,
    pub updated_at: String,
}

/// Create/upsert response. The only place the edit token ever appears.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentCreated {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dob: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub version: i64,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_token: Option<String>,
}

/// Request body for creating a student.
///
/// Random mode uses only `name`; derived mode requires `dob` and `phone`
/// (they are the key material) and treats a repeat POST for the same pair as
/// an update of the existing record.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStudentRequest {
    #[serde(default)]
    pub dob: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Request body for updating an existing student.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStudentRequest {
    /// Required proof in random mode; unused in derived mode
    #[serde(default)]
    pub edit_token: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub dob: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Immutable snapshot of a student taken just before an update.
///
/// `version` is the version the record held when the snapshot was taken,
/// i.e. the version the update replaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub student_id: String,
    pub version: i64,
    pub snapshot: serde_json::Value,
    pub changed_at: String,
}
