//! Database repository for CRUD operations.
//!
//! Uses prepared statements and transactions for data integrity.

use chrono::Utc;
use serde_json::json;
use sqlx::{Row, SqlitePool};

use crate::errors::AppError;
use crate::identity;
use crate::models::{
    HistoryEntry, IdentityClaims, Student, Submission, SubmissionWithUser, UserIdentity,
};

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== STUDENT OPERATIONS ====================

    /// Get a student by ID.
    pub async fn get_student(&self, id: &str) -> Result<Option<Student>, AppError> {
        let row = sqlx::query(
            "SELECT id, dob, phone, name, edit_token, version, updated_at FROM students WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(student_from_row))
    }

    /// Insert a freshly created student at version 1.
    pub async fn insert_student(&self, student: &Student) -> Result<(), AppError> {
        let result = sqlx::query(
            "INSERT INTO students (id, dob, phone, name, edit_token, version, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&student.id)
        .bind(&student.dob)
        .bind(&student.phone)
        .bind(&student.name)
        .bind(&student.edit_token)
        .bind(student.version)
        .bind(&student.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                // A concurrent writer created the same id first. Retrying
                // routes the caller onto the update path.
                let current = self.get_student(&student.id).await?;
                Err(AppError::Conflict {
                    message: format!("Student {} already exists", student.id),
                    current_version: current.map(|s| s.version).unwrap_or(0),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Snapshot `existing` into the history log and persist `updated`, as
    /// one transaction.
    ///
    /// The UPDATE is guarded by the version read earlier; if a concurrent
    /// writer committed in between, either the history insert hits the
    /// (student_id, version) unique key or the guarded UPDATE touches zero
    /// rows. Both roll the whole transaction back with a conflict, so a
    /// partial write is never observable.
    pub async fn update_student_with_history(
        &self,
        existing: &Student,
        updated: &Student,
    ) -> Result<(), AppError> {
        let snapshot = snapshot_of(existing);
        let now = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;

        let history = sqlx::query(
            "INSERT INTO student_history (student_id, version, snapshot, changed_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&existing.id)
        .bind(existing.version)
        .bind(snapshot.to_string())
        .bind(&now)
        .execute(&mut *tx)
        .await;

        if let Err(e) = history {
            if is_unique_violation(&e) {
                tx.rollback().await?;
                return Err(self.conflict_for(&existing.id).await?);
            }
            return Err(e.into());
        }

        let result = sqlx::query(
            "UPDATE students SET dob = ?, phone = ?, name = ?, version = ?, updated_at = ? WHERE id = ? AND version = ?",
        )
        .bind(&updated.dob)
        .bind(&updated.phone)
        .bind(&updated.name)
        .bind(updated.version)
        .bind(&updated.updated_at)
        .bind(&existing.id)
        .bind(existing.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.conflict_for(&existing.id).await?);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn conflict_for(&self, id: &str) -> Result<AppError, AppError> {
        let current = self.get_student(id).await?;
        Ok(AppError::Conflict {
            message: "Concurrent modification detected".to_string(),
            current_version: current.map(|s| s.version).unwrap_or(0),
        })
    }

    // ==================== HISTORY OPERATIONS ====================

    /// List history entries for a student, oldest version first.
    pub async fn list_history(&self, student_id: &str) -> Result<Vec<HistoryEntry>, AppError> {
        let rows = sqlx::query(
            "SELECT student_id, version, snapshot, changed_at FROM student_history WHERE student_id = ? ORDER BY version",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(history_from_row).collect()
    }

    /// Count history entries for a student.
    pub async fn count_history(&self, student_id: &str) -> Result<i64, AppError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM student_history WHERE student_id = ?")
            .bind(student_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    // ==================== SUBMISSION OPERATIONS ====================

    /// Append a submission, anonymous or linked to a user identity.
    pub async fn insert_submission(
        &self,
        payload: &serde_json::Value,
        user_subject: Option<&str>,
    ) -> Result<Submission, AppError> {
        let id = identity::generate_opaque_id();
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "INSERT INTO submissions (id, user_subject, payload, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(user_subject)
        .bind(payload.to_string())
        .bind(&now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(Submission {
                id,
                user_subject: user_subject.map(str::to_string),
                payload: payload.clone(),
                created_at: now,
            }),
            Err(e) if is_foreign_key_violation(&e) => Err(AppError::Validation(
                "userSubject does not reference a known user".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// List recent submissions, newest first, bounded by `limit`.
    pub async fn list_recent_submissions(&self, limit: i64) -> Result<Vec<Submission>, AppError> {
        let rows = sqlx::query(
            "SELECT id, user_subject, payload, created_at FROM submissions ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(submission_from_row).collect()
    }

    /// Get a submission by ID.
    pub async fn get_submission(&self, id: &str) -> Result<Option<Submission>, AppError> {
        let row = sqlx::query(
            "SELECT id, user_subject, payload, created_at FROM submissions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(submission_from_row).transpose()
    }

    /// Get a submission with the linked user's identity attached.
    pub async fn get_submission_with_user(
        &self,
        id: &str,
    ) -> Result<Option<SubmissionWithUser>, AppError> {
        let row = sqlx::query(
            r#"SELECT s.id, s.user_subject, s.payload, s.created_at,
                      u.email AS user_email, u.name AS user_name
               FROM submissions s
               LEFT JOIN users u ON s.user_subject = u.subject
               WHERE s.id = ?"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(submission_with_user_from_row).transpose()
    }

    // ==================== USER OPERATIONS ====================

    /// Insert or refresh the identity mirror for one provider subject.
    ///
    /// Claims overwrite the stored mirror on every call; `last_login_at` is
    /// bumped either way.
    pub async fn upsert_identity(
        &self,
        claims: &IdentityClaims,
    ) -> Result<UserIdentity, AppError> {
        let now = Utc::now().to_rfc3339();

        match self.get_identity(&claims.subject).await? {
            None => {
                sqlx::query(
                    "INSERT INTO users (subject, email, name, picture, created_at, last_login_at) VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&claims.subject)
                .bind(&claims.email)
                .bind(&claims.name)
                .bind(&claims.picture)
                .bind(&now)
                .bind(&now)
                .execute(&self.pool)
                .await?;

                Ok(UserIdentity {
                    subject: claims.subject.clone(),
                    email: claims.email.clone(),
                    name: claims.name.clone(),
                    picture: claims.picture.clone(),
                    created_at: now.clone(),
                    last_login_at: now,
                })
            }
            Some(user) => {
                sqlx::query(
                    "UPDATE users SET email = ?, name = ?, picture = ?, last_login_at = ? WHERE subject = ?",
                )
                .bind(&claims.email)
                .bind(&claims.name)
                .bind(&claims.picture)
                .bind(&now)
                .bind(&claims.subject)
                .execute(&self.pool)
                .await?;

                Ok(UserIdentity {
                    subject: user.subject,
                    email: claims.email.clone(),
                    name: claims.name.clone(),
                    picture: claims.picture.clone(),
                    created_at: user.created_at,
                    last_login_at: now,
                })
            }
        }
    }

    /// Get a user identity by provider subject.
    pub async fn get_identity(&self, subject: &str) -> Result<Option<UserIdentity>, AppError> {
        let row = sqlx::query(
            "SELECT subject, email, name, picture, created_at, last_login_at FROM users WHERE subject = ?",
        )
        .bind(subject)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(user_from_row))
    }
}

// Helper functions for row conversion

fn student_from_row(row: &sqlx::sqlite::SqliteRow) -> Student {
    Student {
        id: row.get("id"),
        dob: row.get("dob"),
        phone: row.get("phone"),
        name: row.get("name"),
        edit_token: row.get("edit_token"),
        version: row.get("version"),
        updated_at: row.get("updated_at"),
    }
}

/// Structural copy of the record's fields at its current version. The edit
/// token is a credential, not state, and stays out of snapshots.
fn snapshot_of(student: &Student) -> serde_json::Value {
    json!({
        "id": student.id,
        "dob": student.dob,
        "phone": student.phone,
        "name": student.name,
        "version": student.version,
        "updatedAt": student.updated_at,
    })
}

fn history_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<HistoryEntry, AppError> {
    let snapshot_str: String = row.get("snapshot");
    let snapshot = serde_json::from_str(&snapshot_str)
        .map_err(|e| AppError::Storage(format!("Corrupt history snapshot: {}", e)))?;

    Ok(HistoryEntry {
        student_id: row.get("student_id"),
        version: row.get("version"),
        snapshot,
        changed_at: row.get("changed_at"),
    })
}

fn submission_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Submission, AppError> {
    let payload_str: String = row.get("payload");
    let payload = serde_json::from_str(&payload_str)
        .map_err(|e| AppError::Storage(format!("Corrupt submission payload: {}", e)))?;

    Ok(Submission {
        id: row.get("id"),
        user_subject: row.get("user_subject"),
        payload,
        created_at: row.get("created_at"),
    })
}

fn submission_with_user_from_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<SubmissionWithUser, AppError> {
    let payload_str: String = row.get("payload");
    let payload: serde_json::Value = serde_json::from_str(&payload_str)
        .map_err(|e| AppError::Storage(format!("Corrupt submission payload: {}", e)))?;

    // The stored identity wins; a name the submitter typed into the payload
    // is only a fallback when no user row carries one.
    let stored_name: Option<String> = row.get("user_name");
    let user_name = stored_name.or_else(|| payload_identity_name(&payload));

    Ok(SubmissionWithUser {
        id: row.get("id"),
        created_at: row.get("created_at"),
        payload,
        user_subject: row.get("user_subject"),
        user_email: row.get("user_email"),
        user_name,
    })
}

fn payload_identity_name(payload: &serde_json::Value) -> Option<String> {
    let name = payload.get("identity")?.get("name")?.as_str()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> UserIdentity {
    UserIdentity {
        subject: row.get("subject"),
        email: row.get("email"),
        name: row.get("name"),
        picture: row.get("picture"),
        created_at: row.get("created_at"),
        last_login_at: row.get("last_login_at"),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}
