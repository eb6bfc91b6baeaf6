//! Versioned update engine.
//!
//! Orchestrates the read-modify-snapshot-write cycle for student records:
//! every successful update snapshots the pre-update state into the history
//! log, bumps the version by exactly one, and commits both writes as a
//! single atomic unit. The history log plus the live record reconstruct the
//! full edit timeline with no gaps.

use chrono::Utc;
use subtle::ConstantTimeEq;

use crate::db::Repository;
use crate::errors::AppError;
use crate::identity::{self, IdMode};
use crate::models::{CreateStudentRequest, Student, UpdateStudentRequest};

/// Result of an upsert: the live record plus whether it was newly created.
///
/// `student.edit_token` is only populated on creation in random mode; the
/// boundary layer must surface it exactly once.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub student: Student,
    pub created: bool,
}

/// Coordinates record creation and versioned updates for one deployment's
/// id strategy.
#[derive(Clone)]
pub struct UpdateEngine {
    repo: Repository,
    mode: IdMode,
}

impl UpdateEngine {
    pub fn new(repo: Repository, mode: IdMode) -> Self {
        Self { repo, mode }
    }

    /// Create a record, or update it in place when the derived key already
    /// exists.
    pub async fn upsert(&self, request: &CreateStudentRequest) -> Result<UpsertOutcome, AppError> {
        if let Some(name) = request.name.as_deref() {
            identity::validate_name(name)?;
        }

        match self.mode {
            IdMode::Random => self.create_random(request).await,
            IdMode::Derived => self.upsert_derived(request).await,
        }
    }

    async fn create_random(
        &self,
        request: &CreateStudentRequest,
    ) -> Result<UpsertOutcome, AppError> {
        if let Some(dob) = request.dob.as_deref() {
            identity::validate_dob(dob)?;
        }
        if let Some(phone) = request.phone.as_deref() {
            identity::validate_phone(phone)?;
        }

        let student = Student {
            id: identity::generate_opaque_id(),
            dob: request.dob.clone(),
            phone: request.phone.clone(),
            name: request.name.clone(),
            edit_token: Some(identity::generate_edit_token()),
            version: 1,
            updated_at: Utc::now().to_rfc3339(),
        };
        self.repo.insert_student(&student).await?;

        Ok(UpsertOutcome {
            student,
            created: true,
        })
    }

    async fn upsert_derived(
        &self,
        request: &CreateStudentRequest,
    ) -> Result<UpsertOutcome, AppError> {
        let dob = request
            .dob
            .as_deref()
            .ok_or_else(|| AppError::Validation("dob is required".to_string()))?;
        let phone = request
            .phone
            .as_deref()
            .ok_or_else(|| AppError::Validation("phone is required".to_string()))?;
        let id = identity::derive_student_id(dob, phone)?;

        match self.repo.get_student(&id).await? {
            None => {
                let student = Student {
                    id,
                    dob: Some(dob.to_string()),
                    phone: Some(phone.to_string()),
                    name: request.name.clone(),
                    edit_token: None,
                    version: 1,
                    updated_at: Utc::now().to_rfc3339(),
                };
                self.repo.insert_student(&student).await?;

                Ok(UpsertOutcome {
                    student,
                    created: true,
                })
            }
            Some(existing) => {
                // Resolving the key to this record is the proof of
                // authority in derived mode; no token check.
                let changes = UpdateStudentRequest {
                    edit_token: None,
                    name: request.name.clone(),
                    dob: None,
                    phone: None,
                };
                let student = self.apply_update(existing, &changes).await?;

                Ok(UpsertOutcome {
                    student,
                    created: false,
                })
            }
        }
    }

    /// Update an existing record through the snapshot-then-write protocol.
    pub async fn update(
        &self,
        id: &str,
        request: &UpdateStudentRequest,
    ) -> Result<Student, AppError> {
        let existing = self
            .repo
            .get_student(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Student {} not found", id)))?;

        self.authorize(&existing, request.edit_token.as_deref())?;

        if let Some(name) = request.name.as_deref() {
            identity::validate_name(name)?;
        }
        if self.mode == IdMode::Random && (request.dob.is_some() || request.phone.is_some()) {
            return Err(AppError::Validation(
                "dob and phone cannot be changed on a randomly keyed record".to_string(),
            ));
        }

        self.apply_update(existing, request).await
    }

    fn authorize(&self, existing: &Student, presented: Option<&str>) -> Result<(), AppError> {
        match self.mode {
            // Possessing the (dob, phone) pair the id is built from is the
            // authorization; there is no separate token.
            IdMode::Derived => Ok(()),
            IdMode::Random => {
                let stored = existing.edit_token.as_deref().unwrap_or_default();
                let presented = presented.ok_or_else(|| {
                    AppError::Authorization("edit token is required".to_string())
                })?;
                if !token_matches(presented, stored) {
                    return Err(AppError::Authorization("invalid edit token".to_string()));
                }
                Ok(())
            }
        }
    }

    /// Validate and apply mutable fields, then hand the snapshot + guarded
    /// write to the repository. The derived id is never re-derived here: it
    /// stays fixed even when dob or phone change under it.
    async fn apply_update(
        &self,
        existing: Student,
        request: &UpdateStudentRequest,
    ) -> Result<Student, AppError> {
        let mut updated = existing.clone();

        if let Some(name) = &request.name {
            updated.name = Some(name.clone());
        }
        if self.mode == IdMode::Derived {
            if let Some(dob) = &request.dob {
                identity::validate_dob(dob)?;
                updated.dob = Some(dob.clone());
            }
            if let Some(phone) = &request.phone {
                identity::validate_phone(phone)?;
                updated.phone = Some(phone.clone());
            }
        }
        updated.version = existing.version + 1;
        updated.updated_at = Utc::now().to_rfc3339();

        self.repo
            .update_student_with_history(&existing, &updated)
            .await?;

        Ok(updated)
    }
}

/// Constant-time edit token comparison.
fn token_matches(presented: &str, stored: &str) -> bool {
    presented.as_bytes().ct_eq(stored.as_bytes()).into()
}
