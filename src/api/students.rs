//! Student API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{success, ApiResult};
use crate::engine::UpsertOutcome;
use crate::errors::AppError;
use crate::models::{
    CreateStudentRequest, HistoryEntry, Student, StudentCreated, UpdateStudentRequest,
};
use crate::AppState;

/// POST /students - Create a record, or upsert by derived key.
pub async fn create_student(
    State(state): State<AppState>,
    Json(request): Json<CreateStudentRequest>,
) -> ApiResult<StudentCreated> {
    let outcome = state.engine.upsert(&request).await?;
    success(student_created(outcome))
}

/// GET /students/:id - Get a single student. Never exposes the edit token.
pub async fn get_student(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Student> {
    match state.repo.get_student(&id).await? {
        Some(student) => success(student),
        None => Err(AppError::NotFound(format!("Student {} not found", id))),
    }
}

/// PUT /students/:id - Update a student through the versioned engine.
pub async fn update_student(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateStudentRequest>,
) -> ApiResult<Student> {
    let student = state.engine.update(&id, &request).await?;
    success(student)
}

/// GET /students/:id/history - List the edit history, oldest version first.
pub async fn get_student_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<HistoryEntry>> {
    if state.repo.get_student(&id).await?.is_none() {
        return Err(AppError::NotFound(format!("Student {} not found", id)));
    }

    let entries = state.repo.list_history(&id).await?;
    success(entries)
}

/// The edit token leaves the server exactly once, on the response to the
/// request that created the record.
fn student_created(outcome: UpsertOutcome) -> StudentCreated {
    let UpsertOutcome { student, created } = outcome;
    StudentCreated {
        id: student.id,
        dob: student.dob,
        phone: student.phone,
        name: student.name,
        version: student.version,
        updated_at: student.updated_at,
        edit_token: if created { student.edit_token } else { None },
    }
}
