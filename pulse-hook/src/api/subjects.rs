//! Subject read endpoints
//!
//! Polled by the dashboard; read-only views of the aggregate store.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use pulse_common::SubjectAggregate;
use serde::Serialize;

use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Serialize)]
pub struct SubjectListResponse {
    pub count: usize,
    pub subjects: Vec<String>,
}

/// GET /api/subjects
///
/// Subject ids in sorted order.
pub async fn list_subjects(State(state): State<AppState>) -> ApiResult<Json<SubjectListResponse>> {
    let subjects = state.store.subject_ids().await?;
    Ok(Json(SubjectListResponse {
        count: subjects.len(),
        subjects,
    }))
}

/// GET /api/subjects/:external_id
pub async fn get_subject(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> ApiResult<Json<SubjectAggregate>> {
    state
        .store
        .get(external_id.clone())
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("subject {}", external_id)))
}

pub fn subject_routes() -> Router<AppState> {
    Router::new()
        .route("/api/subjects", get(list_subjects))
        .route("/api/subjects/:external_id", get(get_subject))
}
