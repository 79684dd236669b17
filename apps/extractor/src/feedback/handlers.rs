use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::feedback::models::{CorrectionVector, FewShotExample, FieldAccuracy, SegmentAssignment};
use crate::feedback::store::AssignmentReceipt;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionRequest {
    pub tenant_id: String,
    #[serde(flatten)]
    pub correction: CorrectionVector,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionCreated {
    pub correction_id: Uuid,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentAssignmentRequest {
    pub tenant_id: String,
    #[serde(flatten)]
    pub assignment: SegmentAssignment,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRequest {
    pub tenant_id: String,
    pub fields: Vec<String>,
}

#[derive(Serialize)]
pub struct ConfirmationResponse {
    pub confirmed: usize,
}

#[derive(Deserialize)]
pub struct ExamplesQuery {
    pub tenant_id: String,
    #[serde(default)]
    pub context: Option<String>,
    /// Comma-separated target fields.
    #[serde(default)]
    pub fields: Option<String>,
}

#[derive(Deserialize)]
pub struct TenantQuery {
    pub tenant_id: String,
}

/// POST /api/v1/feedback/corrections
pub async fn handle_record_correction(
    State(state): State<AppState>,
    Json(req): Json<CorrectionRequest>,
) -> Result<(StatusCode, Json<CorrectionCreated>), AppError> {
    let correction_id = state
        .feedback
        .record_correction(&req.tenant_id, &req.correction)
        .await?;
    Ok((StatusCode::CREATED, Json(CorrectionCreated { correction_id })))
}

/// POST /api/v1/feedback/segment-assignments
pub async fn handle_record_segment_assignment(
    State(state): State<AppState>,
    Json(req): Json<SegmentAssignmentRequest>,
) -> Result<(StatusCode, Json<AssignmentReceipt>), AppError> {
    let receipt = state
        .feedback
        .record_segment_assignment(&req.tenant_id, &req.assignment)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// POST /api/v1/feedback/confirmations
pub async fn handle_record_confirmations(
    State(state): State<AppState>,
    Json(req): Json<ConfirmationRequest>,
) -> Result<Json<ConfirmationResponse>, AppError> {
    let confirmed = state
        .feedback
        .record_confirmed_fields(&req.tenant_id, &req.fields)
        .await?;
    Ok(Json(ConfirmationResponse { confirmed }))
}

/// GET /api/v1/feedback/examples
pub async fn handle_get_examples(
    State(state): State<AppState>,
    Query(params): Query<ExamplesQuery>,
) -> Result<Json<Vec<FewShotExample>>, AppError> {
    let fields: Option<Vec<String>> = params.fields.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect()
    });
    let examples = state
        .feedback
        .get_relevant_examples(
            &params.tenant_id,
            params.context.as_deref().unwrap_or_default(),
            fields.as_deref(),
        )
        .await?;
    Ok(Json(examples))
}

/// GET /api/v1/feedback/problem-fields
pub async fn handle_get_problem_fields(
    State(state): State<AppState>,
    Query(params): Query<TenantQuery>,
) -> Result<Json<Vec<FieldAccuracy>>, AppError> {
    let problems = state.feedback.get_problematic_fields(&params.tenant_id).await?;
    Ok(Json(problems))
}
