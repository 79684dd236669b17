use anyhow::Context;
use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::Value;

use crate::document::models::DocumentLayout;
use crate::document::packer::pack_document;
use crate::errors::AppError;
use crate::extraction::completeness::{validate_completeness, CompletenessReport};
use crate::extraction::dialect::{detect_dialect, from_canonical, to_canonical, SchemaDialect};
use crate::extraction::parser::ExtractionRequest;
use crate::extraction::schema::parse_canonical;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionHttpRequest {
    #[serde(flatten)]
    pub request: ExtractionRequest,
    /// Dialect of the response payload.
    #[serde(default)]
    pub dialect: SchemaDialect,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletenessHttpRequest {
    pub layout: DocumentLayout,
    /// A cognitive response in either dialect.
    pub response: Value,
}

/// POST /api/v1/extractions
pub async fn handle_extract(
    State(state): State<AppState>,
    Json(req): Json<ExtractionHttpRequest>,
) -> Result<Json<Value>, AppError> {
    if req.request.layout.pages.is_empty() {
        return Err(AppError::Validation("layout has no pages".to_string()));
    }
    let success = state.parser.extract(&req.request).await?;
    let payload = serde_json::to_value(&success).context("Failed to serialize extraction")?;
    Ok(Json(from_canonical(payload, req.dialect)))
}

/// POST /api/v1/completeness
/// Recomputes the completeness report for an audit pair of layout and response.
pub async fn handle_completeness(
    State(state): State<AppState>,
    Json(req): Json<CompletenessHttpRequest>,
) -> Result<Json<CompletenessReport>, AppError> {
    let dialect = detect_dialect(&req.response);
    let response = parse_canonical(to_canonical(req.response, dialect)).map_err(|errors| {
        let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        AppError::Validation(format!("response is not a valid cognitive response: {}", joined.join("; ")))
    })?;

    let corpus = pack_document(&req.layout, &state.parser.settings().packer);
    Ok(Json(validate_completeness(
        &corpus,
        &response,
        state.parser.policy(),
    )))
}
