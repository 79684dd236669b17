use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Returns service status plus whether extraction can actually run.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "cv-extractor",
        "extractionEnabled": state.parser.settings().enabled,
        "llmConfigured": state.parser.is_llm_configured(),
        "feedbackBackend": state.feedback_backend
    }))
}
