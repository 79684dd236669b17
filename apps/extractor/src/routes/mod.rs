pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::extraction::handlers as extraction;
use crate::feedback::handlers as feedback;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Extraction API
        .route("/api/v1/extractions", post(extraction::handle_extract))
        .route("/api/v1/completeness", post(extraction::handle_completeness))
        // Feedback API
        .route(
            "/api/v1/feedback/corrections",
            post(feedback::handle_record_correction),
        )
        .route(
            "/api/v1/feedback/segment-assignments",
            post(feedback::handle_record_segment_assignment),
        )
        .route(
            "/api/v1/feedback/confirmations",
            post(feedback::handle_record_confirmations),
        )
        .route("/api/v1/feedback/examples", get(feedback::handle_get_examples))
        .route(
            "/api/v1/feedback/problem-fields",
            get(feedback::handle_get_problem_fields),
        )
        .with_state(state)
}
