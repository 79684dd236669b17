use std::sync::Arc;

use crate::extraction::parser::ExtractionParser;
use crate::feedback::store::FeedbackStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub parser: Arc<ExtractionParser>,
    /// Also held by the parser for few-shot retrieval.
    pub feedback: Arc<FeedbackStore>,
    /// Label for the health endpoint: "postgres" or "memory".
    pub feedback_backend: &'static str,
}
