mod config;
mod db;
mod document;
mod errors;
mod extraction;
mod feedback;
mod llm_client;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::extraction::parser::ExtractionParser;
use crate::feedback::repository::{
    FeedbackRepository, InMemoryFeedbackRepository, PgFeedbackRepository,
};
use crate::feedback::store::FeedbackStore;
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on malformed values)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CV extractor v{}", env!("CARGO_PKG_VERSION"));

    // Feedback persistence: PostgreSQL when configured, otherwise in-process memory
    let (repo, feedback_backend): (Arc<dyn FeedbackRepository>, &'static str) =
        match &config.database_url {
            Some(url) => (Arc::new(PgFeedbackRepository::new(create_pool(url).await?)), "postgres"),
            None => {
                warn!("DATABASE_URL not set; feedback is kept in memory and lost on restart");
                (Arc::new(InMemoryFeedbackRepository::new()), "memory")
            }
        };
    let feedback = Arc::new(FeedbackStore::new(repo, config.few_shot_limit));

    // Initialize LLM client
    let llm = LlmClient::new(
        config.llm_endpoint.clone(),
        config.llm_api_key.clone(),
        config.llm_model.clone(),
        config.llm_api_style,
    )?;
    info!(
        "LLM client initialized (model: {}, style: {:?})",
        config.llm_model, config.llm_api_style
    );

    let parser = ExtractionParser::new(
        Arc::new(llm),
        Some(feedback.clone()),
        config.parser_settings(),
        config.completeness_policy()?,
    );
    if !parser.is_llm_configured() {
        warn!("LLM endpoint or API key missing; extractions will fail as unconfigured");
    }

    // Build app state
    let state = AppState {
        parser: Arc::new(parser),
        feedback,
        feedback_backend,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
