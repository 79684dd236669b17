// Extraction: cognitive schema, validator, confidence scoring, completeness
// audit and the orchestrator that drives the LLM through them.
// All LLM calls go through llm_client.

pub mod completeness;
pub mod confidence;
pub mod dialect;
pub mod handlers;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod parser;
pub mod prompts;
pub mod schema;
pub mod state_machine;
pub mod validator;
