// Feedback / few-shot store: human corrections become prompt examples,
// per-field counters surface the fields the model keeps getting wrong.

pub mod cache;
pub mod handlers;
pub mod keywords;
pub mod models;
pub mod repository;
pub mod store;
