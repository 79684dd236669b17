// Document layer: layout-service input model and the line corpus packer.
// Nothing here calls the LLM.

pub mod models;
pub mod packer;
