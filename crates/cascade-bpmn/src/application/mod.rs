/// Step context and shared collaborators
pub mod context;

/// Step handlers per element type
pub mod handlers;

/// Event processing engine
pub mod engine;
