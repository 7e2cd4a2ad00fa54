/// Element instance domain models
pub mod element_instance;

/// Process definition domain models
pub mod definition;

/// Incidents raised by fatal errors
pub mod incident;

/// Expression evaluation
pub mod query;

/// Repository interfaces
pub mod repository;
