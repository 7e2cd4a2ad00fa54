//!
//! Cascade BPMN - Multi-instance execution for the Cascade BPMN runtime
//!
//! This crate executes BPMN multi-instance activities: a body element that
//! runs its inner activity once per item of an input collection, sequentially
//! or in parallel, and gathers one output per item into an ordered output
//! collection. It carries the surrounding process and activity handlers, the
//! element instance tree, variable scopes and the event loop needed to drive
//! it, behind traits with in-memory implementations.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - element instances, definitions and collaborator traits
pub mod domain;

/// Application services - step handlers and the engine
pub mod application;

/// Binary variable documents
pub mod document;

/// Engine configuration
pub mod config;

/// Logging setup
pub mod telemetry;

/// Error types
pub mod error;

// Re-export key types
pub use config::EngineConfig;
pub use error::{CodecError, EngineError};

// Application interfaces
pub use application::context::{BpmnStepContext, EngineServices};
pub use application::engine::BpmnEngine;
pub use application::handlers::{
    ActivityHandler, ElementHandler, MultiInstanceBodyHandler, ProcessHandler, TokenReconciliation,
};

// Re-export main API types for easy use
pub use domain::definition::{
    BoundaryEventDefinition, DeployedProcess, ElementDefinition, LoopCharacteristics,
    MultiInstanceDefinition, ProcessDefinition, ServiceTaskDefinition,
};
pub use domain::element_instance::{
    ElementId, ElementInstance, ElementInstanceKey, ElementIntent, ElementRecord, ElementType,
    ProcessId, StepEvent,
};
pub use domain::incident::Incident;
pub use domain::query::{JmesPathQueryProcessor, QueryProcessor};
pub use domain::repository::{
    CatchEventScope, CatchEventSubscriber, ElementInstanceTree, VariableStore,
};
