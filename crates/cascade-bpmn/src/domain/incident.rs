use crate::domain::element_instance::{ElementId, ElementInstanceKey, ElementIntent, StepEvent};
use crate::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A fatal error recorded against a process instance.
///
/// While an incident is open the process instance is halted and no further
/// events are processed for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// The halted process instance
    pub process_instance_key: ElementInstanceKey,

    /// The element instance whose event failed
    pub element_instance_key: ElementInstanceKey,

    /// Element of the failing instance
    pub element_id: ElementId,

    /// Intent that was being processed
    pub intent: ElementIntent,

    /// Incident classification
    pub error_type: String,

    /// Error message
    pub message: String,

    /// When the incident was raised
    pub created_at: DateTime<Utc>,
}

impl Incident {
    /// Record an incident for the event that failed with `error`
    pub fn new(event: &StepEvent, error: &EngineError) -> Self {
        Self {
            process_instance_key: event.record.process_instance_key,
            element_instance_key: event.key,
            element_id: event.record.element_id.clone(),
            intent: event.intent,
            error_type: error.incident_type().to_string(),
            message: error.to_string(),
            created_at: Utc::now(),
        }
    }
}
