use serde::{Deserialize, Serialize};
use std::fmt;

/// Value object: Element instance key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementInstanceKey(pub u64);

impl fmt::Display for ElementInstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value object: Element ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementId(pub String);

impl ElementId {
    /// Create an element ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value object: Process ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub String);

impl ProcessId {
    /// Create a process ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle intents of an element instance.
///
/// The first six are states an instance moves through; `EventOccurred`
/// is delivered to an instance without changing its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementIntent {
    /// The element is being entered
    Activating,
    /// The element is active and waits for its work to finish
    Activated,
    /// The element is being left
    Completing,
    /// The element was left normally
    Completed,
    /// The element is being cancelled
    Terminating,
    /// The element was cancelled
    Terminated,
    /// An event the element is subscribed to was triggered
    EventOccurred,
}

impl ElementIntent {
    /// The intent that follows this one when a handler transitions
    pub fn next(self) -> Option<ElementIntent> {
        match self {
            ElementIntent::Activating => Some(ElementIntent::Activated),
            ElementIntent::Activated => Some(ElementIntent::Completing),
            ElementIntent::Completing => Some(ElementIntent::Completed),
            ElementIntent::Terminating => Some(ElementIntent::Terminated),
            ElementIntent::Completed | ElementIntent::Terminated | ElementIntent::EventOccurred => {
                None
            }
        }
    }

    /// Whether an instance in this state is still executing
    #[inline]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ElementIntent::Activating | ElementIntent::Activated | ElementIntent::Completing
        )
    }

    /// Whether an instance in this state can still be interrupted
    #[inline]
    pub fn can_terminate(self) -> bool {
        self.is_active()
    }

    /// Whether this is a terminal state
    #[inline]
    pub fn is_final(self) -> bool {
        matches!(self, ElementIntent::Completed | ElementIntent::Terminated)
    }

    /// Whether an instance in this state is being or has been terminated
    #[inline]
    pub fn is_terminating(self) -> bool {
        matches!(self, ElementIntent::Terminating | ElementIntent::Terminated)
    }

    /// Whether appending this intent updates the recorded instance state
    #[inline]
    pub fn updates_state(self) -> bool {
        self != ElementIntent::EventOccurred
    }
}

impl fmt::Display for ElementIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementIntent::Activating => "ELEMENT_ACTIVATING",
            ElementIntent::Activated => "ELEMENT_ACTIVATED",
            ElementIntent::Completing => "ELEMENT_COMPLETING",
            ElementIntent::Completed => "ELEMENT_COMPLETED",
            ElementIntent::Terminating => "ELEMENT_TERMINATING",
            ElementIntent::Terminated => "ELEMENT_TERMINATED",
            ElementIntent::EventOccurred => "EVENT_OCCURRED",
        };
        f.write_str(name)
    }
}

/// Kind of workflow element an instance executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// The process itself (root scope)
    Process,
    /// A looping element wrapping a single inner activity
    MultiInstanceBody,
    /// A task completed by an external worker
    ServiceTask,
}

/// The value carried by every step event of an element instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRecord {
    /// BPMN process ID of the deployed definition
    pub process_id: ProcessId,

    /// Key of the root process instance
    pub process_instance_key: ElementInstanceKey,

    /// ID of the element in the definition
    pub element_id: ElementId,

    /// Type of the element
    pub element_type: ElementType,

    /// Parent instance, `None` for the process instance itself
    pub flow_scope_key: Option<ElementInstanceKey>,

    /// 1-indexed iteration of a multi-instance child, 0 otherwise
    pub loop_counter: u32,
}

/// Event: process this element instance in the given intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEvent {
    /// Instance the event is addressed to
    pub key: ElementInstanceKey,

    /// Lifecycle intent to process
    pub intent: ElementIntent,

    /// Element record of the instance
    pub record: ElementRecord,
}

impl StepEvent {
    /// Create a step event
    pub fn new(key: ElementInstanceKey, intent: ElementIntent, record: ElementRecord) -> Self {
        Self {
            key,
            intent,
            record,
        }
    }
}

/// Aggregate: one activation of a workflow element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementInstance {
    /// Unique key
    pub key: ElementInstanceKey,

    /// Recorded lifecycle state
    pub state: ElementIntent,

    /// Element record
    pub record: ElementRecord,

    /// Execution branches currently owned by this scope
    pub active_tokens: u32,
}

impl ElementInstance {
    /// Create an instance in the `Activating` state
    pub fn new(key: ElementInstanceKey, record: ElementRecord) -> Self {
        Self {
            key,
            state: ElementIntent::Activating,
            record,
            active_tokens: 0,
        }
    }

    /// ID of the element
    #[inline]
    pub fn element_id(&self) -> &ElementId {
        &self.record.element_id
    }

    /// Parent instance key
    #[inline]
    pub fn flow_scope_key(&self) -> Option<ElementInstanceKey> {
        self.record.flow_scope_key
    }

    /// 1-indexed iteration of a multi-instance child
    #[inline]
    pub fn loop_counter(&self) -> u32 {
        self.record.loop_counter
    }

    /// Whether the instance is still executing
    #[inline]
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Whether the instance can still be interrupted
    #[inline]
    pub fn can_terminate(&self) -> bool {
        self.state.can_terminate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_progression() {
        let mut intent = ElementIntent::Activating;
        let mut seen = vec![intent];
        while let Some(next) = intent.next() {
            seen.push(next);
            intent = next;
        }
        assert_eq!(
            seen,
            vec![
                ElementIntent::Activating,
                ElementIntent::Activated,
                ElementIntent::Completing,
                ElementIntent::Completed,
            ]
        );
        assert_eq!(ElementIntent::Terminating.next(), Some(ElementIntent::Terminated));
        assert_eq!(ElementIntent::EventOccurred.next(), None);
    }

    #[test]
    fn test_intent_classification() {
        assert!(ElementIntent::Activating.can_terminate());
        assert!(ElementIntent::Completing.is_active());
        assert!(!ElementIntent::Completed.is_active());
        assert!(!ElementIntent::Terminating.can_terminate());
        assert!(ElementIntent::Terminated.is_final());
        assert!(ElementIntent::Terminated.is_terminating());
        assert!(!ElementIntent::EventOccurred.updates_state());
        assert_eq!(ElementIntent::Activated.to_string(), "ELEMENT_ACTIVATED");
    }

    #[test]
    fn test_new_instance() {
        let record = ElementRecord {
            process_id: ProcessId::new("process"),
            process_instance_key: ElementInstanceKey(1),
            element_id: ElementId::new("task"),
            element_type: ElementType::ServiceTask,
            flow_scope_key: Some(ElementInstanceKey(2)),
            loop_counter: 3,
        };
        let instance = ElementInstance::new(ElementInstanceKey(5), record);
        assert_eq!(instance.state, ElementIntent::Activating);
        assert_eq!(instance.active_tokens, 0);
        assert_eq!(instance.loop_counter(), 3);
        assert_eq!(instance.flow_scope_key(), Some(ElementInstanceKey(2)));
        assert_eq!(instance.element_id().as_str(), "task");
    }
}
