use std::sync::Arc;

use crate::config::EngineConfig;
use crate::domain::definition::{DeployedProcess, ExecutableElement};
use crate::domain::element_instance::{
    ElementInstance, ElementInstanceKey, ElementIntent, ElementRecord, StepEvent,
};
use crate::domain::query::QueryProcessor;
use crate::domain::repository::{CatchEventSubscriber, ElementInstanceTree, VariableStore};
use crate::EngineError;

/// Collaborators shared by every step handler
pub struct EngineServices {
    /// Element instances, tokens and the event queue
    pub tree: Arc<dyn ElementInstanceTree>,

    /// Variable scopes
    pub variables: Arc<dyn VariableStore>,

    /// Catch event subscriptions
    pub catch_events: Arc<dyn CatchEventSubscriber>,

    /// Expression evaluation
    pub queries: Arc<dyn QueryProcessor>,

    /// Engine configuration
    pub config: EngineConfig,
}

impl EngineServices {
    /// Create the service set
    pub fn new(
        tree: Arc<dyn ElementInstanceTree>,
        variables: Arc<dyn VariableStore>,
        catch_events: Arc<dyn CatchEventSubscriber>,
        queries: Arc<dyn QueryProcessor>,
        config: EngineConfig,
    ) -> Self {
        Self {
            tree,
            variables,
            catch_events,
            queries,
            config,
        }
    }
}

/// Everything a handler needs to process one step event
pub struct BpmnStepContext {
    /// Shared collaborators
    pub services: Arc<EngineServices>,

    /// The deployed process the instance belongs to
    pub process: Arc<DeployedProcess>,

    /// Key of the instance the event is addressed to
    pub key: ElementInstanceKey,

    /// Intent being processed
    pub intent: ElementIntent,

    /// Record carried by the event
    pub record: ElementRecord,

    /// The element the handler executes; the multi-instance body swaps in
    /// its inner activity while forwarding
    pub element: ExecutableElement,

    /// Current state of the instance, if it still exists
    pub element_instance: Option<ElementInstance>,

    /// Current state of the parent instance, if any
    pub flow_scope_instance: Option<ElementInstance>,
}

impl BpmnStepContext {
    /// The event this context was built for
    pub fn event(&self) -> StepEvent {
        StepEvent::new(self.key, self.intent, self.record.clone())
    }

    /// Element instance tree
    #[inline]
    pub fn tree(&self) -> &dyn ElementInstanceTree {
        self.services.tree.as_ref()
    }

    /// Variable store
    #[inline]
    pub fn variables(&self) -> &dyn VariableStore {
        self.services.variables.as_ref()
    }

    /// Catch event subscriber
    #[inline]
    pub fn catch_events(&self) -> &dyn CatchEventSubscriber {
        self.services.catch_events.as_ref()
    }

    /// Query processor
    #[inline]
    pub fn queries(&self) -> &dyn QueryProcessor {
        self.services.queries.as_ref()
    }

    /// Engine configuration
    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    /// Whether the instance is the root of its process instance
    #[inline]
    pub fn is_root(&self) -> bool {
        self.record.flow_scope_key.is_none()
    }

    /// The instance this event is addressed to, which must still exist
    pub fn require_element_instance(&self) -> Result<&ElementInstance, EngineError> {
        self.element_instance
            .as_ref()
            .ok_or(EngineError::ElementInstanceNotFound(self.key.0))
    }

    /// The parent instance, which must still exist
    pub fn require_flow_scope_instance(&self) -> Result<&ElementInstance, EngineError> {
        match (self.record.flow_scope_key, self.flow_scope_instance.as_ref()) {
            (_, Some(scope)) => Ok(scope),
            (Some(scope_key), None) => Err(EngineError::ElementInstanceNotFound(scope_key.0)),
            (None, None) => Err(EngineError::ElementClassification(format!(
                "Element instance {} of {} has no flow scope",
                self.key, self.record.element_id
            ))),
        }
    }
}
