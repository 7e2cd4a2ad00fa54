use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, trace};

use crate::application::context::{BpmnStepContext, EngineServices};
use crate::application::handlers::ElementHandler;
use crate::document;
use crate::domain::definition::{DeployedProcess, ProcessDefinition};
use crate::domain::element_instance::{
    ElementId, ElementInstance, ElementInstanceKey, ElementIntent, ElementRecord, ElementType,
    ProcessId, StepEvent,
};
use crate::domain::incident::Incident;
use crate::EngineError;

#[cfg(feature = "testing")]
use crate::config::EngineConfig;
#[cfg(feature = "testing")]
use crate::domain::repository::memory::MemoryCollaborators;

/// Drives process instances by processing queued step events one at a time.
///
/// A handler error never escapes [`BpmnEngine::process_next`]: it is recorded
/// as an [`Incident`] on the process instance, which is halted while other
/// process instances keep running.
pub struct BpmnEngine {
    services: Arc<EngineServices>,
    deployments: DashMap<ProcessId, Arc<DeployedProcess>>,
    incidents: DashMap<ElementInstanceKey, Incident>,
}

impl BpmnEngine {
    /// Create an engine over the given collaborators
    pub fn new(services: EngineServices) -> Self {
        Self {
            services: Arc::new(services),
            deployments: DashMap::new(),
            incidents: DashMap::new(),
        }
    }

    /// Create an engine backed by in-memory collaborators
    #[cfg(feature = "testing")]
    pub fn in_memory(config: EngineConfig) -> (Self, MemoryCollaborators) {
        Self::with_memory(MemoryCollaborators::new(), config)
    }

    /// Create an engine backed by in-memory collaborators that keep the full
    /// event journal and variable write history
    #[cfg(feature = "testing")]
    pub fn in_memory_recording(config: EngineConfig) -> (Self, MemoryCollaborators) {
        Self::with_memory(MemoryCollaborators::recording(), config)
    }

    #[cfg(feature = "testing")]
    fn with_memory(collaborators: MemoryCollaborators, config: EngineConfig) -> (Self, MemoryCollaborators) {
        let engine = Self::new(collaborators.services(config));
        (engine, collaborators)
    }

    /// Collaborators used by the engine
    pub fn services(&self) -> &Arc<EngineServices> {
        &self.services
    }

    /// Validate and deploy a process definition
    pub fn deploy(&self, definition: ProcessDefinition) -> Result<(), EngineError> {
        let process = DeployedProcess::try_from(definition)?;
        info!(
            process_id = %process.process_id,
            version = %process.version,
            elements = process.elements.len(),
            "Deployed process"
        );
        self.deployments
            .insert(process.process_id.clone(), Arc::new(process));
        Ok(())
    }

    /// Register an already built process without validating it
    pub fn deploy_executable(&self, process: DeployedProcess) {
        self.deployments
            .insert(process.process_id.clone(), Arc::new(process));
    }

    /// Create a process instance and queue its activation
    pub async fn create_process_instance(
        &self,
        process_id: &str,
        variables: Value,
    ) -> Result<ElementInstanceKey, EngineError> {
        let process = self.deployment(&ProcessId::new(process_id))?;
        let document = variables_document(&variables)?;

        let key = self.services.tree.next_key().await?;
        let record = ElementRecord {
            process_id: process.process_id.clone(),
            process_instance_key: key,
            element_id: ElementId::new(process.process_id.as_str()),
            element_type: ElementType::Process,
            flow_scope_key: None,
            loop_counter: 0,
        };

        self.services.tree.create_instance(key, record.clone()).await?;
        self.services.variables.create_scope(key, None).await?;
        self.services
            .variables
            .set_from_document(key, &process.process_id, &document)
            .await?;
        self.services
            .tree
            .append_follow_up_event(key, ElementIntent::Activating, record)
            .await?;

        info!(key = %key, process_id = %process.process_id, "Created process instance");
        Ok(key)
    }

    /// Set variables on a scope.
    ///
    /// Multi-instance bodies of the same process instance that are still
    /// waiting for their input collection get their activation redelivered.
    pub async fn set_variables(
        &self,
        scope_key: ElementInstanceKey,
        variables: Value,
    ) -> Result<(), EngineError> {
        let instance = self.live_instance(scope_key).await?;
        let document = variables_document(&variables)?;
        self.services
            .variables
            .set_from_document(scope_key, &instance.record.process_id, &document)
            .await?;

        let process_instance_key = instance.record.process_instance_key;
        let waiting = self
            .services
            .tree
            .instances_in_state(process_instance_key, ElementIntent::Activating)
            .await?;
        for body in waiting
            .into_iter()
            .filter(|i| i.record.element_type == ElementType::MultiInstanceBody)
        {
            debug!(key = %body.key, element_id = %body.record.element_id, "Redelivering deferred activation");
            self.services
                .tree
                .redeliver(StepEvent::new(body.key, ElementIntent::Activating, body.record))
                .await?;
        }
        Ok(())
    }

    /// Complete an activity that is waiting in `Activated`
    pub async fn complete_activity(
        &self,
        key: ElementInstanceKey,
        variables: Value,
    ) -> Result<(), EngineError> {
        let instance = self.live_instance(key).await?;
        if instance.record.element_type != ElementType::ServiceTask
            || instance.state != ElementIntent::Activated
        {
            return Err(EngineError::InvalidState(format!(
                "Element instance {} ({:?}) is {} and cannot be completed",
                key, instance.record.element_type, instance.state
            )));
        }

        if !variables.is_null() {
            let document = variables_document(&variables)?;
            self.services
                .variables
                .set_from_document(key, &instance.record.process_id, &document)
                .await?;
        }

        self.services
            .tree
            .append_follow_up_event(key, ElementIntent::Completing, instance.record)
            .await
    }

    /// Terminate an element instance and everything below it
    pub async fn terminate(&self, key: ElementInstanceKey) -> Result<(), EngineError> {
        let instance = self.live_instance(key).await?;
        if !instance.can_terminate() {
            return Err(EngineError::InvalidState(format!(
                "Element instance {} is {} and cannot be terminated",
                key, instance.state
            )));
        }

        info!(key = %key, element_id = %instance.record.element_id, "Terminating element instance");
        self.services
            .tree
            .append_follow_up_event(key, ElementIntent::Terminating, instance.record)
            .await
    }

    /// Deliver a catch event to an instance subscribed to it
    pub async fn trigger_catch_event(
        &self,
        key: ElementInstanceKey,
        event_id: &str,
    ) -> Result<(), EngineError> {
        let instance = self.live_instance(key).await?;
        let subscribed = self.services.catch_events.subscribed_events(key).await?;
        if !subscribed.iter().any(|id| id == event_id) {
            return Err(EngineError::SubscriptionError(format!(
                "Element instance {} is not subscribed to {}",
                key, event_id
            )));
        }

        self.services
            .tree
            .append_follow_up_event(key, ElementIntent::EventOccurred, instance.record)
            .await
    }

    /// Queue an event again, as happens when a log is replayed
    pub async fn redeliver(&self, event: StepEvent) -> Result<(), EngineError> {
        self.services.tree.redeliver(event).await
    }

    /// Process the next queued event.
    ///
    /// Returns the event that was taken off the queue, or `None` when the
    /// queue is empty.
    pub async fn process_next(&self) -> Result<Option<StepEvent>, EngineError> {
        let Some(event) = self.services.tree.next_event().await? else {
            return Ok(None);
        };

        if self
            .incidents
            .contains_key(&event.record.process_instance_key)
        {
            debug!(
                key = %event.key,
                intent = %event.intent,
                process_instance_key = %event.record.process_instance_key,
                "Dropping event of a halted process instance"
            );
            return Ok(Some(event));
        }

        if let Err(err) = self.process_event(&event).await {
            self.raise_incident(&event, err);
        }
        Ok(Some(event))
    }

    /// Process events until the queue is empty and return how many were taken
    pub async fn run_until_idle(&self) -> Result<usize, EngineError> {
        let mut processed = 0;
        while self.process_next().await?.is_some() {
            processed += 1;
        }
        Ok(processed)
    }

    /// All open incidents
    pub fn incidents(&self) -> Vec<Incident> {
        let mut incidents: Vec<Incident> = self
            .incidents
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        incidents.sort_by_key(|incident| incident.process_instance_key);
        incidents
    }

    /// The incident halting a process instance, if any
    pub fn incident(&self, process_instance_key: ElementInstanceKey) -> Option<Incident> {
        self.incidents
            .get(&process_instance_key)
            .map(|incident| incident.clone())
    }

    async fn process_event(&self, event: &StepEvent) -> Result<(), EngineError> {
        let mut ctx = self.build_context(event).await?;
        let handler = ElementHandler::for_element(&ctx.element);

        trace!(key = %event.key, intent = %event.intent, element_id = %event.record.element_id, "Processing event");
        if !handler.handle(&mut ctx).await? {
            return Ok(());
        }

        if let Some(next) = event.intent.next() {
            self.services
                .tree
                .append_follow_up_event(event.key, next, event.record.clone())
                .await?;
        } else if event.intent.is_final() {
            let removed = self.services.tree.remove_subtree(event.key).await?;
            for key in &removed {
                self.services.variables.remove_scope(*key).await?;
            }
            trace!(key = %event.key, removed = removed.len(), "Removed finished element instances");
        }
        Ok(())
    }

    async fn build_context(&self, event: &StepEvent) -> Result<BpmnStepContext, EngineError> {
        let process = self.deployment(&event.record.process_id)?;
        let element = process.element(&event.record.element_id)?.clone();
        let element_instance = self.services.tree.get(event.key).await?;
        let flow_scope_instance = match event.record.flow_scope_key {
            Some(scope_key) => self.services.tree.get(scope_key).await?,
            None => None,
        };

        Ok(BpmnStepContext {
            services: self.services.clone(),
            process,
            key: event.key,
            intent: event.intent,
            record: event.record.clone(),
            element,
            element_instance,
            flow_scope_instance,
        })
    }

    fn raise_incident(&self, event: &StepEvent, err: EngineError) {
        let incident = Incident::new(event, &err);
        error!(
            key = %event.key,
            element_id = %event.record.element_id,
            intent = %event.intent,
            process_instance_key = %event.record.process_instance_key,
            error_type = %incident.error_type,
            "Raised incident: {}",
            err
        );
        self.incidents
            .insert(event.record.process_instance_key, incident);
    }

    fn deployment(&self, process_id: &ProcessId) -> Result<Arc<DeployedProcess>, EngineError> {
        self.deployments
            .get(process_id)
            .map(|process| Arc::clone(process.value()))
            .ok_or_else(|| EngineError::ProcessNotFound(process_id.to_string()))
    }

    /// An existing instance whose process instance is not halted
    async fn live_instance(&self, key: ElementInstanceKey) -> Result<ElementInstance, EngineError> {
        let instance = self
            .services
            .tree
            .get(key)
            .await?
            .ok_or(EngineError::ElementInstanceNotFound(key.0))?;
        if self
            .incidents
            .contains_key(&instance.record.process_instance_key)
        {
            return Err(EngineError::InvalidState(format!(
                "Process instance {} is halted by an incident",
                instance.record.process_instance_key
            )));
        }
        Ok(instance)
    }
}

/// Encode a JSON object of variables as a document
fn variables_document(variables: &Value) -> Result<Vec<u8>, EngineError> {
    match variables {
        Value::Null => Ok(document::EMPTY_DOCUMENT.to_vec()),
        Value::Object(_) => Ok(document::encode_json(variables)?),
        other => Err(EngineError::ValidationError(format!(
            "Variables must be a JSON object, got {}",
            other
        ))),
    }
}
