//! Multi-instance body
//!
//! The body instance wraps one inner activity and runs it once per item of its
//! input collection: one child after another when sequential, all at once
//! otherwise. Events of the body itself and events of its children both reach
//! this handler, since the children share the body's element ID. Child events
//! are told apart by their flow scope: a child's parent is the body instance,
//! whose element ID equals the child's.
//!
//! Each child gets its item as a local variable together with a loop counter.
//! When a child completes, its output element is written into the output
//! collection slot of its loop counter, so results keep input order whatever
//! order the children complete in.

use tracing::{debug, info};

use super::{
    activate_child, on_child_completed, on_child_terminated,
    should_handle, should_handle_event, should_handle_termination, terminate_children,
    ActivityHandler,
};
use crate::application::context::BpmnStepContext;
use crate::document::{self, ArrayElements};
use crate::domain::definition::{
    ExecutableActivity, ExecutableElement, ExecutableMultiInstanceBody,
};
use crate::domain::element_instance::{
    ElementInstance, ElementInstanceKey, ElementIntent, ElementRecord, ElementType,
};
use crate::domain::repository::CatchEventScope;
use crate::EngineError;

/// An evaluated input collection
struct InputCollection {
    bytes: Vec<u8>,
    len: usize,
}

impl InputCollection {
    fn items(&self) -> Result<ArrayElements<'_>, EngineError> {
        Ok(ArrayElements::new(&self.bytes)?)
    }

    fn item(&self, index: usize) -> Result<&[u8], EngineError> {
        match self.items()?.nth(index) {
            Some(item) => Ok(item?),
            None => Err(EngineError::InvalidInputCollection(format!(
                "No item at index {} of a collection of {}",
                index, self.len
            ))),
        }
    }
}

/// Handler for multi-instance bodies and the children they spawn
#[derive(Debug, Default, Clone, Copy)]
pub struct MultiInstanceBodyHandler {
    activity: ActivityHandler,
}

impl MultiInstanceBodyHandler {
    /// Process the event held by `ctx`
    pub async fn handle(&self, ctx: &mut BpmnStepContext) -> Result<bool, EngineError> {
        let body = match &ctx.element {
            ExecutableElement::MultiInstanceBody(body) => body.clone(),
            other => {
                return Err(EngineError::ElementClassification(format!(
                    "Expected a multi-instance body, got {:?} element {}",
                    other.element_type(),
                    other.id()
                )))
            }
        };

        if ctx.record.flow_scope_key.is_some() && ctx.flow_scope_instance.is_none() {
            debug!(
                key = %ctx.key,
                element_id = %ctx.record.element_id,
                intent = %ctx.intent,
                "Ignoring event of an instance whose flow scope no longer exists"
            );
            return Ok(false);
        }

        if self.is_inner_activity_event(ctx)? {
            return self.handle_inner_activity(ctx, &body).await;
        }

        match ctx.intent {
            ElementIntent::Activating => self.on_activating(ctx, &body).await,
            ElementIntent::Activated => self.on_activated(ctx, &body).await,
            ElementIntent::Completing => self.on_completing(ctx, &body).await,
            ElementIntent::Completed => {
                if !should_handle(ctx) {
                    return Ok(false);
                }
                on_child_completed(ctx).await?;
                Ok(true)
            }
            ElementIntent::Terminating => self.on_terminating(ctx).await,
            ElementIntent::Terminated => {
                if !should_handle_termination(ctx) {
                    return Ok(false);
                }
                on_child_terminated(ctx).await?;
                Ok(true)
            }
            ElementIntent::EventOccurred => self.on_event_occurred(ctx),
        }
    }

    /// Whether the event belongs to a child rather than to the body itself
    fn is_inner_activity_event(&self, ctx: &BpmnStepContext) -> Result<bool, EngineError> {
        let Some(scope) = ctx.flow_scope_instance.as_ref() else {
            return Err(EngineError::ElementClassification(format!(
                "Multi-instance body {} (instance {}) has no flow scope",
                ctx.record.element_id, ctx.key
            )));
        };

        let concerns_inner = scope.element_id() == &ctx.record.element_id;
        let is_body_record = ctx.record.element_type == ElementType::MultiInstanceBody;
        if concerns_inner == is_body_record {
            return Err(EngineError::ElementClassification(format!(
                "Element instance {} of {} has type {:?} but its flow scope is {} {}",
                ctx.key,
                ctx.record.element_id,
                ctx.record.element_type,
                scope.element_id(),
                scope.key
            )));
        }
        Ok(concerns_inner)
    }

    async fn handle_inner_activity(
        &self,
        ctx: &mut BpmnStepContext,
        body: &ExecutableMultiInstanceBody,
    ) -> Result<bool, EngineError> {
        let inner = body
            .inner_activity
            .as_ref()
            .ok_or_else(|| EngineError::MissingInnerActivity(body.id.to_string()))?;

        if ctx.intent == ElementIntent::Completed {
            if !should_handle(ctx) {
                return Ok(false);
            }
            self.on_inner_completed(ctx, body).await?;
        }

        self.forward_to_inner(ctx, inner).await
    }

    /// Run the inner activity's handler with the inner activity as the element
    async fn forward_to_inner(
        &self,
        ctx: &mut BpmnStepContext,
        inner: &ExecutableActivity,
    ) -> Result<bool, EngineError> {
        let body = std::mem::replace(&mut ctx.element, ExecutableElement::Activity(inner.clone()));
        let result = self.activity.handle(ctx).await;
        ctx.element = body;
        result
    }

    async fn on_activating(
        &self,
        ctx: &BpmnStepContext,
        body: &ExecutableMultiInstanceBody,
    ) -> Result<bool, EngineError> {
        if !should_handle(ctx) {
            return Ok(false);
        }

        let Some(collection) = self.read_input_collection(ctx, body, ctx.key).await? else {
            debug!(
                key = %ctx.key,
                element_id = %body.id,
                input_collection = %body.loop_characteristics.input_collection,
                "Input collection not resolvable yet, deferring activation"
            );
            return Ok(false);
        };

        ctx.catch_events()
            .subscribe(&CatchEventScope {
                element_instance_key: ctx.key,
                process_instance_key: ctx.record.process_instance_key,
                element_id: body.id.clone(),
                events: body.boundary_events.clone(),
            })
            .await?;

        debug!(
            key = %ctx.key,
            element_id = %body.id,
            items = collection.len,
            "Multi-instance body activating"
        );
        Ok(true)
    }

    async fn on_activated(
        &self,
        ctx: &BpmnStepContext,
        body: &ExecutableMultiInstanceBody,
    ) -> Result<bool, EngineError> {
        if !should_handle(ctx) {
            return Ok(false);
        }

        let instance = ctx.require_element_instance()?;
        if instance.active_tokens > 0 {
            debug!(key = %ctx.key, element_id = %body.id, "Iterations already created");
            return Ok(false);
        }

        let lc = &body.loop_characteristics;
        let collection = self
            .read_input_collection(ctx, body, ctx.key)
            .await?
            .ok_or_else(|| {
                EngineError::InvalidInputCollection(format!(
                    "Input collection {} of {} is no longer resolvable",
                    lc.input_collection, body.id
                ))
            })?;

        if let Some(output_collection) = &lc.output_collection {
            ctx.variables()
                .set_local(
                    ctx.key,
                    &ctx.record.process_id,
                    output_collection,
                    &document::nil_array(collection.len)?,
                )
                .await?;
        }

        if collection.len == 0 {
            debug!(key = %ctx.key, element_id = %body.id, "Empty input collection, completing");
            return Ok(true);
        }

        if lc.is_sequential {
            self.create_iteration(ctx, body, collection.item(0)?, 1).await?;
        } else {
            for (index, item) in collection.items()?.enumerate() {
                self.create_iteration(ctx, body, item?, index as u32 + 1)
                    .await?;
            }
        }

        info!(
            key = %ctx.key,
            element_id = %body.id,
            items = collection.len,
            sequential = lc.is_sequential,
            "Multi-instance body activated"
        );
        Ok(false)
    }

    async fn on_completing(
        &self,
        ctx: &BpmnStepContext,
        body: &ExecutableMultiInstanceBody,
    ) -> Result<bool, EngineError> {
        if !should_handle(ctx) {
            return Ok(false);
        }

        ctx.catch_events().unsubscribe(ctx.key).await?;

        if let Some(output_collection) = &body.loop_characteristics.output_collection {
            let value = ctx
                .variables()
                .get_local(ctx.key, output_collection)
                .await?
                .ok_or_else(|| {
                    EngineError::OutputCollection(format!(
                        "Output collection {} is missing on {}",
                        output_collection, ctx.key
                    ))
                })?;
            let scope = ctx.require_flow_scope_instance()?;
            ctx.variables()
                .set_local(scope.key, &ctx.record.process_id, output_collection, &value)
                .await?;
        }

        Ok(true)
    }

    async fn on_terminating(&self, ctx: &BpmnStepContext) -> Result<bool, EngineError> {
        if !should_handle_termination(ctx) {
            return Ok(false);
        }

        ctx.catch_events().unsubscribe(ctx.key).await?;
        let plan = terminate_children(ctx).await?;

        info!(
            key = %ctx.key,
            element_id = %ctx.record.element_id,
            terminated = plan.to_terminate.len(),
            in_flight = plan.in_flight,
            zombies = plan.zombies,
            "Multi-instance body terminating"
        );
        Ok(plan.is_settled())
    }

    /// Boundary events of the body are subscribed to but not acted on; the
    /// body's state is left untouched.
    fn on_event_occurred(&self, ctx: &BpmnStepContext) -> Result<bool, EngineError> {
        if should_handle_event(ctx) {
            debug!(
                key = %ctx.key,
                element_id = %ctx.record.element_id,
                "Event occurred on multi-instance body, nothing to do"
            );
        }
        Ok(false)
    }

    /// Continue a sequential loop and collect the child's output
    async fn on_inner_completed(
        &self,
        ctx: &BpmnStepContext,
        body: &ExecutableMultiInstanceBody,
    ) -> Result<(), EngineError> {
        let child = ctx.require_element_instance()?;
        let body_instance = ctx.require_flow_scope_instance()?;
        let loop_counter = child.loop_counter();
        let lc = &body.loop_characteristics;

        if lc.is_sequential {
            let collection = self
                .read_input_collection(ctx, body, body_instance.key)
                .await?
                .ok_or_else(|| {
                    EngineError::InvalidInputCollection(format!(
                        "Input collection {} of {} is no longer resolvable",
                        lc.input_collection, body.id
                    ))
                })?;
            let next = loop_counter as usize;
            if next < collection.len {
                self.create_iteration_in(ctx, body, body_instance, collection.item(next)?, loop_counter + 1)
                    .await?;
            }
        }

        if let Some(output_collection) = &lc.output_collection {
            let value = match &lc.output_element {
                Some(expression) => self.evaluate_output_element(ctx, expression, child).await?,
                None => document::nil(),
            };
            self.update_output_collection(ctx, body_instance, output_collection, loop_counter, &value)
                .await?;
        }

        Ok(())
    }

    async fn evaluate_output_element(
        &self,
        ctx: &BpmnStepContext,
        expression: &str,
        child: &ElementInstance,
    ) -> Result<Vec<u8>, EngineError> {
        let variables = self.variables_for(ctx, expression, child.key).await?;
        Ok(ctx
            .queries()
            .evaluate(expression, &variables)?
            .unwrap_or_else(document::nil))
    }

    async fn update_output_collection(
        &self,
        ctx: &BpmnStepContext,
        body_instance: &ElementInstance,
        output_collection: &str,
        loop_counter: u32,
        value: &[u8],
    ) -> Result<(), EngineError> {
        let current = ctx
            .variables()
            .get_local(body_instance.key, output_collection)
            .await?
            .ok_or_else(|| {
                EngineError::OutputCollection(format!(
                    "Output collection {} is missing on {}",
                    output_collection, body_instance.key
                ))
            })?;

        let index = (loop_counter as usize).checked_sub(1).ok_or_else(|| {
            EngineError::OutputCollection(format!(
                "Child of {} completed without a loop counter",
                body_instance.key
            ))
        })?;
        let updated = document::replace_array_element(&current, index, value)?;

        ctx.variables()
            .set_local(body_instance.key, &ctx.record.process_id, output_collection, &updated)
            .await?;

        debug!(
            key = %body_instance.key,
            output_collection = %output_collection,
            loop_counter = loop_counter,
            "Collected output element"
        );
        Ok(())
    }

    /// Create a child of the body being processed
    async fn create_iteration(
        &self,
        ctx: &BpmnStepContext,
        body: &ExecutableMultiInstanceBody,
        item: &[u8],
        loop_counter: u32,
    ) -> Result<ElementInstanceKey, EngineError> {
        let body_instance = ctx.require_element_instance()?;
        self.create_iteration_in(ctx, body, body_instance, item, loop_counter)
            .await
    }

    async fn create_iteration_in(
        &self,
        ctx: &BpmnStepContext,
        body: &ExecutableMultiInstanceBody,
        body_instance: &ElementInstance,
        item: &[u8],
        loop_counter: u32,
    ) -> Result<ElementInstanceKey, EngineError> {
        let inner = body
            .inner_activity
            .as_ref()
            .ok_or_else(|| EngineError::MissingInnerActivity(body.id.to_string()))?;

        let record = ElementRecord {
            process_id: ctx.record.process_id.clone(),
            process_instance_key: ctx.record.process_instance_key,
            element_id: inner.id.clone(),
            element_type: ElementType::ServiceTask,
            flow_scope_key: Some(body_instance.key),
            loop_counter,
        };
        let key = activate_child(ctx, record).await?;

        if let Some(output_variable) = self.output_element_variable(ctx, body) {
            ctx.variables()
                .set_local(key, &ctx.record.process_id, &output_variable, document::NIL)
                .await?;
        }
        if let Some(input_element) = &body.loop_characteristics.input_element {
            ctx.variables()
                .set_local(key, &ctx.record.process_id, input_element, item)
                .await?;
        }
        ctx.variables()
            .set_local(
                key,
                &ctx.record.process_id,
                &ctx.config().loop_counter_variable,
                &document::encode(&loop_counter)?,
            )
            .await?;

        debug!(
            key = %key,
            element_id = %inner.id,
            loop_counter = loop_counter,
            "Created multi-instance child"
        );
        Ok(key)
    }

    /// Evaluate the input collection from the variables visible to `scope_key`.
    ///
    /// `Ok(None)` means the collection cannot be resolved yet.
    async fn read_input_collection(
        &self,
        ctx: &BpmnStepContext,
        body: &ExecutableMultiInstanceBody,
        scope_key: ElementInstanceKey,
    ) -> Result<Option<InputCollection>, EngineError> {
        let expression = &body.loop_characteristics.input_collection;
        let variables = self.variables_for(ctx, expression, scope_key).await?;

        let Some(bytes) = ctx.queries().evaluate(expression, &variables)? else {
            return Ok(None);
        };

        let len = match document::array_length(&bytes) {
            Ok(len) => len,
            Err(_) => {
                let found = document::decode_json(&bytes)
                    .map(|value| value.to_string())
                    .unwrap_or_else(|e| e.to_string());
                return Err(EngineError::InvalidInputCollection(format!(
                    "Expected {} of {} to be an array, found {}",
                    expression, body.id, found
                )));
            }
        };

        let max = ctx.config().max_input_collection_size;
        if len > max {
            return Err(EngineError::InputCollectionTooLarge {
                element_id: body.id.to_string(),
                size: len,
                max,
            });
        }

        Ok(Some(InputCollection { bytes, len }))
    }

    /// The variable an output element reads, seeded as nil on every child so
    /// the child's result never falls through to an outer scope. Not seeded
    /// when it is the input element or the loop counter.
    fn output_element_variable(
        &self,
        ctx: &BpmnStepContext,
        body: &ExecutableMultiInstanceBody,
    ) -> Option<String> {
        let lc = &body.loop_characteristics;
        lc.output_collection.as_ref()?;
        let name = ctx.queries().root_variable(lc.output_element.as_deref()?)?;
        if lc.input_element.as_deref() == Some(name.as_str())
            || name == ctx.config().loop_counter_variable
        {
            return None;
        }
        Some(name)
    }

    /// The variables an expression needs, as one document
    async fn variables_for(
        &self,
        ctx: &BpmnStepContext,
        expression: &str,
        scope_key: ElementInstanceKey,
    ) -> Result<Vec<u8>, EngineError> {
        match ctx.queries().root_variable(expression) {
            Some(name) => ctx.variables().get_as_document(scope_key, &[name]).await,
            None => ctx.variables().get_visible_as_document(scope_key).await,
        }
    }
}
