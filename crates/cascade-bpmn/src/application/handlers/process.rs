use tracing::{debug, info};

use super::{activate_child, should_handle, should_handle_termination, terminate_children};
use crate::application::context::BpmnStepContext;
use crate::domain::element_instance::{ElementIntent, ElementRecord};
use crate::EngineError;

/// Handler for the root scope of a process instance
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessHandler;

impl ProcessHandler {
    /// Process the event held by `ctx`
    pub async fn handle(&self, ctx: &mut BpmnStepContext) -> Result<bool, EngineError> {
        match ctx.intent {
            ElementIntent::Activating | ElementIntent::Completing => Ok(should_handle(ctx)),
            ElementIntent::Activated => self.on_activated(ctx).await,
            ElementIntent::Completed => {
                if !should_handle(ctx) {
                    return Ok(false);
                }
                info!(key = %ctx.key, process_id = %ctx.record.process_id, "Process instance completed");
                Ok(true)
            }
            ElementIntent::Terminating => {
                if !should_handle_termination(ctx) {
                    return Ok(false);
                }
                let plan = terminate_children(ctx).await?;
                Ok(plan.is_settled())
            }
            ElementIntent::Terminated => {
                if !should_handle_termination(ctx) {
                    return Ok(false);
                }
                info!(key = %ctx.key, process_id = %ctx.record.process_id, "Process instance terminated");
                Ok(true)
            }
            ElementIntent::EventOccurred => Ok(false),
        }
    }

    async fn on_activated(&self, ctx: &BpmnStepContext) -> Result<bool, EngineError> {
        if !should_handle(ctx) {
            return Ok(false);
        }

        let instance = ctx.require_element_instance()?;
        if instance.active_tokens > 0 {
            debug!(key = %ctx.key, "Start element already activated");
            return Ok(false);
        }

        let start = ctx.process.element(&ctx.process.start_element)?;
        let record = ElementRecord {
            process_id: ctx.record.process_id.clone(),
            process_instance_key: ctx.record.process_instance_key,
            element_id: start.id().clone(),
            element_type: start.element_type(),
            flow_scope_key: Some(ctx.key),
            loop_counter: 0,
        };
        let key = activate_child(ctx, record).await?;

        debug!(
            key = %ctx.key,
            start_element = %start.id(),
            start_key = %key,
            "Activated start element"
        );
        Ok(false)
    }
}
