use tracing::debug;

use super::{
    on_child_completed, on_child_terminated, should_handle, should_handle_termination,
};
use crate::application::context::BpmnStepContext;
use crate::domain::element_instance::ElementIntent;
use crate::EngineError;

/// Handler for activities completed by an external worker.
///
/// The instance waits in `Activated` until the engine receives a completion
/// command for it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ActivityHandler;

impl ActivityHandler {
    /// Process the event held by `ctx`
    pub async fn handle(&self, ctx: &mut BpmnStepContext) -> Result<bool, EngineError> {
        match ctx.intent {
            ElementIntent::Activating | ElementIntent::Completing => Ok(should_handle(ctx)),
            ElementIntent::Activated => {
                if should_handle(ctx) {
                    debug!(
                        key = %ctx.key,
                        element_id = %ctx.record.element_id,
                        loop_counter = ctx.record.loop_counter,
                        "Activity waiting for completion"
                    );
                }
                Ok(false)
            }
            ElementIntent::Completed => {
                if !should_handle(ctx) {
                    return Ok(false);
                }
                on_child_completed(ctx).await?;
                Ok(true)
            }
            ElementIntent::Terminating => Ok(should_handle_termination(ctx)),
            ElementIntent::Terminated => {
                if !should_handle_termination(ctx) {
                    return Ok(false);
                }
                on_child_terminated(ctx).await?;
                Ok(true)
            }
            ElementIntent::EventOccurred => Ok(false),
        }
    }
}
