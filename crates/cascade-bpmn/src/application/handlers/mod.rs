//! Step handlers, one per element type
//!
//! A handler processes one step event and returns whether the instance should
//! move on to the next intent. Returning `false` leaves the instance where it
//! is: either the event was stale, or progress depends on another event.

mod activity;
mod multi_instance;
mod process;
mod termination;

pub use activity::ActivityHandler;
pub use multi_instance::MultiInstanceBodyHandler;
pub use process::ProcessHandler;
pub use termination::TokenReconciliation;

pub(crate) use termination::terminate_children;

use crate::application::context::BpmnStepContext;
use crate::domain::definition::ExecutableElement;
use crate::domain::element_instance::{ElementInstanceKey, ElementIntent, ElementRecord};
use crate::EngineError;

/// Handler dispatch over the supported element types
#[derive(Debug, Clone, Copy)]
pub enum ElementHandler {
    /// Root scope of a process instance
    Process(ProcessHandler),
    /// A plain activity
    Activity(ActivityHandler),
    /// A multi-instance body and its inner activity
    MultiInstanceBody(MultiInstanceBodyHandler),
}

impl ElementHandler {
    /// The handler for a deployed element
    pub fn for_element(element: &ExecutableElement) -> Self {
        match element {
            ExecutableElement::Process(_) => ElementHandler::Process(ProcessHandler),
            ExecutableElement::Activity(_) => ElementHandler::Activity(ActivityHandler),
            ExecutableElement::MultiInstanceBody(_) => {
                ElementHandler::MultiInstanceBody(MultiInstanceBodyHandler::default())
            }
        }
    }

    /// Process the event held by `ctx`
    pub async fn handle(&self, ctx: &mut BpmnStepContext) -> Result<bool, EngineError> {
        match self {
            ElementHandler::Process(handler) => handler.handle(ctx).await,
            ElementHandler::Activity(handler) => handler.handle(ctx).await,
            ElementHandler::MultiInstanceBody(handler) => handler.handle(ctx).await,
        }
    }
}

/// The recorded state of the instance matches the intent being processed
pub(crate) fn is_state_same_as_element_state(ctx: &BpmnStepContext) -> bool {
    ctx.element_instance
        .as_ref()
        .map_or(false, |instance| instance.state == ctx.intent)
}

/// The instance is the root or its parent is still executing
pub(crate) fn is_flow_scope_active(ctx: &BpmnStepContext) -> bool {
    ctx.is_root()
        || ctx
            .flow_scope_instance
            .as_ref()
            .map_or(false, |scope| scope.is_active())
}

/// Guard for the activation and completion intents
pub(crate) fn should_handle(ctx: &BpmnStepContext) -> bool {
    is_state_same_as_element_state(ctx) && is_flow_scope_active(ctx)
}

/// Guard for the termination intents, which also run under a terminating parent
pub(crate) fn should_handle_termination(ctx: &BpmnStepContext) -> bool {
    is_state_same_as_element_state(ctx)
        && (ctx.is_root()
            || ctx.flow_scope_instance.as_ref().map_or(false, |scope| {
                scope.is_active() || scope.state == ElementIntent::Terminating
            }))
}

/// Guard for events delivered to an executing instance
pub(crate) fn should_handle_event(ctx: &BpmnStepContext) -> bool {
    ctx.element_instance
        .as_ref()
        .map_or(false, |instance| instance.is_active())
        && is_flow_scope_active(ctx)
}

/// Create a child instance with its variable scope and queue its activation
pub(crate) async fn activate_child(
    ctx: &BpmnStepContext,
    record: ElementRecord,
) -> Result<ElementInstanceKey, EngineError> {
    let key = ctx.tree().next_key().await?;
    let scope_key = record.flow_scope_key;

    ctx.tree().create_instance(key, record.clone()).await?;
    ctx.variables().create_scope(key, scope_key).await?;
    ctx.tree()
        .append_follow_up_event(key, ElementIntent::Activating, record)
        .await?;
    Ok(key)
}

/// Release the token the completed instance held on its parent
pub(crate) async fn on_child_completed(ctx: &BpmnStepContext) -> Result<(), EngineError> {
    let Some(scope_key) = ctx.record.flow_scope_key else {
        return Ok(());
    };

    let scope = ctx.tree().consume_token(scope_key).await?;
    if scope.state == ElementIntent::Activated && scope.active_tokens == 0 {
        ctx.tree()
            .append_follow_up_event(scope.key, ElementIntent::Completing, scope.record.clone())
            .await?;
    }
    Ok(())
}

/// Release the token the terminated instance held on its parent
pub(crate) async fn on_child_terminated(ctx: &BpmnStepContext) -> Result<(), EngineError> {
    let Some(scope_key) = ctx.record.flow_scope_key else {
        return Ok(());
    };

    let scope = ctx.tree().consume_token(scope_key).await?;
    if scope.active_tokens == 0 {
        match scope.state {
            ElementIntent::Terminating => {
                ctx.tree()
                    .append_follow_up_event(scope.key, ElementIntent::Terminated, scope.record.clone())
                    .await?;
            }
            ElementIntent::Activated => {
                ctx.tree()
                    .append_follow_up_event(scope.key, ElementIntent::Completing, scope.record.clone())
                    .await?;
            }
            _ => {}
        }
    }
    Ok(())
}
