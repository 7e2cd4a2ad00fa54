use tracing::warn;

use crate::application::context::BpmnStepContext;
use crate::domain::element_instance::{ElementInstance, ElementInstanceKey, ElementIntent};
use crate::EngineError;

/// How the tokens of a terminating scope are accounted for.
///
/// Every token the scope owns belongs to a child that is terminated now, to a
/// child that is already terminating, or to nothing that will ever release it.
/// The last group are zombies and are consumed directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenReconciliation {
    /// Children that still execute and are terminated now
    pub to_terminate: Vec<ElementInstanceKey>,

    /// Children whose termination is already underway
    pub in_flight: u32,

    /// Tokens no child will release
    pub zombies: u32,
}

impl TokenReconciliation {
    /// Work out the termination of a scope owning `active_tokens` tokens
    pub fn plan(
        scope_key: ElementInstanceKey,
        active_tokens: u32,
        children: &[ElementInstance],
    ) -> Result<Self, EngineError> {
        let to_terminate: Vec<ElementInstanceKey> = children
            .iter()
            .filter(|child| child.can_terminate())
            .map(|child| child.key)
            .collect();
        let in_flight = children
            .iter()
            .filter(|child| child.state.is_terminating())
            .count() as u32;

        let reconciled = to_terminate.len() as u32 + in_flight;
        let zombies = active_tokens.checked_sub(reconciled).ok_or(
            EngineError::TokenReconciliation {
                key: scope_key.0,
                active_tokens,
                reconciled,
            },
        )?;

        Ok(Self {
            to_terminate,
            in_flight,
            zombies,
        })
    }

    /// Whether the scope can move on to `Terminated` right away
    pub fn is_settled(&self) -> bool {
        self.to_terminate.is_empty() && self.in_flight == 0
    }
}

/// Terminate the children of the scope being processed and consume its
/// zombie tokens
pub(crate) async fn terminate_children(
    ctx: &BpmnStepContext,
) -> Result<TokenReconciliation, EngineError> {
    let scope = ctx.require_element_instance()?;
    let children = ctx.tree().children(ctx.key).await?;
    let plan = TokenReconciliation::plan(ctx.key, scope.active_tokens, &children)?;

    for child in children.iter().filter(|child| child.can_terminate()) {
        ctx.tree()
            .append_follow_up_event(child.key, ElementIntent::Terminating, child.record.clone())
            .await?;
    }

    if plan.zombies > 0 {
        warn!(
            key = %ctx.key,
            element_id = %ctx.record.element_id,
            zombies = plan.zombies,
            "Consuming tokens not owned by any terminable child"
        );
        for _ in 0..plan.zombies {
            ctx.tree().consume_token(ctx.key).await?;
        }
    }

    Ok(plan)
}
