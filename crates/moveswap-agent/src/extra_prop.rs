//! Custom events requested by the controller

use moveswap_core::Result;
use tracing::{debug, info};

use crate::context::AgentContext;

/// Consume the pending extra-prop request, if any, and evaluate it on the
/// slot's live entity.
///
/// Returns `false` when nothing was pending. A request is consumed even when
/// evaluating it fails.
pub fn execute_pending(ctx: &AgentContext) -> Result<bool> {
    let Some(prop) = ctx.region().extra_prop().take() else {
        return Ok(false);
    };
    debug!(
        "Extra prop {:#x} = {} requested on slot {}",
        prop.id, prop.value, prop.slot
    );

    let invocation = ctx.title().on_custom_event(prop)?;
    let entity = ctx.player_entity(invocation.slot)?;
    ctx.game().execute_extra_prop(entity, &invocation)?;
    info!(
        "Executed extra prop {:#x} on slot {} ({:#x})",
        prop.id, invocation.slot, entity
    );
    Ok(true)
}
