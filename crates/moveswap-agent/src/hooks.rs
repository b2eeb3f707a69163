//! Interception dispatch.
//!
//! Every function here replaces one target function: it calls through to
//! the original (via [`GameFunctions`](crate::game::GameFunctions)) and then
//! applies the agent's logic. None of them may fail towards the target;
//! errors are logged.

use moveswap_core::{EntityLoad, EntityRef, SyncMode};
use tracing::{debug, info, trace, warn};

use crate::context::AgentContext;

/// Stages a random pick never lands on
pub const EXCLUDED_STAGES: [u8; 4] = [1, 3, 40, 55];

/// Upper bound on random stage rolls
pub const MAX_STAGE_ROLLS: usize = 100;

/// The target initialized `entity` with `payload`
pub fn entity_load(ctx: &AgentContext, entity: u64, payload: u64) -> u64 {
    let result = ctx.game().apply_payload(entity, payload);

    let entity_ref = EntityRef {
        address: entity,
        player_index: ctx.player_index(entity),
        native_payload: payload,
    };
    trace!(
        "Entity load {:#x} (index {}, payload {:#x})",
        entity, entity_ref.player_index, payload
    );

    let outcome = ctx.with_cycle(|cycle| {
        ctx.title()
            .on_entity_load(ctx.region(), ctx.memory(), ctx.addresses(), entity_ref, cycle)
    });
    match outcome {
        Ok(EntityLoad::Ignored) => {}
        Ok(EntityLoad::NoPayload { slot, type_id }) => {
            debug!("No custom payload for type {} (slot {})", type_id, slot);
        }
        Ok(EntityLoad::Substituted {
            slot,
            source_slot,
            address,
            generation,
            filled,
        }) => {
            info!(
                "Substituted payload {:#x} (slot {}, generation {}) on slot {}",
                address, source_slot, generation, slot
            );
            if filled != 0 {
                debug!("Filled missing parts {:#b} from the native payload", filled);
            }
        }
        Err(e) => warn!("Payload substitution failed for {:#x}: {}", entity, e),
    }

    result
}

/// The target polls whether the match may start
pub fn sync_battle_start(ctx: &AgentContext, manager: u64) -> u64 {
    let original = ctx.game().sync_battle_start(manager);
    ctx.sync().on_battle_start(original, ctx.region(), ctx.now())
}

pub fn matched_as_client(ctx: &AgentContext, a1: u64, a2: u64) {
    ctx.game().matched_as_client(a1, a2);
    debug!("Matched as client");
    on_match_found(ctx);
}

pub fn matched_as_host(ctx: &AgentContext, a1: u64, a2: u8, a3: u64) {
    ctx.game().matched_as_host(a1, a2, a3);
    debug!("Matched as host");
    on_match_found(ctx);
}

fn on_match_found(ctx: &AgentContext) {
    if ctx.region().sync_mode() == SyncMode::OnlineAttempting {
        ctx.sync().begin_session(ctx.region(), ctx.local_slot());
    }
}

/// A player confirmed a random stage
pub fn random_stage(ctx: &AgentContext, stage_manager: u64, player: u8) -> u8 {
    let (stage, rolls) = reroll_stage(|| ctx.game().random_stage(stage_manager, player));
    debug!("Random stage {} for player {} after {} rolls", stage, player, rolls);
    stage
}

/// Roll until the stage is not excluded, at most [`MAX_STAGE_ROLLS`] times.
///
/// Returns the stage and the number of rolls.
pub fn reroll_stage(mut roll: impl FnMut() -> u8) -> (u8, usize) {
    let mut stage = roll();
    let mut rolls = 1;
    while EXCLUDED_STAGES.contains(&stage) && rolls < MAX_STAGE_ROLLS {
        stage = roll();
        rolls += 1;
    }
    (stage, rolls)
}

/// A loading screen starts
pub fn load_start(ctx: &AgentContext, a1: u64, a2: u64) -> u64 {
    let result = ctx.game().load_start(a1, a2);
    ctx.with_cycle(|cycle| cycle.reset());
    trace!("Load cycle reset");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reroll_returns_first_allowed() {
        let mut rolls = [1u8, 3, 40, 55, 7, 1].into_iter();
        assert_eq!(reroll_stage(|| rolls.next().unwrap_or(0)), (7, 5));
    }

    #[test]
    fn test_reroll_accepts_first_allowed_roll() {
        assert_eq!(reroll_stage(|| 12), (12, 1));
    }

    #[test]
    fn test_reroll_is_bounded() {
        let mut calls = 0;
        let (stage, rolls) = reroll_stage(|| {
            calls += 1;
            if calls % 2 == 0 { 40 } else { 3 }
        });
        assert_eq!(rolls, MAX_STAGE_ROLLS);
        assert_eq!(calls, MAX_STAGE_ROLLS);
        // The 100th roll is accepted even though it is excluded
        assert_eq!(stage, 40);
    }
}
