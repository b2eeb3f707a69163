//! State dump requested by the controller

use moveswap_core::protocol::layout::SLOT_COUNT;
use tracing::debug;

use crate::context::AgentContext;

/// Log the region, session and lobby state at debug level
pub fn dump_state(ctx: &AgentContext) {
    let region = ctx.region();
    debug!(
        "Region v{} title {} locked={} mode={:?} sync={:?} session={} local_slot={:?}",
        region.version(),
        region.title_id(),
        region.is_locked(),
        region.sync_mode(),
        region.sync_status(),
        region.sync_session(),
        region.local_slot()
    );

    for (slot, payload) in region.slots().iter().enumerate() {
        let snapshot = payload.snapshot();
        debug!(
            "Slot {}: payload {:#x} ({} bytes, type {}) generation {} applied={} initialized={} missing={:#b}",
            slot,
            snapshot.address,
            snapshot.size,
            snapshot.type_id,
            snapshot.generation,
            payload.is_applied(),
            payload.is_initialized(),
            payload.missing_mask()
        );
    }

    for (slot, entity) in (0..SLOT_COUNT).map(|slot| (slot, ctx.player_entity(slot))) {
        match entity {
            Ok(entity) => debug!("Player {}: entity {:#x}", slot, entity),
            Err(e) => debug!("Player {}: {}", slot, e),
        }
    }

    debug!(
        "Peer intent={} deadline={:?}",
        ctx.sync().peer_intent(),
        ctx.sync().deadline()
    );

    let lobby = ctx.lobby();
    let members = lobby.members();
    debug!(
        "Lobby: {} members, self={:?} opponent={:?}",
        members.len(),
        lobby.self_member(),
        lobby.opponent_member()
    );
    for (i, name) in members.iter().enumerate() {
        debug!("  [{}] {}", i, name);
    }
}
