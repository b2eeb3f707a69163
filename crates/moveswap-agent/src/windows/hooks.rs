//! Native replacements installed over the target functions

use moveswap_core::Result;
use moveswap_core::addresses::names;

use super::detour::Detour;
use super::entry::agent;
use crate::functions::LocatedFunctions;
use crate::hooks;

extern "C" fn apply_payload(entity: u64, payload: u64) -> u64 {
    match agent() {
        Some(agent) => hooks::entity_load(&agent.ctx, entity, payload),
        None => 0,
    }
}

extern "C" fn sync_battle_start(manager: u64) -> u64 {
    match agent() {
        Some(agent) => hooks::sync_battle_start(&agent.ctx, manager),
        None => 0,
    }
}

extern "C" fn matched_as_client(a1: u64, a2: u64) {
    if let Some(agent) = agent() {
        hooks::matched_as_client(&agent.ctx, a1, a2);
    }
}

extern "C" fn matched_as_host(a1: u64, a2: u8, a3: u64) {
    if let Some(agent) = agent() {
        hooks::matched_as_host(&agent.ctx, a1, a2, a3);
    }
}

extern "C" fn random_stage(stage_manager: u64, player: u8) -> u8 {
    match agent() {
        Some(agent) => hooks::random_stage(&agent.ctx, stage_manager, player),
        None => 0,
    }
}

extern "C" fn load_start(a1: u64, a2: u64) -> u64 {
    match agent() {
        Some(agent) => hooks::load_start(&agent.ctx, a1, a2),
        None => 0,
    }
}

/// Target functions we replace, with their replacement
fn replacements() -> [(&'static str, u64); 6] {
    [
        (names::APPLY_NEW_MOVESET, apply_payload as usize as u64),
        (names::GET_SYNC_BATTLE_START, sync_battle_start as usize as u64),
        (names::MATCHED_AS_CLIENT, matched_as_client as usize as u64),
        (names::MATCHED_AS_HOST, matched_as_host as usize as u64),
        (names::UI_RANDOM_STAGE, random_stage as usize as u64),
        (names::LOAD_START, load_start as usize as u64),
    ]
}

/// Build a disabled detour for every located function we replace
pub fn create_detours(located: &LocatedFunctions) -> Result<Vec<Detour>> {
    replacements()
        .into_iter()
        .filter_map(|(name, replacement)| {
            located
                .get(name)
                .map(|target| Detour::create(name, target, replacement))
        })
        .collect()
}
