//! Calling the target's original functions

use std::collections::BTreeMap;
use std::mem::transmute_copy;

use moveswap_core::addresses::names;
use moveswap_core::title::{EventInvocation, Requirement, WideArg};
use moveswap_core::{Error, Result};

use crate::game::GameFunctions;

type ApplyPayloadFn = unsafe extern "C" fn(u64, u64) -> u64;
type SyncBattleStartFn = unsafe extern "C" fn(u64) -> u64;
type MatchedAsClientFn = unsafe extern "C" fn(u64, u64);
type MatchedAsHostFn = unsafe extern "C" fn(u64, u8, u64);
type RandomStageFn = unsafe extern "C" fn(u64, u8) -> u8;
type LoadStartFn = unsafe extern "C" fn(u64, u64) -> u64;
type ExecuteExtraPropFn = unsafe extern "C" fn(
    u64,
    *const Requirement,
    WideArg,
    u8,
    u8,
    f32,
    WideArg,
    WideArg,
    WideArg,
    WideArg,
    WideArg,
    u64,
);

/// Original entry points: trampolines for hooked functions, plain addresses
/// for the ones only called
#[derive(Debug, Default)]
pub struct TargetFunctions {
    entries: BTreeMap<String, u64>,
}

impl TargetFunctions {
    pub fn insert(&mut self, name: &str, address: u64) {
        self.entries.insert(name.to_string(), address);
    }

    /// # Safety
    ///
    /// `F` must be the function pointer type of the entry registered as
    /// `name`.
    unsafe fn get<F: Copy>(&self, name: &str) -> Option<F> {
        let address = *self.entries.get(name)? as usize;
        // SAFETY: entries are code addresses in our process and F is a
        // function pointer, as the caller guarantees.
        Some(unsafe { transmute_copy::<usize, F>(&address) })
    }
}

// Fallbacks only apply to functions that were not located, whose hooks are
// never installed.
impl GameFunctions for TargetFunctions {
    fn apply_payload(&self, entity: u64, payload: u64) -> u64 {
        // SAFETY: registered with this signature.
        match unsafe { self.get::<ApplyPayloadFn>(names::APPLY_NEW_MOVESET) } {
            Some(f) => unsafe { f(entity, payload) },
            None => 0,
        }
    }

    fn sync_battle_start(&self, manager: u64) -> u64 {
        match unsafe { self.get::<SyncBattleStartFn>(names::GET_SYNC_BATTLE_START) } {
            Some(f) => unsafe { f(manager) },
            None => crate::sync::BATTLE_READY,
        }
    }

    fn matched_as_client(&self, a1: u64, a2: u64) {
        if let Some(f) = unsafe { self.get::<MatchedAsClientFn>(names::MATCHED_AS_CLIENT) } {
            unsafe { f(a1, a2) }
        }
    }

    fn matched_as_host(&self, a1: u64, a2: u8, a3: u64) {
        if let Some(f) = unsafe { self.get::<MatchedAsHostFn>(names::MATCHED_AS_HOST) } {
            unsafe { f(a1, a2, a3) }
        }
    }

    fn random_stage(&self, stage_manager: u64, player: u8) -> u8 {
        match unsafe { self.get::<RandomStageFn>(names::UI_RANDOM_STAGE) } {
            Some(f) => unsafe { f(stage_manager, player) },
            None => 0,
        }
    }

    fn load_start(&self, a1: u64, a2: u64) -> u64 {
        match unsafe { self.get::<LoadStartFn>(names::LOAD_START) } {
            Some(f) => unsafe { f(a1, a2) },
            None => 0,
        }
    }

    fn execute_extra_prop(&self, entity: u64, invocation: &EventInvocation) -> Result<()> {
        // SAFETY: registered with this signature.
        let f = unsafe { self.get::<ExecuteExtraPropFn>(names::EXECUTE_EXTRAPROP) }.ok_or_else(
            || Error::SymbolNotFound {
                module: "main module".to_string(),
                symbol: names::EXECUTE_EXTRAPROP.to_string(),
            },
        )?;
        let t = &invocation.template;
        // SAFETY: entity is a live player entity; the requirement outlives
        // the call.
        unsafe {
            f(
                entity,
                &invocation.requirement,
                t.a3,
                t.a4,
                t.a5,
                t.a6,
                t.a7,
                t.a8,
                t.a9,
                t.a10,
                t.a11,
                t.a12,
            );
        }
        Ok(())
    }
}
