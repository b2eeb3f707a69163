//! The target's own functions, as seen from the interception layer

use moveswap_core::Result;
use moveswap_core::title::EventInvocation;

/// Original (unhooked) target functions.
///
/// Interception dispatch only ever reaches the target through this trait,
/// so the hooks run unchanged against a fake in tests.
pub trait GameFunctions: Send + Sync {
    /// Initialize `entity` with the payload the target picked
    fn apply_payload(&self, entity: u64, payload: u64) -> u64;

    /// "Are we ready to start the match" poll; `1` means ready
    fn sync_battle_start(&self, manager: u64) -> u64;

    /// Match found, local player joins as client
    fn matched_as_client(&self, a1: u64, a2: u64);

    /// Match found, local player hosts
    fn matched_as_host(&self, a1: u64, a2: u8, a3: u64);

    /// One random stage roll
    fn random_stage(&self, stage_manager: u64, player: u8) -> u8;

    /// Loading screen starts
    fn load_start(&self, a1: u64, a2: u64) -> u64;

    /// Evaluate a synthesized event on `entity`.
    ///
    /// Fails when the target's event function was not located.
    fn execute_extra_prop(&self, entity: u64, invocation: &EventInvocation) -> Result<()>;
}
