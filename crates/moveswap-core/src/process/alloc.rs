//! Tracking of payload memory the controller allocated inside the target.
//!
//! Payloads that are still referenced by a live entity when the controller
//! goes away are quarantined: they stay allocated for the rest of the
//! target's lifetime and are never handed back to the deallocator.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use super::target::TargetProcess;
use crate::error::Result;

#[derive(Debug, Default)]
struct Allocations {
    blocks: BTreeMap<u64, usize>,
    quarantine: HashSet<u64>,
}

pub struct RemoteAllocations {
    process: Arc<dyn TargetProcess>,
    state: Mutex<Allocations>,
}

impl RemoteAllocations {
    pub fn new(process: Arc<dyn TargetProcess>) -> Self {
        Self {
            process,
            state: Mutex::new(Allocations::default()),
        }
    }

    pub fn process(&self) -> &Arc<dyn TargetProcess> {
        &self.process
    }

    fn state(&self) -> MutexGuard<'_, Allocations> {
        // A poisoned tracker still holds valid bookkeeping
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate `size` bytes in the target and track the block
    pub fn allocate(&self, size: usize) -> Result<u64> {
        let address = self.process.allocate(size)?;
        self.state().blocks.insert(address, size);
        debug!("Allocated {:#x} bytes at {:#x} in target", size, address);
        Ok(address)
    }

    /// Free a tracked block unless it is quarantined.
    ///
    /// Returns `true` if the memory was actually released.
    pub fn release(&self, address: u64) -> Result<bool> {
        {
            let state = self.state();
            if state.quarantine.contains(&address) {
                debug!("Not freeing quarantined payload at {:#x}", address);
                return Ok(false);
            }
            if !state.blocks.contains_key(&address) {
                return Ok(false);
            }
        }

        self.process.free(address)?;
        self.state().blocks.remove(&address);
        Ok(true)
    }

    /// Mark an address as never-to-be-freed for the remaining lifetime of the
    /// target process.
    pub fn quarantine(&self, address: u64) {
        if address == 0 {
            return;
        }
        if self.state().quarantine.insert(address) {
            info!("Payload at {:#x} is still in use, leaking it", address);
        }
    }

    pub fn is_quarantined(&self, address: u64) -> bool {
        self.state().quarantine.contains(&address)
    }

    /// Free every tracked allocation that is neither in `keep` nor quarantined.
    ///
    /// Returns the number of blocks released.
    pub fn release_unused(&self, keep: &[u64]) -> usize {
        let candidates: Vec<u64> = {
            let state = self.state();
            state
                .blocks
                .keys()
                .copied()
                .filter(|addr| !keep.contains(addr) && !state.quarantine.contains(addr))
                .collect()
        };

        let mut released = 0;
        for address in candidates {
            match self.release(address) {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to free payload at {:#x}: {}", address, e),
            }
        }
        released
    }

    pub fn tracked(&self) -> Vec<(u64, usize)> {
        self.state()
            .blocks
            .iter()
            .map(|(addr, size)| (*addr, *size))
            .collect()
    }
}
