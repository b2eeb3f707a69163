//! Target process primitives: memory access, allocation and remote execution

mod alloc;
mod reader;
mod target;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

pub use alloc::RemoteAllocations;
pub use reader::{GameMemory, ReadMemory, WriteMemory};
pub use target::*;
#[cfg(target_os = "windows")]
pub use windows::{WindowsProcess, find_process_by_name};

#[cfg(any(test, feature = "test-support"))]
pub use mock::MockProcess;
