use std::path::Path;

use serde::Serialize;
use strum::{Display, IntoStaticStr};

use super::reader::{ReadMemory, WriteMemory};
use crate::error::Result;

/// Result of starting a thread inside the target process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteThread {
    /// The thread was started and not waited on
    Started,
    /// The thread ran to completion
    Finished { exit_code: u32 },
}

/// Attach status of the target process, as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    #[default]
    #[strum(serialize = "not attached")]
    NotAttached,
    #[strum(serialize = "not running")]
    NotFound,
    #[strum(serialize = "attached")]
    Attached,
    #[strum(serialize = "exited")]
    Exited,
    #[strum(serialize = "attach error")]
    AttachError,
}

/// Process-boundary primitives the controller needs from the target.
///
/// Everything above this trait (bridge, coordinator, importer) is platform
/// neutral; the Win32 implementation lives in `process::windows`.
pub trait TargetProcess: ReadMemory + WriteMemory + Send + Sync {
    fn pid(&self) -> u32;

    /// Base address of the target's main executable module
    fn main_module_base(&self) -> u64;

    /// Whether the process is still alive
    fn is_running(&self) -> bool;

    fn allocate(&self, size: usize) -> Result<u64>;

    fn free(&self, address: u64) -> Result<()>;

    /// Load a library into the target's address space and wait for the
    /// loader to return.
    fn load_library(&self, path: &Path) -> Result<()>;

    /// Base address of a loaded module, `None` if not loaded
    fn module_base(&self, module_name: &str) -> Result<Option<u64>>;

    /// Run code at `start` on a new thread of the target process
    fn create_remote_thread(&self, start: u64, parameter: u64, wait: bool)
    -> Result<RemoteThread>;
}
