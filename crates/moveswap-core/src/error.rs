use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Failed to open process: {0}")]
    ProcessOpenFailed(String),

    #[error("Failed to read process memory at address {address:#x}: {message}")]
    MemoryReadFailed { address: u64, message: String },

    #[error("Failed to write process memory at address {address:#x}: {message}")]
    MemoryWriteFailed { address: u64, message: String },

    #[error("Failed to allocate {size} bytes in target process: {message}")]
    AllocationFailed { size: usize, message: String },

    #[error("Shared region unavailable: {0}")]
    RegionUnavailable(String),

    #[error("Incompatible build: region layout is {actual} bytes, expected {expected}")]
    IncompatibleLayout { expected: usize, actual: usize },

    #[error("Agent version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },

    #[error("Agent module '{0}' is not loaded in the target process")]
    AgentModuleNotLoaded(String),

    #[error("Symbol '{symbol}' not found in module '{module}'")]
    SymbolNotFound { module: String, symbol: String },

    #[error("Remote execution of '{0}' failed")]
    RemoteExecutionFailed(String),

    #[error("Agent injection failed: {0}")]
    InjectionFailed(String),

    #[error("Failed to hook '{name}': {message}")]
    HookFailed { name: String, message: String },

    #[error("Invalid slot: {0}")]
    InvalidSlot(usize),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Unsupported title: {0}")]
    UnsupportedTitle(String),

    #[error("{0} is only supported on Windows")]
    UnsupportedPlatform(&'static str),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    /// Conditions that are expected while the agent is still coming up and
    /// are retried on the next tick without being reported.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::RegionUnavailable(_) | Error::AgentModuleNotLoaded(_)
        )
    }
}
