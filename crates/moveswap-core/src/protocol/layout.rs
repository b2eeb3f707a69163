//! Layout constants for the shared coordination region
//!
//! Both the controller and the injected agent compile against these values;
//! a build with different values is refused at map time.

/// Upper bound on the mapped region, in bytes
pub const REGION_MAX_SIZE: usize = 0x1000;

/// Number of local entity slots that can be hot-swapped
pub const SLOT_COUNT: usize = 2;

/// Bytes reserved for the NUL-padded protocol version string
pub const VERSION_LEN: usize = 32;

/// UTF-16 units reserved for the controller's program directory
pub const PROGRAM_PATH_LEN: usize = 260;

/// Bytes reserved for a displayed selection name
pub const SELECTION_NAME_LEN: usize = 48;

/// Value of `local_slot` while no online session is running
pub const NO_LOCAL_SLOT: i32 = -1;

/// Timing constants for polling and handshakes
pub mod timing {
    use std::time::Duration;

    /// Interval between coordinator ticks (ms)
    pub const COORDINATOR_POLL_INTERVAL_MS: u64 = 100;

    /// Interval between agent run-loop iterations (ms)
    pub const AGENT_POLL_INTERVAL_MS: u64 = 50;

    /// Forced-ready deadline once the peer has signaled sync intent
    pub const SYNC_DEADLINE_PEER_READY: Duration = Duration::from_secs(60);

    /// Forced-ready deadline when no peer intent was observed
    pub const SYNC_DEADLINE_DEFAULT: Duration = Duration::from_secs(15);

    /// How long a one-shot controller command waits for the agent region
    /// after requesting injection (ms)
    pub const INJECTION_WAIT_TIMEOUT_MS: u64 = 5_000;
}
