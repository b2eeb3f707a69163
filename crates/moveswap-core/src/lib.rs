//! # moveswap-core
//!
//! Controller-side library for moveswap.
//!
//! This crate provides:
//! - The shared region protocol spoken with the injected agent
//! - Target process access (memory, allocation, remote threads)
//! - The agent bridge (region mapping, injection, agent entry points)
//! - The coordinator state machine and payload import queue
//! - Per-title hooks and game address tables
//!
//! ## Feature Flags
//!
//! - `test-support`: Exposes the in-memory `MockProcess` and `HeapMapper`
//!   so dependent crates can drive the protocol without a live game.

pub mod addresses;
pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod importer;
pub mod nametag;
pub mod process;
pub mod protocol;
pub mod status;
pub mod title;

pub use addresses::{FunctionSignature, GameAddresses, RipReference};
pub use bridge::{AgentBridge, BridgeOptions, InjectionOutcome, MappedRegion, RegionMapper};
pub use config::ControllerConfig;
pub use coordinator::{Coordinator, CoordinatorOptions, CoordinatorState, ImportQueue};
pub use error::{Error, Result};
pub use importer::{
    ImportErrcode, ImportFailure, ImportSettings, PayloadDescriptor, PayloadImporter, PayloadInfo,
    RawFileImporter,
};
pub use process::{GameMemory, ProcessStatus, ReadMemory, RemoteAllocations, TargetProcess, WriteMemory};
pub use protocol::{
    ExtraProp, PROTOCOL_VERSION, Selection, SharedRegion, SyncMode, SyncStatus, region_name,
};
pub use status::{MessageLevel, StatusMessage, StatusReport};
pub use title::{EntityLoad, EntityRef, LoadCycle, Title, TitleId, title_for};
