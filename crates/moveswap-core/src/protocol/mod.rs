//! Shared region protocol between the controller and the injected agent

mod enums;
pub mod layout;
mod naming;
mod region;

pub use enums::{SyncMode, SyncStatus};
pub use naming::{PROTOCOL_VERSION, region_name};
pub use region::{
    ExtraProp, ExtraPropRequest, REGION_SIZE, Selection, SharedRegion, SlotPayload, SlotSelection,
    SlotSnapshot,
};
