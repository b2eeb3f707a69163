//! Per-title specialization of the coordination logic
//!
//! The title is picked once at startup from a [`TitleId`] and never changes
//! while running.

mod t7;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, FromRepr, IntoStaticStr};

pub use t7::TitleT7;

use crate::addresses::GameAddresses;
use crate::error::{Error, Result};
use crate::process::GameMemory;
use crate::protocol::layout::SLOT_COUNT;
use crate::protocol::{ExtraProp, SharedRegion, SyncMode};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
    FromRepr,
)]
#[repr(u32)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TitleId {
    #[default]
    T7 = 7,
}

impl TitleId {
    /// Value stamped into the region's `title_id`
    pub fn as_raw(self) -> u32 {
        self as u32
    }

    pub fn from_raw(value: u32) -> Result<Self> {
        Self::from_repr(value).ok_or_else(|| Error::UnsupportedTitle(value.to_string()))
    }
}

/// Names the processes agree on for a title
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TitleLayout {
    /// Executable name of the target
    pub process_name: &'static str,
    /// Title part of the region name
    pub region_tag: &'static str,
    /// File name of the agent library
    pub agent_library: &'static str,
}

/// A live entity whose payload the target just initialized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityRef {
    /// Address of the entity
    pub address: u64,
    /// Index in the target's local player list, negative when absent
    pub player_index: i32,
    /// Payload the target itself just installed on the entity
    pub native_payload: u64,
}

impl EntityRef {
    /// Local slot of the entity, `None` for placeholder entities
    pub fn slot(&self) -> Option<usize> {
        usize::try_from(self.player_index)
            .ok()
            .filter(|&s| s < SLOT_COUNT)
    }
}

/// Result of an entity-load interception
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityLoad {
    /// Not one of the local slots
    Ignored,
    /// No custom payload for the entity's type
    NoPayload { slot: usize, type_id: u32 },
    Substituted {
        slot: usize,
        /// Slot whose payload was used
        source_slot: usize,
        address: u64,
        generation: u64,
        /// Missing sub-resources copied from the native payload
        filled: u64,
    },
}

/// Missing sub-resources already copied in the current load cycle.
///
/// Reset every time a loading screen starts.
#[derive(Debug, Default, Clone)]
pub struct LoadCycle {
    filled: [Option<u64>; SLOT_COUNT],
}

impl LoadCycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.filled = [None; SLOT_COUNT];
    }

    /// Whether the slot's `generation` still needs its missing parts filled
    pub fn needs_fill(&self, slot: usize, generation: u64) -> bool {
        self.filled.get(slot).is_some_and(|f| *f != Some(generation))
    }

    pub fn mark_filled(&mut self, slot: usize, generation: u64) {
        if let Some(entry) = self.filled.get_mut(slot) {
            *entry = Some(generation);
        }
    }
}

/// Condition and parameter of a synthesized event
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Requirement {
    pub condition: u32,
    pub param: u32,
}

/// A 128-bit argument passed by value, low half first
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WideArg {
    pub low: u64,
    pub high: u64,
}

impl WideArg {
    pub const fn new(low: u64, high: u64) -> Self {
        Self { low, high }
    }
}

/// Fixed arguments the target's event evaluation expects besides the entity
/// and the requirement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtraPropTemplate {
    pub a3: WideArg,
    pub a4: u8,
    pub a5: u8,
    pub a6: f32,
    pub a7: WideArg,
    pub a8: WideArg,
    pub a9: WideArg,
    pub a10: WideArg,
    pub a11: WideArg,
    pub a12: u64,
}

/// How to evaluate a custom event on the target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventInvocation {
    pub slot: usize,
    pub requirement: Requirement,
    pub template: ExtraPropTemplate,
}

/// Title-specific behavior of the agent and the controller
pub trait Title: Send + Sync {
    fn id(&self) -> TitleId;

    fn map_layout(&self) -> TitleLayout;

    /// Addresses used when no file overrides them
    fn default_addresses(&self) -> GameAddresses;

    /// Functions that must be located for the agent to start
    fn required_functions(&self) -> &'static [&'static str];

    /// Functions hooked or called only when found
    fn optional_functions(&self) -> &'static [&'static str];

    /// Substitute a custom payload into an entity the target just loaded
    fn on_entity_load(
        &self,
        region: &SharedRegion,
        memory: &dyn GameMemory,
        addresses: &GameAddresses,
        entity: EntityRef,
        cycle: &mut LoadCycle,
    ) -> Result<EntityLoad>;

    /// Synchronization mode to publish for a lock-in change
    fn on_lock_in(&self, locked: bool, mode: SyncMode) -> SyncMode;

    fn on_custom_event(&self, prop: ExtraProp) -> Result<EventInvocation>;
}

pub fn title_for(id: TitleId) -> Box<dyn Title> {
    match id {
        TitleId::T7 => Box::new(TitleT7),
    }
}
