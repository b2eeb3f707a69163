use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, FromRepr, IntoStaticStr};

/// How the agent treats online synchronization while the selection is locked
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
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
pub enum SyncMode {
    #[default]
    Offline = 0,
    OnlineAttempting = 1,
}

/// Progress of the online payload exchange, written by the agent
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, IntoStaticStr, FromRepr,
)]
#[repr(u32)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    NotStarted = 0,
    Ready = 1,
}

impl SyncMode {
    /// Decode a raw region value, treating garbage as offline
    pub fn from_raw(value: u32) -> Self {
        Self::from_repr(value).unwrap_or_default()
    }
}

impl SyncStatus {
    pub fn from_raw(value: u32) -> Self {
        Self::from_repr(value).unwrap_or_default()
    }
}
