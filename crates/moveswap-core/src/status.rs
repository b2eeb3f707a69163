//! Snapshot of the coordinator for presentation layers

use serde::Serialize;
use strum::{Display, IntoStaticStr};

use crate::coordinator::CoordinatorState;
use crate::importer::ImportFailure;
use crate::process::ProcessStatus;
use crate::protocol::Selection;

/// Localization keys of the status messages
pub mod keys {
    pub const DLL_VERSION_MISMATCH: &str = "process.dll_version_mismatch";
    pub const GAME_NOT_ATTACHED: &str = "process.game_not_attached";
    pub const GAME_NOT_RUNNING: &str = "process.game_not_running";
    pub const GAME_ATTACH_ERR: &str = "process.game_attach_err";
    pub const INJECTION_FAILED: &str = "process.injection_failed";
    pub const PROGRESS_ERROR: &str = "importation.progress_error";
    pub const LOADED: &str = "status.loaded";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageLevel {
    Tip,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusMessage {
    pub level: MessageLevel,
    pub key: &'static str,
}

impl StatusMessage {
    fn new(level: MessageLevel, key: &'static str) -> Self {
        Self { level, key }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub process: ProcessStatus,
    pub state: CoordinatorState,
    pub region_loaded: bool,
    pub version_matches: bool,
    pub agent_version: Option<String>,
    /// Imports are queued or running
    pub busy: bool,
    pub queued: usize,
    /// Progress of the last import, 0..=100
    pub progress: u8,
    pub injecting: bool,
    pub injection_error: Option<String>,
    pub locked_in: bool,
    pub import_failures: Vec<ImportFailure>,
    pub selections: Vec<Selection>,
    pub messages: Vec<StatusMessage>,
}

impl StatusReport {
    /// Derive the user-facing messages from the other fields
    pub fn with_messages(mut self) -> Self {
        self.messages = self.compute_messages();
        self
    }

    fn compute_messages(&self) -> Vec<StatusMessage> {
        use MessageLevel::*;

        let mut messages = Vec::new();
        let process = match self.process {
            ProcessStatus::NotAttached => Some((Tip, keys::GAME_NOT_ATTACHED)),
            ProcessStatus::NotFound | ProcessStatus::Exited => Some((Warning, keys::GAME_NOT_RUNNING)),
            ProcessStatus::AttachError => Some((Error, keys::GAME_ATTACH_ERR)),
            ProcessStatus::Attached => None,
        };
        if let Some((level, key)) = process {
            messages.push(StatusMessage::new(level, key));
        }

        if self.region_loaded && !self.version_matches {
            messages.push(StatusMessage::new(Error, keys::DLL_VERSION_MISMATCH));
        }
        if self.injection_error.is_some() {
            messages.push(StatusMessage::new(Error, keys::INJECTION_FAILED));
        }
        if self.progress > 0 && self.progress < 100 && !self.busy {
            messages.push(StatusMessage::new(Error, keys::PROGRESS_ERROR));
        }
        if self.process == ProcessStatus::Attached && self.region_loaded && self.version_matches {
            messages.push(StatusMessage::new(Tip, keys::LOADED));
        }
        messages
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.level == MessageLevel::Error)
    }
}
