//! Payload importation into the target process

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::process::RemoteAllocations;

/// A payload file the user picked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadInfo {
    pub path: PathBuf,
    /// Display name
    pub name: String,
    /// Size in bytes; zero means "clear this slot"
    pub size: u64,
    /// Entity type id the payload was built for
    pub type_id: u32,
}

impl PayloadInfo {
    /// Describe a payload file on disk
    pub fn from_path(path: &Path, type_id: u32) -> Result<Self> {
        let size = std::fs::metadata(path)?.len();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            name,
            size,
            type_id,
        })
    }

    /// The clear-selection sentinel
    pub fn clear() -> Self {
        Self {
            path: PathBuf::new(),
            name: String::new(),
            size: 0,
            type_id: 0,
        }
    }

    pub fn is_clear(&self) -> bool {
        self.size == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImportSettings {
    /// Free payloads no slot references anymore once the import succeeds
    #[serde(default)]
    pub free_unused: bool,
}

/// Where an imported payload ended up in the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PayloadDescriptor {
    pub address: u64,
    pub size: u64,
    pub type_id: u32,
}

/// Opaque importer failure codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
pub enum ImportErrcode {
    #[strum(serialize = "file read error")]
    FileReadErr,
    #[strum(serialize = "invalid payload")]
    InvalidPayload,
    #[strum(serialize = "game allocation error")]
    GameAllocationErr,
    #[strum(serialize = "game write error")]
    GameWriteErr,
}

/// A failed import, kept for later inspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportFailure {
    pub code: ImportErrcode,
    pub payload: String,
    pub slot: usize,
    pub at: DateTime<Utc>,
}

/// Loads payloads into the target's memory
pub trait PayloadImporter: Send {
    /// Import `payload`, reporting 0..=100 through `progress`
    fn import(
        &mut self,
        payload: &PayloadInfo,
        slot_hint: usize,
        settings: ImportSettings,
        progress: &AtomicU8,
    ) -> std::result::Result<PayloadDescriptor, ImportErrcode>;
}

/// Copies an already-decoded payload file byte for byte into target memory
pub struct RawFileImporter {
    allocations: Arc<RemoteAllocations>,
}

impl RawFileImporter {
    pub fn new(allocations: Arc<RemoteAllocations>) -> Self {
        Self { allocations }
    }
}

impl PayloadImporter for RawFileImporter {
    fn import(
        &mut self,
        payload: &PayloadInfo,
        slot_hint: usize,
        _settings: ImportSettings,
        progress: &AtomicU8,
    ) -> std::result::Result<PayloadDescriptor, ImportErrcode> {
        progress.store(0, Ordering::Relaxed);
        debug!("Importing {} for slot {}", payload.path.display(), slot_hint);

        let bytes = std::fs::read(&payload.path).map_err(|e| {
            warn!("Failed to read {}: {}", payload.path.display(), e);
            ImportErrcode::FileReadErr
        })?;
        if bytes.is_empty() {
            return Err(ImportErrcode::InvalidPayload);
        }
        progress.store(30, Ordering::Relaxed);

        let address = self.allocations.allocate(bytes.len()).map_err(|e| {
            warn!("Failed to allocate payload: {}", e);
            ImportErrcode::GameAllocationErr
        })?;
        progress.store(60, Ordering::Relaxed);

        if let Err(e) = self.allocations.process().write_bytes(address, &bytes) {
            warn!("Failed to write payload at {:#x}: {}", address, e);
            let _ = self.allocations.release(address);
            return Err(ImportErrcode::GameWriteErr);
        }
        progress.store(100, Ordering::Relaxed);

        info!(
            "Imported {} ({} bytes) at {:#x}",
            payload.name,
            bytes.len(),
            address
        );
        Ok(PayloadDescriptor {
            address,
            size: bytes.len() as u64,
            type_id: payload.type_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{MockProcess, ReadMemory};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn importer() -> (Arc<MockProcess>, RawFileImporter) {
        let process = Arc::new(MockProcess::new(9));
        let allocations = Arc::new(RemoteAllocations::new(process.clone()));
        (process, RawFileImporter::new(allocations))
    }

    #[test]
    fn test_payload_info_from_path() {
        let mut file = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
        file.write_all(&[1, 2, 3, 4]).unwrap();

        let info = PayloadInfo::from_path(file.path(), 17).unwrap();
        assert_eq!(info.size, 4);
        assert_eq!(info.type_id, 17);
        assert!(!info.is_clear());
        assert!(PayloadInfo::clear().is_clear());
    }

    #[test]
    fn test_import_writes_payload() {
        let (process, mut importer) = importer();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"payload-bytes").unwrap();
        let info = PayloadInfo::from_path(file.path(), 3).unwrap();
        let progress = AtomicU8::new(0);

        let descriptor = importer
            .import(&info, 0, ImportSettings::default(), &progress)
            .unwrap();
        assert_eq!(descriptor.size, 13);
        assert_eq!(descriptor.type_id, 3);
        assert_eq!(progress.load(Ordering::Relaxed), 100);
        assert_eq!(
            process.read_bytes(descriptor.address, 13).unwrap(),
            b"payload-bytes"
        );
    }

    #[test]
    fn test_import_missing_file() {
        let (_process, mut importer) = importer();
        let info = PayloadInfo {
            path: PathBuf::from("/nonexistent/payload.bin"),
            name: "payload".to_string(),
            size: 10,
            type_id: 1,
        };
        let progress = AtomicU8::new(0);
        assert_eq!(
            importer.import(&info, 0, ImportSettings::default(), &progress),
            Err(ImportErrcode::FileReadErr)
        );
    }

    #[test]
    fn test_import_write_failure_releases_memory() {
        let (process, mut importer) = importer();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"x").unwrap();
        let info = PayloadInfo::from_path(file.path(), 1).unwrap();
        process.set_running(false);

        let progress = AtomicU8::new(0);
        assert_eq!(
            importer.import(&info, 1, ImportSettings::default(), &progress),
            Err(ImportErrcode::GameWriteErr)
        );
        assert_eq!(process.freed().len(), 1);
        assert!(progress.load(Ordering::Relaxed) < 100);
    }

    #[test]
    fn test_errcode_display() {
        assert_eq!(ImportErrcode::GameAllocationErr.to_string(), "game allocation error");
    }
}
