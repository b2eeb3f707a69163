//! Game addresses: offsets, pointer paths and function signatures
//!
//! Loaded from a JSON file next to the controller, layered over the
//! built-in defaults of the title.

mod signature;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use signature::{FunctionSignature, RipReference, find_pattern, parse_pattern, scan_image};

use crate::error::{Error, Result};
use crate::process::ReadMemory;

/// Well-known entry names
pub mod names {
    pub const CHARA_ID_OFFSET: &str = "chara_id_offset";
    pub const MOTBIN_OFFSET: &str = "motbin_offset";
    pub const STATIC_CAMERA_OFFSET: &str = "static_camera_offset";
    pub const MOTA_LIST_OFFSET: &str = "mota_list_offset";

    pub const USERNAME_ADDR: &str = "username_addr";
    pub const LOBBY_ID_ADDR: &str = "lobby_id_addr";

    pub const APPLY_NEW_MOVESET: &str = "apply_new_moveset";
    pub const GET_PLAYER_FROM_ID: &str = "get_player_from_id";
    pub const LOAD_START: &str = "load_start";
    pub const GET_SYNC_BATTLE_START: &str = "get_sync_battle_start";
    pub const MATCHED_AS_CLIENT: &str = "matched_as_client";
    pub const MATCHED_AS_HOST: &str = "matched_as_host";
    pub const UI_RANDOM_STAGE: &str = "ui_random_stage";
    pub const EXECUTE_EXTRAPROP: &str = "execute_extraprop";

    /// Player list, referenced from `get_player_from_id`
    pub const PLAYER_LIST: &str = "player_list";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameAddresses {
    #[serde(default)]
    pub values: BTreeMap<String, u64>,
    /// Offsets from the module base; every entry but the last is dereferenced
    #[serde(default)]
    pub pointer_paths: BTreeMap<String, Vec<u64>>,
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionSignature>,
    /// RIP-relative operands, keyed by the name of what they locate
    #[serde(default)]
    pub references: BTreeMap<String, RipReference>,
}

impl GameAddresses {
    pub fn value(&self, name: &str) -> Result<u64> {
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| Error::Config(format!("missing game address value '{}'", name)))
    }

    pub fn pointer_path(&self, name: &str) -> Result<&[u64]> {
        self.pointer_paths
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::Config(format!("missing pointer path '{}'", name)))
    }

    pub fn function(&self, name: &str) -> Result<&FunctionSignature> {
        self.functions
            .get(name)
            .ok_or_else(|| Error::Config(format!("missing function signature '{}'", name)))
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn reference(&self, name: &str) -> Result<&RipReference> {
        self.references
            .get(name)
            .ok_or_else(|| Error::Config(format!("missing reference '{}'", name)))
    }

    /// Follow a named pointer path starting at `module_base`
    pub fn resolve_pointer_path<R: ReadMemory + ?Sized>(
        &self,
        reader: &R,
        module_base: u64,
        name: &str,
    ) -> Result<u64> {
        reader.read_pointer_path(module_base, self.pointer_path(name)?)
    }

    /// Locate a named function by scanning the module image
    pub fn locate_function<R: ReadMemory + ?Sized>(
        &self,
        reader: &R,
        module_base: u64,
        module_size: usize,
        name: &str,
    ) -> Result<u64> {
        let signature = self.function(name)?;
        let pattern = signature.pattern_bytes()?;
        let found = scan_image(reader, module_base, module_size, &pattern)?.ok_or_else(|| {
            Error::InvalidSignature(format!("signature for '{}' not found", name))
        })?;
        let address = found.wrapping_add_signed(signature.offset);
        debug!("Located {} at {:#x}", name, address);
        Ok(address)
    }

    /// Entries of `other` replace ours
    pub fn merge(&mut self, other: GameAddresses) {
        self.values.extend(other.values);
        self.pointer_paths.extend(other.pointer_paths);
        self.functions.extend(other.functions);
        self.references.extend(other.references);
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let data = serde_json::from_str(&content)?;
        Ok(data)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// `defaults` overlaid with the file at `path`; the defaults alone when
    /// the file is absent or unreadable
    pub fn load_over(defaults: GameAddresses, path: &Path) -> Self {
        let mut addresses = defaults;
        match Self::load(path) {
            Ok(file) => addresses.merge(file),
            Err(e) if e.is_not_found() => {
                debug!("No game addresses file at {}", path.display());
            }
            Err(e) => warn!(
                "Failed to load game addresses from {}: {}, using defaults",
                path.display(),
                e
            ),
        }
        addresses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{MockProcess, WriteMemory};
    use tempfile::tempdir;

    fn sample() -> GameAddresses {
        let mut addresses = GameAddresses::default();
        addresses.values.insert(names::MOTBIN_OFFSET.to_string(), 0x14a0);
        addresses
            .pointer_paths
            .insert(names::USERNAME_ADDR.to_string(), vec![0x3000, 0x10]);
        addresses.functions.insert(
            names::GET_PLAYER_FROM_ID.to_string(),
            FunctionSignature::new("40 53 48 83 EC ?? 8B D9"),
        );
        addresses
    }

    #[test]
    fn test_missing_entries_are_config_errors() {
        let addresses = GameAddresses::default();
        assert!(matches!(
            addresses.value(names::MOTBIN_OFFSET),
            Err(Error::Config(_))
        ));
        assert!(addresses.pointer_path(names::USERNAME_ADDR).is_err());
        assert!(addresses.function(names::LOAD_START).is_err());
    }

    #[test]
    fn test_save_load_and_merge() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("game_addresses.json");

        let mut file = GameAddresses::default();
        file.values.insert(names::MOTBIN_OFFSET.to_string(), 0x1520);
        file.save(&path).unwrap();

        let merged = GameAddresses::load_over(sample(), &path);
        assert_eq!(merged.value(names::MOTBIN_OFFSET).unwrap(), 0x1520);
        assert!(merged.has_function(names::GET_PLAYER_FROM_ID));
    }

    #[test]
    fn test_load_over_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let merged = GameAddresses::load_over(sample(), &dir.path().join("absent.json"));
        assert_eq!(merged, sample());
    }

    #[test]
    fn test_load_over_invalid_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("game_addresses.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(GameAddresses::load_over(sample(), &path), sample());
    }

    #[test]
    fn test_resolve_pointer_path() {
        let process = MockProcess::new(1);
        let base = 0x1_4000_0000;
        process.write_u64(base + 0x3000, 0x5555_0000).unwrap();

        let address = sample()
            .resolve_pointer_path(&process, base, names::USERNAME_ADDR)
            .unwrap();
        assert_eq!(address, 0x5555_0010);
    }

    #[test]
    fn test_locate_function() {
        let process = MockProcess::new(1);
        let base = 0x1_4000_0000;
        process
            .write_bytes(base + 0x40, &[0x40, 0x53, 0x48, 0x83, 0xEC, 0x20, 0x8B, 0xD9])
            .unwrap();

        let address = sample()
            .locate_function(&process, base, 0x100, names::GET_PLAYER_FROM_ID)
            .unwrap();
        assert_eq!(address, base + 0x40);
    }
}
