//! Controller configuration (`moveswap.toml`)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::protocol::layout::timing::COORDINATOR_POLL_INTERVAL_MS;
use crate::title::{Title, TitleId};

/// Config file name, looked up in the program directory
pub const CONFIG_FILE: &str = "moveswap.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub title: TitleId,
    /// Overrides the title's executable name
    pub process_name: Option<String>,
    /// Overrides the agent library location
    pub agent_library: Option<PathBuf>,
    pub poll_interval_ms: u64,
    /// Leave the agent loaded when the controller exits
    pub persistent_agent: bool,
    /// Mirror the lock-in state into the region every tick
    pub synchronize_lock_in: bool,
    /// Prepend the program tag to the player's online name
    pub name_tag: bool,
    /// Game addresses file, relative to the program directory
    pub addresses_file: PathBuf,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            title: TitleId::default(),
            process_name: None,
            agent_library: None,
            poll_interval_ms: COORDINATOR_POLL_INTERVAL_MS,
            persistent_agent: false,
            synchronize_lock_in: true,
            name_tag: false,
            addresses_file: PathBuf::from("game_addresses.json"),
        }
    }
}

impl ControllerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load `path`, falling back to defaults with a warning
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn process_name(&self, title: &dyn Title) -> String {
        self.process_name
            .clone()
            .unwrap_or_else(|| title.map_layout().process_name.to_string())
    }

    /// Agent library path; relative paths resolve against `program_dir`
    pub fn agent_library(&self, title: &dyn Title, program_dir: &Path) -> PathBuf {
        let library = self
            .agent_library
            .clone()
            .unwrap_or_else(|| PathBuf::from(title.map_layout().agent_library));
        if library.is_absolute() {
            library
        } else {
            program_dir.join(library)
        }
    }

    pub fn addresses_path(&self, program_dir: &Path) -> PathBuf {
        if self.addresses_file.is_absolute() {
            self.addresses_file.clone()
        } else {
            program_dir.join(&self.addresses_file)
        }
    }
}
