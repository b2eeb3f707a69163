//! Controller-side link to the injected agent
//!
//! The bridge owns the mapped region, drives injection of the agent library
//! and invokes the agent's exported entry points on remote threads.

mod exports;
mod injector;
mod mapping;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

pub use exports::ExportTable;
pub use injector::{InjectionJob, InjectionOutcome, Injector, call_export, entry};
#[cfg(any(test, feature = "test-support"))]
pub use mapping::HeapMapper;
#[cfg(target_os = "windows")]
pub use mapping::WindowsMapper;
pub use mapping::{MappedRegion, RegionMapper};

#[cfg(test)]
pub(crate) use exports::tests::write_fake_image;

use crate::error::{Error, Result};
use crate::process::{RemoteAllocations, RemoteThread, TargetProcess};
use crate::protocol::{ExtraProp, PROTOCOL_VERSION, Selection, SharedRegion, SyncMode};

/// Static settings of a bridge
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Name of the shared region to open
    pub region_name: String,
    /// Agent library to inject
    pub agent_library: PathBuf,
    /// Keep the agent loaded when the bridge goes away
    pub persistent: bool,
    /// Controller directory written into the region on first map
    pub program_path: Option<String>,
}

impl BridgeOptions {
    /// File name of the agent library, as it appears in the module list.
    ///
    /// Both separators are accepted whatever the host platform.
    pub fn agent_module(&self) -> String {
        self.agent_library
            .to_string_lossy()
            .rsplit(['\\', '/'])
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

pub struct AgentBridge {
    process: Arc<dyn TargetProcess>,
    allocations: Arc<RemoteAllocations>,
    mapper: Arc<dyn RegionMapper>,
    options: BridgeOptions,
    mapping: Option<Box<dyn MappedRegion>>,
    injector: Injector,
    version_mismatch: bool,
}

impl AgentBridge {
    pub fn new(
        allocations: Arc<RemoteAllocations>,
        mapper: Arc<dyn RegionMapper>,
        options: BridgeOptions,
    ) -> Self {
        Self {
            process: Arc::clone(allocations.process()),
            allocations,
            mapper,
            options,
            mapping: None,
            injector: Injector::new(),
            version_mismatch: false,
        }
    }

    pub fn process(&self) -> &Arc<dyn TargetProcess> {
        &self.process
    }

    pub fn allocations(&self) -> &Arc<RemoteAllocations> {
        &self.allocations
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    pub fn set_persistent(&mut self, persistent: bool) {
        self.options.persistent = persistent;
    }

    /// Try to open the shared region.
    ///
    /// Returns `Ok(false)` if the agent has not created it yet; that is the
    /// normal state until injection completes.
    pub fn map_region(&mut self) -> Result<bool> {
        if self.mapping.is_some() {
            return Ok(true);
        }

        let Some(mapping) = self.mapper.open(&self.options.region_name)? else {
            return Ok(false);
        };

        info!("Mapped shared region {}", self.options.region_name);
        self.mapping = Some(mapping);
        if let Some(path) = self.options.program_path.clone() {
            self.write_program_path(&path)?;
        }
        self.verify_version();
        Ok(true)
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    pub fn region(&self) -> Option<&SharedRegion> {
        self.mapping.as_deref().map(|m| m.region())
    }

    fn require_region(&self) -> Result<&SharedRegion> {
        self.region()
            .ok_or_else(|| Error::RegionUnavailable(self.options.region_name.clone()))
    }

    fn injection_job(&self) -> InjectionJob {
        InjectionJob {
            process: Arc::clone(&self.process),
            library: self.options.agent_library.clone(),
            module: self.options.agent_module(),
        }
    }

    /// Start injecting the agent on a background worker
    pub fn inject_agent(&mut self) {
        let job = self.injection_job();
        self.injector.start(job);
    }

    /// Inject the agent on the calling thread, then map the region
    pub fn inject_agent_and_wait(&mut self) -> Result<bool> {
        let job = self.injection_job();
        self.injector.run_blocking(job)?;
        self.map_region()
    }

    pub fn is_injecting(&self) -> bool {
        self.injector.is_injecting()
    }

    pub fn injection_outcome(&self) -> InjectionOutcome {
        self.injector.outcome()
    }

    pub fn reset_injection(&mut self) {
        self.injector.reset();
    }

    /// Re-run the agent's init and run entry points in an already loaded
    /// agent, reinstalling hooks a previous controller removed
    pub fn resume_agent(&self) -> Result<()> {
        info!("Resuming stopped agent in PID {}", self.process.pid());
        self.injection_job().run()
    }

    /// Run an exported agent function on a remote thread
    pub fn call_agent_function(&self, name: &str, wait: bool) -> Result<RemoteThread> {
        call_export(
            self.process.as_ref(),
            &self.options.agent_module(),
            name,
            wait,
        )
    }

    /// Re-read the agent's version and recompute the mismatch flag.
    ///
    /// Returns `true` if the versions match.
    pub fn verify_version(&mut self) -> bool {
        let Some(region) = self.region() else {
            return false;
        };
        let version = region.version();
        let matches = version == PROTOCOL_VERSION;
        if !matches && !self.version_mismatch {
            warn!(
                "Agent version mismatch: controller {}, agent {}",
                PROTOCOL_VERSION, version
            );
        }
        self.version_mismatch = !matches;
        matches
    }

    pub fn version_mismatch(&self) -> bool {
        self.version_mismatch
    }

    /// Version string the agent stamped into the region
    pub fn agent_version(&self) -> Option<String> {
        self.region().map(SharedRegion::version)
    }

    pub fn write_program_path(&self, path: &str) -> Result<()> {
        self.require_region()?.write_program_path(path);
        Ok(())
    }

    pub fn set_lock_in(&self, locked: bool, mode: SyncMode) -> Result<()> {
        self.require_region()?.set_lock(locked, mode);
        Ok(())
    }

    /// Publish a payload into a slot and mirror it as the displayed selection.
    /// Returns the slot generation.
    pub fn publish_payload(
        &self,
        slot: usize,
        address: u64,
        size: u64,
        type_id: u32,
        name: &str,
    ) -> Result<u64> {
        let region = self.require_region()?;
        let generation = region.slot(slot)?.publish(address, size, type_id);
        region.selection(slot)?.set(size, type_id, name);
        Ok(generation)
    }

    /// Clear a slot's payload and displayed selection
    pub fn clear_slot(&self, slot: usize) -> Result<u64> {
        let region = self.require_region()?;
        let generation = region.slot(slot)?.clear();
        region.selection(slot)?.clear();
        Ok(generation)
    }

    pub fn selections(&self) -> Vec<Selection> {
        self.region()
            .map(SharedRegion::selections)
            .unwrap_or_default()
    }

    /// Queue a custom event and have the agent evaluate it now
    pub fn execute_extra_prop(&self, prop: ExtraProp) -> Result<()> {
        let region = self.require_region()?;
        region.extra_prop().submit(prop);
        match self.call_agent_function(entry::EXECUTE_EXTRAPROP, true) {
            Ok(_) => Ok(()),
            // The agent's run loop still drains the request
            Err(e) if e.is_transient() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Ask the agent to log its view of the region
    pub fn call_debug_function(&self) -> Result<()> {
        if !self.process.is_running() {
            return Err(Error::ProcessNotFound(format!("PID {}", self.process.pid())));
        }
        self.call_agent_function(entry::AGENT_DEBUG, true)?;
        Ok(())
    }

    /// Register every payload still referenced by a live entity as
    /// never-to-be-freed. Returns the quarantined addresses.
    pub fn quarantine_active_payloads(&self) -> Vec<u64> {
        let Some(region) = self.region() else {
            return Vec::new();
        };
        let active: Vec<u64> = region
            .active_payloads()
            .into_iter()
            .filter(|&address| address != 0)
            .collect();
        for &address in &active {
            self.allocations.quarantine(address);
        }
        active
    }
}

impl Drop for AgentBridge {
    fn drop(&mut self) {
        self.injector.join();

        if self.mapping.is_none() || self.options.persistent || !self.process.is_running() {
            return;
        }

        if let Some(region) = self.region() {
            region.set_lock(false, region.sync_mode());
            for (i, slot) in region.slots().iter().enumerate() {
                if !slot.snapshot().is_empty() {
                    slot.clear();
                    if let Ok(selection) = region.selection(i) {
                        selection.clear();
                    }
                    debug!("Withdrew payload from slot {}", i);
                }
            }
        }

        // Hooks must be gone before the active set is final
        match self.call_agent_function(entry::AGENT_STOP, true) {
            Ok(_) => info!("Agent stopped"),
            Err(e) => warn!("Failed to stop agent: {}", e),
        }
        self.quarantine_active_payloads();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::MockProcess;
    use crate::protocol::{SyncMode, region_name};

    const MODULE: &str = "moveswap_agent.dll";
    const MODULE_BASE: u64 = 0x1800_0000;

    struct Fixture {
        process: Arc<MockProcess>,
        mapper: Arc<HeapMapper>,
        bridge: AgentBridge,
    }

    fn fixture(persistent: bool) -> Fixture {
        let process = MockProcess::new(500).with_library_module(MODULE, MODULE_BASE);
        write_fake_image(
            &process,
            MODULE_BASE,
            &[
                entry::AGENT_INIT,
                entry::AGENT_RUN,
                entry::AGENT_STOP,
                entry::EXECUTE_EXTRAPROP,
            ],
        );
        let process = Arc::new(process);
        let mapper = Arc::new(HeapMapper::new());
        let allocations = Arc::new(RemoteAllocations::new(process.clone()));
        let bridge = AgentBridge::new(
            allocations,
            mapper.clone(),
            BridgeOptions {
                region_name: region_name("t7", 500),
                agent_library: PathBuf::from("C:\\moveswap\\moveswap_agent.dll"),
                persistent,
                program_path: Some("C:\\moveswap".to_string()),
            },
        );
        Fixture {
            process,
            mapper,
            bridge,
        }
    }

    #[test]
    fn test_agent_module_name() {
        let f = fixture(true);
        assert_eq!(f.bridge.options().agent_module(), MODULE);

        let options = BridgeOptions {
            agent_library: PathBuf::from("/opt/moveswap/moveswap_agent.dll"),
            ..f.bridge.options().clone()
        };
        assert_eq!(options.agent_module(), MODULE);

        let options = BridgeOptions {
            agent_library: PathBuf::from("moveswap_agent.dll"),
            ..f.bridge.options().clone()
        };
        assert_eq!(options.agent_module(), MODULE);
    }

    #[test]
    fn test_map_region_not_found() {
        let mut f = fixture(true);
        assert!(!f.bridge.map_region().unwrap());
        assert!(f.bridge.region().is_none());
    }

    #[test]
    fn test_map_region_writes_program_path() {
        let mut f = fixture(true);
        let region = f.mapper.create(&region_name("t7", 500), 7);
        assert!(f.bridge.map_region().unwrap());
        assert_eq!(region.program_path().as_deref(), Some("C:\\moveswap"));
        assert!(!f.bridge.version_mismatch());
    }

    #[test]
    fn test_version_mismatch_is_reverified() {
        let mut f = fixture(true);
        let region = f.mapper.create(&region_name("t7", 500), 7);
        region.write_version("0.0.0-stale");
        f.bridge.map_region().unwrap();
        assert!(f.bridge.version_mismatch());
        assert_eq!(f.bridge.agent_version().as_deref(), Some("0.0.0-stale"));

        region.write_version(PROTOCOL_VERSION);
        assert!(f.bridge.verify_version());
        assert!(!f.bridge.version_mismatch());
    }

    #[test]
    fn test_publish_and_clear_slot() {
        let mut f = fixture(true);
        let region = f.mapper.create(&region_name("t7", 500), 7);
        f.bridge.map_region().unwrap();

        let generation = f.bridge.publish_payload(1, 0x5000, 64, 9, "Law").unwrap();
        assert_eq!(generation, 1);
        assert_eq!(region.slot(1).unwrap().snapshot().address, 0x5000);
        assert_eq!(f.bridge.selections()[1].name, "Law");

        f.bridge.clear_slot(1).unwrap();
        assert!(region.slot(1).unwrap().snapshot().is_empty());
        assert!(f.bridge.selections()[1].is_empty());
        assert!(matches!(
            f.bridge.clear_slot(3),
            Err(Error::InvalidSlot(3))
        ));
    }

    #[test]
    fn test_writes_require_region() {
        let f = fixture(true);
        assert!(matches!(
            f.bridge.set_lock_in(true, SyncMode::Offline),
            Err(Error::RegionUnavailable(_))
        ));
    }

    #[test]
    fn test_inject_and_wait() {
        let mut f = fixture(true);
        f.mapper.create(&region_name("t7", 500), 7);
        assert!(f.bridge.inject_agent_and_wait().unwrap());
        assert_eq!(f.process.loaded_libraries().len(), 1);
        assert_eq!(f.bridge.injection_outcome(), InjectionOutcome::Succeeded);
    }

    #[test]
    fn test_extra_prop_pokes_agent() {
        let mut f = fixture(true);
        let region = f.mapper.create(&region_name("t7", 500), 7);
        f.bridge.map_region().unwrap();
        f.process.load_library(&f.bridge.options().agent_library).unwrap();

        let prop = ExtraProp {
            slot: 0,
            id: 0x8123,
            value: 1,
        };
        f.bridge.execute_extra_prop(prop).unwrap();
        assert!(region.extra_prop().is_pending());
        assert_eq!(f.process.threads(), vec![(MODULE_BASE + 0x2300, true)]);
    }

    #[test]
    fn test_drop_quarantines_and_stops_agent() {
        let mut f = fixture(false);
        let region = f.mapper.create(&region_name("t7", 500), 7);
        f.bridge.map_region().unwrap();
        f.process.load_library(&f.bridge.options().agent_library).unwrap();

        let payload = f.bridge.allocations().allocate(0x100).unwrap();
        region.set_active_payload(0, payload).unwrap();
        region.set_lock(true, SyncMode::OnlineAttempting);
        let allocations = Arc::clone(f.bridge.allocations());

        drop(f.bridge);
        assert!(allocations.is_quarantined(payload));
        assert!(!region.is_locked());
        assert_eq!(f.process.threads(), vec![(MODULE_BASE + 0x2200, true)]);
    }

    #[test]
    fn test_drop_withdraws_published_payloads() {
        let mut f = fixture(false);
        let region = f.mapper.create(&region_name("t7", 500), 7);
        f.bridge.map_region().unwrap();
        f.process.load_library(&f.bridge.options().agent_library).unwrap();

        let payload = f.bridge.allocations().allocate(0x100).unwrap();
        f.bridge.publish_payload(0, payload, 0x100, 12, "Law").unwrap();
        let allocations = Arc::clone(f.bridge.allocations());

        drop(f.bridge);
        assert!(region.slot(0).unwrap().snapshot().is_empty());
        assert!(region.selection(0).unwrap().snapshot().is_empty());
        assert!(region.slot(1).unwrap().snapshot().is_empty());
        // Never applied, so nothing pins it
        assert!(!allocations.is_quarantined(payload));
        assert_eq!(allocations.release_unused(&[]), 1);
        assert_eq!(f.process.freed(), vec![payload]);
    }

    #[test]
    fn test_resume_agent_reruns_entry_points() {
        let mut f = fixture(true);
        f.mapper.create(&region_name("t7", 500), 7);
        f.bridge.map_region().unwrap();
        f.process.load_library(&f.bridge.options().agent_library).unwrap();

        f.bridge.resume_agent().unwrap();
        assert_eq!(f.process.loaded_libraries().len(), 1);
        assert_eq!(
            f.process.threads(),
            vec![(MODULE_BASE + 0x2000, true), (MODULE_BASE + 0x2100, false)]
        );

        f.process.set_thread_exit_code(0);
        assert!(matches!(
            f.bridge.resume_agent(),
            Err(Error::InjectionFailed(_))
        ));
    }

    #[test]
    fn test_drop_persistent_leaves_agent() {
        let mut f = fixture(true);
        f.mapper.create(&region_name("t7", 500), 7);
        f.bridge.map_region().unwrap();
        f.process.load_library(&f.bridge.options().agent_library).unwrap();

        drop(f.bridge);
        assert!(f.process.threads().is_empty());
    }
}
