//! Controller-side coordination of one target process.
//!
//! The [`Coordinator`] is driven by a polling loop. Every [`Coordinator::tick`]
//! it:
//! - observes the target and the shared region and advances the attach
//!   state machine (`NoRegion -> Injecting -> Loaded`)
//! - re-verifies a mismatched agent version, or mirrors the lock-in intent
//! - restarts an agent a previous controller stopped, and reports an
//!   injection that failed after the region appeared
//! - keeps the name tag applied when enabled
//! - drains the import queue in FIFO order while the agent is loaded

mod queue;
mod state;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::Utc;
use tracing::{debug, error, info, warn};

pub use queue::{ImportQueue, ImportRequest};
pub use state::{Action, CoordinatorState, Observation, StateTracker};

use crate::addresses::{GameAddresses, names};
use crate::bridge::{AgentBridge, BridgeOptions, InjectionOutcome, RegionMapper};
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::importer::{
    ImportErrcode, ImportFailure, ImportSettings, PayloadImporter, PayloadInfo, RawFileImporter,
};
use crate::nametag;
use crate::process::{ProcessStatus, RemoteAllocations, TargetProcess};
use crate::protocol::layout::SLOT_COUNT;
use crate::protocol::{ExtraProp, PROTOCOL_VERSION, Selection, SyncMode, region_name};
use crate::status::StatusReport;
use crate::title::{Title, TitleId, title_for};

/// Settings of a coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub title: TitleId,
    /// Agent library injected into the target
    pub agent_library: PathBuf,
    /// Controller directory handed to the agent
    pub program_path: Option<String>,
    pub persistent_agent: bool,
    pub synchronize_lock_in: bool,
    pub name_tag: bool,
    pub addresses: GameAddresses,
}

impl CoordinatorOptions {
    pub fn builder() -> CoordinatorOptionsBuilder {
        CoordinatorOptionsBuilder::default()
    }

    /// Options for a controller running from `program_dir`
    pub fn from_config(config: &ControllerConfig, program_dir: &Path) -> Self {
        let title = title_for(config.title);
        let addresses = GameAddresses::load_over(
            title.default_addresses(),
            &config.addresses_path(program_dir),
        );
        Self::builder()
            .title(config.title)
            .agent_library(config.agent_library(title.as_ref(), program_dir))
            .program_path(program_dir.to_string_lossy())
            .persistent_agent(config.persistent_agent)
            .synchronize_lock_in(config.synchronize_lock_in)
            .name_tag(config.name_tag)
            .addresses(addresses)
            .build()
    }
}

/// Builder for CoordinatorOptions
#[derive(Debug, Clone, Default)]
pub struct CoordinatorOptionsBuilder {
    title: Option<TitleId>,
    agent_library: Option<PathBuf>,
    program_path: Option<String>,
    persistent_agent: Option<bool>,
    synchronize_lock_in: Option<bool>,
    name_tag: Option<bool>,
    addresses: Option<GameAddresses>,
}

impl CoordinatorOptionsBuilder {
    pub fn title(mut self, title: TitleId) -> Self {
        self.title = Some(title);
        self
    }

    pub fn agent_library<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.agent_library = Some(path.into());
        self
    }

    pub fn program_path<S: Into<String>>(mut self, path: S) -> Self {
        self.program_path = Some(path.into());
        self
    }

    /// Keep the agent loaded after the controller exits
    pub fn persistent_agent(mut self, enabled: bool) -> Self {
        self.persistent_agent = Some(enabled);
        self
    }

    pub fn synchronize_lock_in(mut self, enabled: bool) -> Self {
        self.synchronize_lock_in = Some(enabled);
        self
    }

    pub fn name_tag(mut self, enabled: bool) -> Self {
        self.name_tag = Some(enabled);
        self
    }

    pub fn addresses(mut self, addresses: GameAddresses) -> Self {
        self.addresses = Some(addresses);
        self
    }

    /// Build the options, filling gaps from the title's defaults
    pub fn build(self) -> CoordinatorOptions {
        let title_id = self.title.unwrap_or_default();
        let title = title_for(title_id);
        CoordinatorOptions {
            title: title_id,
            agent_library: self
                .agent_library
                .unwrap_or_else(|| PathBuf::from(title.map_layout().agent_library)),
            program_path: self.program_path,
            persistent_agent: self.persistent_agent.unwrap_or(false),
            synchronize_lock_in: self.synchronize_lock_in.unwrap_or(true),
            name_tag: self.name_tag.unwrap_or(false),
            addresses: self.addresses.unwrap_or_else(|| title.default_addresses()),
        }
    }
}

/// Per-process objects, rebuilt on every attach
struct Session {
    bridge: AgentBridge,
    importer: Box<dyn PayloadImporter>,
}

pub struct Coordinator {
    options: CoordinatorOptions,
    title: Box<dyn Title>,
    mapper: Arc<dyn RegionMapper>,
    session: Option<Session>,
    process_status: ProcessStatus,
    tracker: StateTracker,
    queue: ImportQueue,
    progress: AtomicU8,
    failures: Vec<ImportFailure>,
    /// Copy of the region's selections, refreshed after each queue step
    displayed: Vec<Selection>,
    injection_requested: bool,
    injection_started: bool,
    /// The region was adopted while the injection worker still had a result
    /// to report
    awaiting_injection: bool,
    agent_error: Option<String>,
    locked_in: bool,
    sync_mode: SyncMode,
    name_tag_enabled: bool,
}

impl Coordinator {
    pub fn new(options: CoordinatorOptions, mapper: Arc<dyn RegionMapper>) -> Self {
        let title = title_for(options.title);
        let name_tag_enabled = options.name_tag;
        Self {
            options,
            title,
            mapper,
            session: None,
            process_status: ProcessStatus::NotAttached,
            tracker: StateTracker::new(),
            queue: ImportQueue::new(),
            progress: AtomicU8::new(0),
            failures: Vec::new(),
            displayed: Vec::new(),
            injection_requested: false,
            injection_started: false,
            awaiting_injection: false,
            agent_error: None,
            locked_in: false,
            sync_mode: SyncMode::Offline,
            name_tag_enabled,
        }
    }

    pub fn options(&self) -> &CoordinatorOptions {
        &self.options
    }

    pub fn title(&self) -> &dyn Title {
        self.title.as_ref()
    }

    pub fn state(&self) -> CoordinatorState {
        self.tracker.state()
    }

    pub fn is_attached(&self) -> bool {
        self.session.is_some()
    }

    /// Imports are waiting or running
    pub fn is_busy(&self) -> bool {
        !self.queue.is_empty()
    }

    /// The injection worker is running
    pub fn is_injecting(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.bridge.is_injecting())
    }

    pub fn failures(&self) -> &[ImportFailure] {
        &self.failures
    }

    pub fn displayed_selections(&self) -> &[Selection] {
        &self.displayed
    }

    /// Report why no process is attached
    pub fn set_process_status(&mut self, status: ProcessStatus) {
        if self.session.is_none() {
            self.process_status = status;
        }
    }

    /// Attach to a target with the raw file importer
    pub fn attach(&mut self, process: Arc<dyn TargetProcess>) {
        let allocations = Arc::new(RemoteAllocations::new(process));
        let importer = Box::new(RawFileImporter::new(Arc::clone(&allocations)));
        self.attach_with_importer(allocations, importer);
    }

    pub fn attach_with_importer(
        &mut self,
        allocations: Arc<RemoteAllocations>,
        importer: Box<dyn PayloadImporter>,
    ) {
        self.detach();

        let pid = allocations.process().pid();
        let layout = self.title.map_layout();
        let bridge = AgentBridge::new(
            allocations,
            Arc::clone(&self.mapper),
            BridgeOptions {
                region_name: region_name(layout.region_tag, pid),
                agent_library: self.options.agent_library.clone(),
                persistent: self.options.persistent_agent,
                program_path: self.options.program_path.clone(),
            },
        );

        self.session = Some(Session { bridge, importer });
        self.queue.clear();
        self.process_status = ProcessStatus::Attached;
        info!("Attached to PID {}", pid);
    }

    /// Forget the target. Payloads are left where they are.
    pub fn detach(&mut self) {
        self.detach_as(ProcessStatus::NotAttached);
    }

    fn detach_as(&mut self, status: ProcessStatus) {
        if let Some(session) = self.session.take() {
            info!("Detached from PID {}", session.bridge.process().pid());
        }
        self.reset_agent_state();
        self.process_status = status;
    }

    fn reset_agent_state(&mut self) {
        self.tracker.reset();
        self.injection_requested = false;
        self.injection_started = false;
        self.awaiting_injection = false;
        self.locked_in = false;
        self.displayed.clear();
    }

    pub fn request_injection(&mut self) {
        self.injection_requested = true;
        self.agent_error = None;
    }

    pub fn queue_import(
        &mut self,
        payload: PayloadInfo,
        slot: usize,
        settings: ImportSettings,
    ) -> Result<()> {
        if slot >= SLOT_COUNT {
            return Err(Error::InvalidSlot(slot));
        }
        debug!("Queued {} for slot {}", payload.name, slot);
        self.queue.push(ImportRequest {
            payload,
            settings,
            slot,
        });
        Ok(())
    }

    pub fn queue_clear(&mut self, slot: usize) -> Result<()> {
        self.queue_import(PayloadInfo::clear(), slot, ImportSettings::default())
    }

    /// Record the lock-in intent; mirrored into the region on the next tick
    pub fn set_lock_in(&mut self, locked: bool, mode: SyncMode) {
        self.locked_in = locked;
        self.sync_mode = mode;
    }

    /// Have the agent evaluate a custom event on a slot's live entity
    pub fn execute_extra_prop(&self, slot: u32, id: u32, value: u32) -> Result<()> {
        let bridge = self.loaded_bridge()?;
        let prop = ExtraProp { slot, id, value };
        self.title.on_custom_event(prop)?;
        bridge.execute_extra_prop(prop)
    }

    /// Have the agent log its view of the region
    pub fn dump_agent_state(&self) -> Result<()> {
        self.loaded_bridge()?.call_debug_function()
    }

    /// Whether the latest payload of `slot` reached a live entity
    pub fn slot_applied(&self, slot: usize) -> bool {
        self.session
            .as_ref()
            .and_then(|s| s.bridge.region())
            .and_then(|r| r.slot(slot).ok())
            .is_some_and(|p| p.is_applied())
    }

    fn loaded_bridge(&self) -> Result<&AgentBridge> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| Error::ProcessNotFound("no process attached".to_string()))?;
        if self.tracker.state() != CoordinatorState::Loaded {
            return Err(Error::RegionUnavailable(
                session.bridge.options().region_name.clone(),
            ));
        }
        if session.bridge.version_mismatch() {
            return Err(Error::VersionMismatch {
                expected: PROTOCOL_VERSION.to_string(),
                actual: session.bridge.agent_version().unwrap_or_default(),
            });
        }
        Ok(&session.bridge)
    }

    /// One polling step
    pub fn tick(&mut self) {
        let Some(action) = self.observe() else {
            return;
        };

        if action == Action::Reset {
            info!("Target process exited");
            self.detach_as(ProcessStatus::Exited);
            return;
        }
        self.apply(action);
        self.check_name_tag();

        if self.tracker.state() == CoordinatorState::Loaded {
            self.check_injection_outcome();
            self.maintain_agent();
            self.process_queue();
        }
    }

    fn observe(&mut self) -> Option<Action> {
        let session = self.session.as_mut()?;

        let process_running = session.bridge.process().is_running();
        let region_mapped = process_running
            && match session.bridge.map_region() {
                Ok(mapped) => mapped,
                Err(e) if e.is_transient() => {
                    debug!("Region not mappable yet: {}", e);
                    false
                }
                Err(e) => {
                    let message = e.to_string();
                    if self.agent_error.as_deref() != Some(message.as_str()) {
                        error!("Cannot use the shared region: {}", message);
                    }
                    self.agent_error = Some(message);
                    false
                }
            };

        let observation = Observation {
            region_mapped,
            injection_requested: self.injection_requested,
            injection_started: self.injection_started,
            worker_running: session.bridge.is_injecting(),
            process_running,
        };
        Some(self.tracker.advance(observation))
    }

    fn apply(&mut self, action: Action) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match action {
            Action::Poll | Action::Reset => {}
            Action::StartInjection => {
                session.bridge.inject_agent();
                self.injection_started = true;
                self.agent_error = None;
            }
            Action::AdoptRegion => {
                info!(
                    "Agent loaded (version {})",
                    session.bridge.agent_version().unwrap_or_default()
                );
                self.awaiting_injection = self.injection_started;
                self.injection_requested = false;
                self.injection_started = false;
                self.agent_error = None;
                self.displayed = session.bridge.selections();

                let stopped = session
                    .bridge
                    .region()
                    .is_some_and(|region| !region.agent_running());
                if stopped && !self.awaiting_injection && !session.bridge.version_mismatch() {
                    if let Err(e) = session.bridge.resume_agent() {
                        error!("Failed to resume the agent: {}", e);
                        self.agent_error = Some(e.to_string());
                    }
                }
            }
            Action::ReportInjectionFailure => {
                let reason = match session.bridge.injection_outcome() {
                    InjectionOutcome::Failed(reason) => reason,
                    _ => "the agent did not create the shared region".to_string(),
                };
                error!("Injection finished but the agent is not loaded: {}", reason);
                session.bridge.reset_injection();
                self.agent_error = Some(reason);
                self.injection_requested = false;
                self.injection_started = false;
            }
        }
    }

    /// Surface the result of an injection whose region was adopted before the
    /// worker finished
    fn check_injection_outcome(&mut self) {
        if !self.awaiting_injection {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.bridge.is_injecting() {
            return;
        }

        self.awaiting_injection = false;
        if let InjectionOutcome::Failed(reason) = session.bridge.injection_outcome() {
            error!("Agent failed to start: {}", reason);
            self.agent_error = Some(reason);
        }
        session.bridge.reset_injection();
    }

    /// Version re-check and lock-in mirroring
    fn maintain_agent(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if session.bridge.version_mismatch() && !session.bridge.verify_version() {
            return;
        }

        if self.options.synchronize_lock_in {
            let mode = self.title.on_lock_in(self.locked_in, self.sync_mode);
            if let Err(e) = session.bridge.set_lock_in(self.locked_in, mode) {
                debug!("Failed to mirror lock-in: {}", e);
            }
        }
    }

    fn check_name_tag(&mut self) {
        if !self.name_tag_enabled {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let process = Arc::clone(session.bridge.process());
        let address = match self.options.addresses.resolve_pointer_path(
            process.as_ref(),
            process.main_module_base(),
            names::USERNAME_ADDR,
        ) {
            Ok(address) => address,
            Err(Error::Config(message)) => {
                warn!("Name tag disabled: {}", message);
                self.name_tag_enabled = false;
                return;
            }
            Err(e) => {
                debug!("Username not readable yet: {}", e);
                return;
            }
        };

        match nametag::tag_username(process.as_ref(), address) {
            Ok(true) => {
                info!("Name tag applied");
                if !session.bridge.is_mapped() {
                    match session.bridge.inject_agent_and_wait() {
                        Ok(true) => {}
                        Ok(false) => debug!("Agent injected, region not created yet"),
                        Err(e) => {
                            error!("Injection failed: {}", e);
                            self.agent_error = Some(e.to_string());
                        }
                    }
                }
                session.bridge.set_persistent(false);
            }
            Ok(false) => {}
            Err(e) => debug!("Failed to check name tag: {}", e),
        }
    }

    fn process_queue(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.bridge.version_mismatch() {
            return;
        }

        while let Some(request) = self.queue.head().cloned() {
            let slot = request.slot;
            let outcome = if request.is_clear() {
                session.bridge.clear_slot(slot).map_err(|e| {
                    warn!("Failed to clear slot {}: {}", slot, e);
                    ImportErrcode::GameWriteErr
                })
            } else {
                session
                    .importer
                    .import(&request.payload, slot, request.settings, &self.progress)
                    .and_then(|descriptor| {
                        session
                            .bridge
                            .publish_payload(
                                slot,
                                descriptor.address,
                                descriptor.size,
                                descriptor.type_id,
                                &request.payload.name,
                            )
                            .map_err(|e| {
                                warn!("Failed to publish {}: {}", request.payload.name, e);
                                ImportErrcode::GameWriteErr
                            })
                    })
            };

            match outcome {
                Ok(generation) => {
                    self.queue.pop();
                    if request.is_clear() {
                        info!("Cleared slot {}", slot);
                    } else {
                        info!(
                            "Published {} to slot {} (generation {})",
                            request.payload.name, slot, generation
                        );
                    }
                    if request.settings.free_unused {
                        release_unused(&session.bridge);
                    }
                }
                Err(code) => {
                    error!("Import of {} failed: {}", request.payload.name, code);
                    self.failures.push(ImportFailure {
                        code,
                        payload: request.payload.name.clone(),
                        slot,
                        at: Utc::now(),
                    });
                    let discarded = self.queue.clear();
                    if discarded > 1 {
                        warn!("Discarded {} queued imports", discarded - 1);
                    }
                }
            }

            self.displayed = session.bridge.selections();
        }
    }

    pub fn status(&self) -> StatusReport {
        let bridge = self.session.as_ref().map(|s| &s.bridge);
        StatusReport {
            process: self.process_status,
            state: self.tracker.state(),
            region_loaded: self.tracker.state() == CoordinatorState::Loaded,
            version_matches: bridge.is_some_and(|b| b.is_mapped() && !b.version_mismatch()),
            agent_version: bridge.and_then(AgentBridge::agent_version),
            busy: self.is_busy(),
            queued: self.queue.len(),
            progress: self.progress.load(Ordering::Relaxed),
            injecting: self.injection_requested || bridge.is_some_and(AgentBridge::is_injecting),
            injection_error: self.agent_error.clone(),
            locked_in: self.locked_in,
            import_failures: self.failures.clone(),
            selections: self.displayed.clone(),
            messages: Vec::new(),
        }
        .with_messages()
    }

    /// Strip the name tag, release the agent and free every payload nothing
    /// references anymore.
    ///
    /// A non-persistent agent has its slots withdrawn and is stopped before
    /// the live set is quarantined, so nothing freed here is still published.
    pub fn shutdown(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        let process = Arc::clone(session.bridge.process());
        let allocations = Arc::clone(session.bridge.allocations());

        if self.options.name_tag && process.is_running() {
            match self.options.addresses.resolve_pointer_path(
                process.as_ref(),
                process.main_module_base(),
                names::USERNAME_ADDR,
            ) {
                Ok(address) => {
                    if let Err(e) = nametag::untag_username(process.as_ref(), address) {
                        warn!("Failed to remove name tag: {}", e);
                    }
                }
                Err(e) => debug!("Username not reachable: {}", e),
            }
        }

        let keep = if session.bridge.options().persistent {
            session.bridge.quarantine_active_payloads();
            published_payloads(&session.bridge)
        } else {
            Vec::new()
        };
        drop(session);

        if process.is_running() {
            let released = allocations.release_unused(&keep);
            if released > 0 {
                info!("Freed {} unused payloads", released);
            }
        }

        self.reset_agent_state();
        self.process_status = ProcessStatus::NotAttached;
    }
}

/// Payload addresses currently published in the region's slots
fn published_payloads(bridge: &AgentBridge) -> Vec<u64> {
    bridge
        .region()
        .map(|region| {
            region
                .slots()
                .iter()
                .map(|slot| slot.snapshot().address)
                .filter(|&address| address != 0)
                .collect()
        })
        .unwrap_or_default()
}

fn release_unused(bridge: &AgentBridge) {
    let mut keep = published_payloads(bridge);
    if let Some(region) = bridge.region() {
        keep.extend(region.active_payloads().into_iter().filter(|&a| a != 0));
    }
    let released = bridge.allocations().release_unused(&keep);
    if released > 0 {
        debug!("Freed {} unused payloads", released);
    }
}
