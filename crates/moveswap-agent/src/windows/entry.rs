//! Exported entry points, called by the controller through remote threads.
//!
//! `AgentRun` is the only entry point the controller does not wait on.
//! `AgentInit` and `ExecuteExtraprop` report through their exit code:
//! non-zero on success.

use std::ffi::c_void;
use std::fs::File;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once, OnceLock};

use moveswap_core::addresses::names;
use moveswap_core::{MappedRegion, Result, TitleId, region_name, title_for};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use windows::Win32::System::Threading::GetCurrentProcessId;

use super::detour::Detour;
use super::functions::TargetFunctions;
use super::hooks::create_detours;
use super::memory::{LocalMemory, agent_directory, main_module};
use super::region::OwnedRegion;
use crate::context::AgentContext;
use crate::functions::LocatedFunctions;
use crate::{debug, extra_prop, runtime};

pub(super) struct Agent {
    pub(super) ctx: AgentContext,
    detours: Vec<Detour>,
}

impl Agent {
    fn enable_hooks(&self) -> Result<()> {
        for detour in &self.detours {
            detour.enable()?;
        }
        info!("{} hooks enabled", self.detours.len());
        Ok(())
    }

    fn disable_hooks(&self) {
        for detour in &self.detours {
            if let Err(e) = detour.disable() {
                warn!("{}", e);
            }
        }
    }
}

const LOG_FILE: &str = "moveswap-agent.log";

static AGENT: OnceLock<Agent> = OnceLock::new();
static LOGGING: Once = Once::new();
/// Serializes `AgentInit` calls
static INIT_LOCK: Mutex<()> = Mutex::new(());
/// Set while a run loop is active
static RUN_LOOP: AtomicBool = AtomicBool::new(false);

pub(super) fn agent() -> Option<&'static Agent> {
    AGENT.get()
}

fn init_logging() {
    LOGGING.call_once(|| {
        let filter = || {
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("moveswap_agent=debug,moveswap_core=info"))
        };
        let file = agent_directory().and_then(|dir| File::create(dir.join(LOG_FILE)).ok());
        let _ = match file {
            Some(file) => tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init(),
            None => tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .try_init(),
        };

        panic::set_hook(Box::new(|panic_info| {
            let payload = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_string()
            };
            let location = panic_info
                .location()
                .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
                .unwrap_or_else(|| "unknown location".to_string());
            error!(target: "moveswap_agent::panic", "Panic at {}: {}", location, payload);
        }));
    });
}

fn initialize() -> Result<()> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    if let Some(agent) = AGENT.get() {
        agent.enable_hooks()?;
        agent.ctx.resume();
        info!("Agent resumed");
        return Ok(());
    }

    let title = title_for(TitleId::default());
    // SAFETY: no preconditions.
    let pid = unsafe { GetCurrentProcessId() };
    let region = OwnedRegion::create(&region_name(title.map_layout().region_tag, pid))?;
    let fresh = region.is_fresh();
    let addresses = runtime::load_addresses(region.region(), title.as_ref());

    let (base, size) = main_module()?;
    let located = LocatedFunctions::locate(&LocalMemory, base, size, &addresses, title.as_ref())?;
    let player_list = located.player_list(&LocalMemory, &addresses)?;

    let detours = create_detours(&located)?;
    let mut functions = TargetFunctions::default();
    for detour in &detours {
        functions.insert(detour.name(), detour.trampoline());
    }
    if let Some(address) = located.get(names::EXECUTE_EXTRAPROP) {
        functions.insert(names::EXECUTE_EXTRAPROP, address);
    }

    let ctx = AgentContext::builder()
        .title(title.id())
        .region(Box::new(region))
        .memory(Arc::new(LocalMemory))
        .game(Arc::new(functions))
        .addresses(addresses)
        .player_list(player_list)
        .build()?;

    if AGENT.set(Agent { ctx, detours }).is_err() {
        warn!("Agent initialized concurrently");
    }
    if let Some(agent) = AGENT.get() {
        agent.enable_hooks()?;
        agent.ctx.resume();
        // Must stay last: an initialized region reads as a loaded agent
        if fresh {
            agent.ctx.region().initialize(title.id().as_raw());
        }
    }
    info!("Agent initialized in PID {}", pid);
    Ok(())
}

#[unsafe(no_mangle)]
pub extern "system" fn AgentInit(_param: *mut c_void) -> u32 {
    init_logging();
    match initialize() {
        Ok(()) => 1,
        Err(e) => {
            error!("Agent initialization failed: {}", e);
            0
        }
    }
}

#[unsafe(no_mangle)]
pub extern "system" fn AgentRun(_param: *mut c_void) -> u32 {
    let Some(agent) = agent() else {
        return 0;
    };
    if RUN_LOOP.swap(true, Ordering::SeqCst) {
        info!("Run loop already active");
        return 0;
    }
    runtime::run(&agent.ctx);
    RUN_LOOP.store(false, Ordering::SeqCst);
    0
}

/// Stop the run loop and restore the target functions. The library stays
/// loaded; a later `AgentInit` resumes.
#[unsafe(no_mangle)]
pub extern "system" fn AgentStop(_param: *mut c_void) -> u32 {
    if let Some(agent) = agent() {
        agent.ctx.stop();
        agent.disable_hooks();
        info!("Agent stopped");
    }
    0
}

#[unsafe(no_mangle)]
pub extern "system" fn ExecuteExtraprop(_param: *mut c_void) -> u32 {
    let Some(agent) = agent() else {
        return 0;
    };
    match extra_prop::execute_pending(&agent.ctx) {
        Ok(_) => 1,
        Err(e) => {
            warn!("Extra prop failed: {}", e);
            0
        }
    }
}

#[unsafe(no_mangle)]
pub extern "system" fn AgentDebug(_param: *mut c_void) -> u32 {
    if let Some(agent) = agent() {
        debug::dump_state(&agent.ctx);
    }
    0
}
