//! The agent's own thread: peer events and controller requests

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use moveswap_core::config::CONFIG_FILE;
use moveswap_core::protocol::layout::timing::AGENT_POLL_INTERVAL_MS;
use moveswap_core::{ControllerConfig, GameAddresses, SharedRegion, SyncStatus, Title};
use tracing::{debug, info, warn};

use crate::context::AgentContext;
use crate::extra_prop;
use crate::peer::PeerEvent;

/// Game addresses for the agent: the title's defaults overlaid with the
/// controller's addresses file, found through the program path the
/// controller wrote into the region
pub fn load_addresses(region: &SharedRegion, title: &dyn Title) -> GameAddresses {
    let Some(program_path) = region.program_path() else {
        debug!("No program path in the region, using default game addresses");
        return title.default_addresses();
    };
    let program_dir = PathBuf::from(program_path);

    let config_path = program_dir.join(CONFIG_FILE);
    let config = if config_path.exists() {
        ControllerConfig::load_or_default(&config_path)
    } else {
        ControllerConfig::default()
    };
    GameAddresses::load_over(title.default_addresses(), &config.addresses_path(&program_dir))
}

/// One iteration of the run loop
pub fn step(ctx: &AgentContext) {
    for event in ctx.peer().poll_events() {
        match event {
            PeerEvent::SyncIntent => ctx.sync().mark_peer_intent(),
            PeerEvent::SyncComplete => {
                info!("Payload exchange complete");
                ctx.region().set_sync_status(SyncStatus::Ready);
            }
        }
    }

    if let Err(e) = extra_prop::execute_pending(ctx) {
        warn!("Extra prop failed: {}", e);
    }
}

/// Poll until [`AgentContext::stop`] is called
pub fn run(ctx: &AgentContext) {
    info!("Agent run loop started");
    let interval = Duration::from_millis(AGENT_POLL_INTERVAL_MS);
    while ctx.is_running() {
        step(ctx);
        thread::sleep(interval);
    }
    info!("Agent run loop stopped");
}
