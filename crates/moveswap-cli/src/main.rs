mod controller;
mod report;
mod shutdown;
mod target;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use moveswap_core::config::CONFIG_FILE;
use moveswap_core::{ControllerConfig, Error, ImportSettings, PayloadInfo, SyncMode};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use controller::Controller;
use shutdown::ShutdownSignal;

/// Delay between attach attempts while the target is not running
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "moveswap")]
#[command(about = "Hot-swap movesets in a running game")]
struct Args {
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inject the agent, apply payloads and keep it synchronized until Ctrl-C
    Run {
        /// Payload to import, as SLOT=FILE
        #[arg(long = "load", value_name = "SLOT=FILE", value_parser = parse_load)]
        loads: Vec<(usize, PathBuf)>,

        /// Entity type id the payloads were built for
        #[arg(long, default_value_t = 0)]
        type_id: u32,

        /// Report the selection as locked in
        #[arg(long)]
        lock_in: bool,

        /// Attempt the online payload exchange when locked in
        #[arg(long)]
        online: bool,

        /// Free payloads no slot references anymore after each import
        #[arg(long)]
        free_unused: bool,
    },
    /// Show the controller's view of the target
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Inject the agent and leave it running
    Inject,
    /// Evaluate a custom event on a player's entity
    Prop {
        slot: u32,
        #[arg(value_parser = parse_number)]
        id: u32,
        #[arg(value_parser = parse_number)]
        value: u32,
    },
    /// Clear the payload selected for a slot
    Clear { slot: usize },
    /// Have the agent write its view of the region to its log
    Debug,
}

fn parse_load(s: &str) -> std::result::Result<(usize, PathBuf), String> {
    let (slot, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected SLOT=FILE, got '{}'", s))?;
    let slot = slot
        .trim()
        .parse()
        .map_err(|_| format!("invalid slot '{}'", slot))?;
    Ok((slot, PathBuf::from(path)))
}

/// Decimal or `0x`-prefixed hexadecimal
fn parse_number(s: &str) -> std::result::Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| format!("invalid number '{}'", s))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("moveswap=info".parse()?))
        .init();

    let args = Args::parse();
    let config = ControllerConfig::load_or_default(&args.config);
    let program_dir = program_dir()?;
    let shutdown = ShutdownSignal::install()?;

    match args.command {
        Command::Run {
            loads,
            type_id,
            lock_in,
            online,
            free_unused,
        } => {
            let mode = if online {
                SyncMode::OnlineAttempting
            } else {
                SyncMode::Offline
            };
            let loads = describe_payloads(&loads, type_id)?;
            let mut controller = Controller::new(&config, &program_dir, false)?;
            run(
                &mut controller,
                &loads,
                ImportSettings { free_unused },
                (lock_in, mode),
                &shutdown,
            )
        }
        Command::Status { json } => {
            let mut controller = Controller::new(&config, &program_dir, true)?;
            if let Err(e) = controller.connect(false, &shutdown) {
                debug!("{}", e);
            }
            let report = controller.coordinator().status();
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report::render(&report));
            }
            Ok(())
        }
        Command::Inject => {
            let mut controller = Controller::new(&config, &program_dir, true)?;
            controller.connect(true, &shutdown)?;
            info!("Agent loaded in {}", controller.process_name());
            Ok(())
        }
        Command::Prop { slot, id, value } => {
            let mut controller = Controller::new(&config, &program_dir, true)?;
            controller.connect(false, &shutdown)?;
            controller
                .coordinator()
                .execute_extra_prop(slot, id, value)
                .context("Extra prop failed")?;
            info!("Extra prop {:#x} = {} executed on slot {}", id, value, slot);
            Ok(())
        }
        Command::Clear { slot } => {
            let mut controller = Controller::new(&config, &program_dir, true)?;
            controller.connect(false, &shutdown)?;
            controller.coordinator().queue_clear(slot)?;
            controller.drain_queue(&shutdown)?;
            info!("Cleared slot {}", slot);
            Ok(())
        }
        Command::Debug => {
            let mut controller = Controller::new(&config, &program_dir, true)?;
            controller.connect(false, &shutdown)?;
            controller
                .coordinator()
                .dump_agent_state()
                .context("Agent debug dump failed")?;
            info!("Agent state written to the agent log");
            Ok(())
        }
    }
}

/// Directory of the controller executable, handed to the agent
fn program_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Cannot locate the controller executable")?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("Executable has no parent directory"))
}

fn describe_payloads(loads: &[(usize, PathBuf)], type_id: u32) -> Result<Vec<(usize, PayloadInfo)>> {
    loads
        .iter()
        .map(|(slot, path)| {
            let info = PayloadInfo::from_path(path, type_id)
                .with_context(|| format!("Cannot read payload {}", path.display()))?;
            Ok((*slot, info))
        })
        .collect()
}

fn run(
    controller: &mut Controller,
    loads: &[(usize, PayloadInfo)],
    settings: ImportSettings,
    (lock_in, mode): (bool, SyncMode),
    shutdown: &ShutdownSignal,
) -> Result<()> {
    info!("Waiting for {}...", controller.process_name());

    while !shutdown.is_shutdown() {
        if !controller.coordinator().is_attached() {
            match controller.attach() {
                Ok(()) => {
                    let coordinator = controller.coordinator();
                    coordinator.request_injection();
                    coordinator.set_lock_in(lock_in, mode);
                    for (slot, payload) in loads {
                        if let Err(e) = coordinator.queue_import(payload.clone(), *slot, settings) {
                            warn!("Cannot queue {}: {}", payload.name, e);
                        }
                    }
                }
                Err(e @ Error::UnsupportedPlatform(_)) => return Err(e.into()),
                Err(e) => {
                    debug!("{}", e);
                    if shutdown.wait(RECONNECT_DELAY) {
                        break;
                    }
                    continue;
                }
            }
        }

        controller.coordinator().tick();
        if !controller.coordinator().is_attached() {
            info!("Target exited, waiting for reconnect...");
        }
        if let Some(e) = controller.coordinator().status().injection_error {
            error!("Agent injection failed: {}", e);
            break;
        }
        if shutdown.wait(controller.poll_interval()) {
            break;
        }
    }

    info!("Shutting down");
    controller.coordinator().shutdown();
    Ok(())
}
