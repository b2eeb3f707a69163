//! A coordinator driven from the command line

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use moveswap_core::protocol::layout::timing::INJECTION_WAIT_TIMEOUT_MS;
use moveswap_core::{
    ControllerConfig, Coordinator, CoordinatorOptions, CoordinatorState, Error, ProcessStatus,
    title_for,
};
use tracing::{debug, info};

use crate::shutdown::ShutdownSignal;
use crate::target;

pub struct Controller {
    coordinator: Coordinator,
    process_name: String,
    poll: Duration,
}

impl Controller {
    /// `persistent` keeps the agent loaded on exit regardless of the config
    pub fn new(config: &ControllerConfig, program_dir: &Path, persistent: bool) -> Result<Self> {
        let mut options = CoordinatorOptions::from_config(config, program_dir);
        options.persistent_agent |= persistent;
        let title = title_for(config.title);
        Ok(Self {
            coordinator: Coordinator::new(options, target::region_mapper()?),
            process_name: config.process_name(title.as_ref()),
            poll: config.poll_interval(),
        })
    }

    pub fn coordinator(&mut self) -> &mut Coordinator {
        &mut self.coordinator
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    /// Find and attach the target process
    pub fn attach(&mut self) -> moveswap_core::Result<()> {
        match target::find_target(&self.process_name) {
            Ok(process) => {
                info!("Attached to {} (PID {})", self.process_name, process.pid());
                self.coordinator.attach(process);
                Ok(())
            }
            Err(e) => {
                let status = match e {
                    Error::ProcessNotFound(_) => ProcessStatus::NotFound,
                    _ => ProcessStatus::AttachError,
                };
                self.coordinator.set_process_status(status);
                Err(e)
            }
        }
    }

    /// Tick until `done` holds. Returns `false` on timeout or shutdown.
    pub fn tick_until(
        &mut self,
        timeout: Duration,
        shutdown: &ShutdownSignal,
        done: impl Fn(&Coordinator) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.coordinator.tick();
            if done(&self.coordinator) {
                return true;
            }
            if Instant::now() >= deadline || shutdown.wait(self.poll) {
                return false;
            }
        }
    }

    /// Attach and wait for the agent, injecting it first when `inject` is set
    pub fn connect(&mut self, inject: bool, shutdown: &ShutdownSignal) -> Result<()> {
        self.attach()?;
        if inject {
            self.coordinator.request_injection();
        }

        let timeout = Duration::from_millis(INJECTION_WAIT_TIMEOUT_MS);
        self.tick_until(timeout, shutdown, |c| {
            c.state() == CoordinatorState::Loaded
                || (!c.is_injecting() && c.status().injection_error.is_some())
        });

        if self.coordinator.state() == CoordinatorState::Loaded {
            debug!("Agent loaded in {}", self.process_name);
            return Ok(());
        }
        match self.coordinator.status().injection_error {
            Some(e) => bail!("Agent injection failed: {}", e),
            None if inject => bail!("Agent did not come up within {:?}", timeout),
            None => bail!("Agent is not loaded, run `moveswap inject` first"),
        }
    }

    /// Tick until the import queue is drained
    pub fn drain_queue(&mut self, shutdown: &ShutdownSignal) -> Result<()> {
        let failures_before = self.coordinator.failures().len();
        self.tick_until(Duration::from_secs(60), shutdown, |c| !c.is_busy());
        if let Some(failure) = self.coordinator.failures().get(failures_before) {
            bail!(
                "Import of '{}' into slot {} failed: {}",
                failure.payload,
                failure.slot,
                failure.code
            );
        }
        if self.coordinator.is_busy() {
            bail!("Import queue did not drain");
        }
        Ok(())
    }
}
