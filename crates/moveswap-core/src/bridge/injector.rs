//! Background injection worker

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, error, info};

use super::exports::ExportTable;
use crate::error::{Error, Result};
use crate::process::{RemoteThread, TargetProcess};

/// Agent library entry point names
pub mod entry {
    pub const AGENT_INIT: &str = "AgentInit";
    pub const AGENT_RUN: &str = "AgentRun";
    pub const AGENT_STOP: &str = "AgentStop";
    pub const EXECUTE_EXTRAPROP: &str = "ExecuteExtraprop";
    pub const AGENT_DEBUG: &str = "AgentDebug";
}

/// Last known result of an injection attempt
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InjectionOutcome {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed(String),
}

/// Resolve `symbol` in the agent module and run it on a remote thread.
///
/// A missing module, a missing symbol and a failed execution are reported
/// as distinct errors.
pub fn call_export(
    process: &dyn TargetProcess,
    module: &str,
    symbol: &str,
    wait: bool,
) -> Result<RemoteThread> {
    let base = process
        .module_base(module)?
        .ok_or_else(|| Error::AgentModuleNotLoaded(module.to_string()))?;

    let address = process
        .export_address(base, symbol)?
        .ok_or_else(|| Error::SymbolNotFound {
            module: module.to_string(),
            symbol: symbol.to_string(),
        })?;

    debug!("Calling {}!{} at {:#x}", module, symbol, address);
    process
        .create_remote_thread(address, 0, wait)
        .map_err(|e| {
            error!("Remote call to {} failed: {}", symbol, e);
            Error::RemoteExecutionFailed(symbol.to_string())
        })
}

/// One injection sequence: load, init (waited), run (fire-and-forget)
pub struct InjectionJob {
    pub process: Arc<dyn TargetProcess>,
    pub library: PathBuf,
    pub module: String,
}

impl InjectionJob {
    pub fn run(&self) -> Result<()> {
        let process = self.process.as_ref();

        if process.module_base(&self.module)?.is_none() {
            info!("Injecting {} into PID {}", self.library.display(), process.pid());
            process.load_library(&self.library)?;
        } else {
            debug!("{} already loaded, skipping LoadLibrary", self.module);
        }

        if let RemoteThread::Finished { exit_code: 0 } =
            call_export(process, &self.module, entry::AGENT_INIT, true)?
        {
            return Err(Error::InjectionFailed(format!(
                "{} reported failure",
                entry::AGENT_INIT
            )));
        }

        call_export(process, &self.module, entry::AGENT_RUN, false)?;
        Ok(())
    }
}

/// Owns the injection worker thread.
///
/// At most one injection attempt runs at a time.
#[derive(Default)]
pub struct Injector {
    worker: Option<JoinHandle<()>>,
    injecting: Arc<AtomicBool>,
    outcome: Arc<Mutex<InjectionOutcome>>,
}

impl Injector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `job` on a worker thread, joining any previous worker first
    pub fn start(&mut self, job: InjectionJob) {
        self.join();

        self.injecting.store(true, Ordering::SeqCst);
        self.set_outcome(InjectionOutcome::Running);

        let injecting = Arc::clone(&self.injecting);
        let outcome = Arc::clone(&self.outcome);
        self.worker = Some(std::thread::spawn(move || {
            let result = match job.run() {
                Ok(()) => InjectionOutcome::Succeeded,
                Err(e) => {
                    error!("Injection failed: {}", e);
                    InjectionOutcome::Failed(e.to_string())
                }
            };
            *outcome.lock().unwrap_or_else(|e| e.into_inner()) = result;
            injecting.store(false, Ordering::SeqCst);
        }));
    }

    /// Run `job` on the calling thread
    pub fn run_blocking(&mut self, job: InjectionJob) -> Result<()> {
        self.join();
        self.injecting.store(true, Ordering::SeqCst);
        let result = job.run();
        self.set_outcome(match &result {
            Ok(()) => InjectionOutcome::Succeeded,
            Err(e) => InjectionOutcome::Failed(e.to_string()),
        });
        self.injecting.store(false, Ordering::SeqCst);
        result
    }

    pub fn is_injecting(&self) -> bool {
        self.injecting.load(Ordering::SeqCst)
    }

    pub fn outcome(&self) -> InjectionOutcome {
        self.outcome
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Forget the last outcome
    pub fn reset(&mut self) {
        self.join();
        self.set_outcome(InjectionOutcome::Idle);
    }

    /// Wait for the current worker, if any
    pub fn join(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if worker.join().is_err() {
            error!("Injection worker panicked");
            self.injecting.store(false, Ordering::SeqCst);
            self.set_outcome(InjectionOutcome::Failed("worker panicked".to_string()));
        }
    }

    fn set_outcome(&self, outcome: InjectionOutcome) {
        *self.outcome.lock().unwrap_or_else(|e| e.into_inner()) = outcome;
    }
}

impl Drop for Injector {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::exports::tests::write_fake_image;
    use crate::process::MockProcess;

    const MODULE: &str = "moveswap_agent.dll";
    const MODULE_BASE: u64 = 0x1800_0000;

    fn agent_process() -> Arc<MockProcess> {
        let process = MockProcess::new(77).with_library_module(MODULE, MODULE_BASE);
        write_fake_image(
            &process,
            MODULE_BASE,
            &[entry::AGENT_INIT, entry::AGENT_RUN, entry::AGENT_STOP],
        );
        Arc::new(process)
    }

    fn job(process: &Arc<MockProcess>) -> InjectionJob {
        InjectionJob {
            process: process.clone(),
            library: PathBuf::from("C:\\moveswap\\moveswap_agent.dll"),
            module: MODULE.to_string(),
        }
    }

    #[test]
    fn test_call_export_missing_module() {
        let process = MockProcess::new(1);
        let err = call_export(&process, MODULE, entry::AGENT_INIT, true).unwrap_err();
        assert!(matches!(err, Error::AgentModuleNotLoaded(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_call_export_missing_symbol() {
        let process = MockProcess::new(1).with_module(MODULE, MODULE_BASE);
        write_fake_image(&process, MODULE_BASE, &[entry::AGENT_INIT]);
        let err = call_export(&process, MODULE, entry::AGENT_DEBUG, false).unwrap_err();
        assert!(matches!(err, Error::SymbolNotFound { .. }));
    }

    #[test]
    fn test_call_export_execution_failure() {
        let process = MockProcess::new(1).with_module(MODULE, MODULE_BASE);
        write_fake_image(&process, MODULE_BASE, &[entry::AGENT_INIT]);
        process.fail_threads(true);
        let err = call_export(&process, MODULE, entry::AGENT_INIT, true).unwrap_err();
        assert!(matches!(err, Error::RemoteExecutionFailed(_)));
    }

    #[test]
    fn test_job_sequence() {
        let process = agent_process();
        job(&process).run().unwrap();

        assert_eq!(process.loaded_libraries().len(), 1);
        let threads = process.threads();
        assert_eq!(
            threads,
            vec![(MODULE_BASE + 0x2000, true), (MODULE_BASE + 0x2100, false)]
        );
    }

    #[test]
    fn test_job_init_failure_skips_run() {
        let process = agent_process();
        process.set_thread_exit_code(0);
        let err = job(&process).run().unwrap_err();
        assert!(matches!(err, Error::InjectionFailed(_)));
        assert_eq!(process.threads().len(), 1);
    }

    #[test]
    fn test_job_load_failure() {
        let process = agent_process();
        process.fail_load_library(true);
        assert!(job(&process).run().is_err());
        assert!(process.threads().is_empty());
    }

    #[test]
    fn test_injector_worker_outcome() {
        let process = agent_process();
        let mut injector = Injector::new();
        injector.start(job(&process));
        injector.join();

        assert!(!injector.is_injecting());
        assert_eq!(injector.outcome(), InjectionOutcome::Succeeded);

        let fresh = Arc::new(MockProcess::new(78));
        fresh.fail_load_library(true);
        injector.start(job(&fresh));
        injector.join();
        assert!(matches!(injector.outcome(), InjectionOutcome::Failed(_)));

        injector.reset();
        assert_eq!(injector.outcome(), InjectionOutcome::Idle);
    }

    #[test]
    fn test_run_blocking() {
        let process = agent_process();
        let mut injector = Injector::new();
        injector.run_blocking(job(&process)).unwrap();
        assert_eq!(injector.outcome(), InjectionOutcome::Succeeded);
    }
}
