use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::info;

/// Stop flag for the controller loop.
///
/// Poll and reconnect waits go through [`ShutdownSignal::wait`] so Ctrl-C
/// interrupts them instead of sleeping out the interval.
pub struct ShutdownSignal {
    shutdown: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
        }
    }

    /// A signal triggered by Ctrl-C
    pub fn install() -> anyhow::Result<Arc<Self>> {
        let signal = Arc::new(Self::new());
        let handler = Arc::clone(&signal);
        ctrlc::set_handler(move || {
            info!("Shutdown requested");
            handler.trigger();
        })?;
        Ok(signal)
    }

    /// Set the flag and wake every waiter
    pub fn trigger(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.condvar.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Block for `duration` or until triggered. Returns `true` when stopped.
    pub fn wait(&self, duration: Duration) -> bool {
        if self.is_shutdown() {
            return true;
        }

        let Ok(guard) = self.mutex.lock() else {
            return true;
        };
        match self
            .condvar
            .wait_timeout_while(guard, duration, |_| !self.is_shutdown())
        {
            Ok((_, timeout)) => !timeout.timed_out(),
            // Poisoned mutex, treat as shutdown
            Err(_) => true,
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_poll_wait_runs_full_interval() {
        let signal = ShutdownSignal::default();
        let start = Instant::now();
        assert!(!signal.wait(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(!signal.is_shutdown());
    }

    #[test]
    fn test_trigger_wakes_reconnect_wait() {
        let signal = Arc::new(ShutdownSignal::new());
        let waiter = Arc::clone(&signal);
        let handle = thread::spawn(move || {
            let start = Instant::now();
            (waiter.wait(Duration::from_secs(5)), start.elapsed())
        });

        thread::sleep(Duration::from_millis(30));
        signal.trigger();

        let (stopped, elapsed) = handle.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn test_wait_after_trigger_returns_at_once() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        signal.trigger();
        let start = Instant::now();
        assert!(signal.wait(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
