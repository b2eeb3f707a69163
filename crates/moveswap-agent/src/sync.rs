//! Online payload-exchange deadline around the target's match-start poll

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use moveswap_core::protocol::layout::timing::{SYNC_DEADLINE_DEFAULT, SYNC_DEADLINE_PEER_READY};
use moveswap_core::{SharedRegion, SyncMode, SyncStatus};
use tracing::{debug, info};

/// Value of the match-start poll meaning "ready"
pub const BATTLE_READY: u64 = 1;

/// Monotonic time source
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary fixed origin
    fn now(&self) -> Duration;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Agent-private state of the current online session
#[derive(Debug, Default)]
pub struct SyncTracker {
    /// When the first ready-but-unsynced poll was seen
    started_at: Mutex<Option<Duration>>,
    peer_intent: AtomicBool,
}

impl SyncTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new online session: forget the previous deadline and peer
    /// state, and mark the exchange as not done
    pub fn begin_session(&self, region: &SharedRegion, local_slot: Option<usize>) -> u32 {
        *self.lock() = None;
        self.peer_intent.store(false, Ordering::SeqCst);
        region.set_sync_status(SyncStatus::NotStarted);
        region.set_local_slot(local_slot);
        let session = region.begin_sync_session();
        info!("Sync session {} started (local slot {:?})", session, local_slot);
        session
    }

    /// The peer announced it wants to exchange payloads
    pub fn mark_peer_intent(&self) {
        if !self.peer_intent.swap(true, Ordering::SeqCst) {
            debug!("Peer sync intent received");
        }
    }

    pub fn peer_intent(&self) -> bool {
        self.peer_intent.load(Ordering::SeqCst)
    }

    /// Deadline that applies to the current session
    pub fn deadline(&self) -> Duration {
        if self.peer_intent() {
            SYNC_DEADLINE_PEER_READY
        } else {
            SYNC_DEADLINE_DEFAULT
        }
    }

    /// Rewrite the target's match-start poll result.
    ///
    /// Holds the match back (returns 0) until the exchange is done or the
    /// deadline runs out; then lets it start unsynced.
    pub fn on_battle_start(&self, original: u64, region: &SharedRegion, now: Duration) -> u64 {
        if original != BATTLE_READY || region.sync_mode() != SyncMode::OnlineAttempting {
            return original;
        }
        if region.sync_status() == SyncStatus::Ready {
            return BATTLE_READY;
        }

        let mut started_at = self.lock();
        let Some(start) = *started_at else {
            *started_at = Some(now);
            return 0;
        };

        let elapsed = now.saturating_sub(start);
        let deadline = self.deadline();
        debug!("Battle start held for {:?} / {:?}", elapsed, deadline);
        if elapsed >= deadline {
            info!("Payload exchange not done after {:?}, starting unsynced", deadline);
            region.set_sync_status(SyncStatus::NotStarted);
            return BATTLE_READY;
        }
        0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Duration>> {
        self.started_at.lock().unwrap_or_else(|e| e.into_inner())
    }
}
