use serde::Serialize;
use strum::{Display, IntoStaticStr};

/// Attach state of the coordinator for one target process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CoordinatorState {
    /// The shared region cannot be opened
    #[default]
    NoRegion,
    /// Injection was started and the region has not appeared yet
    Injecting,
    /// The region is mapped
    Loaded,
}

/// What one tick observed about the target
#[derive(Debug, Clone, Copy, Default)]
pub struct Observation {
    /// The region could be mapped this tick (or already was)
    pub region_mapped: bool,
    /// The controller wants the agent injected
    pub injection_requested: bool,
    /// An injection was already started for the current request
    pub injection_started: bool,
    /// The injection worker is still running
    pub worker_running: bool,
    /// The target process is alive
    pub process_running: bool,
}

/// Side effect the coordinator must perform for a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do, poll again next tick
    Poll,
    StartInjection,
    AdoptRegion,
    /// The worker finished but the region never appeared
    ReportInjectionFailure,
    /// The region became unreachable; drop every cached value
    Reset,
}

/// Transition table of the coordinator's attach state
#[derive(Debug, Default)]
pub struct StateTracker {
    state: CoordinatorState,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Apply one observation and return the action to take
    pub fn advance(&mut self, obs: Observation) -> Action {
        use CoordinatorState::*;

        let (next, action) = match self.state {
            _ if !obs.process_running => (NoRegion, Action::Reset),
            NoRegion | Injecting if obs.region_mapped => (Loaded, Action::AdoptRegion),
            NoRegion if obs.injection_requested && !obs.injection_started => {
                (Injecting, Action::StartInjection)
            }
            NoRegion => (NoRegion, Action::Poll),
            Injecting if !obs.worker_running => (NoRegion, Action::ReportInjectionFailure),
            Injecting => (Injecting, Action::Poll),
            Loaded if !obs.region_mapped => (NoRegion, Action::Reset),
            Loaded => (Loaded, Action::Poll),
        };

        self.state = next;
        action
    }

    /// Reset state (e.g. when the process detaches)
    pub fn reset(&mut self) {
        self.state = CoordinatorState::NoRegion;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> Observation {
        Observation {
            process_running: true,
            ..Default::default()
        }
    }

    fn tracker_in(state: CoordinatorState) -> StateTracker {
        StateTracker { state }
    }

    #[test]
    fn test_no_region_polls_without_request() {
        let mut tracker = StateTracker::new();
        assert_eq!(tracker.advance(running()), Action::Poll);
        assert_eq!(tracker.state(), CoordinatorState::NoRegion);
    }

    #[test]
    fn test_no_region_starts_injection_once() {
        let mut tracker = StateTracker::new();
        let obs = Observation {
            injection_requested: true,
            ..running()
        };
        assert_eq!(tracker.advance(obs), Action::StartInjection);
        assert_eq!(tracker.state(), CoordinatorState::Injecting);

        let mut tracker = StateTracker::new();
        let obs = Observation {
            injection_requested: true,
            injection_started: true,
            ..running()
        };
        assert_eq!(tracker.advance(obs), Action::Poll);
        assert_eq!(tracker.state(), CoordinatorState::NoRegion);
    }

    #[test]
    fn test_no_region_adopts_existing_agent() {
        let mut tracker = StateTracker::new();
        let obs = Observation {
            region_mapped: true,
            ..running()
        };
        assert_eq!(tracker.advance(obs), Action::AdoptRegion);
        assert_eq!(tracker.state(), CoordinatorState::Loaded);
    }

    #[test]
    fn test_injecting_to_loaded() {
        let mut tracker = tracker_in(CoordinatorState::Injecting);
        let obs = Observation {
            region_mapped: true,
            injection_requested: true,
            injection_started: true,
            worker_running: true,
            ..running()
        };
        assert_eq!(tracker.advance(obs), Action::AdoptRegion);
        assert_eq!(tracker.state(), CoordinatorState::Loaded);
    }

    #[test]
    fn test_injecting_waits_for_worker() {
        let mut tracker = tracker_in(CoordinatorState::Injecting);
        let obs = Observation {
            injection_requested: true,
            injection_started: true,
            worker_running: true,
            ..running()
        };
        assert_eq!(tracker.advance(obs), Action::Poll);
        assert_eq!(tracker.state(), CoordinatorState::Injecting);
    }

    #[test]
    fn test_injecting_worker_done_without_region() {
        let mut tracker = tracker_in(CoordinatorState::Injecting);
        let obs = Observation {
            injection_requested: true,
            injection_started: true,
            worker_running: false,
            ..running()
        };
        assert_eq!(tracker.advance(obs), Action::ReportInjectionFailure);
        assert_eq!(tracker.state(), CoordinatorState::NoRegion);
    }

    #[test]
    fn test_loaded_stays_loaded() {
        let mut tracker = tracker_in(CoordinatorState::Loaded);
        let obs = Observation {
            region_mapped: true,
            ..running()
        };
        assert_eq!(tracker.advance(obs), Action::Poll);
        assert_eq!(tracker.state(), CoordinatorState::Loaded);
    }

    #[test]
    fn test_loaded_resets_on_exit() {
        let mut tracker = tracker_in(CoordinatorState::Loaded);
        let obs = Observation {
            region_mapped: true,
            process_running: false,
            ..Default::default()
        };
        assert_eq!(tracker.advance(obs), Action::Reset);
        assert_eq!(tracker.state(), CoordinatorState::NoRegion);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CoordinatorState::NoRegion.to_string(), "no_region");
        assert_eq!(CoordinatorState::Loaded.to_string(), "loaded");
    }
}
