//! Process-wide agent state handed to every interception

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use moveswap_core::protocol::layout::SLOT_COUNT;
use moveswap_core::{
    Error, GameAddresses, GameMemory, LoadCycle, MappedRegion, ReadMemory, Result, SharedRegion,
    Title, TitleId, title_for,
};

use crate::game::GameFunctions;
use crate::peer::{LobbyService, NoLobby, PeerLink};
use crate::sync::{Clock, SyncTracker, SystemClock};

/// Everything the interceptions and the run loop share.
///
/// Interceptions run on the target's threads while the run loop runs on the
/// agent thread, so all mutable state is atomic or behind a `Mutex`.
pub struct AgentContext {
    title: Box<dyn Title>,
    region: Box<dyn MappedRegion>,
    memory: Arc<dyn GameMemory>,
    game: Arc<dyn GameFunctions>,
    addresses: GameAddresses,
    /// Address of the target's local player list
    player_list: u64,
    cycle: Mutex<LoadCycle>,
    sync: SyncTracker,
    clock: Arc<dyn Clock>,
    lobby: Arc<dyn LobbyService>,
    peer: Arc<dyn PeerLink>,
    running: AtomicBool,
}

impl AgentContext {
    pub fn builder() -> AgentContextBuilder {
        AgentContextBuilder::default()
    }

    pub fn title(&self) -> &dyn Title {
        self.title.as_ref()
    }

    pub fn region(&self) -> &SharedRegion {
        self.region.region()
    }

    pub fn memory(&self) -> &dyn GameMemory {
        self.memory.as_ref()
    }

    pub fn game(&self) -> &dyn GameFunctions {
        self.game.as_ref()
    }

    pub fn addresses(&self) -> &GameAddresses {
        &self.addresses
    }

    pub fn sync(&self) -> &SyncTracker {
        &self.sync
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn lobby(&self) -> &dyn LobbyService {
        self.lobby.as_ref()
    }

    pub fn peer(&self) -> &dyn PeerLink {
        self.peer.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the run loop. The region tells the controller the hooks are
    /// going away.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.region().set_agent_running(false);
    }

    pub fn resume(&self) {
        self.running.store(true, Ordering::SeqCst);
        self.region().set_agent_running(true);
    }

    pub fn with_cycle<R>(&self, f: impl FnOnce(&mut LoadCycle) -> R) -> R {
        let mut cycle = self.cycle.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut cycle)
    }

    /// Entity currently occupying a local slot
    pub fn player_entity(&self, slot: usize) -> Result<u64> {
        if slot >= SLOT_COUNT {
            return Err(Error::InvalidSlot(slot));
        }
        let address = self.player_list + 8 * slot as u64;
        match self.memory.read_u64(address)? {
            0 => Err(Error::MemoryReadFailed {
                address,
                message: format!("no entity in slot {}", slot),
            }),
            entity => Ok(entity),
        }
    }

    /// Index of `entity` in the local player list, -1 if it is not a local
    /// player
    pub fn player_index(&self, entity: u64) -> i32 {
        (0..SLOT_COUNT)
            .find(|&slot| self.player_entity(slot).is_ok_and(|e| e == entity))
            .map_or(-1, |slot| slot as i32)
    }

    /// Slot of the local player in the current lobby
    pub fn local_slot(&self) -> Option<usize> {
        self.lobby.self_member().filter(|&m| m < SLOT_COUNT)
    }
}

/// Builder for AgentContext
#[derive(Default)]
pub struct AgentContextBuilder {
    title: Option<TitleId>,
    region: Option<Box<dyn MappedRegion>>,
    memory: Option<Arc<dyn GameMemory>>,
    game: Option<Arc<dyn GameFunctions>>,
    addresses: Option<GameAddresses>,
    player_list: Option<u64>,
    clock: Option<Arc<dyn Clock>>,
    lobby: Option<Arc<dyn LobbyService>>,
    peer: Option<Arc<dyn PeerLink>>,
}

impl AgentContextBuilder {
    pub fn title(mut self, title: TitleId) -> Self {
        self.title = Some(title);
        self
    }

    pub fn region(mut self, region: Box<dyn MappedRegion>) -> Self {
        self.region = Some(region);
        self
    }

    pub fn memory(mut self, memory: Arc<dyn GameMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn game(mut self, game: Arc<dyn GameFunctions>) -> Self {
        self.game = Some(game);
        self
    }

    pub fn addresses(mut self, addresses: GameAddresses) -> Self {
        self.addresses = Some(addresses);
        self
    }

    pub fn player_list(mut self, address: u64) -> Self {
        self.player_list = Some(address);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn lobby(mut self, lobby: Arc<dyn LobbyService>) -> Self {
        self.lobby = Some(lobby);
        self
    }

    pub fn peer(mut self, peer: Arc<dyn PeerLink>) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Build the context. The region, memory and game functions are required.
    pub fn build(self) -> Result<AgentContext> {
        let title = title_for(self.title.unwrap_or_default());
        let region = self
            .region
            .ok_or_else(|| Error::Config("agent context needs a region".to_string()))?;
        let memory = self
            .memory
            .ok_or_else(|| Error::Config("agent context needs target memory".to_string()))?;
        let game = self
            .game
            .ok_or_else(|| Error::Config("agent context needs game functions".to_string()))?;

        Ok(AgentContext {
            addresses: self.addresses.unwrap_or_else(|| title.default_addresses()),
            title,
            region,
            memory,
            game,
            player_list: self.player_list.unwrap_or_default(),
            cycle: Mutex::new(LoadCycle::new()),
            sync: SyncTracker::new(),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
            lobby: self.lobby.unwrap_or_else(|| Arc::new(NoLobby)),
            peer: self.peer.unwrap_or_else(|| Arc::new(NoLobby)),
            running: AtomicBool::new(true),
        })
    }
}
