//! Fakes shared by the agent's tests

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use moveswap_core::bridge::HeapMapper;
use moveswap_core::process::MockProcess;
use moveswap_core::title::EventInvocation;
use moveswap_core::{Result, SharedRegion, TitleId, WriteMemory, region_name};

use crate::context::AgentContext;
use crate::game::GameFunctions;
use crate::peer::{LobbyService, PeerEvent, PeerLink};
use crate::sync::tests::ManualClock;

pub(crate) const PID: u32 = 4321;
pub(crate) const PLAYER_LIST: u64 = 0x5000_0000;
pub(crate) const ENTITY_P1: u64 = 0x1000_0000;
pub(crate) const ENTITY_P2: u64 = 0x1100_0000;
pub(crate) const NATIVE_PAYLOAD: u64 = 0x3000_0000;

/// Target functions that record their calls
#[derive(Default)]
pub(crate) struct FakeGame {
    pub(crate) calls: Mutex<Vec<String>>,
    pub(crate) battle_start: AtomicU64,
    pub(crate) extra_props: Mutex<Vec<(u64, u32, u32)>>,
}

impl FakeGame {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

impl GameFunctions for FakeGame {
    fn apply_payload(&self, entity: u64, payload: u64) -> u64 {
        self.record(&format!("apply {:#x} {:#x}", entity, payload));
        entity
    }

    fn sync_battle_start(&self, _manager: u64) -> u64 {
        self.record("sync_battle_start");
        self.battle_start.load(Ordering::SeqCst)
    }

    fn matched_as_client(&self, _a1: u64, _a2: u64) {
        self.record("matched_as_client");
    }

    fn matched_as_host(&self, _a1: u64, _a2: u8, _a3: u64) {
        self.record("matched_as_host");
    }

    fn random_stage(&self, _stage_manager: u64, _player: u8) -> u8 {
        self.record("random_stage");
        20
    }

    fn load_start(&self, _a1: u64, _a2: u64) -> u64 {
        self.record("load_start");
        0
    }

    fn execute_extra_prop(&self, entity: u64, invocation: &EventInvocation) -> Result<()> {
        self.extra_props.lock().unwrap().push((
            entity,
            invocation.requirement.condition,
            invocation.requirement.param,
        ));
        Ok(())
    }
}

/// Fixed lobby with scripted peer events
#[derive(Default)]
pub(crate) struct FakeLobby {
    pub(crate) self_member: Option<usize>,
    pub(crate) events: Mutex<Vec<PeerEvent>>,
}

impl LobbyService for FakeLobby {
    fn self_member(&self) -> Option<usize> {
        self.self_member
    }

    fn opponent_member(&self) -> Option<usize> {
        self.self_member.map(|m| 1 - m.min(1))
    }

    fn members(&self) -> Vec<String> {
        vec!["Lili".to_string(), "Paul".to_string()]
    }
}

impl PeerLink for FakeLobby {
    fn poll_events(&self) -> Vec<PeerEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

/// An agent wired to fakes, sharing its region with a controller-side mapper
pub(crate) struct Harness {
    pub(crate) process: Arc<MockProcess>,
    pub(crate) mapper: Arc<HeapMapper>,
    pub(crate) region: Arc<SharedRegion>,
    pub(crate) game: Arc<FakeGame>,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) lobby: Arc<FakeLobby>,
    pub(crate) ctx: AgentContext,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_lobby(FakeLobby::default())
    }

    pub(crate) fn with_lobby(lobby: FakeLobby) -> Self {
        let process = Arc::new(
            MockProcess::new(PID).with_library_module("moveswap_agent.dll", 0x1800_0000),
        );
        process.write_u64(PLAYER_LIST, ENTITY_P1).unwrap();
        process.write_u64(PLAYER_LIST + 8, ENTITY_P2).unwrap();

        let mapper = Arc::new(HeapMapper::new());
        let region = mapper.create(&region_name("t7", PID), TitleId::T7.as_raw());
        let game = Arc::new(FakeGame::default());
        let clock = Arc::new(ManualClock::default());
        let lobby = Arc::new(lobby);

        let ctx = AgentContext::builder()
            .title(TitleId::T7)
            .region(Box::new(region.clone()))
            .memory(process.clone())
            .game(game.clone())
            .player_list(PLAYER_LIST)
            .clock(clock.clone())
            .lobby(lobby.clone())
            .peer(lobby.clone())
            .build()
            .unwrap();

        Self {
            process,
            mapper,
            region,
            game,
            clock,
            lobby,
            ctx,
        }
    }

    /// Give `entity` the type id `type_id`
    pub(crate) fn set_type(&self, entity: u64, type_id: u8) {
        let offset = self
            .ctx
            .addresses()
            .value(moveswap_core::addresses::names::CHARA_ID_OFFSET)
            .unwrap();
        self.process.write_bytes(entity + offset, &[type_id]).unwrap();
    }
}
