use tracing::debug;

use super::{
    EntityLoad, EntityRef, EventInvocation, ExtraPropTemplate, LoadCycle, Requirement, Title,
    TitleId, TitleLayout, WideArg,
};
use crate::addresses::{GameAddresses, RipReference, names};
use crate::error::{Error, Result};
use crate::process::{GameMemory, ReadMemory, WriteMemory};
use crate::protocol::layout::SLOT_COUNT;
use crate::protocol::{ExtraProp, SharedRegion, SlotSnapshot, SyncMode};

/// Animation sub-resources listed in a payload
pub const MOTA_COUNT: usize = 12;

/// Value of a mota pointer the payload deliberately leaves out
pub const MOTA_MISSING: u64 = u64::MAX;

/// Mota indices the entity also keeps in its static camera table
const CAMERA_MOTAS: [usize; 2] = [8, 9];

/// Entries of the entity's payload pointer list
const MOTBIN_LIST_LEN: u64 = 5;

const TWO: u64 = 0x4000_0000_0000_0000;

const EXTRA_PROP_TEMPLATE: ExtraPropTemplate = ExtraPropTemplate {
    a3: WideArg::new(0, TWO),
    a4: 0,
    a5: 0,
    a6: 0.0,
    a7: WideArg::new(0, TWO),
    a8: WideArg::new(0, TWO),
    a9: WideArg::new(1, TWO),
    a10: WideArg::new(1, TWO),
    a11: WideArg::new(0, TWO),
    a12: 0,
};

const REQUIRED_FUNCTIONS: &[&str] = &[
    names::APPLY_NEW_MOVESET,
    names::MATCHED_AS_CLIENT,
    names::MATCHED_AS_HOST,
    names::GET_SYNC_BATTLE_START,
    names::GET_PLAYER_FROM_ID,
];

const OPTIONAL_FUNCTIONS: &[&str] = &[
    names::LOAD_START,
    names::UI_RANDOM_STAGE,
    names::EXECUTE_EXTRAPROP,
];

#[derive(Debug, Clone, Copy, Default)]
pub struct TitleT7;

impl TitleT7 {
    /// The entity's own slot first, then any other slot holding a payload for
    /// the same type
    fn find_payload(
        region: &SharedRegion,
        slot: usize,
        type_id: u32,
    ) -> Option<(usize, SlotSnapshot)> {
        std::iter::once(slot)
            .chain((0..SLOT_COUNT).filter(|&s| s != slot))
            .filter_map(|s| region.slot(s).ok().map(|p| (s, p.snapshot())))
            .find(|(_, snapshot)| !snapshot.is_empty() && snapshot.type_id == type_id)
    }
}

fn mota_address(list: u64, index: usize) -> u64 {
    list + 8 * index as u64
}

impl Title for TitleT7 {
    fn id(&self) -> TitleId {
        TitleId::T7
    }

    fn map_layout(&self) -> TitleLayout {
        TitleLayout {
            process_name: "TekkenGame-Win64-Shipping.exe",
            region_tag: "t7",
            agent_library: "moveswap_agent.dll",
        }
    }

    fn default_addresses(&self) -> GameAddresses {
        let mut addresses = GameAddresses::default();
        for (name, value) in [
            (names::CHARA_ID_OFFSET, 0xD8),
            (names::MOTBIN_OFFSET, 0x14A0),
            (names::STATIC_CAMERA_OFFSET, 0x1A48),
            (names::MOTA_LIST_OFFSET, 0x280),
        ] {
            addresses.values.insert(name.to_string(), value);
        }
        // lea rcx, [rip + disp32] inside GetPlayerFromID
        addresses.references.insert(
            names::PLAYER_LIST.to_string(),
            RipReference {
                disp_offset: 11,
                instr_end: 15,
            },
        );
        addresses
    }

    fn required_functions(&self) -> &'static [&'static str] {
        REQUIRED_FUNCTIONS
    }

    fn optional_functions(&self) -> &'static [&'static str] {
        OPTIONAL_FUNCTIONS
    }

    fn on_entity_load(
        &self,
        region: &SharedRegion,
        memory: &dyn GameMemory,
        addresses: &GameAddresses,
        entity: EntityRef,
        cycle: &mut LoadCycle,
    ) -> Result<EntityLoad> {
        let Some(slot) = entity.slot() else {
            return Ok(EntityLoad::Ignored);
        };

        let chara_id_offset = addresses.value(names::CHARA_ID_OFFSET)?;
        let type_id = u32::from(memory.read_u8(entity.address + chara_id_offset)?);

        let Some((source_slot, snapshot)) = Self::find_payload(region, slot, type_id) else {
            debug!("No custom payload for type {} in slot {}", type_id, slot);
            return Ok(EntityLoad::NoPayload { slot, type_id });
        };

        let payload = region.slot(source_slot)?;
        let motas = snapshot.address + addresses.value(names::MOTA_LIST_OFFSET)?;

        if !payload.is_initialized() {
            let mut mask = 0u64;
            for i in 0..MOTA_COUNT {
                if memory.read_u64(mota_address(motas, i))? == MOTA_MISSING {
                    mask |= 1 << i;
                }
            }
            payload.set_missing_mask(mask);
            payload.set_initialized(true);
        }

        let mask = payload.missing_mask();
        let mut filled = 0u64;
        if mask != 0
            && entity.native_payload != 0
            && cycle.needs_fill(source_slot, snapshot.generation)
        {
            let native = entity.native_payload + addresses.value(names::MOTA_LIST_OFFSET)?;
            for i in (0..MOTA_COUNT).filter(|i| mask & (1 << i) != 0) {
                debug!("Mota {} missing, using the native one", i);
                let value = memory.read_u64(mota_address(native, i))?;
                memory.write_u64(mota_address(motas, i), value)?;
                filled |= 1 << i;
            }
            cycle.mark_filled(source_slot, snapshot.generation);
        }

        let list = entity.address + addresses.value(names::MOTBIN_OFFSET)?;
        for i in 0..MOTBIN_LIST_LEN {
            memory.write_u64(list + 8 * i, snapshot.address)?;
        }

        let cameras = entity.address + addresses.value(names::STATIC_CAMERA_OFFSET)?;
        for (i, mota) in CAMERA_MOTAS.into_iter().enumerate() {
            let value = memory.read_u64(mota_address(motas, mota))?;
            memory.write_u64(mota_address(cameras, i), value)?;
        }

        region.set_active_payload(slot, snapshot.address)?;
        payload.mark_applied(snapshot.generation);
        debug!(
            "Applied payload {:#x} (slot {}, generation {}) to entity {:#x}",
            snapshot.address, source_slot, snapshot.generation, entity.address
        );

        Ok(EntityLoad::Substituted {
            slot,
            source_slot,
            address: snapshot.address,
            generation: snapshot.generation,
            filled,
        })
    }

    fn on_lock_in(&self, locked: bool, mode: SyncMode) -> SyncMode {
        if locked { mode } else { SyncMode::Offline }
    }

    fn on_custom_event(&self, prop: ExtraProp) -> Result<EventInvocation> {
        let slot = prop.slot as usize;
        if slot >= SLOT_COUNT {
            return Err(Error::InvalidSlot(slot));
        }
        Ok(EventInvocation {
            slot,
            requirement: Requirement {
                condition: prop.id,
                param: prop.value,
            },
            template: EXTRA_PROP_TEMPLATE,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::MockProcess;

    const ENTITY: u64 = 0x1000_0000;
    const OTHER_ENTITY: u64 = 0x1100_0000;
    const CUSTOM: u64 = 0x2000_0000;
    const NATIVE: u64 = 0x3000_0000;
    const TYPE_ID: u8 = 12;

    struct Fixture {
        memory: MockProcess,
        region: SharedRegion,
        addresses: GameAddresses,
        cycle: LoadCycle,
    }

    impl Fixture {
        fn new() -> Self {
            let region = SharedRegion::default();
            region.initialize(TitleId::T7.as_raw());
            let fixture = Self {
                memory: MockProcess::new(1),
                region,
                addresses: TitleT7.default_addresses(),
                cycle: LoadCycle::new(),
            };
            fixture.set_type(ENTITY, TYPE_ID);
            fixture
        }

        fn offset(&self, name: &str) -> u64 {
            self.addresses.value(name).unwrap()
        }

        fn set_type(&self, entity: u64, type_id: u8) {
            let at = entity + self.offset(names::CHARA_ID_OFFSET);
            self.memory.write_bytes(at, &[type_id]).unwrap();
        }

        fn mota(&self, payload: u64, index: usize) -> u64 {
            mota_address(payload + self.offset(names::MOTA_LIST_OFFSET), index)
        }

        /// Custom payload with motas 2 and 9 missing
        fn write_payloads(&self) {
            for i in 0..MOTA_COUNT {
                let custom = if i == 2 || i == 9 {
                    MOTA_MISSING
                } else {
                    0xC000 + i as u64
                };
                self.memory.write_u64(self.mota(CUSTOM, i), custom).unwrap();
                self.memory
                    .write_u64(self.mota(NATIVE, i), 0xA000 + i as u64)
                    .unwrap();
            }
        }

        fn load(&mut self, address: u64, player_index: i32) -> EntityLoad {
            TitleT7
                .on_entity_load(
                    &self.region,
                    &self.memory,
                    &self.addresses,
                    EntityRef {
                        address,
                        player_index,
                        native_payload: NATIVE,
                    },
                    &mut self.cycle,
                )
                .unwrap()
        }
    }

    #[test]
    fn test_substitutes_payload() {
        let mut f = Fixture::new();
        f.write_payloads();
        let generation = f.region.slot(0).unwrap().publish(CUSTOM, 120_000, 12);

        let result = f.load(ENTITY, 0);
        assert_eq!(
            result,
            EntityLoad::Substituted {
                slot: 0,
                source_slot: 0,
                address: CUSTOM,
                generation,
                filled: (1 << 2) | (1 << 9),
            }
        );

        let slot = f.region.slot(0).unwrap();
        assert!(slot.is_initialized());
        assert!(slot.is_applied());
        assert_eq!(slot.missing_mask(), (1 << 2) | (1 << 9));
        assert_eq!(f.region.active_payload(0).unwrap(), CUSTOM);

        let list = ENTITY + f.offset(names::MOTBIN_OFFSET);
        for i in 0..MOTBIN_LIST_LEN {
            assert_eq!(f.memory.read_u64(list + 8 * i).unwrap(), CUSTOM);
        }
        assert_eq!(f.memory.read_u64(f.mota(CUSTOM, 2)).unwrap(), 0xA002);
        assert_eq!(f.memory.read_u64(f.mota(CUSTOM, 3)).unwrap(), 0xC003);

        let cameras = ENTITY + f.offset(names::STATIC_CAMERA_OFFSET);
        assert_eq!(f.memory.read_u64(cameras).unwrap(), 0xC008);
        assert_eq!(f.memory.read_u64(cameras + 8).unwrap(), 0xA009);
    }

    #[test]
    fn test_missing_mask_stable_within_cycle() {
        let mut f = Fixture::new();
        f.write_payloads();
        f.region.slot(0).unwrap().publish(CUSTOM, 120_000, 12);

        f.load(ENTITY, 0);
        // A second load in the same cycle must not copy again
        f.memory.write_u64(f.mota(NATIVE, 2), 0xBAD).unwrap();
        let second = f.load(ENTITY, 0);
        assert!(matches!(second, EntityLoad::Substituted { filled: 0, .. }));
        assert_eq!(f.region.slot(0).unwrap().missing_mask(), (1 << 2) | (1 << 9));
        assert_eq!(f.memory.read_u64(f.mota(CUSTOM, 2)).unwrap(), 0xA002);

        // Next loading screen copies from the new native payload
        f.cycle.reset();
        let third = f.load(ENTITY, 0);
        assert!(matches!(third, EntityLoad::Substituted { filled, .. } if filled == (1 << 2) | (1 << 9)));
        assert_eq!(f.memory.read_u64(f.mota(CUSTOM, 2)).unwrap(), 0xBAD);
    }

    #[test]
    fn test_placeholder_entities_are_ignored() {
        let mut f = Fixture::new();
        f.write_payloads();
        f.region.slot(0).unwrap().publish(CUSTOM, 120_000, 12);

        for index in [-1, 4, 5] {
            assert_eq!(f.load(ENTITY, index), EntityLoad::Ignored);
        }
        let slot = f.region.slot(0).unwrap();
        assert!(!slot.is_initialized());
        assert_eq!(slot.missing_mask(), 0);
        assert_eq!(slot.applied_generation(), 0);
        assert_eq!(f.region.active_payload(0).unwrap(), 0);
    }

    #[test]
    fn test_no_payload_for_type() {
        let mut f = Fixture::new();
        f.region.slot(0).unwrap().publish(CUSTOM, 64, 99);
        assert_eq!(
            f.load(ENTITY, 0),
            EntityLoad::NoPayload {
                slot: 0,
                type_id: 12
            }
        );
        assert!(!f.region.slot(0).unwrap().is_initialized());
    }

    #[test]
    fn test_falls_back_to_other_slot() {
        let mut f = Fixture::new();
        f.write_payloads();
        f.set_type(OTHER_ENTITY, TYPE_ID);
        f.region.slot(1).unwrap().publish(CUSTOM, 120_000, 12);

        let result = f.load(OTHER_ENTITY, 0);
        assert!(matches!(
            result,
            EntityLoad::Substituted {
                slot: 0,
                source_slot: 1,
                ..
            }
        ));
        assert_eq!(f.region.active_payload(0).unwrap(), CUSTOM);
        assert!(f.region.slot(1).unwrap().is_applied());
    }

    #[test]
    fn test_initialized_survives_unrelated_load() {
        let mut f = Fixture::new();
        f.write_payloads();
        f.set_type(OTHER_ENTITY, 40);
        f.region.slot(0).unwrap().publish(CUSTOM, 120_000, 12);

        f.load(ENTITY, 0);
        assert!(matches!(f.load(OTHER_ENTITY, 1), EntityLoad::NoPayload { slot: 1, .. }));
        assert!(f.region.slot(0).unwrap().is_initialized());
    }

    #[test]
    fn test_lock_in_mode() {
        assert_eq!(
            TitleT7.on_lock_in(true, SyncMode::OnlineAttempting),
            SyncMode::OnlineAttempting
        );
        assert_eq!(
            TitleT7.on_lock_in(false, SyncMode::OnlineAttempting),
            SyncMode::Offline
        );
    }

    #[test]
    fn test_custom_event() {
        let invocation = TitleT7
            .on_custom_event(ExtraProp {
                slot: 1,
                id: 0x8123,
                value: 3,
            })
            .unwrap();
        assert_eq!(invocation.slot, 1);
        assert_eq!(invocation.requirement.condition, 0x8123);
        assert_eq!(invocation.template.a9, WideArg::new(1, TWO));

        assert!(matches!(
            TitleT7.on_custom_event(ExtraProp {
                slot: 2,
                id: 1,
                value: 0
            }),
            Err(Error::InvalidSlot(2))
        ));
    }
}
