//! `repr(C)` view of the shared coordination region
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Header: version, layout size, title, lock, sync (64 B)   │
//! ├──────────────────────────────────────────────────────────┤
//! │ Slot payloads  (SLOT_COUNT × 48 B)                       │
//! ├──────────────────────────────────────────────────────────┤
//! │ Slot selections (SLOT_COUNT × 64 B)                      │
//! ├──────────────────────────────────────────────────────────┤
//! │ Active payload addresses (SLOT_COUNT × 8 B)              │
//! ├──────────────────────────────────────────────────────────┤
//! │ Pending extra-prop request (32 B)                        │
//! ├──────────────────────────────────────────────────────────┤
//! │ Program path (PROGRAM_PATH_LEN × UTF-16)                 │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Every field has a single writer. Slot payloads are guarded by a seqlock
//! counter; the other multi-field records are published by a `Release` store
//! of a counter written last, and read back after an `Acquire` load of it.

use std::sync::atomic::{
    AtomicI32, AtomicU8, AtomicU16, AtomicU32, AtomicU64, Ordering, fence,
};

use serde::Serialize;

use super::enums::{SyncMode, SyncStatus};
use super::layout::{
    NO_LOCAL_SLOT, PROGRAM_PATH_LEN, REGION_MAX_SIZE, SELECTION_NAME_LEN, SLOT_COUNT, VERSION_LEN,
};
use super::naming::PROTOCOL_VERSION;
use crate::error::{Error, Result};

/// Attempts [`SlotPayload::snapshot`] makes before giving up on a torn slot
const SNAPSHOT_RETRIES: usize = 10_000;

/// Payload slot, one per local entity.
///
/// Address, size and type id are written by the controller; the
/// `initialized`, `missing_mask` and `applied_generation` fields belong to
/// the agent once a generation is published.
#[repr(C)]
pub struct SlotPayload {
    address: AtomicU64,
    size: AtomicU64,
    missing_mask: AtomicU64,
    /// Seqlock counter: odd while the controller is writing. The published
    /// generation is half of it.
    sequence: AtomicU64,
    applied_generation: AtomicU64,
    type_id: AtomicU32,
    initialized: AtomicU32,
}

const _: () = assert!(size_of::<SlotPayload>() == 48);

/// Consistent copy of a slot's controller-written fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SlotSnapshot {
    pub address: u64,
    pub size: u64,
    pub type_id: u32,
    pub generation: u64,
}

impl SlotSnapshot {
    pub fn is_empty(&self) -> bool {
        self.address == 0 || self.size == 0
    }
}

impl SlotPayload {
    fn new() -> Self {
        Self {
            address: AtomicU64::new(0),
            size: AtomicU64::new(0),
            missing_mask: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            applied_generation: AtomicU64::new(0),
            type_id: AtomicU32::new(0),
            initialized: AtomicU32::new(0),
        }
    }

    /// Publish a new payload and return its generation.
    ///
    /// Resets the agent-owned fields before handing the slot over.
    pub fn publish(&self, address: u64, size: u64, type_id: u32) -> u64 {
        let start = self.sequence.load(Ordering::Relaxed) | 1;
        self.sequence.store(start, Ordering::Relaxed);
        fence(Ordering::Release);

        self.address.store(address, Ordering::Relaxed);
        self.size.store(size, Ordering::Relaxed);
        self.type_id.store(type_id, Ordering::Relaxed);
        self.initialized.store(0, Ordering::Relaxed);
        self.missing_mask.store(0, Ordering::Relaxed);

        let end = start + 1;
        self.sequence.store(end, Ordering::Release);
        end / 2
    }

    /// Publish an empty payload
    pub fn clear(&self) -> u64 {
        self.publish(0, 0, 0)
    }

    /// Read the controller-written fields as one unit.
    ///
    /// Retries while a publish is in flight. A writer that never finishes
    /// yields an empty snapshot after `SNAPSHOT_RETRIES` attempts.
    pub fn snapshot(&self) -> SlotSnapshot {
        let mut sequence = 0;
        for _ in 0..SNAPSHOT_RETRIES {
            sequence = self.sequence.load(Ordering::Acquire);
            if sequence % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let address = self.address.load(Ordering::Relaxed);
            let size = self.size.load(Ordering::Relaxed);
            let type_id = self.type_id.load(Ordering::Relaxed);
            fence(Ordering::Acquire);
            if self.sequence.load(Ordering::Relaxed) == sequence {
                return SlotSnapshot {
                    address,
                    size,
                    type_id,
                    generation: sequence / 2,
                };
            }
        }
        SlotSnapshot {
            generation: sequence / 2,
            ..Default::default()
        }
    }

    /// Latest completed generation
    pub fn generation(&self) -> u64 {
        self.sequence.load(Ordering::Acquire) / 2
    }

    pub fn applied_generation(&self) -> u64 {
        self.applied_generation.load(Ordering::Acquire)
    }

    /// Record that the agent substituted `generation` into a live entity
    pub fn mark_applied(&self, generation: u64) {
        self.applied_generation.store(generation, Ordering::Release);
    }

    /// Whether the latest published generation has reached a live entity
    pub fn is_applied(&self) -> bool {
        let generation = self.generation();
        generation != 0 && self.applied_generation() == generation
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire) != 0
    }

    pub fn set_initialized(&self, initialized: bool) {
        self.initialized
            .store(u32::from(initialized), Ordering::Release);
    }

    pub fn missing_mask(&self) -> u64 {
        self.missing_mask.load(Ordering::Acquire)
    }

    pub fn set_missing_mask(&self, mask: u64) {
        self.missing_mask.store(mask, Ordering::Release);
    }
}

/// Displayed selection for a slot, mirrored by the controller
#[repr(C)]
pub struct SlotSelection {
    size: AtomicU64,
    type_id: AtomicU32,
    name_len: AtomicU32,
    name: [AtomicU8; SELECTION_NAME_LEN],
}

const _: () = assert!(size_of::<SlotSelection>() == 64);

/// Owned copy of a displayed selection
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Selection {
    pub size: u64,
    pub type_id: u32,
    pub name: String,
}

impl Selection {
    /// A zero-size selection means the slot is cleared
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

impl SlotSelection {
    fn new() -> Self {
        Self {
            size: AtomicU64::new(0),
            type_id: AtomicU32::new(0),
            name_len: AtomicU32::new(0),
            name: std::array::from_fn(|_| AtomicU8::new(0)),
        }
    }

    pub fn set(&self, size: u64, type_id: u32, name: &str) {
        let bytes = truncate_utf8(name, SELECTION_NAME_LEN);
        for (i, cell) in self.name.iter().enumerate() {
            cell.store(bytes.get(i).copied().unwrap_or(0), Ordering::Relaxed);
        }
        self.type_id.store(type_id, Ordering::Relaxed);
        self.name_len.store(bytes.len() as u32, Ordering::Relaxed);
        self.size.store(size, Ordering::Release);
    }

    pub fn clear(&self) {
        self.set(0, 0, "");
    }

    pub fn snapshot(&self) -> Selection {
        let size = self.size.load(Ordering::Acquire);
        let len = (self.name_len.load(Ordering::Relaxed) as usize).min(SELECTION_NAME_LEN);
        let bytes: Vec<u8> = self.name[..len]
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();
        Selection {
            size,
            type_id: self.type_id.load(Ordering::Relaxed),
            name: String::from_utf8_lossy(&bytes).into_owned(),
        }
    }
}

/// Single in-flight custom event request.
///
/// A request is pending while `sequence != consumed`.
#[repr(C)]
pub struct ExtraPropRequest {
    sequence: AtomicU64,
    consumed: AtomicU64,
    slot: AtomicU32,
    id: AtomicU32,
    value: AtomicU32,
    _reserved: AtomicU32,
}

const _: () = assert!(size_of::<ExtraPropRequest>() == 32);

/// A custom event to evaluate on a slot's live entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExtraProp {
    pub slot: u32,
    pub id: u32,
    pub value: u32,
}

impl ExtraPropRequest {
    fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
            slot: AtomicU32::new(0),
            id: AtomicU32::new(0),
            value: AtomicU32::new(0),
            _reserved: AtomicU32::new(0),
        }
    }

    /// Write a request, replacing any request not consumed yet.
    /// Returns the new sequence number.
    pub fn submit(&self, prop: ExtraProp) -> u64 {
        self.slot.store(prop.slot, Ordering::Relaxed);
        self.id.store(prop.id, Ordering::Relaxed);
        self.value.store(prop.value, Ordering::Relaxed);
        self.sequence.fetch_add(1, Ordering::Release) + 1
    }

    pub fn is_pending(&self) -> bool {
        self.sequence.load(Ordering::Acquire) != self.consumed.load(Ordering::Acquire)
    }

    /// Consume the pending request, if any. Only one caller wins a given
    /// sequence number.
    pub fn take(&self) -> Option<ExtraProp> {
        let sequence = self.sequence.load(Ordering::Acquire);
        let consumed = self.consumed.load(Ordering::Acquire);
        if sequence == consumed {
            return None;
        }

        let prop = ExtraProp {
            slot: self.slot.load(Ordering::Relaxed),
            id: self.id.load(Ordering::Relaxed),
            value: self.value.load(Ordering::Relaxed),
        };
        self.consumed
            .compare_exchange(consumed, sequence, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| prop)
    }
}

/// The shared coordination region
#[repr(C)]
pub struct SharedRegion {
    version: [AtomicU8; VERSION_LEN],
    layout_size: AtomicU32,
    title_id: AtomicU32,
    locked: AtomicU32,
    sync_mode: AtomicU32,
    sync_status: AtomicU32,
    sync_session: AtomicU32,
    local_slot: AtomicI32,
    /// Non-zero while the agent's hooks are installed
    agent_running: AtomicU32,
    slots: [SlotPayload; SLOT_COUNT],
    selections: [SlotSelection; SLOT_COUNT],
    active_payload: [AtomicU64; SLOT_COUNT],
    extra_prop: ExtraPropRequest,
    program_path: [AtomicU16; PROGRAM_PATH_LEN],
}

/// Compiled size of the region view
pub const REGION_SIZE: usize = size_of::<SharedRegion>();

const _: () = assert!(REGION_SIZE <= REGION_MAX_SIZE);
const _: () = assert!(REGION_SIZE % 8 == 0);

impl Default for SharedRegion {
    fn default() -> Self {
        Self {
            version: std::array::from_fn(|_| AtomicU8::new(0)),
            layout_size: AtomicU32::new(0),
            title_id: AtomicU32::new(0),
            locked: AtomicU32::new(0),
            sync_mode: AtomicU32::new(0),
            sync_status: AtomicU32::new(0),
            sync_session: AtomicU32::new(0),
            local_slot: AtomicI32::new(NO_LOCAL_SLOT),
            agent_running: AtomicU32::new(0),
            slots: std::array::from_fn(|_| SlotPayload::new()),
            selections: std::array::from_fn(|_| SlotSelection::new()),
            active_payload: std::array::from_fn(|_| AtomicU64::new(0)),
            extra_prop: ExtraPropRequest::new(),
            program_path: std::array::from_fn(|_| AtomicU16::new(0)),
        }
    }
}

impl SharedRegion {
    /// View raw mapped memory as a region.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` readable and writable bytes that stay mapped
    /// for `'a` and are only accessed through atomics while borrowed.
    pub unsafe fn view<'a>(ptr: *const u8, len: usize) -> Result<&'a SharedRegion> {
        if ptr.is_null() {
            return Err(Error::RegionUnavailable("null mapping".to_string()));
        }
        if (ptr as usize) % align_of::<SharedRegion>() != 0 {
            return Err(Error::RegionUnavailable(format!(
                "misaligned mapping at {:p}",
                ptr
            )));
        }
        if len < REGION_SIZE {
            return Err(Error::IncompatibleLayout {
                expected: REGION_SIZE,
                actual: len,
            });
        }
        // SAFETY: non-null, aligned and long enough; the caller guarantees
        // lifetime and atomic-only access. All-zero bytes are a valid value
        // for every field.
        Ok(unsafe { &*(ptr as *const SharedRegion) })
    }

    /// Agent-side initialization of a freshly created region
    pub fn initialize(&self, title_id: u32) {
        self.write_version(PROTOCOL_VERSION);
        self.title_id.store(title_id, Ordering::Relaxed);
        self.local_slot.store(NO_LOCAL_SLOT, Ordering::Relaxed);
        self.sync_status
            .store(SyncStatus::NotStarted as u32, Ordering::Relaxed);
        self.layout_size
            .store(REGION_SIZE as u32, Ordering::Release);
    }

    /// Check the creator's compiled layout against ours
    ///
    /// A zero layout size means the agent has not finished initializing.
    pub fn validate(&self) -> Result<()> {
        let actual = self.layout_size() as usize;
        if actual == 0 {
            return Err(Error::RegionUnavailable(
                "region is not initialized yet".to_string(),
            ));
        }
        if actual != REGION_SIZE {
            return Err(Error::IncompatibleLayout {
                expected: REGION_SIZE,
                actual,
            });
        }
        Ok(())
    }

    pub fn layout_size(&self) -> u32 {
        self.layout_size.load(Ordering::Acquire)
    }

    pub fn title_id(&self) -> u32 {
        self.title_id.load(Ordering::Relaxed)
    }

    pub fn write_version(&self, version: &str) {
        let bytes = truncate_utf8(version, VERSION_LEN - 1);
        for (i, cell) in self.version.iter().enumerate() {
            cell.store(bytes.get(i).copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    pub fn version(&self) -> String {
        let bytes: Vec<u8> = self
            .version
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .take_while(|&b| b != 0)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn version_matches(&self) -> bool {
        self.version() == PROTOCOL_VERSION
    }

    pub fn write_program_path(&self, path: &str) {
        let units: Vec<u16> = path.encode_utf16().take(PROGRAM_PATH_LEN - 1).collect();
        for (i, cell) in self.program_path.iter().enumerate() {
            cell.store(units.get(i).copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    /// Controller directory, `None` until the controller has written it
    pub fn program_path(&self) -> Option<String> {
        let units: Vec<u16> = self
            .program_path
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .take_while(|&u| u != 0)
            .collect();
        (!units.is_empty()).then(|| String::from_utf16_lossy(&units))
    }

    pub fn set_lock(&self, locked: bool, mode: SyncMode) {
        self.sync_mode.store(mode as u32, Ordering::Relaxed);
        self.locked.store(u32::from(locked), Ordering::Release);
    }

    /// Written by the agent when it installs or removes its hooks
    pub fn set_agent_running(&self, running: bool) {
        self.agent_running
            .store(u32::from(running), Ordering::Release);
    }

    pub fn agent_running(&self) -> bool {
        self.agent_running.load(Ordering::Acquire) != 0
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire) != 0
    }

    pub fn sync_mode(&self) -> SyncMode {
        SyncMode::from_raw(self.sync_mode.load(Ordering::Acquire))
    }

    pub fn sync_status(&self) -> SyncStatus {
        SyncStatus::from_raw(self.sync_status.load(Ordering::Acquire))
    }

    pub fn set_sync_status(&self, status: SyncStatus) {
        self.sync_status.store(status as u32, Ordering::Release);
    }

    /// Start a new online sync session, returning its number
    pub fn begin_sync_session(&self) -> u32 {
        self.sync_session.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn sync_session(&self) -> u32 {
        self.sync_session.load(Ordering::Acquire)
    }

    pub fn set_local_slot(&self, slot: Option<usize>) {
        let raw = slot.map_or(NO_LOCAL_SLOT, |s| s as i32);
        self.local_slot.store(raw, Ordering::Release);
    }

    pub fn local_slot(&self) -> Option<usize> {
        let raw = self.local_slot.load(Ordering::Acquire);
        usize::try_from(raw).ok().filter(|&s| s < SLOT_COUNT)
    }

    pub fn slot(&self, slot: usize) -> Result<&SlotPayload> {
        self.slots.get(slot).ok_or(Error::InvalidSlot(slot))
    }

    pub fn slots(&self) -> &[SlotPayload; SLOT_COUNT] {
        &self.slots
    }

    pub fn selection(&self, slot: usize) -> Result<&SlotSelection> {
        self.selections.get(slot).ok_or(Error::InvalidSlot(slot))
    }

    /// Snapshot of every displayed selection
    pub fn selections(&self) -> Vec<Selection> {
        self.selections.iter().map(SlotSelection::snapshot).collect()
    }

    pub fn active_payload(&self, slot: usize) -> Result<u64> {
        self.active_payload
            .get(slot)
            .map(|a| a.load(Ordering::Acquire))
            .ok_or(Error::InvalidSlot(slot))
    }

    pub fn set_active_payload(&self, slot: usize, address: u64) -> Result<()> {
        self.active_payload
            .get(slot)
            .ok_or(Error::InvalidSlot(slot))?
            .store(address, Ordering::Release);
        Ok(())
    }

    pub fn active_payloads(&self) -> [u64; SLOT_COUNT] {
        std::array::from_fn(|i| self.active_payload[i].load(Ordering::Acquire))
    }

    pub fn extra_prop(&self) -> &ExtraPropRequest {
        &self.extra_prop
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char
fn truncate_utf8(s: &str, max: usize) -> &[u8] {
    if s.len() <= max {
        return s.as_bytes();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s.as_bytes()[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_fits_max_size() {
        assert!(REGION_SIZE <= REGION_MAX_SIZE);
        assert_eq!(REGION_SIZE, 856);
    }

    #[test]
    fn test_initialize_and_validate() {
        let region = SharedRegion::default();
        let err = region.validate().unwrap_err();
        assert!(matches!(err, Error::RegionUnavailable(_)));
        assert!(err.is_transient());

        region.initialize(7);
        region.validate().unwrap();
        assert!(region.version_matches());
        assert_eq!(region.title_id(), 7);
        assert_eq!(region.local_slot(), None);
    }

    #[test]
    fn test_validate_layout_mismatch() {
        let region = SharedRegion::default();
        region.initialize(7);
        region.layout_size.store(128, Ordering::Release);
        match region.validate() {
            Err(Error::IncompatibleLayout { expected, actual }) => {
                assert_eq!(expected, REGION_SIZE);
                assert_eq!(actual, 128);
            }
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[test]
    fn test_view_rejects_short_mapping() {
        let backing = vec![0u64; REGION_SIZE / 8];
        let ptr = backing.as_ptr() as *const u8;
        let short = unsafe { SharedRegion::view(ptr, 64) };
        assert!(matches!(short, Err(Error::IncompatibleLayout { .. })));

        let region = unsafe { SharedRegion::view(ptr, REGION_SIZE) }.unwrap();
        assert_eq!(region.layout_size(), 0);
    }

    #[test]
    fn test_version_mismatch() {
        let region = SharedRegion::default();
        region.initialize(7);
        region.write_version("0.0.1-old");
        assert_eq!(region.version(), "0.0.1-old");
        assert!(!region.version_matches());
    }

    #[test]
    fn test_slot_publish_resets_agent_fields() {
        let region = SharedRegion::default();
        let slot = region.slot(0).unwrap();
        slot.set_initialized(true);
        slot.set_missing_mask(0b101);

        let generation = slot.publish(0x1000, 120_000, 32);
        assert_eq!(generation, 1);
        assert!(!slot.is_initialized());
        assert_eq!(slot.missing_mask(), 0);
        assert_eq!(
            slot.snapshot(),
            SlotSnapshot {
                address: 0x1000,
                size: 120_000,
                type_id: 32,
                generation: 1,
            }
        );

        assert!(!slot.is_applied());
        slot.mark_applied(generation);
        assert!(slot.is_applied());

        assert_eq!(slot.clear(), 2);
        assert!(slot.snapshot().is_empty());
        assert!(!slot.is_applied());
    }

    #[test]
    fn test_slot_snapshot_never_tears() {
        use std::sync::Arc;
        use std::sync::atomic::AtomicBool;
        use std::thread;

        let region = Arc::new(SharedRegion::default());
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let region = Arc::clone(&region);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let slot = region.slot(0).unwrap();
                for i in 0..20_000u32 {
                    if i % 2 == 0 {
                        slot.publish(0xA000, 100, 12);
                    } else {
                        slot.publish(0xB000, 200, 30);
                    }
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let slot = region.slot(0).unwrap();
        let mut last_generation = 0;
        while !done.load(Ordering::SeqCst) {
            let snapshot = slot.snapshot();
            match snapshot.address {
                0 => continue,
                0xA000 => assert_eq!((snapshot.size, snapshot.type_id), (100, 12)),
                0xB000 => assert_eq!((snapshot.size, snapshot.type_id), (200, 30)),
                other => panic!("unexpected address {:#x}", other),
            }
            assert!(snapshot.generation >= last_generation);
            last_generation = snapshot.generation;
        }
        writer.join().unwrap();
        assert_eq!(slot.generation(), 20_000);
    }

    #[test]
    fn test_agent_running_flag() {
        let region = SharedRegion::default();
        assert!(!region.agent_running());
        region.set_agent_running(true);
        assert!(region.agent_running());
        region.set_agent_running(false);
        assert!(!region.agent_running());
    }

    #[test]
    fn test_invalid_slot() {
        let region = SharedRegion::default();
        assert!(matches!(region.slot(2), Err(Error::InvalidSlot(2))));
        assert!(region.set_active_payload(5, 1).is_err());
    }

    #[test]
    fn test_selection_roundtrip_and_truncation() {
        let region = SharedRegion::default();
        let sel = region.selection(1).unwrap();
        sel.set(500, 12, "Kazuya (custom)");
        assert_eq!(
            sel.snapshot(),
            Selection {
                size: 500,
                type_id: 12,
                name: "Kazuya (custom)".to_string(),
            }
        );

        let long = "é".repeat(40);
        sel.set(1, 1, &long);
        let name = sel.snapshot().name;
        assert!(name.len() <= SELECTION_NAME_LEN);
        assert!(name.chars().all(|c| c == 'é'));

        sel.clear();
        assert!(sel.snapshot().is_empty());
    }

    #[test]
    fn test_extra_prop_consumed_once() {
        let region = SharedRegion::default();
        let request = region.extra_prop();
        assert!(request.take().is_none());

        let prop = ExtraProp {
            slot: 1,
            id: 0x8001,
            value: 3,
        };
        request.submit(prop);
        assert!(request.is_pending());
        assert_eq!(request.take(), Some(prop));
        assert!(request.take().is_none());
        assert!(!request.is_pending());
    }

    #[test]
    fn test_extra_prop_latest_wins() {
        let region = SharedRegion::default();
        let request = region.extra_prop();
        request.submit(ExtraProp {
            slot: 0,
            id: 1,
            value: 1,
        });
        request.submit(ExtraProp {
            slot: 0,
            id: 2,
            value: 2,
        });
        assert_eq!(request.take().map(|p| p.id), Some(2));
        assert!(request.take().is_none());
    }

    #[test]
    fn test_program_path() {
        let region = SharedRegion::default();
        assert_eq!(region.program_path(), None);
        region.write_program_path("C:\\Tools\\moveswap");
        assert_eq!(region.program_path().as_deref(), Some("C:\\Tools\\moveswap"));
    }

    #[test]
    fn test_lock_and_sync_state() {
        let region = SharedRegion::default();
        assert!(!region.is_locked());
        assert_eq!(region.sync_mode(), SyncMode::Offline);

        region.set_lock(true, SyncMode::OnlineAttempting);
        assert!(region.is_locked());
        assert_eq!(region.sync_mode(), SyncMode::OnlineAttempting);

        region.set_sync_status(SyncStatus::Ready);
        assert_eq!(region.sync_status(), SyncStatus::Ready);

        assert_eq!(region.begin_sync_session(), 1);
        assert_eq!(region.sync_session(), 1);

        region.set_local_slot(Some(1));
        assert_eq!(region.local_slot(), Some(1));
        region.set_local_slot(None);
        assert_eq!(region.local_slot(), None);
    }

    #[test]
    fn test_active_payloads() {
        let region = SharedRegion::default();
        region.set_active_payload(1, 0xabc000).unwrap();
        assert_eq!(region.active_payloads(), [0, 0xabc000]);
        assert_eq!(region.active_payload(1).unwrap(), 0xabc000);
    }
}
