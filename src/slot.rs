//! Fixed-layout slot record with atomic state transitions (§4.2).
//!
//! A `Slot` holds everything the probe needs to decide whether it has found
//! its key, without ever taking a lock: `state` is the single synchronization
//! point, CAS'd between the five legal states, and every other field is
//! either a plain atomic (small, `Copy`, read lock-free) or guarded by an
//! `UnsafeCell` whose access is only ever exclusive *because* the state
//! machine makes it so (no two writers can hold `Setting`/`Updating` on the
//! same slot at once, and a reader never proceeds past a non-`Live` state).

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use crate::key::Key;

/// The ordering used for every atomic operation in this crate. A single
/// conservative choice, rather than hand-tuned acquire/release pairs,
/// matching how this corpus's other concurrent maps pick one ordering and
/// use it everywhere (e.g. `chashmap`'s crate-wide `ORDERING` constant).
pub(crate) const ORDERING: Ordering = Ordering::SeqCst;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SlotState {
    Empty = 0,
    Setting = 1,
    Live = 2,
    Updating = 3,
    Removed = 4,
}

impl SlotState {
    fn from_u32(v: u32) -> Self {
        match v {
            0 => SlotState::Empty,
            1 => SlotState::Setting,
            2 => SlotState::Live,
            3 => SlotState::Updating,
            4 => SlotState::Removed,
            other => unreachable!("slot state word holds an undefined value: {other}"),
        }
    }
}

/// The stored payload (§3 "Value"): a generic typed value, or a raw byte
/// sequence. Readers prefer the byte form when present (§4.3 step 4).
#[derive(Debug, Clone)]
pub enum StoredValue<V> {
    Value(V),
    Bytes(Vec<u8>),
}

impl<V: Clone> StoredValue<V> {
    pub fn as_value(&self) -> Option<&V> {
        match self {
            StoredValue::Value(v) => Some(v),
            StoredValue::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            StoredValue::Bytes(b) => Some(b),
            StoredValue::Value(_) => None,
        }
    }
}

/// Result of [`Slot::increase_readers`]: either the caller may proceed to
/// read, or the probe observed a terminal (non-`Live`) state and must stop
/// or advance.
pub(crate) enum ReaderAdmit {
    Proceed,
    Empty,
    Removed,
    Retry,
}

pub(crate) struct Slot<V> {
    state: AtomicU32,
    readers: AtomicUsize,
    hash: AtomicU64,
    slid: AtomicU32,
    fast_key: AtomicU64,
    fast_key_type: AtomicU8,
    key: UnsafeCell<Option<Key>>,
    payload: UnsafeCell<Option<StoredValue<V>>>,
}

// SAFETY: every access to `key`/`payload` is gated by a CAS on `state` that
// grants exclusive writer access (Setting/Updating) or shared reader access
// only once `state` == Live, so concurrent access is always either
// shared-and-read-only or uniquely owned.
unsafe impl<V: Send> Sync for Slot<V> {}

impl<V> Default for Slot<V> {
    fn default() -> Self {
        Slot {
            state: AtomicU32::new(SlotState::Empty as u32),
            readers: AtomicUsize::new(0),
            hash: AtomicU64::new(0),
            slid: AtomicU32::new(0),
            fast_key: AtomicU64::new(0),
            fast_key_type: AtomicU8::new(0),
            key: UnsafeCell::new(None),
            payload: UnsafeCell::new(None),
        }
    }
}

impl<V> Slot<V> {
    pub(crate) fn state(&self) -> SlotState {
        SlotState::from_u32(self.state.load(ORDERING))
    }

    fn cas_state(&self, from: SlotState, to: SlotState) -> bool {
        self.state
            .compare_exchange(from as u32, to as u32, ORDERING, ORDERING)
            .is_ok()
    }

    /// Attempt `Empty -> Setting` or `Removed -> Setting`: claiming a slot
    /// for a brand new key (fresh or reusing a tombstone).
    pub(crate) fn try_claim_for_insert(&self) -> bool {
        self.cas_state(SlotState::Empty, SlotState::Setting)
            || self.cas_state(SlotState::Removed, SlotState::Setting)
    }

    /// Attempt `Live -> Updating`: claiming a live slot to inspect or
    /// overwrite its value.
    pub(crate) fn try_claim_for_update(&self) -> bool {
        self.cas_state(SlotState::Live, SlotState::Updating)
    }

    pub(crate) fn finish_setting(&self) {
        let ok = self.cas_state(SlotState::Setting, SlotState::Live);
        debug_assert!(ok, "finish_setting called on a slot not in Setting state");
    }

    pub(crate) fn finish_updating(&self) {
        let ok = self.cas_state(SlotState::Updating, SlotState::Live);
        debug_assert!(ok, "finish_updating called on a slot not in Updating state");
    }

    /// Restore `Updating -> Live` without having made a change (probe
    /// found the slot live but it wasn't the target key).
    pub(crate) fn release_update_unchanged(&self) {
        self.finish_updating();
    }

    pub(crate) fn remove(&self) {
        let ok = self.cas_state(SlotState::Live, SlotState::Removed);
        debug_assert!(ok, "remove called on a slot not in Live state");
    }

    pub(crate) fn hash(&self) -> u64 {
        self.hash.load(ORDERING)
    }

    pub(crate) fn slid(&self) -> u32 {
        self.slid.load(ORDERING)
    }

    pub(crate) fn fast_key(&self) -> (u64, u8) {
        (self.fast_key.load(ORDERING), self.fast_key_type.load(ORDERING))
    }

    /// Writes the identity and payload of a slot being claimed. Caller must
    /// hold the slot in `Setting` or `Updating` state (exclusive access).
    pub(crate) fn write_occupant(
        &self,
        hash: u64,
        slid: u32,
        fast_key: u64,
        fast_key_type: u8,
        key: Option<Key>,
        value: StoredValue<V>,
    ) {
        self.hash.store(hash, ORDERING);
        self.slid.store(slid, ORDERING);
        self.fast_key.store(fast_key, ORDERING);
        self.fast_key_type.store(fast_key_type, ORDERING);
        // SAFETY: caller holds this slot in Setting/Updating, the only
        // states in which a writer has exclusive access to `key`/`payload`.
        unsafe {
            *self.key.get() = key;
            *self.payload.get() = Some(value);
        }
    }

    pub(crate) fn clear_occupant_on_remove(&self) {
        // SAFETY: caller holds this slot in Live, transitioning to Removed;
        // the CAS to Removed in `remove` happens after this call returns,
        // so this is still the sole accessor. Dropping the key/value here
        // (rather than leaving stale data behind) avoids leaking handles a
        // reader might otherwise transiently observe through a racing
        // `increase_readers` that loses the race to see `Removed`.
        unsafe {
            *self.key.get() = None;
            *self.payload.get() = None;
        }
    }

    /// Read the key stored in this slot. Caller must have successfully
    /// called [`Slot::increase_readers`] and observed `Live`, or must hold
    /// exclusive (`Setting`/`Updating`) access.
    ///
    /// # Safety
    /// The caller is responsible for the access discipline described above.
    pub(crate) unsafe fn key_unchecked(&self) -> &Option<Key> {
        &*self.key.get()
    }

    /// # Safety
    /// Same discipline as [`Slot::key_unchecked`].
    pub(crate) unsafe fn payload_unchecked(&self) -> &Option<StoredValue<V>> {
        &*self.payload.get()
    }

    /// `increaseReaders()` (§4.2): increments the reader count, then
    /// re-checks state. Rolls back the increment unless state is `Live`.
    pub(crate) fn increase_readers(&self) -> ReaderAdmit {
        self.readers.fetch_add(1, ORDERING);
        match self.state() {
            SlotState::Live => ReaderAdmit::Proceed,
            SlotState::Empty => {
                self.readers.fetch_sub(1, ORDERING);
                ReaderAdmit::Empty
            }
            SlotState::Removed => {
                self.readers.fetch_sub(1, ORDERING);
                ReaderAdmit::Removed
            }
            SlotState::Setting | SlotState::Updating => {
                self.readers.fetch_sub(1, ORDERING);
                ReaderAdmit::Retry
            }
        }
    }

    pub(crate) fn decrease_readers(&self) {
        self.readers.fetch_sub(1, ORDERING);
    }

    /// `waitForReadersOut()` (§4.2): spins until no reader is in flight.
    /// Writers doing a value replacement must call this before mutating
    /// payload fields so readers never observe a half-written value.
    pub(crate) fn wait_for_readers_out(&self) {
        let backoff = crossbeam_utils::Backoff::new();
        while self.readers.load(ORDERING) != 0 {
            backoff.snooze();
        }
    }
}
