//! The public `Table` orchestrator: growth protocol, Set/Get/Unset/Swap,
//! and the bulk/iteration helpers built on top of [`Storage`] (§4.4, §6).

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering as StdOrdering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam_utils::Backoff;

use crate::error::TableError;
use crate::hash::{complete_hash, pre_hash, Mixer, Xxh3Mixer};
use crate::key::Key;
use crate::slot::{SlotState, StoredValue, ORDERING};
use crate::storage::{retains_boxed_key, Storage};

/// Default capacity used when [`TableOptions::initial_capacity`] is left at
/// zero (§6 "NewWithArgs... clamped >= default if <= 0").
pub const DEFAULT_INITIAL_CAPACITY: u64 = 65536;

/// Hard ceiling on storage size (§4.4 step 2: "`NoSpaceLeft` if the next
/// size would exceed the table's configured maximum").
pub const MAXIMAL_SIZE: u64 = 1 << 32;

/// Load factor at which a write triggers background growth (§4.4 step 1).
pub const GROW_AT_FULLNESS: f64 = 0.85;

/// Construction-time knobs for a [`Table`] (§6 "NewWithArgs").
#[derive(Debug, Clone, Copy)]
pub struct TableOptions {
    /// Requested initial slot count. Zero means "use the default"; any
    /// other value is rounded up to the next power of two and used as-is,
    /// even if smaller than the default.
    pub initial_capacity: u64,
}

impl Default for TableOptions {
    fn default() -> Self {
        TableOptions {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
        }
    }
}

impl TableOptions {
    fn normalized_capacity(&self) -> u64 {
        if self.initial_capacity == 0 {
            DEFAULT_INITIAL_CAPACITY
        } else {
            self.initial_capacity.next_power_of_two()
        }
    }
}

/// A concurrent, in-memory open-addressing hash table (§1, §4).
///
/// Every public method takes `&self` — there is no interior `&mut self`
/// anywhere in the type, since all synchronization lives in the per-slot
/// atomic state machine and the swappable [`Storage`] pointer, not in a
/// table-wide lock. `M` is the digest used for byte sequences and strings
/// longer than the fast-key window; [`Xxh3Mixer`] is the default and the
/// only one this crate ships.
pub struct Table<V, M: Mixer = Xxh3Mixer> {
    storage: ArcSwap<Storage<V>>,
    /// Count of `Live` slots. Used for `len()` and the load-factor check;
    /// recomputed exactly on every grow (tombstones don't carry over).
    busy: AtomicU64,
    /// Writes that have passed the load-factor check but not yet finished;
    /// growth drains this to zero before rebuilding.
    writes_in_flight: AtomicI64,
    is_growing: AtomicBool,
    forbid_growing: AtomicBool,
    _mixer: PhantomData<M>,
}

impl<V> Table<V, Xxh3Mixer> {
    pub fn new() -> Self {
        Self::with_options(TableOptions::default())
    }
}

impl<V> Default for Table<V, Xxh3Mixer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, M: Mixer> Table<V, M> {
    pub fn with_options(options: TableOptions) -> Self {
        let capacity = options.normalized_capacity();
        Table {
            storage: ArcSwap::new(Arc::new(Storage::new(capacity))),
            busy: AtomicU64::new(0),
            writes_in_flight: AtomicI64::new(0),
            is_growing: AtomicBool::new(false),
            forbid_growing: AtomicBool::new(false),
            _mixer: PhantomData,
        }
    }

    fn current(&self) -> Arc<Storage<V>> {
        self.storage.load_full()
    }

    /// Number of live entries (§4.4 "Length and iteration").
    pub fn len(&self) -> usize {
        self.busy.load(ORDERING) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current slot count of the backing storage.
    pub fn capacity(&self) -> u64 {
        self.current().size()
    }

    /// Disables further growth (§6 "SetForbidGrowing"). A full table under
    /// this mode surfaces [`TableError::NoSpaceLeft`] on insert instead of
    /// growing.
    pub fn set_forbid_growing(&self, forbid: bool) {
        self.forbid_growing.store(forbid, ORDERING);
    }

    fn wait_while_growing(&self) {
        let backoff = Backoff::new();
        while self.is_growing.load(ORDERING) {
            backoff.snooze();
        }
    }

    fn load_factor(&self, storage: &Storage<V>) -> f64 {
        let busy = self.busy.load(ORDERING) as f64;
        let in_flight = self.writes_in_flight.load(StdOrdering::SeqCst).max(0) as f64;
        (busy + in_flight) / storage.size() as f64
    }

    /// Best-effort grow trigger used internally by `set`/`swap`: any error
    /// (already growing, forbidden, or out of space) is swallowed, since a
    /// write can always fall back to probing the current storage.
    fn maybe_trigger_grow(&self) {
        let storage = self.current();
        if self.load_factor(&storage) >= GROW_AT_FULLNESS {
            let doubled = storage.size().saturating_mul(2).min(MAXIMAL_SIZE);
            if doubled > storage.size() {
                let _ = self.grow_to(doubled);
            }
        }
    }

    /// Explicitly grow (or no-op if `new_size` is already met) to at least
    /// `new_size` slots (§4.4 "Growth protocol"). Unlike the best-effort
    /// trigger used internally by writes, this surfaces
    /// [`TableError::ForbiddenToGrow`] and [`TableError::NoSpaceLeft`].
    pub fn grow_to(&self, new_size: u64) -> Result<(), TableError> {
        if new_size > MAXIMAL_SIZE {
            return Err(TableError::NoSpaceLeft);
        }
        if self.current().size() >= new_size {
            return Ok(());
        }
        if self.forbid_growing.load(ORDERING) {
            return Err(TableError::ForbiddenToGrow);
        }
        // Step: CAS isGrowing 0->1, serializing concurrent grow attempts.
        // A lost race is not an error: the winner will get us there.
        if self
            .is_growing
            .compare_exchange(false, true, ORDERING, ORDERING)
            .is_err()
        {
            return Ok(());
        }
        let _guard = ResetGuard(&self.is_growing);

        // Step: drain in-flight writers before touching the old storage.
        let backoff = Backoff::new();
        while self.writes_in_flight.load(StdOrdering::SeqCst) != 0 {
            backoff.snooze();
        }

        let old_storage = self.current();
        if old_storage.size() >= new_size {
            return Ok(());
        }

        tracing::debug!(
            old_size = old_storage.size(),
            new_size,
            "growing table storage"
        );

        let new_storage = Storage::new(new_size);
        let live_count = new_storage.copy_old_items_after_growing(&old_storage);
        self.busy.store(live_count, ORDERING);

        self.storage.store(Arc::new(new_storage));
        Ok(())
    }

    fn pre_hash(&self, key: &Key) -> (u64, u8, bool) {
        pre_hash::<M>(key)
    }

    fn slot_matches_key(
        slot: &crate::slot::Slot<V>,
        full_hash: u64,
        pre_hash: u64,
        type_tag: u8,
        is_full: bool,
        key: &Key,
    ) -> bool {
        if slot.hash() != full_hash {
            return false;
        }
        let (slot_fast_key, slot_fast_key_type) = slot.fast_key();
        if slot_fast_key_type != 0 {
            slot_fast_key == pre_hash && slot_fast_key_type == type_tag && is_full
        } else {
            // SAFETY: caller holds this slot in `Updating` (exclusive access).
            unsafe { slot.key_unchecked() }.as_ref() == Some(key)
        }
    }

    fn set_stored(&self, key: Key, value: StoredValue<V>) -> Result<Option<StoredValue<V>>, TableError>
    where
        V: Clone,
    {
        self.wait_while_growing();
        self.maybe_trigger_grow();

        self.writes_in_flight.fetch_add(1, StdOrdering::SeqCst);
        let result = self.set_stored_inner(key, value);
        self.writes_in_flight.fetch_sub(1, StdOrdering::SeqCst);

        // Best-effort post-write trigger (§4.4 step 8): a burst of inserts
        // that crossed the threshold mid-flight still gets a chance to grow.
        self.maybe_trigger_grow();
        result
    }

    fn set_stored_inner(
        &self,
        key: Key,
        value: StoredValue<V>,
    ) -> Result<Option<StoredValue<V>>, TableError>
    where
        V: Clone,
    {
        let storage = self.current();
        let (pre, type_tag, is_full) = self.pre_hash(&key);
        let full_hash = complete_hash(pre, type_tag);
        let ideal = storage.get_idx(full_hash);
        let (fast_key, fast_key_type) = if is_full { (pre, type_tag) } else { (0, 0) };
        let retained_key = if retains_boxed_key(&key, is_full) {
            Some(key.clone())
        } else {
            None
        };

        let mut idx = ideal;
        let mut slid = 0u32;
        let backoff = Backoff::new();

        loop {
            let slot = storage.slot(idx);

            if slot.try_claim_for_insert() {
                slot.write_occupant(
                    full_hash,
                    slid,
                    fast_key,
                    fast_key_type,
                    retained_key,
                    value,
                );
                self.busy.fetch_add(1, ORDERING);
                slot.finish_setting();
                return Ok(None);
            }

            if slot.state() == SlotState::Live && slot.try_claim_for_update() {
                if Self::slot_matches_key(slot, full_hash, pre, type_tag, is_full, &key) {
                    slot.wait_for_readers_out();
                    // SAFETY: this slot is held exclusively (`Updating`).
                    let previous = unsafe { slot.payload_unchecked() }.clone();
                    slot.write_occupant(
                        full_hash,
                        slot.slid(),
                        fast_key,
                        fast_key_type,
                        retained_key,
                        value,
                    );
                    slot.finish_updating();
                    return Ok(previous);
                }
                slot.release_update_unchanged();
                idx = storage.next(idx);
                slid += 1;
                if slid as u64 >= storage.size() {
                    invariant_violation("set", slid as u64, storage.size());
                }
                continue;
            }

            backoff.snooze();
        }
    }

    /// `Set(key, value)` (§6).
    pub fn set(&self, key: impl Into<Key>, value: V) -> Result<(), TableError>
    where
        V: Clone,
    {
        self.set_stored(key.into(), StoredValue::Value(value))?;
        Ok(())
    }

    /// `SetBytesByBytes(keyBytes, valueBytes)` (§6): both key and value are
    /// raw byte sequences.
    pub fn set_bytes_by_bytes(
        &self,
        key_bytes: impl Into<Vec<u8>>,
        value_bytes: impl Into<Vec<u8>>,
    ) -> Result<(), TableError>
    where
        V: Clone,
    {
        self.set_stored(Key::Bytes(key_bytes.into()), StoredValue::Bytes(value_bytes.into()))?;
        Ok(())
    }

    /// `Swap(key, value) -> previous` (§6): same protocol as `set`, but
    /// returns whatever the slot held before, if anything.
    pub fn swap(&self, key: impl Into<Key>, value: V) -> Result<Option<V>, TableError>
    where
        V: Clone,
    {
        let previous = self.set_stored(key.into(), StoredValue::Value(value))?;
        Ok(previous.and_then(|sv| match sv {
            StoredValue::Value(v) => Some(v),
            StoredValue::Bytes(_) => None,
        }))
    }

    fn get_raw(&self, key: &Key) -> Option<StoredValue<V>>
    where
        V: Clone,
    {
        if self.busy.load(ORDERING) == 0 {
            return None;
        }
        let storage = self.current();
        let (pre, type_tag, is_full) = self.pre_hash(key);
        storage.get_by_hash_value(pre, type_tag, is_full, |slot| {
            // SAFETY: `match_fn` only runs once the caller has been admitted
            // as a reader (state observed `Live`).
            unsafe { slot.key_unchecked() }.as_ref() == Some(key)
        })
    }

    /// `Get(key)` (§6). Returns `None` if the key is absent, or present but
    /// stored via [`Table::set_bytes_by_bytes`] (a bytes-form occupant is not
    /// a `V`).
    pub fn get(&self, key: impl Into<Key>) -> Option<V>
    where
        V: Clone,
    {
        match self.get_raw(&key.into()) {
            Some(StoredValue::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// `GetByBytes(keyBytes)` (§6): looks up a byte-keyed entry and returns
    /// its byte-form value.
    pub fn get_by_bytes(&self, key_bytes: impl Into<Vec<u8>>) -> Option<Vec<u8>>
    where
        V: Clone,
    {
        match self.get_raw(&Key::Bytes(key_bytes.into())) {
            Some(StoredValue::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    /// `GetByUint64(key)` (§6): convenience specialization for `u64` keys.
    pub fn get_by_u64(&self, key: u64) -> Option<V>
    where
        V: Clone,
    {
        self.get(Key::U64(key))
    }

    /// `HasKey(key)` (§6).
    pub fn has_key(&self, key: impl Into<Key>) -> bool
    where
        V: Clone,
    {
        self.get_raw(&key.into()).is_some()
    }

    /// `Unset(key)` (§6): unconditional removal.
    pub fn unset(&self, key: impl Into<Key>) -> Result<(), TableError>
    where
        V: Clone,
    {
        self.unset_if(key, |_| true)
    }

    /// `UnsetIf(key, condition)` (§6): removes the entry only if `condition`
    /// accepts its current value. Returns [`TableError::ConditionFailed`] if
    /// it doesn't, leaving the entry untouched.
    pub fn unset_if<F>(&self, key: impl Into<Key>, condition: F) -> Result<(), TableError>
    where
        V: Clone,
        F: Fn(&StoredValue<V>) -> bool,
    {
        let key = key.into();
        if self.busy.load(ORDERING) == 0 {
            return Err(TableError::NotFound);
        }

        self.writes_in_flight.fetch_add(1, StdOrdering::SeqCst);
        let result = self.unset_if_inner(&key, condition);
        self.writes_in_flight.fetch_sub(1, StdOrdering::SeqCst);
        result
    }

    fn unset_if_inner<F>(&self, key: &Key, condition: F) -> Result<(), TableError>
    where
        V: Clone,
        F: Fn(&StoredValue<V>) -> bool,
    {
        let storage = self.current();
        let (pre, type_tag, is_full) = self.pre_hash(key);
        let full_hash = complete_hash(pre, type_tag);
        let mut idx = storage.get_idx(full_hash);
        let mut steps = 0u64;
        let backoff = Backoff::new();

        loop {
            let slot = storage.slot(idx);
            match slot.state() {
                SlotState::Empty => return Err(TableError::NotFound),
                SlotState::Removed => {
                    idx = storage.next(idx);
                    steps += 1;
                    if steps >= storage.size() {
                        return Err(TableError::NotFound);
                    }
                    continue;
                }
                SlotState::Live => {
                    if !slot.try_claim_for_update() {
                        backoff.snooze();
                        continue;
                    }
                    if Self::slot_matches_key(slot, full_hash, pre, type_tag, is_full, key) {
                        // SAFETY: exclusive access while `Updating`.
                        let matched = unsafe { slot.payload_unchecked() }
                            .as_ref()
                            .map(&condition)
                            .unwrap_or(false);
                        if !matched {
                            slot.release_update_unchanged();
                            return Err(TableError::ConditionFailed);
                        }
                        slot.finish_updating();
                        slot.clear_occupant_on_remove();
                        slot.remove();
                        self.busy.fetch_sub(1, ORDERING);
                        return Ok(());
                    }
                    slot.release_update_unchanged();
                    idx = storage.next(idx);
                    steps += 1;
                    if steps >= storage.size() {
                        return Err(TableError::NotFound);
                    }
                }
                SlotState::Setting | SlotState::Updating => {
                    backoff.snooze();
                }
            }
        }
    }

    /// `Keys()` (§6): a point-in-time snapshot of every live key.
    pub fn keys(&self) -> Vec<Key>
    where
        V: Clone,
    {
        let storage = self.current();
        let mut out = Vec::with_capacity(self.len());
        storage.for_each_live(|key, _| out.push(key));
        out
    }

    /// `ToSTDMap()` (§6): a snapshot copy as a standard map. Entries stored
    /// via [`Table::set_bytes_by_bytes`] carry their bytes form rather than a
    /// `V`, so the map's value type is [`StoredValue<V>`] rather than bare
    /// `V`.
    pub fn to_std_map(&self) -> HashMap<Key, StoredValue<V>>
    where
        V: Clone,
    {
        let storage = self.current();
        let mut out = HashMap::with_capacity(self.len());
        storage.for_each_live(|key, value| {
            out.insert(key, value.clone());
        });
        out
    }

    /// `FromSTDMap(mapping)` (§6): bulk load, issuing one `set`/`set_bytes_by_bytes`-
    /// equivalent write per entry and growing as needed along the way.
    pub fn load_from_std_map(&self, map: HashMap<Key, StoredValue<V>>) -> Result<(), TableError>
    where
        V: Clone,
    {
        for (key, value) in map {
            self.set_stored(key, value)?;
        }
        Ok(())
    }

    /// Debug/test helper: re-probes every live entry and confirms it is
    /// reachable by its own key, and that the live count matches the
    /// iteration count. Not part of the error taxonomy in [`TableError`] —
    /// a failure here means an invariant was violated, which callers should
    /// treat as a test failure, not a recoverable condition.
    pub fn check_consistency(&self) -> Result<(), String>
    where
        V: Clone,
    {
        let storage = self.current();
        let mut counted = 0u64;
        let mut unreachable_keys = Vec::new();
        storage.for_each_live(|key, _| {
            counted += 1;
            let (pre, type_tag, is_full) = self.pre_hash(&key);
            if storage
                .get_by_hash_value(pre, type_tag, is_full, |slot| {
                    // SAFETY: gated on reader admission, as in `get_raw`.
                    unsafe { slot.key_unchecked() }.as_ref() == Some(&key)
                })
                .is_none()
            {
                unreachable_keys.push(key);
            }
        });

        let recorded = self.busy.load(ORDERING);
        if counted != recorded {
            return Err(format!(
                "busy counter ({recorded}) disagrees with live slot count ({counted})"
            ));
        }
        if !unreachable_keys.is_empty() {
            return Err(format!(
                "{} live key(s) are not reachable by their own hash: {:?}",
                unreachable_keys.len(),
                unreachable_keys
            ));
        }
        Ok(())
    }
}

struct ResetGuard<'a>(&'a AtomicBool);

impl Drop for ResetGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, ORDERING);
    }
}

#[cold]
fn invariant_violation(context: &str, slid: u64, size: u64) -> ! {
    tracing::error!(context, slid, size, "probe exceeded storage size: invariant violated");
    panic!("probe exceeded storage size in {context}: slid={slid} size={size}");
}
