//! A power-of-two slot array plus the probe and rebuild helpers (§4.3).

use crate::hash::compress;
use crate::key::Key;
use crate::slot::{ReaderAdmit, Slot, SlotState, StoredValue};

/// Whether a fast-keyed slot still needs its boxed [`Key`] retained.
/// Scalar numeric kinds decode losslessly from `(fast_key, fast_key_type)`
/// alone (see [`crate::key::decode_fast_key`]); byte/string kinds keep the
/// boxed key too, since a short `Vec<u8>`/`String` is cheap in Rust (unlike
/// the boxed-interface allocation the fast key exists to avoid).
pub(crate) fn retains_boxed_key(key: &Key, is_full: bool) -> bool {
    !is_full || matches!(key, Key::Bytes(_) | Key::Str(_))
}

pub(crate) struct Storage<V> {
    slots: Box<[Slot<V>]>,
    size: u64,
    mask: u64,
}

impl<V> Storage<V> {
    pub(crate) fn new(size: u64) -> Self {
        debug_assert!(size.is_power_of_two());
        let mut slots = Vec::with_capacity(size as usize);
        slots.resize_with(size as usize, Slot::default);
        Storage {
            slots: slots.into_boxed_slice(),
            size,
            mask: size - 1,
        }
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    #[inline(always)]
    pub(crate) fn get_idx(&self, full_hash: u64) -> u64 {
        compress(self.size, full_hash)
    }

    pub(crate) fn slot(&self, idx: u64) -> &Slot<V> {
        &self.slots[idx as usize]
    }

    pub(crate) fn next(&self, idx: u64) -> u64 {
        (idx + 1) & self.mask
    }

    /// `findFreeSlot(start)` (§4.3): linear probe from `start` for the first
    /// `Empty` slot. Only used by the single-threaded rebuild path — no
    /// concurrent writer can be racing it.
    fn find_free_slot(&self, start: u64) -> (u64, u32) {
        let mut idx = start;
        let mut slid = 0u32;
        loop {
            if self.slots[idx as usize].state() == SlotState::Empty {
                return (idx, slid);
            }
            slid += 1;
            idx = self.next(idx);
            if slid as u64 >= self.size {
                panic!("probe slid past storage size while rebuilding: invariant violated");
            }
        }
    }

    /// `copyOldItemsAfterGrowing(old)` (§4.3): reinsert every live slot of
    /// `old` into `self` by ideal index, dropping tombstones. Serial, no
    /// contention — the caller has already drained all writers.
    /// Returns the number of live entries copied, so the caller can reset
    /// its busy counter exactly (tombstones don't carry over).
    pub(crate) fn copy_old_items_after_growing(&self, old: &Storage<V>) -> u64
    where
        V: Clone,
    {
        let mut copied = 0u64;
        for old_slot in old.slots.iter() {
            if old_slot.state() != SlotState::Live {
                continue;
            }
            let hash = old_slot.hash();
            let (fast_key, fast_key_type) = old_slot.fast_key();
            // SAFETY: growth has already drained writesInFlight to zero and
            // this storage is not yet published, so `old_slot` can only be
            // Live or transitioning under no concurrent writer; readers may
            // still be probing `old`, but they only ever take a shared,
            // read-only view consistent with Live, which this check confirms.
            let key = unsafe { old_slot.key_unchecked() }.clone();
            let payload = unsafe { old_slot.payload_unchecked() }.clone();
            let Some(payload) = payload else { continue };

            let ideal = self.get_idx(hash);
            let (idx, slid) = self.find_free_slot(ideal);
            let new_slot = &self.slots[idx as usize];
            let claimed = new_slot.try_claim_for_insert();
            debug_assert!(claimed, "rebuild target slot was not Empty");
            new_slot.write_occupant(hash, slid, fast_key, fast_key_type, key, payload);
            new_slot.finish_setting();
            copied += 1;
        }
        copied
    }

    /// `getByHashValue(preHash, typeTag, isFull, matchFn)` (§4.3).
    pub(crate) fn get_by_hash_value<F>(
        &self,
        pre_hash: u64,
        type_tag: u8,
        is_full: bool,
        match_fn: F,
    ) -> Option<StoredValue<V>>
    where
        V: Clone,
        F: Fn(&Slot<V>) -> bool,
    {
        let full_hash = crate::hash::complete_hash(pre_hash, type_tag);
        let ideal = self.get_idx(full_hash);
        let mut idx = ideal;
        let mut steps = 0u64;
        let backoff = crossbeam_utils::Backoff::new();

        loop {
            let slot = &self.slots[idx as usize];
            match slot.increase_readers() {
                ReaderAdmit::Empty => return None,
                ReaderAdmit::Retry => {
                    backoff.snooze();
                    continue;
                }
                ReaderAdmit::Removed => {
                    idx = self.next(idx);
                    steps += 1;
                    if steps >= self.size {
                        return None;
                    }
                    continue;
                }
                ReaderAdmit::Proceed => {
                    if slot.hash() != full_hash {
                        slot.decrease_readers();
                        idx = self.next(idx);
                        steps += 1;
                        if steps >= self.size {
                            return None;
                        }
                        continue;
                    }

                    let (slot_fast_key, slot_fast_key_type) = slot.fast_key();
                    // Fast-key comparison is decisive, not a hint: a slot
                    // written with a non-zero fastKeyType never retained the
                    // original `Key`, so `match_fn` (which reads the slot's
                    // key) has nothing to compare against in that case.
                    let matched = if slot_fast_key_type != 0 {
                        slot_fast_key == pre_hash && slot_fast_key_type == type_tag && is_full
                    } else {
                        match_fn(slot)
                    };

                    let result = if matched {
                        // SAFETY: admitted as a reader while state == Live.
                        unsafe { slot.payload_unchecked() }.clone()
                    } else {
                        None
                    };
                    slot.decrease_readers();

                    if matched {
                        return result;
                    }
                    idx = self.next(idx);
                    steps += 1;
                    if steps >= self.size {
                        return None;
                    }
                }
            }
        }
    }

    /// Best-effort snapshot scan (§4.4 "Length and iteration"): acquires
    /// each slot as a reader, skips non-`Live`, and yields `(key, value)`.
    ///
    /// Scalar-keyed slots that only retained a fast key (no boxed `Key`) have
    /// their key reconstructed via [`crate::key::decode_fast_key`], since
    /// `isFull == true` means the fast key losslessly encodes the original.
    pub(crate) fn for_each_live<F>(&self, mut f: F)
    where
        V: Clone,
        F: FnMut(crate::key::Key, &StoredValue<V>),
    {
        for slot in self.slots.iter() {
            match slot.increase_readers() {
                ReaderAdmit::Proceed => {
                    // SAFETY: admitted as a reader while state == Live.
                    let stored_key = unsafe { slot.key_unchecked() };
                    let payload = unsafe { slot.payload_unchecked() };
                    if let Some(payload) = payload {
                        let key = match stored_key {
                            Some(k) => k.clone(),
                            None => {
                                let (fast_key, fast_key_type) = slot.fast_key();
                                crate::key::decode_fast_key(fast_key, fast_key_type)
                            }
                        };
                        f(key, payload);
                    }
                    slot.decrease_readers();
                }
                _ => continue,
            }
        }
    }
}
