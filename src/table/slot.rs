//! Sequence-locked table slot
//!
//! A slot's `meta` word packs a sequence number (upper bits) and the slot
//! state (lower two bits). Every transition bumps the sequence, so a reader
//! that sees the same `meta` before and after copying the key and value words
//! has a consistent copy. Key and value live in atomics, which keeps the whole
//! protocol in safe code.

use crate::record::{ConnectionContext, ProcessRecord, RECORD_WORDS};
use std::hint;
use std::sync::atomic::{fence, AtomicU64, Ordering};

const STATE_MASK: u64 = 0b11;
const SEQ_STEP: u64 = STATE_MASK + 1;

const EMPTY: u64 = 0;
const FULL: u64 = 1;
const TOMBSTONE: u64 = 2;
const BUSY: u64 = 3;

/// Consistent view of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SlotRead {
    /// Free and not part of any probe run; terminates a probe sequence
    Empty,
    /// Free, but later slots may still belong to a probe run through it
    Vacant,
    Occupied(ConnectionContext, ProcessRecord),
}

pub(super) struct Slot {
    meta: AtomicU64,
    key: AtomicU64,
    words: [AtomicU64; RECORD_WORDS],
}

/// Exclusive write access to one slot, obtained through a CAS on `meta`
pub(super) struct SlotWriter<'a> {
    slot: &'a Slot,
    busy: u64,
}

impl Slot {
    pub(super) fn new() -> Self {
        Self {
            meta: AtomicU64::new(EMPTY),
            key: AtomicU64::new(0),
            words: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Read the slot, waiting out any writer currently holding it
    pub(super) fn read(&self) -> SlotRead {
        loop {
            let before = self.meta.load(Ordering::Acquire);
            match before & STATE_MASK {
                EMPTY => return SlotRead::Empty,
                TOMBSTONE => return SlotRead::Vacant,
                BUSY => {
                    hint::spin_loop();
                    continue;
                }
                _ => {}
            }

            let key = self.key.load(Ordering::Relaxed);
            let mut words = [0u64; RECORD_WORDS];
            for (dst, src) in words.iter_mut().zip(&self.words) {
                *dst = src.load(Ordering::Relaxed);
            }

            fence(Ordering::Acquire);
            if self.meta.load(Ordering::Relaxed) == before {
                return SlotRead::Occupied(
                    ConnectionContext::new(key),
                    ProcessRecord::from_words(words),
                );
            }
        }
    }

    /// Claim an empty or vacant slot for a new key
    pub(super) fn try_claim(&self) -> Option<SlotWriter<'_>> {
        let current = self.meta.load(Ordering::Relaxed);
        match current & STATE_MASK {
            EMPTY | TOMBSTONE => self.acquire(current),
            _ => None,
        }
    }

    /// Lock an EMPTY slot without publishing anything in it
    pub(super) fn try_lock_empty(&self) -> Option<SlotWriter<'_>> {
        let current = self.meta.load(Ordering::Relaxed);
        (current & STATE_MASK == EMPTY)
            .then(|| self.acquire(current))
            .flatten()
    }

    /// Lock a tombstone
    pub(super) fn try_lock_vacant(&self) -> Option<SlotWriter<'_>> {
        let current = self.meta.load(Ordering::Relaxed);
        (current & STATE_MASK == TOMBSTONE)
            .then(|| self.acquire(current))
            .flatten()
    }

    /// Lock a full slot holding `key`.
    ///
    /// Callers hold the stripe lock for `key`, so no other writer can touch a
    /// slot holding it and the CAS only has to be retried on spurious failure.
    pub(super) fn lock_occupied(&self, key: ConnectionContext) -> Option<SlotWriter<'_>> {
        loop {
            let current = self.meta.load(Ordering::Relaxed);
            if current & STATE_MASK != FULL || self.key.load(Ordering::Relaxed) != key.raw() {
                return None;
            }
            if let Some(writer) = self.acquire(current) {
                return Some(writer);
            }
            hint::spin_loop();
        }
    }

    fn acquire(&self, current: u64) -> Option<SlotWriter<'_>> {
        let busy = (current & !STATE_MASK).wrapping_add(SEQ_STEP) | BUSY;
        self.meta
            .compare_exchange(current, busy, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;
        // Keep the data stores below from being reordered before the BUSY marker
        fence(Ordering::Release);
        Some(SlotWriter { slot: self, busy })
    }
}

impl SlotWriter<'_> {
    /// Store `key` and `record`, then publish the slot as full
    pub(super) fn publish(self, key: ConnectionContext, record: ProcessRecord) {
        self.slot.key.store(key.raw(), Ordering::Relaxed);
        for (dst, src) in self.slot.words.iter().zip(record.to_words()) {
            dst.store(src, Ordering::Relaxed);
        }
        self.release(FULL);
    }

    /// Replace the value, keeping the key
    pub(super) fn replace(self, record: ProcessRecord) {
        for (dst, src) in self.slot.words.iter().zip(record.to_words()) {
            dst.store(src, Ordering::Relaxed);
        }
        self.release(FULL);
    }

    /// Free the slot, leaving a tombstone so probe sequences stay intact
    pub(super) fn vacate(self) {
        self.release(TOMBSTONE);
    }

    /// Free the slot as EMPTY, ending every probe sequence that reaches it.
    ///
    /// Only valid while no live key's probe sequence runs through this slot.
    pub(super) fn clear(self) {
        self.release(EMPTY);
    }

    fn release(self, state: u64) {
        let next = (self.busy & !STATE_MASK).wrapping_add(SEQ_STEP) | state;
        self.slot.meta.store(next, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pid: u32) -> ProcessRecord {
        ProcessRecord::new(pid, 0, "test", u64::from(pid))
    }

    #[test]
    fn test_new_slot_is_empty() {
        assert_eq!(Slot::new().read(), SlotRead::Empty);
    }

    #[test]
    fn test_claim_publish_read() {
        let slot = Slot::new();
        let key = ConnectionContext::new(42);
        slot.try_claim().unwrap().publish(key, record(1));
        assert_eq!(slot.read(), SlotRead::Occupied(key, record(1)));

        // Full slots cannot be claimed
        assert!(slot.try_claim().is_none());
    }

    #[test]
    fn test_replace_and_vacate() {
        let slot = Slot::new();
        let key = ConnectionContext::new(7);
        slot.try_claim().unwrap().publish(key, record(1));

        slot.lock_occupied(key).unwrap().replace(record(2));
        assert_eq!(slot.read(), SlotRead::Occupied(key, record(2)));

        assert!(slot.lock_occupied(ConnectionContext::new(8)).is_none());

        slot.lock_occupied(key).unwrap().vacate();
        assert_eq!(slot.read(), SlotRead::Vacant);

        // Tombstones can be reused
        let other = ConnectionContext::new(9);
        slot.try_claim().unwrap().publish(other, record(3));
        assert_eq!(slot.read(), SlotRead::Occupied(other, record(3)));
    }

    #[test]
    fn test_clear_and_state_locks() {
        let slot = Slot::new();
        let key = ConnectionContext::new(3);
        assert!(slot.try_lock_vacant().is_none());

        let writer = slot.try_lock_empty().unwrap();
        assert!(slot.try_lock_empty().is_none());
        writer.clear();
        assert_eq!(slot.read(), SlotRead::Empty);

        slot.try_claim().unwrap().publish(key, record(1));
        assert!(slot.try_lock_empty().is_none());
        assert!(slot.try_lock_vacant().is_none());

        slot.lock_occupied(key).unwrap().vacate();
        assert!(slot.try_lock_empty().is_none());
        slot.try_lock_vacant().unwrap().clear();
        assert_eq!(slot.read(), SlotRead::Empty);
    }

    #[test]
    fn test_busy_slot_cannot_be_claimed_twice() {
        let slot = Slot::new();
        let writer = slot.try_claim().unwrap();
        assert!(slot.try_claim().is_none());
        writer.publish(ConnectionContext::new(1), record(1));
    }
}
