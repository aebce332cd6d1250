//! Connection Table
//!
//! Bounded concurrent map from `ConnectionContext` to `ProcessRecord`.
//!
//! Slots are allocated once, at construction, in an open-addressed array with
//! linear probing. Readers are lock-free and never observe a torn record.
//! Writers for the same key are serialized through a striped spin lock, while
//! writers for different keys only meet on the CAS that claims a free slot.
//! The live-entry count is reserved with a CAS loop before a new key may claim
//! a slot, which gives a hard capacity ceiling without evicting anything.
//!
//! A freed slot becomes EMPTY again when the slot after it is EMPTY, taking
//! the run of tombstones before it along, so churn does not leave the array
//! full of tombstones. Every slot between a live key's home slot and the key
//! itself stays non-EMPTY for as long as the key lives: a slot is only cleared
//! while the next slot is locked in the EMPTY state, and a new key re-checks
//! its run after publishing and moves back into any slot cleared under it.

mod slot;
mod stripe;

use crate::config::TableConfig;
use crate::record::{ConnectionContext, ProcessRecord};
use slot::{Slot, SlotRead};
use std::sync::atomic::{AtomicUsize, Ordering};
use stripe::StripeLock;
use tracing::warn;

/// Errors returned by table mutations
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// A new key was inserted while the table was full; nothing was changed
    #[error("connection table is full ({capacity} entries)")]
    CapacityExceeded { capacity: usize },
}

/// What a successful `insert_or_replace` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The key was absent and a new entry was created
    Inserted,
    /// The key was present; holds the record that was overwritten
    Replaced(ProcessRecord),
}

/// Fixed-capacity concurrent connection table
pub struct ConnectionTable {
    slots: Box<[Slot]>,
    slot_mask: usize,
    stripes: Box<[StripeLock]>,
    stripe_mask: usize,
    capacity: usize,
    len: AtomicUsize,
}

impl ConnectionTable {
    pub const DEFAULT_CAPACITY: usize = 10_000;
    pub const DEFAULT_STRIPES: usize = 64;
    /// Larger capacities are clamped to this
    pub const MAX_CAPACITY: usize = 1 << 30;

    /// Create a table holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self::with_stripes(capacity, Self::DEFAULT_STRIPES)
    }

    /// Create a table with an explicit number of writer stripes.
    ///
    /// `stripes` is rounded up to a power of two.
    pub fn with_stripes(capacity: usize, stripes: usize) -> Self {
        if capacity > Self::MAX_CAPACITY {
            warn!(
                requested = capacity,
                max = Self::MAX_CAPACITY,
                "Connection table capacity clamped"
            );
        }
        let capacity = capacity.min(Self::MAX_CAPACITY);
        let slot_count = Self::slot_count(capacity);
        let stripe_count = stripes.max(1).next_power_of_two();

        Self {
            slots: (0..slot_count).map(|_| Slot::new()).collect(),
            slot_mask: slot_count - 1,
            stripes: (0..stripe_count).map(|_| StripeLock::default()).collect(),
            stripe_mask: stripe_count - 1,
            capacity,
            len: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &TableConfig) -> Self {
        Self::with_stripes(config.capacity, config.stripes)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Associate `record` with `context`.
    ///
    /// A present key is overwritten regardless of how full the table is. An
    /// absent key is rejected with `CapacityExceeded` once the table holds
    /// `capacity` entries, leaving the table unchanged.
    pub fn insert_or_replace(
        &self,
        context: ConnectionContext,
        record: ProcessRecord,
    ) -> Result<InsertOutcome, TableError> {
        let hash = mix(context.raw());
        let _guard = self.stripe(hash).lock();

        if let Some((index, previous)) = self.find(context, hash) {
            if let Some(writer) = self.slots[index].lock_occupied(context) {
                writer.replace(record);
                return Ok(InsertOutcome::Replaced(previous));
            }
        }

        self.reserve()?;
        self.claim(context, hash, record);
        Ok(InsertOutcome::Inserted)
    }

    /// Remove the entry for `context`, returning its record.
    ///
    /// Absent keys are a no-op and return `None`.
    pub fn remove(&self, context: ConnectionContext) -> Option<ProcessRecord> {
        let hash = mix(context.raw());
        let _guard = self.stripe(hash).lock();

        let (index, record) = self.find(context, hash)?;
        let writer = self.slots[index].lock_occupied(context)?;
        self.free(index, writer);
        self.len.fetch_sub(1, Ordering::AcqRel);
        Some(record)
    }

    /// Copy of the record currently stored for `context`
    pub fn lookup(&self, context: ConnectionContext) -> Option<ProcessRecord> {
        self.find(context, mix(context.raw()))
            .map(|(_, record)| record)
    }

    pub fn contains(&self, context: ConnectionContext) -> bool {
        self.lookup(context).is_some()
    }

    /// Walk all live entries.
    ///
    /// Each yielded entry is consistent. Entries inserted or removed while the
    /// walk is in progress may or may not show up.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            slots: &self.slots,
            position: 0,
        }
    }

    /// At most half the slots are ever live, keeping probe runs short
    fn slot_count(capacity: usize) -> usize {
        capacity
            .min(Self::MAX_CAPACITY)
            .saturating_mul(2)
            .max(8)
            .next_power_of_two()
    }

    fn stripe(&self, hash: u64) -> &StripeLock {
        &self.stripes[(hash >> 32) as usize & self.stripe_mask]
    }

    fn probe(&self, hash: u64) -> impl Iterator<Item = usize> + '_ {
        let home = hash as usize;
        (0..self.slots.len()).map(move |step| home.wrapping_add(step) & self.slot_mask)
    }

    fn find(&self, context: ConnectionContext, hash: u64) -> Option<(usize, ProcessRecord)> {
        for index in self.probe(hash) {
            match self.slots[index].read() {
                SlotRead::Empty => return None,
                SlotRead::Occupied(key, record) if key == context => return Some((index, record)),
                _ => {}
            }
        }
        None
    }

    /// Reserve room for one more entry
    fn reserve(&self) -> Result<(), TableError> {
        let mut current = self.len.load(Ordering::Relaxed);
        loop {
            if current >= self.capacity {
                return Err(TableError::CapacityExceeded {
                    capacity: self.capacity,
                });
            }
            match self.len.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Publish a new key in the first free slot along its probe sequence.
    ///
    /// Requires a successful `reserve`: reserved entries never exceed
    /// `capacity`, which is below the slot count, so a free slot always
    /// exists. A pass can still come up empty when concurrent claimers win
    /// every slot it tried; the next pass sees the new tombstones.
    ///
    /// Slots passed over on the way may have been cleared to EMPTY since, which
    /// would hide the key from lookups. After publishing, the run back to the
    /// home slot is walked again and the key moves into any EMPTY slot found.
    /// Each slot that checks out non-EMPTY stays that way while the key lives.
    fn claim(&self, context: ConnectionContext, hash: u64, record: ProcessRecord) {
        let home = hash as usize & self.slot_mask;
        let (mut index, writer) = self.claim_free(hash);
        writer.publish(context, record);

        let mut cursor = index;
        while cursor != home {
            cursor = cursor.wrapping_sub(1) & self.slot_mask;
            if self.slots[cursor].read() != SlotRead::Empty {
                continue;
            }
            match self.slots[cursor].try_claim() {
                Some(target) => {
                    // Readers wait on the locked target, so the key is never missed
                    if let Some(previous) = self.slots[index].lock_occupied(context) {
                        self.free(index, previous);
                    }
                    target.publish(context, record);
                    index = cursor;
                }
                // Lost a race for the slot; look at it again
                None => cursor = (cursor + 1) & self.slot_mask,
            }
        }
    }

    fn claim_free(&self, hash: u64) -> (usize, slot::SlotWriter<'_>) {
        loop {
            for index in self.probe(hash) {
                if let Some(writer) = self.slots[index].try_claim() {
                    return (index, writer);
                }
            }
            std::hint::spin_loop();
        }
    }

    /// Release the locked slot at `index`.
    ///
    /// It becomes EMPTY when the next slot is EMPTY, and the tombstones
    /// directly before it are cleared too. Otherwise it stays a tombstone.
    fn free(&self, index: usize, writer: slot::SlotWriter<'_>) {
        let next = (index + 1) & self.slot_mask;
        let Some(next_guard) = self.slots[next].try_lock_empty() else {
            writer.vacate();
            return;
        };
        writer.clear();
        next_guard.clear();

        let mut cursor = index;
        for _ in 1..self.slots.len() {
            let prev = cursor.wrapping_sub(1) & self.slot_mask;
            let Some(prev_guard) = self.slots[prev].try_lock_vacant() else {
                break;
            };
            let Some(cursor_guard) = self.slots[cursor].try_lock_empty() else {
                prev_guard.vacate();
                break;
            };
            prev_guard.clear();
            cursor_guard.clear();
            cursor = prev;
        }
    }
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for ConnectionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTable")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("slots", &self.slots.len())
            .field("stripes", &self.stripes.len())
            .finish()
    }
}

impl<'a> IntoIterator for &'a ConnectionTable {
    type Item = (ConnectionContext, ProcessRecord);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy walk over a `ConnectionTable`
pub struct Iter<'a> {
    slots: &'a [Slot],
    position: usize,
}

impl Iterator for Iter<'_> {
    type Item = (ConnectionContext, ProcessRecord);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(slot) = self.slots.get(self.position) {
            self.position += 1;
            if let SlotRead::Occupied(key, record) = slot.read() {
                return Some((key, record));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.slots.len() - self.position))
    }
}

/// splitmix64 finalizer
fn mix(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}
