use alloc::boxed::Box;
use alloc::vec::Vec;
use core::alloc::Layout;
use core::fmt::Debug;
use core::iter::Chain;
use core::iter::Zip;
use core::mem::MaybeUninit;
use core::slice;

use crate::control::BitMask;
use crate::control::ControlBytes;
use crate::control::EMPTY;
use crate::control::GROUP_SIZE;
use crate::control::MAX_AVG_GROUP_LOAD;
use crate::control::TOMBSTONE;
use crate::control::is_full;
use crate::control::probe_start;
use crate::control::split_hash;
use crate::error::TryReserveError;

/// Minimum number of groups that holds `capacity` resident slots without
/// crossing the load limit. Never zero, so range reduction always has a
/// non-empty target.
#[inline]
pub(crate) fn num_groups(capacity: usize) -> usize {
    capacity.div_ceil(MAX_AVG_GROUP_LOAD).max(1)
}

/// A block of 16 slots sharing one probe step.
///
/// Key and value slots are initialized exactly when the matching control
/// byte is full. `Group` has no `Drop` impl: the owning table drops live
/// slots itself, so a group that is moved or freed never double-drops.
struct Group<K, V> {
    ctrl: ControlBytes,
    keys: [MaybeUninit<K>; GROUP_SIZE],
    values: [MaybeUninit<V>; GROUP_SIZE],
}

impl<K, V> Group<K, V> {
    fn new() -> Self {
        Self {
            ctrl: ControlBytes::empty(),
            keys: [const { MaybeUninit::uninit() }; GROUP_SIZE],
            values: [const { MaybeUninit::uninit() }; GROUP_SIZE],
        }
    }

    /// Fill a free slot.
    #[inline(always)]
    fn write(&mut self, slot: usize, h2: u8, key: K, value: V) {
        debug_assert!(is_full(h2));
        debug_assert!(!is_full(self.ctrl.get(slot)));
        self.keys[slot].write(key);
        self.values[slot].write(value);
        self.ctrl.set(slot, h2);
    }

    /// # Safety
    ///
    /// The control byte at `slot` must be full.
    #[inline(always)]
    unsafe fn key(&self, slot: usize) -> &K {
        debug_assert!(is_full(self.ctrl.get(slot)));
        // SAFETY: Caller ensures the slot is full, so the key is initialized.
        unsafe { self.keys[slot].assume_init_ref() }
    }

    /// # Safety
    ///
    /// The control byte at `slot` must be full.
    #[inline(always)]
    unsafe fn value(&self, slot: usize) -> &V {
        debug_assert!(is_full(self.ctrl.get(slot)));
        // SAFETY: Caller ensures the slot is full, so the value is initialized.
        unsafe { self.values[slot].assume_init_ref() }
    }

    /// # Safety
    ///
    /// The control byte at `slot` must be full.
    #[inline(always)]
    unsafe fn value_mut(&mut self, slot: usize) -> &mut V {
        debug_assert!(is_full(self.ctrl.get(slot)));
        // SAFETY: Caller ensures the slot is full, so the value is initialized.
        unsafe { self.values[slot].assume_init_mut() }
    }

    /// Move the pair out of `slot` and mark it with `ctrl`.
    ///
    /// # Safety
    ///
    /// The control byte at `slot` must be full. `ctrl` must not be full, so
    /// the moved-out pair is never read again.
    #[inline(always)]
    unsafe fn take(&mut self, slot: usize, ctrl: u8) -> (K, V) {
        debug_assert!(is_full(self.ctrl.get(slot)));
        debug_assert!(!is_full(ctrl));
        self.ctrl.set(slot, ctrl);
        // SAFETY: The slot was full on entry, so both halves are initialized,
        // and the control byte no longer claims them.
        unsafe {
            (
                self.keys[slot].assume_init_read(),
                self.values[slot].assume_init_read(),
            )
        }
    }

    /// Drop every live pair and reset all control bytes to `EMPTY`.
    fn clear(&mut self) {
        let full = self.ctrl.match_full();
        self.ctrl = ControlBytes::empty();
        if core::mem::needs_drop::<K>() || core::mem::needs_drop::<V>() {
            for slot in full {
                // SAFETY: `slot` was full before the reset above, and the
                // reset keeps it from being dropped twice.
                unsafe {
                    self.keys[slot].assume_init_drop();
                    self.values[slot].assume_init_drop();
                }
            }
        }
    }
}

fn try_alloc_groups<K, V>(groups: usize) -> Result<Box<[Group<K, V>]>, TryReserveError> {
    let layout =
        Layout::array::<Group<K, V>>(groups).map_err(|_| TryReserveError::CapacityOverflow)?;
    let mut storage = Vec::new();
    storage
        .try_reserve_exact(groups)
        .map_err(|_| TryReserveError::AllocError { layout })?;
    storage.extend((0..groups).map(|_| Group::new()));
    Ok(storage.into_boxed_slice())
}

/// The open-addressing table behind [`HashMap`](crate::HashMap).
///
/// The table stores keys and values but never hashes them: every operation
/// takes the key's 64-bit digest from the caller, and rehashing takes a
/// hashing function. That keeps the hasher (and its reseeding) in the map.
///
/// Counters:
/// - `resident`: slots whose control byte is not `EMPTY` (live + tombstones).
/// - `dead`: tombstones.
/// - `limit`: resident slots allowed before the next rehash,
///   `groups * MAX_AVG_GROUP_LOAD`.
///
/// `resident <= limit < groups * GROUP_SIZE` always holds, so every probe
/// sequence eventually meets an `EMPTY` byte and terminates. The one table
/// with zero groups is the one left behind by a leaked [`Drain`]: it is
/// empty with a zero limit, so nothing probes it before it grows.
pub(crate) struct RawTable<K, V> {
    groups: Box<[Group<K, V>]>,
    resident: usize,
    dead: usize,
    limit: usize,
}

impl<K, V> Drop for RawTable<K, V> {
    fn drop(&mut self) {
        if !core::mem::needs_drop::<K>() && !core::mem::needs_drop::<V>() {
            return;
        }
        if self.resident == self.dead {
            return;
        }
        for group in self.groups.iter_mut() {
            group.clear();
        }
    }
}

impl<K, V> Clone for RawTable<K, V>
where
    K: Clone,
    V: Clone,
{
    fn clone(&self) -> Self {
        let mut groups = try_alloc_groups::<K, V>(self.groups.len()).unwrap_or_else(|e| e.handle());

        // A panicking `clone` leaks the pairs copied so far; `Group` has no
        // destructor, so nothing is dropped twice.
        for (src, dst) in self.groups.iter().zip(groups.iter_mut()) {
            for slot in src.ctrl.match_full() {
                // SAFETY: `match_full` only yields full slots.
                let (key, value) = unsafe { (src.key(slot).clone(), src.value(slot).clone()) };
                dst.write(slot, src.ctrl.get(slot), key, value);
            }
            for slot in src.ctrl.match_byte(TOMBSTONE) {
                dst.ctrl.set(slot, TOMBSTONE);
            }
        }

        Self {
            groups,
            resident: self.resident,
            dead: self.dead,
            limit: self.limit,
        }
    }
}

impl<K, V> Debug for RawTable<K, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RawTable")
            .field(
                "ctrl",
                &self.groups.iter().map(|g| g.ctrl).collect::<Vec<_>>(),
            )
            .field("resident", &self.resident)
            .field("dead", &self.dead)
            .field("limit", &self.limit)
            .finish()
    }
}

impl<K, V> RawTable<K, V> {
    /// Creates a table that holds `capacity` entries before growing.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self::try_with_groups(num_groups(capacity)).unwrap_or_else(|e| e.handle())
    }

    fn try_with_groups(groups: usize) -> Result<Self, TryReserveError> {
        let limit = groups
            .checked_mul(MAX_AVG_GROUP_LOAD)
            .ok_or(TryReserveError::CapacityOverflow)?;
        Ok(Self {
            groups: try_alloc_groups(groups)?,
            resident: 0,
            dead: 0,
            limit,
        })
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.resident - self.dead
    }

    /// Insertions left before the next rehash.
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.limit - self.resident
    }

    #[inline]
    pub(crate) fn group_count(&self) -> usize {
        self.groups.len()
    }

    #[inline]
    pub(crate) fn needs_growth(&self) -> bool {
        self.resident >= self.limit
    }

    #[inline]
    pub(crate) fn has_tombstones(&self) -> bool {
        self.dead > 0
    }

    /// Group count for the next rehash: double, unless at least half of the
    /// resident slots are tombstones, in which case rehashing at the same
    /// size reclaims enough room. Never zero.
    pub(crate) fn next_size(&self) -> Option<usize> {
        let groups = if self.dead >= self.resident / 2 {
            Some(self.groups.len())
        } else {
            self.groups.len().checked_mul(2)
        };
        groups.map(|g| g.max(1))
    }

    #[inline]
    fn next_group(&self, g: usize) -> usize {
        let next = g + 1;
        if next == self.groups.len() { 0 } else { next }
    }

    /// Drops every entry and resets all control bytes, keeping the
    /// allocation.
    pub(crate) fn clear(&mut self) {
        for group in self.groups.iter_mut() {
            group.clear();
        }
        self.resident = 0;
        self.dead = 0;
    }

    /// Moves every live pair into a fresh table of `groups` groups.
    ///
    /// The new storage is allocated before anything is moved; on error the
    /// table is untouched.
    pub(crate) fn try_rehash(
        &mut self,
        groups: usize,
        hasher: impl Fn(&K) -> u64,
    ) -> Result<(), TryReserveError> {
        let fresh = Self::try_with_groups(groups)?;
        debug_assert!(self.len() <= fresh.limit);

        let mut old = core::mem::replace(self, fresh);
        for group in old.groups.iter_mut() {
            for slot in group.ctrl.match_full() {
                // SAFETY: `match_full` only yields full slots. The slot is
                // marked `EMPTY` so `old`'s destructor skips it.
                let (key, value) = unsafe { group.take(slot, EMPTY) };
                self.insert_unique(hasher(&key), key, value);
            }
        }
        old.resident = 0;
        old.dead = 0;

        Ok(())
    }

    /// Places a pair known to be absent at the first free slot on its probe
    /// sequence.
    fn insert_unique(&mut self, hash: u64, key: K, value: V) {
        debug_assert!(self.resident < self.limit);
        let (h1, h2) = split_hash(hash);
        let mut g = probe_start(h1, self.groups.len());
        loop {
            if let Some(slot) = self.groups[g].ctrl.match_empty().lowest() {
                self.groups[g].write(slot, h2, key, value);
                self.resident += 1;
                return;
            }
            g = self.next_group(g);
        }
    }

    /// Returns an iterator over live entries, starting at the group selected
    /// by `seed` and wrapping once around the table.
    pub(crate) fn iter(&self, seed: u64) -> Iter<'_, K, V> {
        Iter {
            groups: &self.groups,
            start: probe_start(seed >> 7, self.groups.len()),
            step: 0,
            group: None,
            full: BitMask::new(0),
            remaining: self.len(),
        }
    }

    pub(crate) fn iter_mut(&mut self, seed: u64) -> IterMut<'_, K, V> {
        let remaining = self.len();
        let start = probe_start(seed >> 7, self.groups.len());
        let (head, tail) = self.groups.split_at_mut(start);
        IterMut {
            groups: tail.iter_mut().chain(head.iter_mut()),
            slots: None,
            remaining,
        }
    }

    /// Moves the group storage into a draining iterator.
    ///
    /// The table reads as empty with zero groups until the iterator is
    /// dropped and hands the cleared storage back. A leaked iterator leaks
    /// the storage but leaves the table consistent; the next insert grows it.
    pub(crate) fn drain(&mut self) -> Drain<'_, K, V> {
        let remaining = self.len();
        let groups = core::mem::take(&mut self.groups);
        let limit = core::mem::replace(&mut self.limit, 0);
        self.resident = 0;
        self.dead = 0;
        Drain {
            table: self,
            groups,
            limit,
            group: 0,
            full: BitMask::new(0),
            remaining,
        }
    }

    /// Counts how many groups a lookup of `key` visits, and whether it
    /// finds the key.
    #[cfg(any(test, feature = "stats"))]
    pub(crate) fn probe_length(&self, hash: u64, key: &K) -> (usize, bool)
    where
        K: Eq,
    {
        if self.groups.is_empty() {
            return (0, false);
        }
        let (h1, h2) = split_hash(hash);
        let mut g = probe_start(h1, self.groups.len());
        let mut length = 1;
        loop {
            let group = &self.groups[g];
            for slot in group.ctrl.match_byte(h2) {
                // SAFETY: The control byte equals `h2`, so the slot is full.
                if unsafe { group.key(slot) } == key {
                    return (length, true);
                }
            }
            if group.ctrl.match_empty().any() {
                return (length, false);
            }
            g = self.next_group(g);
            length += 1;
        }
    }

    /// Returns a snapshot of the table's occupancy.
    #[cfg(any(test, feature = "stats"))]
    pub(crate) fn debug_stats(&self) -> DebugStats {
        let total_slots = self.groups.len() * GROUP_SIZE;
        DebugStats {
            groups: self.groups.len(),
            total_slots,
            live: self.len(),
            resident: self.resident,
            dead: self.dead,
            limit: self.limit,
            load_factor: if total_slots == 0 {
                0.0
            } else {
                self.len() as f64 / total_slots as f64
            },
            total_bytes: core::mem::size_of_val::<[Group<K, V>]>(&self.groups),
        }
    }
}

impl<K, V> RawTable<K, V>
where
    K: Eq,
{
    /// Locates `key`, returning its `(group, slot)`.
    #[inline]
    fn find(&self, hash: u64, key: &K) -> Option<(usize, usize)> {
        if self.len() == 0 {
            return None;
        }

        let (h1, h2) = split_hash(hash);
        let mut g = probe_start(h1, self.groups.len());
        loop {
            let group = &self.groups[g];
            for slot in group.ctrl.match_byte(h2) {
                // SAFETY: The control byte equals `h2`, so the slot is full.
                if unsafe { group.key(slot) } == key {
                    return Some((g, slot));
                }
            }
            // An empty byte here means no probe for this key ever continued
            // past this group.
            if group.ctrl.match_empty().any() {
                return None;
            }
            g = self.next_group(g);
        }
    }

    #[inline]
    pub(crate) fn get(&self, hash: u64, key: &K) -> Option<(&K, &V)> {
        let (g, slot) = self.find(hash, key)?;
        let group = &self.groups[g];
        // SAFETY: `find` only returns full slots.
        Some(unsafe { (group.key(slot), group.value(slot)) })
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, hash: u64, key: &K) -> Option<&mut V> {
        let (g, slot) = self.find(hash, key)?;
        // SAFETY: `find` only returns full slots.
        Some(unsafe { self.groups[g].value_mut(slot) })
    }

    /// Inserts `key`, replacing and returning the value of an existing entry.
    ///
    /// The caller grows the table first when [`needs_growth`] is set.
    ///
    /// [`needs_growth`]: RawTable::needs_growth
    pub(crate) fn insert(&mut self, hash: u64, key: K, value: V) -> Option<V> {
        debug_assert!(self.resident < self.limit);
        let (h1, h2) = split_hash(hash);
        let mut g = probe_start(h1, self.groups.len());
        loop {
            let group = &mut self.groups[g];
            for slot in group.ctrl.match_byte(h2) {
                // SAFETY: The control byte equals `h2`, so the slot is full.
                if unsafe { group.key(slot) } == &key {
                    // SAFETY: As above.
                    let current = unsafe { group.value_mut(slot) };
                    return Some(core::mem::replace(current, value));
                }
            }
            if let Some(slot) = group.ctrl.match_empty().lowest() {
                group.write(slot, h2, key, value);
                self.resident += 1;
                return None;
            }
            g = self.next_group(g);
        }
    }

    /// Removes `key`, returning its pair.
    ///
    /// If the key's group still has an `EMPTY` byte, every probe into the
    /// group already stops there, so the slot is freed outright. Otherwise a
    /// probe for some other key may have passed through this full group,
    /// and the slot becomes a tombstone to keep that chain intact.
    pub(crate) fn remove(&mut self, hash: u64, key: &K) -> Option<(K, V)> {
        let (g, slot) = self.find(hash, key)?;
        let ctrl = if self.groups[g].ctrl.match_empty().any() {
            self.resident -= 1;
            EMPTY
        } else {
            self.dead += 1;
            TOMBSTONE
        };
        // SAFETY: `find` only returns full slots, and both markers are not
        // full.
        Some(unsafe { self.groups[g].take(slot, ctrl) })
    }
}

/// An iterator over the live entries of a [`RawTable`].
pub(crate) struct Iter<'a, K, V> {
    groups: &'a [Group<K, V>],
    start: usize,
    step: usize,
    group: Option<&'a Group<K, V>>,
    full: BitMask,
    remaining: usize,
}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Self {
            groups: self.groups,
            start: self.start,
            step: self.step,
            group: self.group,
            full: self.full,
            remaining: self.remaining,
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.remaining == 0 {
                return None;
            }

            if let Some(group) = self.group {
                if let Some(slot) = self.full.next() {
                    self.remaining -= 1;
                    // SAFETY: `full` was taken from this group's control bytes,
                    // and the shared borrow keeps them unchanged.
                    return Some(unsafe { (group.key(slot), group.value(slot)) });
                }
            }

            if self.step == self.groups.len() {
                return None;
            }
            let mut index = self.start + self.step;
            if index >= self.groups.len() {
                index -= self.groups.len();
            }
            self.step += 1;

            let group = &self.groups[index];
            self.full = group.ctrl.match_full();
            self.group = Some(group);
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

type SlotsMut<'a, K, V> = Zip<
    Zip<slice::Iter<'a, u8>, slice::Iter<'a, MaybeUninit<K>>>,
    slice::IterMut<'a, MaybeUninit<V>>,
>;

/// An iterator over the live entries of a [`RawTable`] with mutable values.
pub(crate) struct IterMut<'a, K, V> {
    groups: Chain<slice::IterMut<'a, Group<K, V>>, slice::IterMut<'a, Group<K, V>>>,
    slots: Option<SlotsMut<'a, K, V>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.remaining == 0 {
                return None;
            }

            if let Some(slots) = &mut self.slots {
                for ((&ctrl, key), value) in slots.by_ref() {
                    if is_full(ctrl) {
                        self.remaining -= 1;
                        // SAFETY: A full control byte means both halves of the
                        // slot are initialized.
                        return Some(unsafe { (key.assume_init_ref(), value.assume_init_mut()) });
                    }
                }
            }

            let group = self.groups.next()?;
            self.slots = Some(
                group
                    .ctrl
                    .as_bytes()
                    .iter()
                    .zip(group.keys.iter())
                    .zip(group.values.iter_mut()),
            );
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}

/// A draining iterator over a [`RawTable`].
///
/// Entries not yet yielded are dropped with the iterator, and the table is
/// left empty with its allocation intact. The iterator owns the group
/// storage while it is alive.
pub(crate) struct Drain<'a, K, V> {
    table: &'a mut RawTable<K, V>,
    groups: Box<[Group<K, V>]>,
    limit: usize,
    group: usize,
    full: BitMask,
    remaining: usize,
}

impl<K, V> Iterator for Drain<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.remaining == 0 {
                return None;
            }

            if let Some(slot) = self.full.next() {
                self.remaining -= 1;
                // SAFETY: `full` came from this group's control bytes, and
                // each slot is marked `EMPTY` as it is taken.
                return Some(unsafe { self.groups[self.group - 1].take(slot, EMPTY) });
            }

            if self.group == self.groups.len() {
                return None;
            }
            self.full = self.groups[self.group].ctrl.match_full();
            self.group += 1;
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Drain<'_, K, V> {}

impl<K, V> Drop for Drain<'_, K, V> {
    fn drop(&mut self) {
        for _ in &mut *self {}
        for group in self.groups.iter_mut() {
            group.clear();
        }
        self.table.groups = core::mem::take(&mut self.groups);
        self.table.limit = self.limit;
    }
}

/// Occupancy snapshot of a table.
///
/// Available with the `stats` feature.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct DebugStats {
    /// Number of groups allocated
    pub groups: usize,
    /// Total number of slots allocated
    pub total_slots: usize,
    /// Number of live entries
    pub live: usize,
    /// Slots that are not `EMPTY` (live entries plus tombstones)
    pub resident: usize,
    /// Tombstoned slots
    pub dead: usize,
    /// Resident slots allowed before the next rehash
    pub limit: usize,
    /// Live entries over total slots
    pub load_factor: f64,
    /// Bytes held by the group storage
    pub total_bytes: usize,
}

#[cfg(any(test, feature = "stats"))]
impl DebugStats {
    /// Pretty-print the debug statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Hash Table Debug Statistics ===");
        println!(
            "Groups: {} ({} slots, {} bytes)",
            self.groups, self.total_slots, self.total_bytes
        );
        println!(
            "Live: {} ({:.2}% load factor)",
            self.live,
            self.load_factor * 100.0
        );
        println!(
            "Resident: {}/{} ({} tombstones)",
            self.resident, self.limit, self.dead
        );
    }
}

/// Probe lengths, in groups visited, for a batch of lookups.
///
/// Available with the `stats` feature.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone, Default)]
pub struct ProbeStats {
    /// Groups in the table
    pub groups: usize,
    /// Live entries over total slots
    pub load_factor: f64,
    /// Lookups that found their key
    pub present: ProbeSummary,
    /// Lookups that did not
    pub absent: ProbeSummary,
}

/// Min/max/mean of one class of probe lengths.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProbeSummary {
    /// Number of lookups recorded
    pub count: usize,
    /// Shortest probe
    pub min: usize,
    /// Longest probe
    pub max: usize,
    total: usize,
}

#[cfg(any(test, feature = "stats"))]
impl ProbeSummary {
    pub(crate) fn record(&mut self, length: usize) {
        if self.count == 0 || length < self.min {
            self.min = length;
        }
        self.max = self.max.max(length);
        self.total += length;
        self.count += 1;
    }

    /// Mean probe length, or zero if nothing was recorded.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total as f64 / self.count as f64
        }
    }
}

#[cfg(any(test, feature = "stats"))]
impl ProbeStats {
    /// Pretty-print the probe statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("groups={} load={:.4}", self.groups, self.load_factor);
        for (label, s) in [("present", &self.present), ("absent", &self.absent)] {
            println!(
                "{label}(n={}): min={} max={} avg={:.4}",
                s.count,
                s.min,
                s.max,
                s.mean()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::format;
    use alloc::rc::Rc;
    use alloc::string::String;
    use alloc::string::ToString;
    use core::cell::Cell;
    use core::hash::Hasher;

    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use siphasher::sip::SipHasher;

    use super::*;

    struct HashState {
        k0: u64,
        k1: u64,
    }

    impl HashState {
        fn default() -> Self {
            let mut rng = OsRng;
            Self {
                k0: rng.try_next_u64().unwrap(),
                k1: rng.try_next_u64().unwrap(),
            }
        }

        fn build_hasher(&self) -> SipHasher {
            SipHasher::new_with_keys(self.k0, self.k1)
        }
    }

    fn hash_key(state: &HashState, key: u64) -> u64 {
        let mut h = state.build_hasher();
        h.write_u64(key);
        h.finish()
    }

    fn hash_string_key(state: &HashState, key: &str) -> u64 {
        let mut h = state.build_hasher();
        h.write(key.as_bytes());
        h.finish()
    }

    /// Digest with the given probe selector and control byte.
    fn digest(h1: u64, h2: u8) -> u64 {
        (h1 << 7) | u64::from(h2)
    }

    fn insert_growing(table: &mut RawTable<u64, u64>, state: &HashState, key: u64, value: u64) {
        if table.needs_growth() {
            let groups = table.next_size().unwrap();
            table.try_rehash(groups, |k| hash_key(state, *k)).unwrap();
        }
        table.insert(hash_key(state, key), key, value);
    }

    #[test]
    fn num_groups_rounds_up() {
        assert_eq!(num_groups(0), 1);
        assert_eq!(num_groups(1), 1);
        assert_eq!(num_groups(14), 1);
        assert_eq!(num_groups(15), 2);
        assert_eq!(num_groups(28), 2);
        assert_eq!(num_groups(29), 3);
        assert_eq!(num_groups(56), 4);
        assert_eq!(num_groups(57), 5);
    }

    #[test]
    fn zero_capacity_allocates_one_group() {
        let table: RawTable<u64, u64> = RawTable::with_capacity(0);
        assert_eq!(table.group_count(), 1);
        assert_eq!(table.capacity(), MAX_AVG_GROUP_LOAD);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn insert_and_get() {
        let state = HashState::default();
        let mut table: RawTable<u64, u64> = RawTable::with_capacity(0);
        for k in 0..256u64 {
            insert_growing(&mut table, &state, k, k * 2);
            assert_eq!(
                table.get(hash_key(&state, k), &k),
                Some((&k, &(k * 2))),
                "{:#?}",
                table
            );
        }
        assert_eq!(table.len(), 256);
        for k in 0..256u64 {
            assert_eq!(table.get(hash_key(&state, k), &k).map(|(_, v)| *v), Some(k * 2));
        }
        assert!(table.get(hash_key(&state, 999), &999).is_none());
    }

    #[test]
    fn insert_overwrites_in_place() {
        let state = HashState::default();
        let mut table: RawTable<u64, u64> = RawTable::with_capacity(4);
        assert_eq!(table.insert(hash_key(&state, 7), 7, 1), None);
        let resident = table.resident;
        assert_eq!(table.insert(hash_key(&state, 7), 7, 2), Some(1));
        assert_eq!(table.resident, resident);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(hash_key(&state, 7), &7), Some((&7, &2)));
    }

    #[test]
    fn h2_collisions_never_false_positive() {
        // Every key shares the same start group and control byte, so only
        // the full key comparison separates them.
        let mut table: RawTable<u64, u64> = RawTable::with_capacity(28);
        let hash = digest(0, 0x2a);
        for k in 0..10u64 {
            table.insert(hash, k, k + 100);
        }
        for k in 0..10u64 {
            assert_eq!(table.get(hash, &k), Some((&k, &(k + 100))));
        }
        for k in 10..64u64 {
            assert!(table.get(hash, &k).is_none());
        }
    }

    #[test]
    fn remove_from_group_with_empty_frees_slot() {
        let mut table: RawTable<u64, u64> = RawTable::with_capacity(14);
        for k in 0..4u64 {
            table.insert(digest(0, k as u8), k, k);
        }
        assert_eq!(table.remove(digest(0, 1), &1), Some((1, 1)));
        assert_eq!(table.resident, 3);
        assert_eq!(table.dead, 0);
        assert_eq!(table.groups[0].ctrl.get(1), EMPTY);
        assert_eq!(table.len(), 3);

        // The freed slot is the lowest empty one and gets reused.
        table.insert(digest(0, 9), 9, 9);
        assert_eq!(table.groups[0].ctrl.get(1), 9);
    }

    #[test]
    fn remove_from_full_group_leaves_tombstone() {
        let mut table: RawTable<u64, u64> = RawTable::with_capacity(28);
        assert_eq!(table.group_count(), 2);

        // Seventeen keys that all start probing at group 0: sixteen fill it,
        // the last spills into group 1.
        for k in 0..17u64 {
            table.insert(digest(0, k as u8), k, k * 10);
        }
        assert!(!table.groups[0].ctrl.match_empty().any());
        assert_eq!(table.resident, 17);

        assert_eq!(table.remove(digest(0, 3), &3), Some((3, 30)));
        assert_eq!(table.groups[0].ctrl.get(3), TOMBSTONE);
        assert_eq!(table.resident, 17);
        assert_eq!(table.dead, 1);
        assert_eq!(table.len(), 16);
        assert_eq!(table.capacity(), 28 - 17);

        // The spilled key is still reachable past the tombstoned group.
        assert_eq!(table.get(digest(0, 16), &16), Some((&16, &160)));
        for k in (0..17u64).filter(|&k| k != 3) {
            assert!(table.get(digest(0, k as u8), &k).is_some(), "{k}: {table:#?}");
        }
        assert!(table.get(digest(0, 3), &3).is_none());
    }

    #[test]
    fn tombstones_force_compaction_rehash() {
        let mut table: RawTable<u64, u64> = RawTable::with_capacity(28);
        for k in 0..28u64 {
            table.insert(digest(0, (k % 128) as u8), k, k);
        }
        assert!(table.needs_growth());
        for k in 0..14u64 {
            assert!(table.remove(digest(0, k as u8), &k).is_some());
        }
        assert_eq!(table.dead, 14);
        assert!(table.needs_growth());
        assert_eq!(table.next_size(), Some(2));

        table.try_rehash(2, |k| digest(0, (*k % 128) as u8)).unwrap();
        assert_eq!(table.group_count(), 2);
        assert_eq!(table.dead, 0);
        assert_eq!(table.resident, 14);
        for k in 14..28u64 {
            assert_eq!(table.get(digest(0, k as u8), &k), Some((&k, &k)));
        }
    }

    #[test]
    fn growth_doubles_without_tombstones() {
        let state = HashState::default();
        let mut table: RawTable<u64, u64> = RawTable::with_capacity(14);
        for k in 0..14u64 {
            insert_growing(&mut table, &state, k, k);
        }
        assert_eq!(table.group_count(), 1);
        assert_eq!(table.capacity(), 0);
        assert_eq!(table.next_size(), Some(2));

        insert_growing(&mut table, &state, 14, 14);
        assert_eq!(table.group_count(), 2);
        assert_eq!(table.len(), 15);
        assert_eq!(table.capacity(), 28 - 15);
    }

    #[test]
    fn next_size_compacts_from_half_tombstones() {
        let mut table: RawTable<u64, u64> = RawTable::with_capacity(28);
        for k in 0..20u64 {
            table.insert(digest(0, k as u8), k, k);
        }
        // Keys 0..16 fill group 0, so each removal there leaves a tombstone.
        for k in 0..9u64 {
            table.remove(digest(0, k as u8), &k);
        }
        assert_eq!((table.resident, table.dead), (20, 9));
        assert_eq!(table.next_size(), Some(4));

        table.remove(digest(0, 9), &9);
        assert_eq!((table.resident, table.dead), (20, 10));
        assert_eq!(table.next_size(), Some(2));
    }

    #[test]
    fn string_keys() {
        let state = HashState::default();
        let mut table: RawTable<String, usize> = RawTable::with_capacity(0);
        let keys = ["apple", "banana", "cherry", "date", "elderberry"];
        for (i, key) in keys.iter().enumerate() {
            table.insert(hash_string_key(&state, key), key.to_string(), i);
        }
        for (i, key) in keys.iter().enumerate() {
            let (k, v) = table.get(hash_string_key(&state, key), &key.to_string()).unwrap();
            assert_eq!(k, key);
            assert_eq!(*v, i);
        }
        let removed = table.remove(hash_string_key(&state, "banana"), &"banana".to_string());
        assert_eq!(removed, Some(("banana".to_string(), 1)));
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn iter_visits_each_entry_once_from_any_start() {
        let state = HashState::default();
        let mut table: RawTable<u64, u64> = RawTable::with_capacity(0);
        for k in 0..200u64 {
            insert_growing(&mut table, &state, k, k);
        }
        for k in (0..200u64).step_by(3) {
            table.remove(hash_key(&state, k), &k);
        }

        for seed in [0u64, 1 << 40, u64::MAX, 0x1234_5678_9abc_def0] {
            let mut seen = alloc::vec![0u32; 200];
            let iter = table.iter(seed);
            assert_eq!(iter.len(), table.len());
            for (k, v) in iter {
                assert_eq!(k, v);
                seen[*k as usize] += 1;
            }
            for (k, count) in seen.iter().enumerate() {
                let expected = if k % 3 == 0 { 0 } else { 1 };
                assert_eq!(*count, expected, "key {k} with seed {seed:x}");
            }
        }
    }

    #[test]
    fn iter_mut_updates_values() {
        let state = HashState::default();
        let mut table: RawTable<u64, u64> = RawTable::with_capacity(0);
        for k in 0..100u64 {
            insert_growing(&mut table, &state, k, k);
        }
        let mut visited = 0;
        for (k, v) in table.iter_mut(42) {
            assert_eq!(k, v);
            *v += 1000;
            visited += 1;
        }
        assert_eq!(visited, 100);
        for k in 0..100u64 {
            assert_eq!(table.get(hash_key(&state, k), &k).map(|(_, v)| *v), Some(k + 1000));
        }
    }

    #[test]
    fn drain_empties_table() {
        let state = HashState::default();
        let mut table: RawTable<u64, u64> = RawTable::with_capacity(0);
        for k in 0..50u64 {
            insert_growing(&mut table, &state, k, k);
        }
        table.remove(hash_key(&state, 0), &0);

        let mut drained: Vec<u64> = table.drain().map(|(k, _)| k).collect();
        drained.sort_unstable();
        assert_eq!(drained, (1..50).collect::<Vec<_>>());
        assert_eq!(table.len(), 0);
        assert_eq!(table.resident, 0);
        assert_eq!(table.dead, 0);
        assert!(table.get(hash_key(&state, 5), &5).is_none());
    }

    #[test]
    fn partial_drain_drops_the_rest() {
        let drops = Rc::new(Cell::new(0));
        struct Counted(Rc<Cell<usize>>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let mut table: RawTable<u64, Counted> = RawTable::with_capacity(20);
        for k in 0..20u64 {
            table.insert(digest(k, k as u8), k, Counted(drops.clone()));
        }
        {
            let mut drain = table.drain();
            drop(drain.next());
            drop(drain.next());
        }
        assert_eq!(drops.get(), 20);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn leaked_drain_leaves_consistent_empty_table() {
        let state = HashState::default();
        let mut table: RawTable<u64, u64> = RawTable::with_capacity(0);
        for k in 0..50u64 {
            insert_growing(&mut table, &state, k, k);
        }

        let mut drain = table.drain();
        assert!(drain.next().is_some());
        assert!(drain.next().is_some());
        core::mem::forget(drain);

        assert_eq!(table.len(), 0);
        assert_eq!(table.capacity(), 0);
        assert_eq!(table.group_count(), 0);
        assert!(table.needs_growth());
        assert!(table.get(hash_key(&state, 7), &7).is_none());
        assert_eq!(table.iter(3).count(), 0);
        assert_eq!(table.probe_length(hash_key(&state, 7), &7), (0, false));

        insert_growing(&mut table, &state, 7, 70);
        assert_eq!(table.group_count(), 1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(hash_key(&state, 7), &7), Some((&7, &70)));
    }

    #[test]
    fn drain_restores_storage_when_dropped() {
        let mut table: RawTable<u64, u64> = RawTable::with_capacity(28);
        for k in 0..20u64 {
            table.insert(digest(0, k as u8), k, k);
        }
        table.remove(digest(0, 0), &0);
        {
            let mut drain = table.drain();
            assert_eq!(drain.len(), 19);
            drain.next();
        }
        assert_eq!(table.group_count(), 2);
        assert_eq!(table.capacity(), 28);
        assert_eq!(table.dead, 0);
        assert!(table.groups.iter().all(|g| g.ctrl.match_empty().count() == GROUP_SIZE));
    }

    #[test]
    fn drop_and_clear_drop_live_values_once() {
        let drops = Rc::new(Cell::new(0));
        struct Counted(Rc<Cell<usize>>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let mut table: RawTable<u64, Counted> = RawTable::with_capacity(28);
        for k in 0..20u64 {
            table.insert(digest(0, k as u8), k, Counted(drops.clone()));
        }
        // Tombstoned removal hands the value back to the caller.
        drop(table.remove(digest(0, 0), &0));
        assert_eq!(drops.get(), 1);

        table.clear();
        assert_eq!(drops.get(), 20);
        assert_eq!(table.len(), 0);
        assert_eq!(table.capacity(), 28);

        for k in 0..5u64 {
            table.insert(digest(k, 1), k, Counted(drops.clone()));
        }
        drop(table);
        assert_eq!(drops.get(), 25);
    }

    #[test]
    fn clone_preserves_layout() {
        let mut table: RawTable<u64, String> = RawTable::with_capacity(28);
        for k in 0..17u64 {
            table.insert(digest(0, k as u8), k, format!("v{k}"));
        }
        table.remove(digest(0, 5), &5);

        let cloned = table.clone();
        assert_eq!(cloned.resident, table.resident);
        assert_eq!(cloned.dead, table.dead);
        assert_eq!(cloned.limit, table.limit);
        for (a, b) in table.groups.iter().zip(cloned.groups.iter()) {
            assert_eq!(a.ctrl, b.ctrl);
        }
        for k in (0..17u64).filter(|&k| k != 5) {
            assert_eq!(
                cloned.get(digest(0, k as u8), &k).map(|(_, v)| v.clone()),
                Some(format!("v{k}"))
            );
        }
    }

    #[test]
    fn probe_length_counts_groups() {
        let mut table: RawTable<u64, u64> = RawTable::with_capacity(28);
        for k in 0..17u64 {
            table.insert(digest(0, k as u8), k, k);
        }
        assert_eq!(table.probe_length(digest(0, 0), &0), (1, true));
        assert_eq!(table.probe_length(digest(0, 16), &16), (2, true));
        assert_eq!(table.probe_length(digest(0, 99), &99), (2, false));

        let stats = table.debug_stats();
        assert_eq!(stats.groups, 2);
        assert_eq!(stats.total_slots, 32);
        assert_eq!(stats.live, 17);
        assert_eq!(stats.limit, 28);
    }

    #[test]
    fn probe_summary_tracks_extremes() {
        let mut summary = ProbeSummary::default();
        assert_eq!(summary.mean(), 0.0);
        for length in [3, 1, 2] {
            summary.record(length);
        }
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min, 1);
        assert_eq!(summary.max, 3);
        assert_eq!(summary.mean(), 2.0);
    }
}
