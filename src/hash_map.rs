use core::fmt::Debug;
use core::hash::Hash;
use core::ops::ControlFlow;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering;

use rand::RngCore;
use rand::rngs::SmallRng;

use crate::error::TryReserveError;
use crate::hash_table::RawTable;
use crate::hash_table::num_groups;
#[cfg(any(test, feature = "stats"))]
use crate::hash_table::DebugStats;
#[cfg(any(test, feature = "stats"))]
use crate::hash_table::ProbeStats;
use crate::hasher::Reseed;

/// A hash map implemented as a Swiss table.
///
/// `HashMap<K, V, S>` stores key-value pairs where keys implement `Hash + Eq`
/// and uses a reseedable hasher builder `S` to hash keys. Entries live in
/// 16-slot groups, each with 16 control bytes holding a 7-bit hash tag; a
/// lookup compares all 16 tags of a group at once and only touches keys
/// whose tag matches.
///
/// The map owns a small random number generator. It reseeds the hasher on
/// every rehash, and each traversal starts at a freshly drawn group, so
/// neither the slot layout nor the iteration order is stable.
///
/// # Performance Characteristics
///
/// - **Memory**: 1 control byte per slot, plus the size of `K` and `V`. Up
///   to 14 of every 16 slots are used before the table grows.
pub struct HashMap<K, V, S> {
    table: RawTable<K, V>,
    hash_builder: S,
    rng: SmallRng,
    iter_seed: u64,
    traversals: AtomicUsize,
}

const GOLDEN_GAMMA: u64 = 0x9e37_79b9_7f4a_7c15;

/// SplitMix64 finalizer.
#[inline]
fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

impl<K, V, S> HashMap<K, V, S> {
    /// Draws the start seed for one traversal.
    ///
    /// Each call takes the next step of a SplitMix64 stream keyed by
    /// `iter_seed`, so back-to-back traversals of an unchanged map start at
    /// independent groups without `&mut self`.
    #[inline]
    fn next_traversal_seed(&self) -> u64 {
        let n = self.traversals.fetch_add(1, Ordering::Relaxed) as u64;
        mix64(
            self.iter_seed
                .wrapping_add(n.wrapping_add(1).wrapping_mul(GOLDEN_GAMMA)),
        )
    }
}

impl<K, V, S> Clone for HashMap<K, V, S>
where
    K: Clone,
    V: Clone,
    S: Clone,
{
    /// Clones the entries and hasher. The clone gets its own random source,
    /// forked from this map's, so the two do not reseed in lockstep.
    fn clone(&self) -> Self {
        use rand::SeedableRng;

        let mut rng = SmallRng::seed_from_u64(self.next_traversal_seed());
        let iter_seed = rng.next_u64();
        Self {
            table: self.table.clone(),
            hash_builder: self.hash_builder.clone(),
            rng,
            iter_seed,
            traversals: AtomicUsize::new(0),
        }
    }
}

impl<K, V, S> Debug for HashMap<K, V, S>
where
    K: Debug + Hash + Eq,
    V: Debug,
    S: Reseed,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut map = f.debug_map();
        for (k, v) in self.iter() {
            map.entry(k, v);
        }
        map.finish()
    }
}

impl<K, V, S> PartialEq for HashMap<K, V, S>
where
    K: Hash + Eq,
    V: PartialEq,
    S: Reseed,
{
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K, V, S> Eq for HashMap<K, V, S>
where
    K: Hash + Eq,
    V: Eq,
    S: Reseed,
{
}

impl<K, V, S> HashMap<K, V, S>
where
    K: Hash + Eq,
    S: Reseed,
{
    /// Creates a map that holds at least `capacity` entries before growing,
    /// using `hash_builder` to hash keys and `rng` for reseeding and
    /// iteration order.
    ///
    /// This is the constructor to use without the `std` feature, or when
    /// tests need a reproducible table layout.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rand::SeedableRng;
    /// use rand::rngs::SmallRng;
    /// use swiss_table::DefaultHashBuilder;
    /// use swiss_table::HashMap;
    ///
    /// let rng = SmallRng::seed_from_u64(7);
    /// let mut map: HashMap<u32, &str, _> =
    ///     HashMap::with_capacity_hasher_and_rng(14, DefaultHashBuilder::default(), rng);
    /// assert_eq!(map.capacity(), 14);
    ///
    /// map.insert(1, "one");
    /// assert_eq!(map.len() + map.capacity(), 14);
    /// ```
    pub fn with_capacity_hasher_and_rng(capacity: usize, hash_builder: S, mut rng: SmallRng) -> Self {
        let iter_seed = rng.next_u64();
        Self {
            table: RawTable::with_capacity(capacity),
            hash_builder,
            rng,
            iter_seed,
            traversals: AtomicUsize::new(0),
        }
    }

    /// Creates an empty map with the given hasher builder and random source.
    pub fn with_hasher_and_rng(hash_builder: S, rng: SmallRng) -> Self {
        Self::with_capacity_hasher_and_rng(0, hash_builder, rng)
    }

    /// Returns the number of elements in the map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use swiss_table::DefaultHashBuilder;
    /// use swiss_table::HashMap;
    ///
    /// let mut map: HashMap<i32, &str, DefaultHashBuilder> = HashMap::new();
    /// assert_eq!(map.len(), 0);
    /// map.insert(1, "a");
    /// assert_eq!(map.len(), 1);
    /// ```
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the map contains no elements.
    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    /// Returns how many more entries can be inserted before the map rehashes.
    ///
    /// Removed entries that left a tombstone behind still count against this
    /// headroom until the next rehash reclaims them, so `len() + capacity()`
    /// only grows when the table does.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use swiss_table::DefaultHashBuilder;
    /// use swiss_table::HashMap;
    ///
    /// let mut map: HashMap<u64, u64, DefaultHashBuilder> = HashMap::with_capacity(28);
    /// assert_eq!(map.capacity(), 28);
    /// for i in 0..10 {
    ///     map.insert(i, i);
    /// }
    /// assert_eq!(map.capacity(), 18);
    /// ```
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Removes all elements from the map.
    ///
    /// This operation preserves the map's allocated capacity and clears all
    /// tombstones.
    pub fn clear(&mut self) {
        self.table.clear();
        self.iter_seed = self.rng.next_u64();
    }

    /// Reserves capacity for at least `additional` more elements.
    ///
    /// # Panics
    ///
    /// Panics if the new group count overflows `usize`.
    pub fn reserve(&mut self, additional: usize) {
        if let Err(e) = self.try_reserve(additional) {
            e.handle();
        }
    }

    /// Tries to reserve capacity for at least `additional` more elements.
    ///
    /// On error the map is left unchanged.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use swiss_table::DefaultHashBuilder;
    /// use swiss_table::HashMap;
    /// use swiss_table::TryReserveError;
    ///
    /// let mut map: HashMap<u64, u64, DefaultHashBuilder> = HashMap::new();
    /// map.try_reserve(100).unwrap();
    /// assert!(map.capacity() >= 100);
    ///
    /// assert_eq!(map.try_reserve(usize::MAX), Err(TryReserveError::CapacityOverflow));
    /// ```
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), TryReserveError> {
        if additional <= self.table.capacity() {
            return Ok(());
        }
        let required = self
            .len()
            .checked_add(additional)
            .ok_or(TryReserveError::CapacityOverflow)?;
        let groups = num_groups(required).max(self.table.group_count());
        self.rehash(groups)
    }

    /// Shrinks the map to the minimum number of groups that holds its
    /// current elements, dropping any tombstones along the way.
    pub fn shrink_to_fit(&mut self) {
        let groups = num_groups(self.len());
        if groups < self.table.group_count() || self.table.has_tombstones() {
            if let Err(e) = self.rehash(groups) {
                e.handle();
            }
        }
    }

    /// Rebuilds the table with `groups` groups under a freshly seeded hasher.
    ///
    /// The hasher is swapped in only once every entry has moved, so a failed
    /// allocation leaves both the table and the hasher as they were.
    fn rehash(&mut self, groups: usize) -> Result<(), TryReserveError> {
        let hash_builder = self.hash_builder.reseed(self.rng.next_u64());
        self.table
            .try_rehash(groups, |key| hash_builder.hash_one(key))?;
        self.hash_builder = hash_builder;
        self.iter_seed = self.rng.next_u64();
        Ok(())
    }

    #[cold]
    #[inline(never)]
    fn grow(&mut self) {
        let result = self
            .table
            .next_size()
            .ok_or(TryReserveError::CapacityOverflow)
            .and_then(|groups| self.rehash(groups));
        if let Err(e) = result {
            e.handle();
        }
    }

    /// Inserts a key-value pair into the map.
    ///
    /// If the map did not have this key present, `None` is returned.
    /// If the map did have this key present, the value is updated in place,
    /// and the old value is returned. The stored key is not replaced.
    ///
    /// The map rehashes before probing whenever the resident slot count has
    /// reached its limit, so an insert never lands in an over-full table.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use swiss_table::DefaultHashBuilder;
    /// use swiss_table::HashMap;
    ///
    /// let mut map: HashMap<i32, &str, DefaultHashBuilder> = HashMap::new();
    /// assert_eq!(map.insert(37, "a"), None);
    /// assert_eq!(map.insert(37, "b"), Some("a"));
    /// assert_eq!(map.get(&37), Some(&"b"));
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if self.table.needs_growth() {
            self.grow();
        }
        let hash = self.hash_builder.hash_one(&key);
        self.table.insert(hash, key, value)
    }

    /// Returns a reference to the value corresponding to the key.
    pub fn get(&self, key: &K) -> Option<&V> {
        let hash = self.hash_builder.hash_one(key);
        self.table.get(hash, key).map(|(_, v)| v)
    }

    /// Returns the stored key and a reference to its value.
    pub fn get_key_value(&self, key: &K) -> Option<(&K, &V)> {
        let hash = self.hash_builder.hash_one(key);
        self.table.get(hash, key)
    }

    /// Returns a mutable reference to the value corresponding to the key.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let hash = self.hash_builder.hash_one(key);
        self.table.get_mut(hash, key)
    }

    /// Returns `true` if the map contains a value for the specified key.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use swiss_table::DefaultHashBuilder;
    /// use swiss_table::HashMap;
    ///
    /// let mut map: HashMap<i32, &str, DefaultHashBuilder> = HashMap::new();
    /// map.insert(1, "a");
    /// assert!(map.contains_key(&1));
    /// assert!(!map.contains_key(&2));
    /// ```
    pub fn contains_key(&self, key: &K) -> bool {
        self.get_key_value(key).is_some()
    }

    /// Removes a key from the map, returning the value if it was present.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use swiss_table::DefaultHashBuilder;
    /// use swiss_table::HashMap;
    ///
    /// let mut map: HashMap<i32, &str, DefaultHashBuilder> = HashMap::new();
    /// map.insert(1, "a");
    /// assert_eq!(map.remove(&1), Some("a"));
    /// assert_eq!(map.remove(&1), None);
    /// ```
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.remove_entry(key).map(|(_, v)| v)
    }

    /// Removes a key from the map, returning the stored key and value if the
    /// key was present.
    pub fn remove_entry(&mut self, key: &K) -> Option<(K, V)> {
        let hash = self.hash_builder.hash_one(key);
        self.table.remove(hash, key)
    }

    /// Calls `visitor` on every entry until it returns
    /// [`ControlFlow::Break`], which is then passed back to the caller.
    ///
    /// Every call starts the walk at a newly drawn random group and wraps
    /// once around the table.
    /// Without the early exit every entry is visited exactly once, in no
    /// particular order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use core::ops::ControlFlow;
    ///
    /// use swiss_table::DefaultHashBuilder;
    /// use swiss_table::HashMap;
    ///
    /// let mut map: HashMap<u32, u32, DefaultHashBuilder> = HashMap::new();
    /// for i in 0..10 {
    ///     map.insert(i, i * i);
    /// }
    ///
    /// let found = map.iterate(|k, v| {
    ///     if *v > 50 {
    ///         ControlFlow::Break(*k)
    ///     } else {
    ///         ControlFlow::Continue(())
    ///     }
    /// });
    /// assert!(matches!(found, ControlFlow::Break(k) if k >= 8));
    /// ```
    pub fn iterate<B, F>(&self, mut visitor: F) -> ControlFlow<B>
    where
        F: FnMut(&K, &V) -> ControlFlow<B>,
    {
        self.iter().try_for_each(|(k, v)| visitor(k, v))
    }

    /// Returns an iterator over all key-value pairs in arbitrary order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.table.iter(self.next_traversal_seed()),
        }
    }

    /// Returns an iterator over all key-value pairs with mutable references
    /// to the values.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            inner: self.table.iter_mut(self.next_traversal_seed()),
        }
    }

    /// Returns an iterator over the keys of the map.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    /// Returns an iterator over the values of the map.
    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    /// Returns an iterator over mutable references to the values.
    pub fn values_mut(&mut self) -> ValuesMut<'_, K, V> {
        ValuesMut {
            inner: self.iter_mut(),
        }
    }

    /// Removes all key-value pairs, returning them as an iterator.
    ///
    /// Pairs the iterator does not yield are dropped with it. The map keeps
    /// its allocation. While the iterator is alive the map's storage is
    /// moved into it, so leaking the iterator leaves an empty map that
    /// reallocates on the next insert.
    pub fn drain(&mut self) -> Drain<'_, K, V> {
        Drain {
            inner: self.table.drain(),
        }
    }

    /// Returns a snapshot of the table's occupancy.
    ///
    /// Available with the `stats` feature.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> DebugStats {
        self.table.debug_stats()
    }

    /// Measures how many groups a lookup of each key in `keys` visits,
    /// split by whether the key was found.
    ///
    /// Available with the `stats` feature.
    #[cfg(any(test, feature = "stats"))]
    pub fn probe_stats<'a>(&self, keys: impl IntoIterator<Item = &'a K>) -> ProbeStats
    where
        K: 'a,
    {
        let stats = self.table.debug_stats();
        let mut probes = ProbeStats {
            groups: stats.groups,
            load_factor: stats.load_factor,
            ..ProbeStats::default()
        };
        for key in keys {
            let hash = self.hash_builder.hash_one(key);
            match self.table.probe_length(hash, key) {
                (length, true) => probes.present.record(length),
                (length, false) => probes.absent.record(length),
            }
        }
        probes
    }
}

#[cfg(feature = "std")]
impl<K, V, S> HashMap<K, V, S>
where
    K: Hash + Eq,
    S: Reseed,
{
    /// Creates an empty map with the given hasher builder and an OS-seeded
    /// random source.
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(0, hash_builder)
    }

    /// Creates a map that holds at least `capacity` entries before growing,
    /// with the given hasher builder and an OS-seeded random source.
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        use rand::SeedableRng;

        Self::with_capacity_hasher_and_rng(capacity, hash_builder, SmallRng::from_os_rng())
    }
}

#[cfg(feature = "std")]
impl<K, V, S> HashMap<K, V, S>
where
    K: Hash + Eq,
    S: Reseed + Default,
{
    /// Creates an empty map whose hasher is keyed from an OS-seeded random
    /// source.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use swiss_table::DefaultHashBuilder;
    /// use swiss_table::HashMap;
    ///
    /// let map: HashMap<i32, String, DefaultHashBuilder> = HashMap::new();
    /// assert!(map.is_empty());
    /// assert_eq!(map.capacity(), 14);
    /// ```
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a map that holds at least `capacity` entries before growing,
    /// with a hasher keyed from an OS-seeded random source.
    ///
    /// The capacity is rounded up to a whole number of groups.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use swiss_table::DefaultHashBuilder;
    /// use swiss_table::HashMap;
    ///
    /// let map: HashMap<i32, String, DefaultHashBuilder> = HashMap::with_capacity(100);
    /// assert_eq!(map.capacity(), 112);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        use rand::SeedableRng;

        let mut rng = SmallRng::from_os_rng();
        let hash_builder = S::default().reseed(rng.next_u64());
        Self::with_capacity_hasher_and_rng(capacity, hash_builder, rng)
    }
}

#[cfg(feature = "std")]
impl<K, V, S> Default for HashMap<K, V, S>
where
    K: Hash + Eq,
    S: Reseed + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl<K, V, S> FromIterator<(K, V)> for HashMap<K, V, S>
where
    K: Hash + Eq,
    S: Reseed + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

impl<K, V, S> Extend<(K, V)> for HashMap<K, V, S>
where
    K: Hash + Eq,
    S: Reseed,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        // Duplicate keys may shrink the final count, so only trust half the
        // hint once the map already holds entries.
        let hint = iter.size_hint().0;
        self.reserve(if self.is_empty() { hint } else { hint.div_ceil(2) });
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<'a, K, V, S> IntoIterator for &'a HashMap<K, V, S>
where
    K: Hash + Eq,
    S: Reseed,
{
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K, V, S> IntoIterator for &'a mut HashMap<K, V, S>
where
    K: Hash + Eq,
    S: Reseed,
{
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

/// An iterator over the key-value pairs of a `HashMap`.
pub struct Iter<'a, K, V> {
    inner: crate::hash_table::Iter<'a, K, V>,
}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

/// A mutable iterator over the key-value pairs of a `HashMap`.
pub struct IterMut<'a, K, V> {
    inner: crate::hash_table::IterMut<'a, K, V>,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}

/// An iterator over the keys of a `HashMap`.
pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {}

/// An iterator over the values of a `HashMap`.
pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Values<'_, K, V> {}

/// An iterator over mutable references to the values of a `HashMap`.
pub struct ValuesMut<'a, K, V> {
    inner: IterMut<'a, K, V>,
}

impl<'a, K, V> Iterator for ValuesMut<'a, K, V> {
    type Item = &'a mut V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for ValuesMut<'_, K, V> {}

/// A draining iterator over the key-value pairs of a `HashMap`.
pub struct Drain<'a, K, V> {
    inner: crate::hash_table::Drain<'a, K, V>,
}

impl<K, V> Iterator for Drain<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Drain<'_, K, V> {}
