use core::hash::BuildHasher;

/// A [`BuildHasher`] that can produce an independently keyed copy of itself.
///
/// The map calls [`reseed`](Reseed::reseed) on every rehash with a fresh
/// random `seed`, so keys that clustered under the old seed are scattered
/// under the new one. For a fixed seed the returned builder must hash
/// deterministically.
pub trait Reseed: BuildHasher + Sized {
    /// Returns a builder keyed by `seed`.
    fn reseed(&self, seed: u64) -> Self;
}

/// The hasher builder used when none is specified: `foldhash`'s fast
/// variant, keyed per table.
#[cfg(feature = "foldhash")]
pub type DefaultHashBuilder = foldhash::fast::FixedState;

#[cfg(feature = "foldhash")]
impl Reseed for foldhash::fast::FixedState {
    #[inline]
    fn reseed(&self, seed: u64) -> Self {
        foldhash::fast::FixedState::with_seed(seed)
    }
}

#[cfg(feature = "foldhash")]
impl Reseed for foldhash::quality::FixedState {
    #[inline]
    fn reseed(&self, seed: u64) -> Self {
        foldhash::quality::FixedState::with_seed(seed)
    }
}
