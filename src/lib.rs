#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

/// Control bytes and the 16-wide group matchers.
///
/// Each group carries one control byte per slot: `EMPTY`, `TOMBSTONE`, or a
/// full byte holding the low seven bits of the key's hash. The matchers turn
/// a group's control bytes into a bitmask of candidate slots.
pub mod control;

mod error;

mod hash_table;

/// A HashMap implementation using Swiss-table probing.
///
/// This module provides a `HashMap` that stores entries in 16-slot groups
/// and filters candidates with one control-byte comparison per group.
pub mod hash_map;

mod hash_map_proptest;

/// Hasher builders the map can rekey on rehash.
pub mod hasher;

pub use error::TryReserveError;
pub use hash_map::HashMap;
#[cfg(feature = "stats")]
pub use hash_table::DebugStats;
#[cfg(feature = "stats")]
pub use hash_table::ProbeStats;
#[cfg(feature = "stats")]
pub use hash_table::ProbeSummary;
#[cfg(feature = "foldhash")]
pub use hasher::DefaultHashBuilder;
pub use hasher::Reseed;
