use core::fmt::Debug;

/// Number of slots in a group. Every probe step covers one group, and the
/// matcher compares all of its control bytes at once. If you change this,
/// you'll need to update the SSE2 matcher and `BitMask`, which assume 16
/// lanes.
pub const GROUP_SIZE: usize = 16;

/// Maximum average number of resident slots per group before the table
/// grows, i.e. a load factor of 14/16 = 0.875.
pub const MAX_AVG_GROUP_LOAD: usize = 14;

/// Control byte marking a slot that has never held a value since the last
/// rehash or clear.
///
/// Chosen as 0x80 (sign bit set, all other bits clear) so it can never equal
/// a 7-bit `h2`, and so SSE2 `movemask` separates occupied slots from both
/// sentinels in a single instruction.
pub const EMPTY: u8 = 0b1000_0000;

/// Control byte marking a deleted slot that must not terminate a probe.
pub const TOMBSTONE: u8 = 0b1111_1110;

const H1_BITS: u32 = 57;
const H2_MASK: u64 = 0x7f;

/// Splits a 64-bit digest into its 57-bit probe selector (`h1`) and its 7-bit
/// control byte (`h2`).
#[inline(always)]
pub fn split_hash(hash: u64) -> (u64, u8) {
    (hash >> 7, (hash & H2_MASK) as u8)
}

/// Maps `h1` onto `[0, groups)` with a multiply-high range reduction.
///
/// `h1` carries 57 significant bits, so the product fits in 128 bits and the
/// high part after shifting out those 57 bits is strictly below `groups`.
#[inline(always)]
pub fn probe_start(h1: u64, groups: usize) -> usize {
    debug_assert!(h1 >> H1_BITS == 0);
    ((h1 as u128 * groups as u128) >> H1_BITS) as usize
}

/// Returns `true` if `byte` is an `h2` value rather than a sentinel.
#[inline(always)]
pub fn is_full(byte: u8) -> bool {
    byte & EMPTY == 0
}

/// The 16 control bytes of a group.
///
/// Aligned to 16 bytes so the SSE2 matcher can use aligned loads.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(C, align(16))]
pub struct ControlBytes {
    bytes: [u8; GROUP_SIZE],
}

impl ControlBytes {
    /// Wraps raw control bytes.
    pub const fn new(bytes: [u8; GROUP_SIZE]) -> Self {
        Self { bytes }
    }

    /// A group with every slot `EMPTY`.
    pub const fn empty() -> Self {
        Self {
            bytes: [EMPTY; GROUP_SIZE],
        }
    }

    /// Returns the raw control bytes.
    pub fn as_bytes(&self) -> &[u8; GROUP_SIZE] {
        &self.bytes
    }

    #[inline(always)]
    pub(crate) fn get(&self, index: usize) -> u8 {
        self.bytes[index]
    }

    #[inline(always)]
    pub(crate) fn set(&mut self, index: usize, byte: u8) {
        self.bytes[index] = byte;
    }

    /// Slots whose control byte equals `byte`, using the active matcher.
    #[inline(always)]
    pub fn match_byte(&self, byte: u8) -> BitMask {
        Active::match_byte(self, byte)
    }

    /// Slots that are `EMPTY`, using the active matcher.
    #[inline(always)]
    pub fn match_empty(&self) -> BitMask {
        Active::match_empty(self)
    }

    /// Slots holding a live value, using the active matcher.
    #[inline(always)]
    pub fn match_full(&self) -> BitMask {
        Active::match_full(self)
    }
}

impl Debug for ControlBytes {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut list = f.debug_list();
        for &byte in &self.bytes {
            match byte {
                EMPTY => list.entry(&format_args!("..")),
                TOMBSTONE => list.entry(&format_args!("xx")),
                h2 => list.entry(&format_args!("{h2:02x}")),
            };
        }
        list.finish()
    }
}

/// A 16-bit set of slot indexes within a group.
///
/// Iterating yields set bits from the lowest index upwards, clearing each
/// one as it is produced.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BitMask(u16);

impl BitMask {
    /// Wraps a raw mask; bit `i` stands for slot `i`.
    #[inline(always)]
    pub const fn new(bits: u16) -> Self {
        Self(bits)
    }

    /// Returns the raw mask.
    #[inline(always)]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Returns `true` if any slot is set.
    #[inline(always)]
    pub const fn any(self) -> bool {
        self.0 != 0
    }

    /// Index of the lowest set slot, if any.
    #[inline(always)]
    pub fn lowest(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize)
        }
    }
}

impl Iterator for BitMask {
    type Item = usize;

    #[inline(always)]
    fn next(&mut self) -> Option<usize> {
        let index = self.lowest()?;
        self.0 &= self.0 - 1;
        Some(index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.0.count_ones() as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for BitMask {}

/// A 16-way parallel byte comparison over a group's control bytes.
///
/// Every implementation must produce bit-identical masks; [`Portable`] is the
/// reference.
pub trait Matcher {
    /// Bit `i` is set iff `ctrl[i] == byte`.
    fn match_byte(ctrl: &ControlBytes, byte: u8) -> BitMask;

    /// Bit `i` is set iff `ctrl[i]` is neither `EMPTY` nor `TOMBSTONE`.
    fn match_full(ctrl: &ControlBytes) -> BitMask;

    /// Bit `i` is set iff `ctrl[i] == EMPTY`.
    #[inline(always)]
    fn match_empty(ctrl: &ControlBytes) -> BitMask {
        Self::match_byte(ctrl, EMPTY)
    }
}

/// Scalar matcher, available on every target.
pub struct Portable;

impl Matcher for Portable {
    #[inline(always)]
    fn match_byte(ctrl: &ControlBytes, byte: u8) -> BitMask {
        let mut bits: u16 = 0;
        for (i, &b) in ctrl.bytes.iter().enumerate() {
            bits |= u16::from(b == byte) << i;
        }
        BitMask(bits)
    }

    #[inline(always)]
    fn match_full(ctrl: &ControlBytes) -> BitMask {
        let mut bits: u16 = 0;
        for (i, &b) in ctrl.bytes.iter().enumerate() {
            bits |= u16::from(is_full(b)) << i;
        }
        BitMask(bits)
    }
}

/// SSE2 matcher: one compare and one `movemask` per group.
#[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
pub struct Sse2;

#[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
impl Matcher for Sse2 {
    #[inline(always)]
    fn match_byte(ctrl: &ControlBytes, byte: u8) -> BitMask {
        use core::arch::x86_64::*;
        // SAFETY: `ControlBytes` is `#[repr(C, align(16))]` with `bytes` at
        // offset 0, so the pointer is valid for an aligned 16-byte load.
        unsafe {
            let data = _mm_load_si128(ctrl.bytes.as_ptr() as *const __m128i);
            let cmp = _mm_cmpeq_epi8(data, _mm_set1_epi8(byte as i8));
            BitMask(_mm_movemask_epi8(cmp) as u16)
        }
    }

    #[inline(always)]
    fn match_full(ctrl: &ControlBytes) -> BitMask {
        use core::arch::x86_64::*;
        // SAFETY: See `match_byte`. Both sentinels have the sign bit set and
        // `h2` values never do, so the inverted sign mask marks live slots.
        unsafe {
            let data = _mm_load_si128(ctrl.bytes.as_ptr() as *const __m128i);
            BitMask(!(_mm_movemask_epi8(data) as u16))
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "x86_64", target_feature = "sse2", not(feature = "portable")))] {
        /// The matcher the table uses on this build.
        pub type Active = Sse2;
    } else {
        /// The matcher the table uses on this build.
        pub type Active = Portable;
    }
}
