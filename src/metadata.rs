//! Per-slot metadata bytes and the probe rider that walks them.
//!
//! Every slot of a [`HashTable`](crate::HashTable) owns one metadata byte.
//! The byte is either [`EMPTY`], [`DELETED`] (a tombstone), or a 7-bit
//! fingerprint of the stored value's hash shifted into `1..=128` so that a
//! single byte compare classifies the slot.

/// Marks a slot that has not been occupied since the last rehash. Probes for
/// a key stop here.
pub const EMPTY: u8 = 0x00;

/// Marks a slot whose value was removed. Probes for a key continue past it,
/// insertions may reuse it.
pub const DELETED: u8 = 0xFF;

/// Computes the fingerprint stored for a value with the given hash.
///
/// The result is always in `1..=128`, so it can never be mistaken for
/// [`EMPTY`] or [`DELETED`].
#[inline(always)]
pub fn fingerprint(hash: u64) -> u8 {
    (hash & 0x7F) as u8 + 1
}

/// Returns `true` if the byte holds a fingerprint, i.e. the slot is live.
#[inline(always)]
pub fn is_full(byte: u8) -> bool {
    byte != EMPTY && byte != DELETED
}

bitflags::bitflags! {
    /// The set of slot categories a [`Rider`] stops at.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Mode: u8 {
        /// Stop at empty slots.
        const EMPTY = 0b0001;
        /// Stop at full slots whose fingerprint matches the probed hash.
        const MATCH = 0b0010;
        /// Stop at every full slot.
        const FULL = 0b0100;
        /// Stop at tombstones.
        const DELETED = 0b1000;

        /// Lookup of an existing key.
        const FIND = Self::EMPTY.bits() | Self::MATCH.bits();
        /// Lookup that also reports tombstones so insertion can reuse them.
        const FIND_FOR_INSERT = Self::EMPTY.bits() | Self::DELETED.bits() | Self::MATCH.bits();
        /// Placement of a value known not to be present.
        const VACANT = Self::EMPTY.bits() | Self::DELETED.bits();
        /// Walk over live slots, used by iterators.
        const WALK = Self::FULL.bits();
    }
}

/// The category of the slot a [`Rider`] stopped at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// The slot is empty.
    Empty,
    /// The slot is a tombstone.
    Deleted,
    /// The slot is full and its fingerprint matches the probed hash.
    Match,
    /// The slot is full.
    Full,
}

/// A cursor that walks a metadata array along a linear probe sequence and
/// stops at slots whose category is part of its [`Mode`].
///
/// A rider does not terminate on its own. Callers that stop at
/// [`Category::Empty`] rely on the table keeping at least half of its slots
/// empty; iterators stop once the cursor wraps around.
#[derive(Debug, Clone, Copy)]
pub struct Rider<'a> {
    metadata: &'a [u8],
    mask: usize,
    fingerprint: u8,
    cursor: usize,
    mode: Mode,
}

impl<'a> Rider<'a> {
    /// Creates a rider over `metadata` whose first [`advance`] examines slot
    /// `hash & mask`.
    ///
    /// `metadata.len()` must be a power of two; an empty slice yields a rider
    /// that must never be advanced.
    ///
    /// [`advance`]: Rider::advance
    #[inline]
    pub fn new(metadata: &'a [u8], hash: u64, mode: Mode) -> Self {
        debug_assert!(metadata.is_empty() || metadata.len().is_power_of_two());
        debug_assert!(!mode.is_empty());

        let mask = metadata.len().wrapping_sub(1);
        Self {
            metadata,
            mask,
            fingerprint: fingerprint(hash),
            cursor: (hash as usize).wrapping_sub(1) & mask,
            mode,
        }
    }

    /// The slot index the rider currently rests on.
    #[inline(always)]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Moves to the next slot whose category is part of the mode and returns
    /// its index and category.
    #[inline]
    pub fn advance(&mut self) -> (usize, Category) {
        loop {
            self.cursor = (self.cursor + 1) & self.mask;
            match self.metadata[self.cursor] {
                EMPTY => {
                    if self.mode.contains(Mode::EMPTY) {
                        return (self.cursor, Category::Empty);
                    }
                }
                DELETED => {
                    if self.mode.contains(Mode::DELETED) {
                        return (self.cursor, Category::Deleted);
                    }
                }
                byte => {
                    if self.mode.contains(Mode::FULL) {
                        return (self.cursor, Category::Full);
                    }
                    if self.mode.contains(Mode::MATCH) && byte == self.fingerprint {
                        return (self.cursor, Category::Match);
                    }
                }
            }
        }
    }
}

impl PartialEq for Rider<'_> {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.metadata.as_ptr(), other.metadata.as_ptr())
            && self.mask == other.mask
            && self.cursor == other.cursor
    }
}

impl Eq for Rider<'_> {}
