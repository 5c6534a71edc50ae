//! Card identifiers: 32-bit surrogate keys for indexed documents.
//!
//! The high [`SUBINDEX_BITS`] bits select the destination subindex; the low
//! [`ORDINAL_BITS`] bits are a dense, monotonically increasing, 1-based
//! sequence number private to that subindex. Ordinal 0 is a permanent
//! sentinel in every per-ID table (record 0 is a dummy), so real cards start
//! at ordinal 1.

use bytemuck::{Pod, Zeroable};

/// Number of high bits selecting the destination subindex.
pub const SUBINDEX_BITS: u32 = 3;

/// Maximum number of subindices one run may produce.
pub const MAX_SUBINDICES: usize = 1 << SUBINDEX_BITS;

/// Number of low bits carrying the per-subindex ordinal.
pub const ORDINAL_BITS: u32 = 32 - SUBINDEX_BITS;

/// Largest ordinal an allocator may mint.
pub const MAX_ORDINAL: u32 = (1 << ORDINAL_BITS) - 1;

/// Largest ordinal representable in chain card-head framing, where the top
/// nibble of the head word carries the inline length (see [`crate::chain`]).
pub const MAX_CHAIN_ORDINAL: u32 = (1 << 28) - 1;

/// A card identifier: subindex selector plus dense per-subindex ordinal.
///
/// IDs are issued in exactly the order documents are allocated and are never
/// revised or reused. Every per-ID output file stores record `N` at offset
/// `N * record_size` (or, for variable-size files, in strict allocation
/// order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct CardId(u32);

impl CardId {
    /// Constructs a card ID from a subindex selector and ordinal.
    ///
    /// # Panics
    ///
    /// Panics if `subindex` or `ordinal` exceed their bit fields; both are
    /// produced by the allocator, which enforces the limits.
    pub fn new(subindex: u8, ordinal: u32) -> CardId {
        assert!((subindex as usize) < MAX_SUBINDICES);
        assert!(ordinal <= MAX_ORDINAL);
        CardId(((subindex as u32) << ORDINAL_BITS) | ordinal)
    }

    /// Reconstructs a card ID from its raw 32-bit representation.
    #[inline]
    pub fn from_u32(raw: u32) -> CardId {
        CardId(raw)
    }

    /// The raw 32-bit representation.
    #[inline]
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Index of the subindex this card was routed to.
    #[inline]
    pub fn subindex(&self) -> u8 {
        (self.0 >> ORDINAL_BITS) as u8
    }

    /// The 1-based dense ordinal within the subindex.
    #[inline]
    pub fn ordinal(&self) -> u32 {
        self.0 & MAX_ORDINAL
    }
}

impl std::fmt::Display for CardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.subindex(), self.ordinal())
    }
}
