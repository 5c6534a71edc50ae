//! Variable-width occurrence codes for posting chains.
//!
//! Two parallel code tables exist, selected per chain:
//!
//! - **wt codes** carry body-text occurrences as `(type, delta)` pairs,
//!   where the delta is taken from the previous position within the same
//!   card run (the base resets to position 1 at the start of every card).
//!   Four width classes, 1 to 4 bytes, selected by magnitude; the high bits
//!   of the leading byte select the class.
//! - **mt codes** carry meta-field occurrences as `(type, position)` pairs
//!   with absolute positions (meta fields are short and unordered). Three
//!   width classes, 2 to 4 bytes.
//!
//! The class breakpoints (64 / 2048 / 262144 for wt deltas, 4096 / 524288
//! for mt positions) are tuned format constants, copied verbatim for
//! compatibility.

use cardex_common::{Result, verify_data};

/// Occurrence types occupy 3 bits in every width class.
pub const TYPE_MAX: u8 = 7;

/// Largest encodable real wt delta. The all-ones 26-bit value is reserved
/// for the overflow marker; deltas clamp one below it.
pub const WT_DELTA_MAX: u32 = (1 << 26) - 2;

/// Reserved wt delta marking a positionless per-(card, type) overflow entry.
pub const WT_OVERFLOW_DELTA: u32 = (1 << 26) - 1;

/// Largest encodable absolute mt position; positions clamp to it.
pub const MT_POS_MAX: u32 = (1 << 27) - 1;

/// How the body of one posting chain is encoded.
///
/// wt and mt codes share leading-bit space, so a chain is encoded entirely
/// in one mode. The mode is carried by the chain key (see [`crate::chain`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChainMode {
    /// Body-text occurrences, delta-coded wt entries.
    Word = 0,
    /// Meta-field occurrences, absolute mt entries.
    Meta = 1,
}

/// Number of bytes the wt encoding of `(wtype, delta)` occupies.
#[inline]
pub fn wt_size(wtype: u8, delta: u32) -> usize {
    if wtype < 2 && delta < 64 {
        1
    } else if delta < 2048 {
        2
    } else if delta < 262144 {
        3
    } else {
        4
    }
}

/// Appends the wt encoding of `(wtype, delta)` to `buf`.
///
/// `wtype` must be at most [`TYPE_MAX`] and `delta` at most
/// [`WT_OVERFLOW_DELTA`]; the accumulator clamps both before encoding.
pub fn wt_encode(buf: &mut Vec<u8>, wtype: u8, delta: u32) {
    debug_assert!(wtype <= TYPE_MAX);
    debug_assert!(delta <= WT_OVERFLOW_DELTA);
    match wt_size(wtype, delta) {
        1 => buf.push((wtype << 6) | delta as u8),
        2 => {
            buf.push(0x80 | (wtype << 3) | (delta >> 8) as u8);
            buf.push(delta as u8);
        }
        3 => {
            buf.push(0xC0 | (wtype << 2) | (delta >> 16) as u8);
            buf.push((delta >> 8) as u8);
            buf.push(delta as u8);
        }
        _ => {
            buf.push(0xE0 | (wtype << 2) | (delta >> 24) as u8);
            buf.push((delta >> 16) as u8);
            buf.push((delta >> 8) as u8);
            buf.push(delta as u8);
        }
    }
}

/// Decodes one wt entry from the start of `bytes`.
///
/// Returns `(type, delta, width)`.
pub fn wt_decode(bytes: &[u8]) -> Result<(u8, u32, usize)> {
    verify_data!(wt_entry, !bytes.is_empty());
    let b0 = bytes[0];
    if b0 & 0x80 == 0 {
        Ok(((b0 >> 6) & 1, (b0 & 0x3F) as u32, 1))
    } else if b0 & 0x40 == 0 {
        verify_data!(wt_entry, bytes.len() >= 2);
        let delta = (((b0 & 0x07) as u32) << 8) | bytes[1] as u32;
        Ok(((b0 >> 3) & 7, delta, 2))
    } else if b0 & 0x20 == 0 {
        verify_data!(wt_entry, bytes.len() >= 3);
        let delta = (((b0 & 0x03) as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32;
        Ok(((b0 >> 2) & 7, delta, 3))
    } else {
        verify_data!(wt_entry, bytes.len() >= 4);
        let delta = (((b0 & 0x03) as u32) << 24)
            | ((bytes[1] as u32) << 16)
            | ((bytes[2] as u32) << 8)
            | bytes[3] as u32;
        Ok(((b0 >> 2) & 7, delta, 4))
    }
}

/// Number of bytes the mt encoding of `(mtype, pos)` occupies.
#[inline]
pub fn mt_size(_mtype: u8, pos: u32) -> usize {
    if pos < 4096 {
        2
    } else if pos < 524288 {
        3
    } else {
        4
    }
}

/// Appends the mt encoding of `(mtype, pos)` to `buf`.
pub fn mt_encode(buf: &mut Vec<u8>, mtype: u8, pos: u32) {
    debug_assert!(mtype <= TYPE_MAX);
    debug_assert!(pos <= MT_POS_MAX);
    match mt_size(mtype, pos) {
        2 => {
            buf.push((mtype << 4) | (pos >> 8) as u8);
            buf.push(pos as u8);
        }
        3 => {
            buf.push(0x80 | (mtype << 3) | (pos >> 16) as u8);
            buf.push((pos >> 8) as u8);
            buf.push(pos as u8);
        }
        _ => {
            buf.push(0xC0 | (mtype << 3) | (pos >> 24) as u8);
            buf.push((pos >> 16) as u8);
            buf.push((pos >> 8) as u8);
            buf.push(pos as u8);
        }
    }
}

/// Decodes one mt entry from the start of `bytes`.
///
/// Returns `(type, position, width)`.
pub fn mt_decode(bytes: &[u8]) -> Result<(u8, u32, usize)> {
    verify_data!(mt_entry, !bytes.is_empty());
    let b0 = bytes[0];
    if b0 & 0x80 == 0 {
        verify_data!(mt_entry, bytes.len() >= 2);
        let pos = (((b0 & 0x0F) as u32) << 8) | bytes[1] as u32;
        Ok(((b0 >> 4) & 7, pos, 2))
    } else if b0 & 0x40 == 0 {
        verify_data!(mt_entry, bytes.len() >= 3);
        let pos = (((b0 & 0x07) as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32;
        Ok(((b0 >> 3) & 7, pos, 3))
    } else {
        verify_data!(mt_entry, bytes.len() >= 4);
        let pos = (((b0 & 0x07) as u32) << 24)
            | ((bytes[1] as u32) << 16)
            | ((bytes[2] as u32) << 8)
            | bytes[3] as u32;
        Ok(((b0 >> 3) & 7, pos, 4))
    }
}
