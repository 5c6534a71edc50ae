//! UTF-8-style variable-length size fields.
//!
//! Chain framing uses these for per-card body lengths that do not fit the
//! inline head nibble. The layout follows the UTF-8 leading/continuation
//! byte pattern: values below 0x80 occupy one byte, larger values a leading
//! byte with a width prefix followed by 6-bit continuation bytes. Up to four
//! bytes are supported, covering values below 2^21.

use cardex_common::{Result, verify_data};

/// Largest value representable by the 4-byte form.
pub const VLEN_MAX: u32 = (1 << 21) - 1;

/// Number of bytes [`write_vlen`] will emit for `value`.
pub fn vlen_size(value: u32) -> usize {
    match value {
        0..0x80 => 1,
        0x80..0x800 => 2,
        0x800..0x10000 => 3,
        _ => 4,
    }
}

/// Appends the variable-length encoding of `value` to `buf`.
///
/// # Panics
///
/// Panics if `value` exceeds [`VLEN_MAX`]; callers bound chain body lengths
/// well below it.
pub fn write_vlen(buf: &mut Vec<u8>, value: u32) {
    assert!(value <= VLEN_MAX, "vlen value out of range: {value}");
    match value {
        0..0x80 => buf.push(value as u8),
        0x80..0x800 => {
            buf.push(0xC0 | (value >> 6) as u8);
            buf.push(0x80 | (value & 0x3F) as u8);
        }
        0x800..0x10000 => {
            buf.push(0xE0 | (value >> 12) as u8);
            buf.push(0x80 | ((value >> 6) & 0x3F) as u8);
            buf.push(0x80 | (value & 0x3F) as u8);
        }
        _ => {
            buf.push(0xF0 | (value >> 18) as u8);
            buf.push(0x80 | ((value >> 12) & 0x3F) as u8);
            buf.push(0x80 | ((value >> 6) & 0x3F) as u8);
            buf.push(0x80 | (value & 0x3F) as u8);
        }
    }
}

/// Decodes a variable-length size field from the start of `bytes`.
///
/// Returns the value and the number of bytes consumed.
pub fn read_vlen(bytes: &[u8]) -> Result<(u32, usize)> {
    verify_data!(vlen, !bytes.is_empty());
    let b0 = bytes[0];
    let (width, mut value) = if b0 < 0x80 {
        (1, b0 as u32)
    } else if b0 & 0xE0 == 0xC0 {
        (2, (b0 & 0x1F) as u32)
    } else if b0 & 0xF0 == 0xE0 {
        (3, (b0 & 0x0F) as u32)
    } else if b0 & 0xF8 == 0xF0 {
        (4, (b0 & 0x07) as u32)
    } else {
        verify_data!(vlen, false);
        unreachable!()
    };
    verify_data!(vlen, bytes.len() >= width);
    for &b in &bytes[1..width] {
        verify_data!(vlen, b & 0xC0 == 0x80);
        value = (value << 6) | (b & 0x3F) as u32;
    }
    Ok((value, width))
}
