//! Fixed-layout table records and card record headers.
//!
//! Attribute and note tables are plain arrays of POD records: record `N`
//! lives at offset `N * record_size`, including the permanent dummy record 0.
//! The layouts are stable and append-only; fields are little-endian on every
//! supported target.
//!
//! Card records are block-aligned, individually (optionally) LZ4-compressed
//! blobs, each prefixed by a [`CardRecordHeader`]. The attribute record
//! stores the card record's file offset right-shifted by the run's alignment
//! shift.

use bytemuck::{Pod, Zeroable};
use cardex_common::{Result, error::Error, verify_data};

/// Format magic of the parameters record.
pub const PARAMS_MAGIC: u32 = 0x43445850; // "CDXP"

/// Current format version.
pub const FORMAT_VERSION: u32 = 3;

/// Default power-of-two alignment shift for card records (16-byte blocks).
pub const DEFAULT_ALIGN_SHIFT: u32 = 4;

/// Card record payload stored uncompressed.
pub const CARD_PLAIN: u8 = 0;

/// Card record payload stored LZ4-block-compressed.
pub const CARD_LZ4: u8 = 1;

/// Attribute record flag: the document carried a title attribute.
pub const ATTR_HAS_TITLE: u8 = 1;

/// Attribute record flag: the document carried visible body text.
pub const ATTR_HAS_BODY: u8 = 1 << 1;

/// Attribute record flag: the document was classified as giant.
pub const ATTR_GIANT: u8 = 1 << 2;

/// One fixed-size attribute table record, filled in place by the scanner
/// after allocation. Zero-initialized records are valid (they describe the
/// dummy card 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct AttrRecord {
    /// Card record offset in the card file, right-shifted by the run's
    /// alignment shift.
    pub card_pos: u32,
    /// Final document weight after the deterministic adjustment step.
    pub weight: i32,
    /// Low half of the 128-bit content fingerprint.
    pub fingerprint_lo: u64,
    /// High half of the 128-bit content fingerprint.
    pub fingerprint_hi: u64,
    /// Content file-type class used by subindex routing.
    pub file_class: u8,
    /// Secondary partition ID used by subindex routing.
    pub partition_id: u8,
    /// `ATTR_*` flag bits.
    pub flags: u8,
    pub reserved: u8,
    /// Number of reference children serialized into the card record.
    pub ref_count: u16,
    /// Number of trace notes serialized into the card record.
    pub note_count: u16,
}

/// One fixed-size note table record. Real cards leave it zeroed; skeleton
/// allocations fill it with the placeholder fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct NoteRecord {
    /// Low half of the referenced document's fingerprint.
    pub fingerprint_lo: u64,
    /// High half of the referenced document's fingerprint.
    pub fingerprint_hi: u64,
    /// Initial weight assigned to the skeleton.
    pub init_weight: i32,
    pub reserved: u32,
}

/// Whole-run metadata, written once per subindex at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ParamsRecord {
    pub magic: u32,
    pub version: u32,
    /// Run start time, seconds since the Unix epoch.
    pub timestamp: u64,
    /// Run seed, shared by every subindex of the run.
    pub seed: u64,
    /// Number of real cards allocated in this subindex.
    pub card_count: u32,
    /// Number of skeleton notes allocated in this subindex.
    pub skeleton_count: u32,
    /// Total number of subindices produced by the run.
    pub subindex_count: u32,
    /// This subindex's position among them.
    pub subindex_ord: u32,
    /// File-type class bitmask this subindex matches.
    pub type_mask: u32,
    /// Partition ID bitmask this subindex matches.
    pub id_mask: u32,
    /// Card record alignment shift used throughout this subindex.
    pub align_shift: u32,
    pub reserved: u32,
}

/// Header prefixed to every card record in the card file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct CardRecordHeader {
    /// [`CARD_PLAIN`] or [`CARD_LZ4`].
    pub record_type: u8,
    pub reserved: [u8; 3],
    /// Uncompressed payload length.
    pub raw_len: u32,
    /// Stored payload length (equals `raw_len` for plain records).
    pub stored_len: u32,
}

/// Compresses a card payload, keeping it plain when compression does not
/// actually shrink it.
pub fn compress_card(payload: &[u8]) -> Result<(CardRecordHeader, Vec<u8>)> {
    let compressed = lz4::block::compress(payload, None, false)
        .map_err(|e| Error::io("lz4 compress", e))?;
    if compressed.len() < payload.len() {
        Ok((
            CardRecordHeader {
                record_type: CARD_LZ4,
                reserved: [0; 3],
                raw_len: payload.len() as u32,
                stored_len: compressed.len() as u32,
            },
            compressed,
        ))
    } else {
        Ok((
            CardRecordHeader {
                record_type: CARD_PLAIN,
                reserved: [0; 3],
                raw_len: payload.len() as u32,
                stored_len: payload.len() as u32,
            },
            payload.to_vec(),
        ))
    }
}

/// Recovers a card payload from its header and stored bytes.
pub fn decompress_card(header: &CardRecordHeader, stored: &[u8]) -> Result<Vec<u8>> {
    verify_data!(card_record, stored.len() == header.stored_len as usize);
    match header.record_type {
        CARD_PLAIN => {
            verify_data!(card_record, header.raw_len == header.stored_len);
            Ok(stored.to_vec())
        }
        CARD_LZ4 => {
            let payload = lz4::block::decompress(stored, Some(header.raw_len as i32))
                .map_err(|e| Error::io("lz4 decompress", e))?;
            verify_data!(card_record, payload.len() == header.raw_len as usize);
            Ok(payload)
        }
        _ => Err(Error::invalid_format(
            "card record",
            format!("unknown record type {}", header.record_type),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sizes_are_stable() {
        // On-disk layouts; any change here breaks existing indexes.
        assert_eq!(std::mem::size_of::<AttrRecord>(), 32);
        assert_eq!(std::mem::size_of::<NoteRecord>(), 24);
        assert_eq!(std::mem::size_of::<ParamsRecord>(), 56);
        assert_eq!(std::mem::size_of::<CardRecordHeader>(), 12);
    }

    #[test]
    fn test_zeroed_records_are_valid() {
        let attr: AttrRecord = Zeroable::zeroed();
        assert_eq!(attr.card_pos, 0);
        assert_eq!(attr.weight, 0);
        let note: NoteRecord = Zeroable::zeroed();
        assert_eq!(note.init_weight, 0);
    }

    #[test]
    fn test_card_compression_round_trip() {
        let payload: Vec<u8> = b"the quick brown fox "
            .iter()
            .cycle()
            .take(400)
            .copied()
            .collect();
        let (header, stored) = compress_card(&payload).unwrap();
        assert_eq!(header.record_type, CARD_LZ4);
        assert!(stored.len() < payload.len());
        assert_eq!(decompress_card(&header, &stored).unwrap(), payload);
    }

    #[test]
    fn test_incompressible_payload_stays_plain() {
        let payload: Vec<u8> = (0..64u32).map(|i| i.wrapping_mul(2654435761) as u8).collect();
        let (header, stored) = compress_card(&payload).unwrap();
        assert_eq!(header.record_type, CARD_PLAIN);
        assert_eq!(stored, payload);
        assert_eq!(decompress_card(&header, &stored).unwrap(), payload);
    }

    #[test]
    fn test_corrupt_header_rejected() {
        let (mut header, stored) = compress_card(b"abcabcabc").unwrap();
        header.record_type = 9;
        assert!(decompress_card(&header, &stored).is_err());
    }
}
