//! Posting chain framing: card heads, chain bodies and chain records.
//!
//! A chain is the on-disk encoding of all occurrences of one key (a lexicon
//! word or a string fingerprint) within one subindex, grouped by card in
//! ascending ordinal order. Each card group consists of a card head followed
//! by the card's occurrence bytes in one of the two [`ChainMode`]s.
//!
//! # Card-head framing
//!
//! The head is a little-endian `u32` holding the card ordinal in its low 28
//! bits. When the card's occurrence-list byte length is at most 15, the
//! length is packed into the otherwise-unused top nibble; longer lists store
//! nibble 0 and follow the head with a UTF-8-style variable-length size
//! field (see [`crate::vlen`]).
//!
//! # Chain records
//!
//! Posting files are plain sequences of `(key, total-length, chain-bytes)`
//! records; no secondary index over them is maintained here. Word keys are a
//! `u32` lexicon ID with bit 31 distinguishing the meta chain of the same
//! word; string keys are a 128-bit content fingerprint.

use cardex_common::{Result, verify_data, verify_invariant};

use crate::card_id::MAX_CHAIN_ORDINAL;
use crate::postings::{self, ChainMode, WT_OVERFLOW_DELTA};
use crate::vlen;

/// Largest occurrence-list byte length that fits the inline head nibble.
pub const INLINE_LEN_MAX: usize = 15;

/// Bit set in a word chain key to mark the meta (mt-coded) chain.
pub const META_KEY_BIT: u32 = 1 << 31;

/// One decoded occurrence within a card group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChainEntry {
    /// Body-text occurrence at an absolute, 1-based position.
    Word { wtype: u8, pos: u32 },
    /// Positionless marker: the (card, type) pair exceeded the per-word
    /// occurrence limit.
    WordOverflow { wtype: u8 },
    /// Meta-field occurrence at an absolute position.
    Meta { mtype: u8, pos: u32 },
}

/// Byte length of one card's occurrence list, computed without emitting
/// bytes. This is pass 1 of the two-pass chain encoding; pass 2
/// ([`encode_card_body`]) must produce exactly this many bytes.
pub fn card_body_size(entries: &[ChainEntry], mode: ChainMode) -> usize {
    let mut size = 0;
    let mut prev = 1u32;
    for entry in entries {
        size += match (mode, entry) {
            (ChainMode::Word, ChainEntry::Word { wtype, pos }) => {
                let delta = clamp_delta(*pos, prev);
                prev = (*pos).max(prev);
                postings::wt_size(*wtype, delta)
            }
            (ChainMode::Word, ChainEntry::WordOverflow { wtype }) => {
                postings::wt_size(*wtype, WT_OVERFLOW_DELTA)
            }
            (ChainMode::Meta, ChainEntry::Meta { mtype, pos }) => {
                postings::mt_size(*mtype, (*pos).min(postings::MT_POS_MAX))
            }
            _ => unreachable!("entry kind does not match chain mode"),
        };
    }
    size
}

/// Appends one card's occurrence list to `buf`. The delta base resets to
/// position 1 at the start of the card run.
pub fn encode_card_body(buf: &mut Vec<u8>, entries: &[ChainEntry], mode: ChainMode) {
    let mut prev = 1u32;
    for entry in entries {
        match (mode, entry) {
            (ChainMode::Word, ChainEntry::Word { wtype, pos }) => {
                let delta = clamp_delta(*pos, prev);
                prev = (*pos).max(prev);
                postings::wt_encode(buf, *wtype, delta);
            }
            (ChainMode::Word, ChainEntry::WordOverflow { wtype }) => {
                postings::wt_encode(buf, *wtype, WT_OVERFLOW_DELTA);
            }
            (ChainMode::Meta, ChainEntry::Meta { mtype, pos }) => {
                postings::mt_encode(buf, *mtype, (*pos).min(postings::MT_POS_MAX));
            }
            _ => unreachable!("entry kind does not match chain mode"),
        }
    }
}

fn clamp_delta(pos: u32, prev: u32) -> u32 {
    pos.saturating_sub(prev).min(postings::WT_DELTA_MAX)
}

/// Appends the card head (and, for long lists, the varint length) for a card
/// whose occurrence list occupies `body_len` bytes.
pub fn write_card_head(buf: &mut Vec<u8>, ordinal: u32, body_len: usize) -> Result<()> {
    verify_invariant!(
        card_head,
        ordinal != 0 && ordinal <= MAX_CHAIN_ORDINAL,
        "ordinal {ordinal} outside chain framing range"
    );
    verify_invariant!(card_head, body_len != 0);
    let nibble = if body_len <= INLINE_LEN_MAX {
        body_len as u32
    } else {
        0
    };
    buf.extend_from_slice(&((nibble << 28) | ordinal).to_le_bytes());
    if nibble == 0 {
        vlen::write_vlen(buf, body_len as u32);
    }
    Ok(())
}

/// Decodes a card head from the start of `bytes`.
///
/// Returns `(ordinal, body_len, head_width)`.
pub fn read_card_head(bytes: &[u8]) -> Result<(u32, usize, usize)> {
    verify_data!(card_head, bytes.len() >= 4);
    let head = u32::from_le_bytes(bytes[0..4].try_into().expect("head bytes"));
    let ordinal = head & MAX_CHAIN_ORDINAL;
    let nibble = head >> 28;
    verify_data!(card_head, ordinal != 0);
    if nibble != 0 {
        Ok((ordinal, nibble as usize, 4))
    } else {
        let (len, width) = vlen::read_vlen(&bytes[4..])?;
        verify_data!(card_head, len != 0);
        Ok((ordinal, len as usize, 4 + width))
    }
}

/// One decoded card group of a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardRun {
    /// Card ordinal within the chain's subindex.
    pub ordinal: u32,
    /// Occurrences in encoded order.
    pub entries: Vec<ChainEntry>,
}

/// Decodes an entire chain body into card runs.
pub fn decode_chain_body(mut bytes: &[u8], mode: ChainMode) -> Result<Vec<CardRun>> {
    let mut runs = Vec::new();
    while !bytes.is_empty() {
        let (ordinal, body_len, head_width) = read_card_head(bytes)?;
        bytes = &bytes[head_width..];
        verify_data!(chain_body, bytes.len() >= body_len);
        let mut body = &bytes[..body_len];
        bytes = &bytes[body_len..];

        let mut entries = Vec::new();
        let mut prev = 1u32;
        while !body.is_empty() {
            match mode {
                ChainMode::Word => {
                    let (wtype, delta, width) = postings::wt_decode(body)?;
                    if delta == WT_OVERFLOW_DELTA {
                        entries.push(ChainEntry::WordOverflow { wtype });
                    } else {
                        let pos = prev + delta;
                        prev = pos;
                        entries.push(ChainEntry::Word { wtype, pos });
                    }
                    body = &body[width..];
                }
                ChainMode::Meta => {
                    let (mtype, pos, width) = postings::mt_decode(body)?;
                    entries.push(ChainEntry::Meta { mtype, pos });
                    body = &body[width..];
                }
            }
        }
        runs.push(CardRun { ordinal, entries });
    }
    Ok(runs)
}

/// Key of one chain record in a word-posting file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordChainKey {
    /// Lexicon entry ID (bit 31 must be clear).
    pub word_id: u32,
    /// Encoding mode; [`ChainMode::Meta`] sets [`META_KEY_BIT`] on disk.
    pub mode: ChainMode,
}

impl WordChainKey {
    /// The on-disk key word.
    pub fn encode(&self) -> u32 {
        debug_assert_eq!(self.word_id & META_KEY_BIT, 0);
        match self.mode {
            ChainMode::Word => self.word_id,
            ChainMode::Meta => self.word_id | META_KEY_BIT,
        }
    }

    /// Reconstructs a key from its on-disk word.
    pub fn decode(raw: u32) -> WordChainKey {
        WordChainKey {
            word_id: raw & !META_KEY_BIT,
            mode: if raw & META_KEY_BIT != 0 {
                ChainMode::Meta
            } else {
                ChainMode::Word
            },
        }
    }
}

/// Appends a `(key, total-length, chain-bytes)` record of a word-posting
/// file to `out`.
pub fn write_word_chain(out: &mut Vec<u8>, key: WordChainKey, body: &[u8]) {
    out.extend_from_slice(&key.encode().to_le_bytes());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
}

/// Appends a `(fingerprint, total-length, chain-bytes)` record of a
/// string-posting file to `out`.
pub fn write_string_chain(out: &mut Vec<u8>, fingerprint: u128, body: &[u8]) {
    out.extend_from_slice(&fingerprint.to_le_bytes());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
}

/// Reads every chain record of a word-posting file.
pub fn read_word_chains(mut bytes: &[u8]) -> Result<Vec<(WordChainKey, Vec<CardRun>)>> {
    let mut chains = Vec::new();
    while !bytes.is_empty() {
        verify_data!(word_chain, bytes.len() >= 8);
        let key = WordChainKey::decode(u32::from_le_bytes(bytes[0..4].try_into().expect("key")));
        let len = u32::from_le_bytes(bytes[4..8].try_into().expect("len")) as usize;
        verify_data!(word_chain, bytes.len() >= 8 + len);
        let runs = decode_chain_body(&bytes[8..8 + len], key.mode)?;
        chains.push((key, runs));
        bytes = &bytes[8 + len..];
    }
    Ok(chains)
}

/// Reads every chain record of a string-posting file.
pub fn read_string_chains(mut bytes: &[u8]) -> Result<Vec<(u128, Vec<CardRun>)>> {
    let mut chains = Vec::new();
    while !bytes.is_empty() {
        verify_data!(string_chain, bytes.len() >= 20);
        let fp = u128::from_le_bytes(bytes[0..16].try_into().expect("fingerprint"));
        let len = u32::from_le_bytes(bytes[16..20].try_into().expect("len")) as usize;
        verify_data!(string_chain, bytes.len() >= 20 + len);
        let runs = decode_chain_body(&bytes[20..20 + len], ChainMode::Meta)?;
        chains.push((fp, runs));
        bytes = &bytes[20 + len..];
    }
    Ok(chains)
}
