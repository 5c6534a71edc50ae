//! Draining accumulators through the posting-list codec.
//!
//! A flush takes everything an accumulator holds, demultiplexes it by
//! destination subindex (a pure bit test on the card ID) and by chain mode,
//! and emits one chain record per (key, subindex, mode).
//!
//! Chains are built with the two-pass size-then-write scheme: pass 1
//! computes every card's serialized byte length into a side array, pass 2
//! writes card heads and bodies and asserts that the written length matches
//! the precomputed one exactly. A mismatch is a programming error and aborts
//! the run.

use cardex_common::{Result, verify_invariant};
use itertools::Itertools;
use cardex_format::card_id::MAX_SUBINDICES;
use cardex_format::chain::{
    ChainEntry, WordChainKey, card_body_size, encode_card_body, write_card_head,
};
use cardex_format::postings::ChainMode;

use crate::write::accumulator::WordAccumulator;
use crate::write::strings::StringAccumulator;

/// Destination of encoded chain records. Implemented by the subindex output
/// file set; tests substitute an in-memory recorder.
pub trait ChainSink {
    /// Appends one framed chain record to a subindex's word-posting file.
    fn word_chain(&mut self, sub: u8, key: WordChainKey, chain: &[u8]) -> Result<()>;

    /// Appends one framed chain record to a subindex's string-posting file.
    fn string_chain(&mut self, sub: u8, fingerprint: u128, chain: &[u8]) -> Result<()>;
}

type CardGroup = (u32, Vec<ChainEntry>);

/// Drains a word accumulator into per-subindex chain records.
///
/// Flushing an empty accumulator is a no-op: nothing is written.
pub fn flush_words(acc: &mut WordAccumulator, sink: &mut dyn ChainSink) -> Result<()> {
    if acc.is_empty() {
        return Ok(());
    }
    let postings = acc.drain();
    log::debug!("flushing {} touched words", postings.words.len());

    let mut targets: Vec<[Vec<CardGroup>; 2]> = Vec::new();
    targets.resize_with(MAX_SUBINDICES, Default::default);

    for (word_id, groups) in postings.words {
        for (card, entries) in groups {
            for entry in entries {
                let mode_ix = match entry {
                    ChainEntry::Word { .. } | ChainEntry::WordOverflow { .. } => 0,
                    ChainEntry::Meta { .. } => 1,
                };
                let runs = &mut targets[card.subindex() as usize][mode_ix];
                match runs.last_mut() {
                    Some((ordinal, run)) if *ordinal == card.ordinal() => run.push(entry),
                    _ => runs.push((card.ordinal(), vec![entry])),
                }
            }
        }
        for (sub, modes) in targets.iter_mut().enumerate() {
            for (mode_ix, runs) in modes.iter_mut().enumerate() {
                if runs.is_empty() {
                    continue;
                }
                let mode = if mode_ix == 0 {
                    ChainMode::Word
                } else {
                    ChainMode::Meta
                };
                let body = encode_chain(runs, mode)?;
                let key = WordChainKey { word_id, mode };
                sink.word_chain(sub as u8, key, &body)?;
                runs.clear();
            }
        }
    }
    Ok(())
}

/// Drains a string accumulator into per-subindex chain records, grouped by
/// content fingerprint via a full sort.
pub fn flush_strings(acc: &mut StringAccumulator, sink: &mut dyn ChainSink) -> Result<()> {
    if acc.is_empty() {
        return Ok(());
    }
    let entries = acc.drain_sorted();
    log::debug!("flushing {} string postings", entries.len());

    for ((fingerprint, sub), group) in &entries
        .iter()
        .chunk_by(|e| (e.fingerprint, e.card.subindex()))
    {
        let mut runs: Vec<CardGroup> = Vec::new();
        for posting in group {
            let entry = ChainEntry::Meta {
                mtype: posting.class & 7,
                pos: 0,
            };
            match runs.last_mut() {
                Some((ordinal, run)) if *ordinal == posting.card.ordinal() => run.push(entry),
                _ => runs.push((posting.card.ordinal(), vec![entry])),
            }
        }
        let body = encode_chain(&runs, ChainMode::Meta)?;
        sink.string_chain(sub, fingerprint, &body)?;
    }
    Ok(())
}

/// Two-pass chain body encoding with the size cross-check.
fn encode_chain(runs: &[CardGroup], mode: ChainMode) -> Result<Vec<u8>> {
    // Pass 1: sizes only, no bytes emitted.
    let size_by_card: Vec<u32> = runs
        .iter()
        .map(|(_, entries)| card_body_size(entries, mode) as u32)
        .collect();

    // Pass 2: emit, verifying each card against its precomputed size.
    let mut body = Vec::new();
    for ((ordinal, entries), &expected) in runs.iter().zip(&size_by_card) {
        write_card_head(&mut body, *ordinal, expected as usize)?;
        let start = body.len();
        encode_card_body(&mut body, entries, mode);
        let written = (body.len() - start) as u32;
        verify_invariant!(
            chain_encoding,
            written == expected,
            "card {ordinal}: wrote {written} bytes, sized {expected}"
        );
    }
    Ok(body)
}
