//! In-memory word posting accumulation.
//!
//! Occurrence events are collected into posting nodes held in a flat
//! `Vec`-backed arena with integer next-handles; each node carries a card ID
//! and up to [`NODE_PAIRS`] `(type, position)` pairs. Consecutive
//! occurrences for the same (word, card) share a node until it fills, then
//! a fresh node is prepended to the word's chain. Prepending makes insertion
//! O(1); the drain pass reverses each chain to restore ascending card order.
//!
//! The arena is destroyed wholesale at every flush; there is no per-node
//! deallocation. Exceeding the byte budget is reported through
//! [`WordAccumulator::needs_flush`] and handled by an early flush, never an
//! error.

use std::collections::HashMap;

use cardex_format::CardId;
use cardex_format::chain::ChainEntry;

/// Occurrence pairs per posting node. Tuned constant of the original node
/// layout; kept verbatim.
pub const NODE_PAIRS: usize = 3;

const NIL: u32 = u32::MAX;

const FILLER: ChainEntry = ChainEntry::Word { wtype: 0, pos: 0 };

#[derive(Clone, Copy)]
struct PostingNode {
    card: CardId,
    next: u32,
    len: u8,
    entries: [ChainEntry; NODE_PAIRS],
}

/// Accumulates `(word, card, type, position)` events between flushes.
pub struct WordAccumulator {
    nodes: Vec<PostingNode>,
    heads: HashMap<u32, u32, ahash::RandomState>,
    touched: Vec<u32>,
    occurrence_limit: u32,
    node_capacity: usize,
}

/// The drained content of an accumulator: per word, the card groups in
/// per-subindex ascending card order.
pub struct WordPostings {
    /// `(word_id, card groups)` in ascending word-ID order.
    pub words: Vec<(u32, Vec<(CardId, Vec<ChainEntry>)>)>,
}

impl WordAccumulator {
    /// Creates an accumulator bounded by `byte_budget` of node storage.
    /// Once a single (word, card) pair has accumulated `occurrence_limit`
    /// occurrences, further ones collapse into per-(card, type) overflow
    /// markers.
    pub fn new(byte_budget: usize, occurrence_limit: u32) -> WordAccumulator {
        let node_size = std::mem::size_of::<PostingNode>();
        WordAccumulator {
            nodes: Vec::new(),
            heads: HashMap::default(),
            touched: Vec::new(),
            occurrence_limit,
            node_capacity: (byte_budget / node_size).max(16),
        }
    }

    /// Records one occurrence of `word_id` in `card`.
    ///
    /// `entry` must be a positional entry ([`ChainEntry::Word`] or
    /// [`ChainEntry::Meta`]); the accumulator itself decides when to convert
    /// it into an overflow marker.
    pub fn add(&mut self, word_id: u32, card: CardId, entry: ChainEntry) {
        let head = self.heads.get(&word_id).copied();
        if head.is_none() {
            self.touched.push(word_id);
        }

        let entry_type = match entry {
            ChainEntry::Word { wtype, .. } => wtype,
            ChainEntry::Meta { mtype, .. } => mtype,
            ChainEntry::WordOverflow { wtype } => wtype,
        };

        // Count this card's occurrences; its nodes sit at the front of the
        // chain because cards never interleave within one worker.
        let mut count = 0u32;
        let mut overflow_present = false;
        let mut cursor = head;
        while let Some(ix) = cursor {
            let node = &self.nodes[ix as usize];
            if node.card != card {
                break;
            }
            for e in &node.entries[..node.len as usize] {
                match e {
                    ChainEntry::WordOverflow { wtype } if *wtype == entry_type => {
                        overflow_present = true;
                    }
                    ChainEntry::WordOverflow { .. } => {}
                    _ => count += 1,
                }
            }
            cursor = (node.next != NIL).then_some(node.next);
        }

        let entry = if count >= self.occurrence_limit {
            if overflow_present {
                // Exactly one marker per (card, type), never a growing count.
                return;
            }
            ChainEntry::WordOverflow { wtype: entry_type }
        } else {
            entry
        };

        if let Some(head_ix) = head {
            let node = &mut self.nodes[head_ix as usize];
            if node.card == card && (node.len as usize) < NODE_PAIRS {
                node.entries[node.len as usize] = entry;
                node.len += 1;
                return;
            }
        }
        let ix = self.nodes.len() as u32;
        let mut entries = [FILLER; NODE_PAIRS];
        entries[0] = entry;
        self.nodes.push(PostingNode {
            card,
            next: head.unwrap_or(NIL),
            len: 1,
            entries,
        });
        self.heads.insert(word_id, ix);
    }

    /// True once the node arena has outgrown its byte budget.
    pub fn needs_flush(&self) -> bool {
        self.nodes.len() >= self.node_capacity
    }

    /// True when nothing has been accumulated since the last drain.
    pub fn is_empty(&self) -> bool {
        self.touched.is_empty()
    }

    /// Drains everything accumulated so far, leaving the accumulator empty.
    ///
    /// Chains are reversed back into ascending card order and merged into
    /// per-card groups; words come out in ascending ID order for
    /// deterministic output.
    pub fn drain(&mut self) -> WordPostings {
        self.touched.sort_unstable();
        let mut words = Vec::with_capacity(self.touched.len());
        for &word_id in &self.touched {
            let mut chain = Vec::new();
            let mut cursor = self.heads[&word_id];
            loop {
                chain.push(cursor);
                let next = self.nodes[cursor as usize].next;
                if next == NIL {
                    break;
                }
                cursor = next;
            }
            chain.reverse();

            let mut groups: Vec<(CardId, Vec<ChainEntry>)> = Vec::new();
            for ix in chain {
                let node = &self.nodes[ix as usize];
                match groups.last_mut() {
                    Some((card, entries)) if *card == node.card => {
                        entries.extend_from_slice(&node.entries[..node.len as usize]);
                    }
                    _ => {
                        groups
                            .push((node.card, node.entries[..node.len as usize].to_vec()));
                    }
                }
            }
            words.push((word_id, groups));
        }
        self.nodes.clear();
        self.heads.clear();
        self.touched.clear();
        WordPostings { words }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(wtype: u8, pos: u32) -> ChainEntry {
        ChainEntry::Word { wtype, pos }
    }

    fn card(ordinal: u32) -> CardId {
        CardId::new(0, ordinal)
    }

    #[test]
    fn test_single_word_single_card() {
        let mut acc = WordAccumulator::new(1 << 16, 100);
        acc.add(5, card(1), word(0, 1));
        acc.add(5, card(1), word(0, 4));
        let postings = acc.drain();
        assert_eq!(postings.words.len(), 1);
        let (word_id, groups) = &postings.words[0];
        assert_eq!(*word_id, 5);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].1, vec![word(0, 1), word(0, 4)]);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_node_overflow_spills_to_new_node() {
        let mut acc = WordAccumulator::new(1 << 16, 100);
        for pos in 1..=7u32 {
            acc.add(9, card(1), word(0, pos));
        }
        let postings = acc.drain();
        let groups = &postings.words[0].1;
        // Node spill is invisible after draining: one group, in order.
        assert_eq!(groups.len(), 1);
        let positions: Vec<u32> = groups[0]
            .1
            .iter()
            .map(|e| match e {
                ChainEntry::Word { pos, .. } => *pos,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(positions, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_cards_come_out_ascending() {
        let mut acc = WordAccumulator::new(1 << 16, 100);
        for ordinal in 1..=5u32 {
            acc.add(3, card(ordinal), word(0, 1));
        }
        let postings = acc.drain();
        let ordinals: Vec<u32> = postings.words[0]
            .1
            .iter()
            .map(|(c, _)| c.ordinal())
            .collect();
        assert_eq!(ordinals, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_words_sorted_by_id() {
        let mut acc = WordAccumulator::new(1 << 16, 100);
        acc.add(42, card(1), word(0, 1));
        acc.add(7, card(1), word(0, 2));
        acc.add(100, card(1), word(0, 3));
        let postings = acc.drain();
        let ids: Vec<u32> = postings.words.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![7, 42, 100]);
    }

    #[test]
    fn test_overflow_marker_emitted_once_per_type() {
        let mut acc = WordAccumulator::new(1 << 16, 3);
        for pos in 1..=10u32 {
            acc.add(5, card(1), word(0, pos));
        }
        for pos in 1..=5u32 {
            acc.add(5, card(1), word(1, pos + 100));
        }
        let postings = acc.drain();
        let entries = &postings.words[0].1[0].1;
        let overflow_count = entries
            .iter()
            .filter(|e| matches!(e, ChainEntry::WordOverflow { wtype: 0 }))
            .count();
        assert_eq!(overflow_count, 1);
        let overflow_count_t1 = entries
            .iter()
            .filter(|e| matches!(e, ChainEntry::WordOverflow { wtype: 1 }))
            .count();
        assert_eq!(overflow_count_t1, 1);
        // The first `limit` positional entries survive.
        let positional = entries
            .iter()
            .filter(|e| matches!(e, ChainEntry::Word { .. }))
            .count();
        assert_eq!(positional, 3);
    }

    #[test]
    fn test_overflow_does_not_leak_across_cards() {
        let mut acc = WordAccumulator::new(1 << 16, 2);
        for pos in 1..=5u32 {
            acc.add(5, card(1), word(0, pos));
        }
        acc.add(5, card(2), word(0, 1));
        let postings = acc.drain();
        let groups = &postings.words[0].1;
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].1, vec![word(0, 1)]);
    }

    #[test]
    fn test_budget_reports_flush_need() {
        let mut acc = WordAccumulator::new(1, 100);
        assert!(!acc.needs_flush());
        for ordinal in 1..=20u32 {
            acc.add(ordinal, card(1), word(0, 1));
        }
        assert!(acc.needs_flush());
        acc.drain();
        assert!(!acc.needs_flush());
    }

    #[test]
    fn test_mixed_word_and_meta_entries_preserved() {
        let mut acc = WordAccumulator::new(1 << 16, 100);
        acc.add(5, card(1), word(0, 3));
        acc.add(5, card(1), ChainEntry::Meta { mtype: 1, pos: 1 });
        let postings = acc.drain();
        let entries = &postings.words[0].1[0].1;
        assert_eq!(
            entries,
            &vec![word(0, 3), ChainEntry::Meta { mtype: 1, pos: 1 }]
        );
    }
}
