//! In-memory string posting accumulation.
//!
//! Strings (tokens outside the lexicon, reference URLs and other unbounded
//! keys) cannot use per-entry hash chaining the way lexicon words do, so
//! their occurrences go into one flat growable array keyed by content
//! fingerprint. The array is fully sorted at flush time (fingerprint, then
//! card ID, then string class), which groups chains and card runs without
//! any linking structure.

use cardex_format::CardId;

/// One string occurrence event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StringPosting {
    /// 128-bit content fingerprint of the string.
    pub fingerprint: u128,
    /// Card the string occurred in.
    pub card: CardId,
    /// String-class of the occurrence.
    pub class: u8,
}

/// Flat accumulator of string postings, bounded by a byte budget.
pub struct StringAccumulator {
    entries: Vec<StringPosting>,
    capacity: usize,
}

impl StringAccumulator {
    /// Creates an accumulator bounded by `byte_budget` of entry storage.
    pub fn new(byte_budget: usize) -> StringAccumulator {
        let entry_size = std::mem::size_of::<StringPosting>();
        StringAccumulator {
            entries: Vec::new(),
            capacity: (byte_budget / entry_size).max(16),
        }
    }

    /// Records one occurrence.
    pub fn add(&mut self, fingerprint: u128, card: CardId, class: u8) {
        self.entries.push(StringPosting {
            fingerprint,
            card,
            class,
        });
    }

    /// True once the entry array has outgrown its byte budget.
    pub fn needs_flush(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// True when nothing has been accumulated since the last drain.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drains all entries, sorted by (fingerprint, card, class), leaving
    /// the accumulator empty.
    pub fn drain_sorted(&mut self) -> Vec<StringPosting> {
        let mut entries = std::mem::take(&mut self.entries);
        entries.sort_unstable();
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_sorts_by_fingerprint_card_class() {
        let mut acc = StringAccumulator::new(1 << 16);
        acc.add(2, CardId::new(0, 5), 1);
        acc.add(1, CardId::new(0, 9), 0);
        acc.add(2, CardId::new(0, 3), 2);
        acc.add(2, CardId::new(0, 3), 0);
        let drained = acc.drain_sorted();
        assert_eq!(
            drained
                .iter()
                .map(|e| (e.fingerprint, e.card.ordinal(), e.class))
                .collect::<Vec<_>>(),
            vec![(1, 9, 0), (2, 3, 0), (2, 3, 2), (2, 5, 1)]
        );
        assert!(acc.is_empty());
    }

    #[test]
    fn test_subindex_bits_dominate_ordinal_in_sort() {
        let mut acc = StringAccumulator::new(1 << 16);
        acc.add(7, CardId::new(1, 1), 0);
        acc.add(7, CardId::new(0, 9), 0);
        let drained = acc.drain_sorted();
        // Cards sort by raw ID, so subindex 0 comes first.
        assert_eq!(drained[0].card.subindex(), 0);
        assert_eq!(drained[1].card.subindex(), 1);
    }

    #[test]
    fn test_budget() {
        let mut acc = StringAccumulator::new(1);
        for i in 0..20u32 {
            acc.add(i as u128, CardId::new(0, 1), 0);
        }
        assert!(acc.needs_flush());
        acc.drain_sorted();
        assert!(!acc.needs_flush());
    }
}
