//! The lexicon: a pre-built, read-only dictionary mapping normalized words
//! to stable numeric IDs.
//!
//! The lexicon is produced by an earlier vocabulary pass and loaded once at
//! startup; entries are immutable afterwards. Entry IDs reserve their low 3
//! bits for the word-class tag and must keep bit 31 clear, since posting
//! chain keys use it to mark meta chains.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use cardex_common::{Result, error::Error};
use cardex_format::chain::META_KEY_BIT;

/// Bits of a lexicon ID carrying the word-class tag.
pub const CLASS_TAG_BITS: u32 = 3;

/// One immutable lexicon entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LexiconEntry {
    /// Stable numeric ID; low [`CLASS_TAG_BITS`] bits are the word-class tag.
    pub id: u32,
    /// Prior corpus frequency of the word.
    pub frequency: u32,
}

impl LexiconEntry {
    /// The word-class tag packed into the ID's low bits.
    #[inline]
    pub fn class_tag(&self) -> u8 {
        (self.id & ((1 << CLASS_TAG_BITS) - 1)) as u8
    }
}

/// The loaded dictionary, exposing a hash lookup from normalized word text
/// to its entry.
pub struct Lexicon {
    map: HashMap<Box<str>, LexiconEntry, ahash::RandomState>,
}

impl Lexicon {
    /// Loads a lexicon from its text serialization: one
    /// `id <TAB> frequency <TAB> word` line per entry.
    ///
    /// Malformed lines, duplicate words and out-of-range IDs are
    /// configuration errors; nothing is written before they surface.
    pub fn load(path: &Path) -> Result<Lexicon> {
        let file = std::fs::File::open(path)
            .map_err(|e| Error::io(format!("open lexicon {}", path.display()), e))?;
        let reader = std::io::BufReader::new(file);
        let mut entries = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| Error::io("read lexicon", e))?;
            if line.is_empty() {
                continue;
            }
            let mut fields = line.splitn(3, '\t');
            let parsed = (|| {
                let id = fields.next()?.parse::<u32>().ok()?;
                let frequency = fields.next()?.parse::<u32>().ok()?;
                let word = fields.next()?;
                Some((word.to_string(), LexiconEntry { id, frequency }))
            })();
            match parsed {
                Some((word, entry)) => entries.push((word, entry)),
                None => {
                    return Err(Error::invalid_format(
                        "lexicon",
                        format!("malformed line {}", line_no + 1),
                    ));
                }
            }
        }
        Self::from_entries(entries)
    }

    /// Builds a lexicon from in-memory `(word, entry)` pairs.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (String, LexiconEntry)>,
    ) -> Result<Lexicon> {
        let mut map: HashMap<Box<str>, LexiconEntry, ahash::RandomState> = HashMap::default();
        for (word, entry) in entries {
            if entry.id & META_KEY_BIT != 0 {
                return Err(Error::invalid_format(
                    "lexicon",
                    format!("entry id {:#x} uses the reserved key bit", entry.id),
                ));
            }
            if map.insert(word.clone().into_boxed_str(), entry).is_some() {
                return Err(Error::invalid_format(
                    "lexicon",
                    format!("duplicate word '{word}'"),
                ));
            }
        }
        Ok(Lexicon { map })
    }

    /// Looks up a normalized word.
    #[inline]
    pub fn lookup(&self, word: &str) -> Option<&LexiconEntry> {
        self.map.get(word)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the lexicon holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
