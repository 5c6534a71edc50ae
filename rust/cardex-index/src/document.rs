//! The parsed-document model at the pipeline's input boundary.
//!
//! Document acquisition and format parsing are out of scope; documents
//! arrive here as a typed attribute set, one JSON object per input line in
//! the batch tool. Everything the pipeline consumes (routing bits, meta
//! fields, references, weight hints) is explicit in this model.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_128;

/// Meta-field classes (the "meta type" classification system, 3 bits).
pub mod meta_class {
    /// Document title.
    pub const TITLE: u8 = 1;
    /// Keyword list.
    pub const KEYWORDS: u8 = 2;
    /// Description / abstract.
    pub const DESCRIPTION: u8 = 3;
    /// Words extracted from the document URL.
    pub const URL_WORDS: u8 = 4;
    /// Anchor text of incoming references.
    pub const ANCHOR: u8 = 5;
}

/// String-posting classes for non-lexicon keys beyond the meta classes.
pub mod string_class {
    /// A plain outgoing reference URL.
    pub const REF: u8 = 6;
    /// A redirect target URL.
    pub const REDIRECT: u8 = 7;
}

/// Body-text occurrence classes (the "word type" classification system).
pub mod word_class {
    /// Plain running text.
    pub const PLAIN: u8 = 0;
    /// Emphasized text (headings, bold).
    pub const EMPHASIS: u8 = 1;
}

/// One tagged meta field of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaField {
    /// One of the [`meta_class`] constants.
    pub class: u8,
    pub text: String,
}

/// One outgoing reference (or redirect) child of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub url: String,
    /// True for redirect targets, false for plain references.
    #[serde(default)]
    pub redirect: bool,
}

/// A parsed document as produced by the out-of-scope gather/parse pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub meta: Vec<MetaField>,
    #[serde(default)]
    pub refs: Vec<Reference>,
    /// Content file-type class, set by format detection upstream.
    #[serde(default)]
    pub file_class: u8,
    /// Secondary partition ID, set by the classifier upstream.
    #[serde(default)]
    pub partition_id: u8,
    /// Number of already-known incoming links.
    #[serde(default)]
    pub incoming_links: u32,
    /// Externally supplied weight bonus (positive) or malus (negative).
    #[serde(default)]
    pub weight_hint: i32,
}

impl Document {
    /// 128-bit content fingerprint of the document.
    pub fn fingerprint(&self) -> u128 {
        let mut buf = Vec::with_capacity(self.url.len() + self.body.len() + 1);
        buf.extend_from_slice(self.url.as_bytes());
        buf.push(0);
        buf.extend_from_slice(self.body.as_bytes());
        xxh3_128(&buf)
    }
}

/// Fingerprint of an arbitrary string key (reference URLs, non-lexicon
/// tokens).
pub fn string_fingerprint(text: &str) -> u128 {
    xxh3_128(text.as_bytes())
}
