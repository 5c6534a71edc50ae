//! On-disk format of the cardex inverted index.
//!
//! This crate owns every byte layout that ends up in an index directory:
//! Card IDs and their bit partitioning, the variable-width occurrence codecs
//! (`wt` for delta-coded body occurrences, `mt` for absolute meta
//! occurrences), the card-head framing of posting chains, the fixed-layout
//! attribute/note/parameters records, and the card record headers.
//!
//! All width-class breakpoints in this crate are opaque, empirically tuned
//! format constants. They must not be re-derived: readers of existing
//! indexes depend on the exact values.

pub mod card_id;
pub mod chain;
pub mod postings;
pub mod records;
pub mod vlen;

pub use card_id::CardId;
