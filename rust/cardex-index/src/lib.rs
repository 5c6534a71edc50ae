//! Index-construction pipeline of the cardex search engine.
//!
//! This crate turns a stream of parsed documents into an on-disk inverted
//! index: it assigns dense card IDs through a batched, barrier-flushed
//! allocator, routes every document into one of up to eight output
//! subindices, accumulates word and string occurrence postings under a
//! memory budget, and drains them through the shared posting-list codec of
//! [`cardex_format`]. Document acquisition and format parsing are external
//! collaborators; documents enter here already parsed (see
//! [`document::Document`]).

pub mod alloc;
pub mod document;
pub mod lexicon;
pub mod normalize;
pub mod router;
pub mod scan;
pub mod write;
