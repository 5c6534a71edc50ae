//! Write side of the pipeline: posting accumulation, flush orchestration,
//! card record serialization and the per-subindex output file set.

pub mod accumulator;
pub mod card_writer;
pub mod flush;
pub mod strings;
pub mod subindex;
