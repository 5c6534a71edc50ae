//! Subindex routing: mapping a document's classification bits to zero or
//! one destination partition.
//!
//! A run is configured with an ordered list of `(type_mask, id_mask)` pairs,
//! one per subindex. A document matches a subindex when its file-type class
//! bit is set in the type mask and its partition-ID bit is set in the ID
//! mask; the first match wins, and a document matching nothing is dropped
//! (and counted by the driver). With no configuration, one implicit "main"
//! subindex matches everything.
//!
//! Routing is decided once per document, before any posting begins; the
//! result is embedded in every card ID minted for the document, which makes
//! flush-time demultiplexing a pure bit test on the ID.

use std::path::Path;

use serde::{Deserialize, Serialize};

use cardex_common::{Result, error::Error};
use cardex_format::card_id::MAX_SUBINDICES;

/// Configuration of one output subindex.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubIndexSpec {
    /// Directory name of the subindex under the index root.
    pub name: String,
    /// Bitmask over content file-type classes (bit `c` matches class `c`).
    pub type_mask: u32,
    /// Bitmask over secondary partition IDs.
    pub id_mask: u32,
}

impl SubIndexSpec {
    /// The implicit catch-all partition used when no configuration exists.
    pub fn main() -> SubIndexSpec {
        SubIndexSpec {
            name: "main".to_string(),
            type_mask: u32::MAX,
            id_mask: u32::MAX,
        }
    }
}

/// The per-run router over the configured subindex list.
pub struct Router {
    specs: Vec<SubIndexSpec>,
}

impl Router {
    /// Validates a subindex configuration and builds the router. An empty
    /// list configures the single implicit "main" subindex.
    pub fn new(mut specs: Vec<SubIndexSpec>) -> Result<Router> {
        if specs.is_empty() {
            specs.push(SubIndexSpec::main());
        }
        if specs.len() > MAX_SUBINDICES {
            return Err(Error::invalid_arg(
                "subindexes",
                format!("at most {MAX_SUBINDICES} subindices are supported"),
            ));
        }
        for (i, spec) in specs.iter().enumerate() {
            if spec.name.is_empty() || spec.name.contains(['/', '\\']) {
                return Err(Error::invalid_arg(
                    "subindexes",
                    format!("invalid subindex name at position {i}"),
                ));
            }
            if spec.type_mask == 0 || spec.id_mask == 0 {
                return Err(Error::invalid_arg(
                    "subindexes",
                    format!("subindex '{}' has an empty mask", spec.name),
                ));
            }
            if specs[..i].iter().any(|s| s.name == spec.name) {
                return Err(Error::invalid_arg(
                    "subindexes",
                    format!("duplicate subindex name '{}'", spec.name),
                ));
            }
        }
        Ok(Router { specs })
    }

    /// Loads the configuration from a JSON file holding a `SubIndexSpec`
    /// array.
    pub fn from_json_file(path: &Path) -> Result<Router> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("read subindex config {}", path.display()), e))?;
        let specs: Vec<SubIndexSpec> = serde_json::from_str(&text)
            .map_err(|e| Error::invalid_format("subindex config", e.to_string()))?;
        Router::new(specs)
    }

    /// Routes a document's classification bits to the first matching
    /// subindex, or `None` when the document is to be dropped.
    ///
    /// Classes and partition IDs of 32 and above never match any mask.
    pub fn route(&self, file_class: u8, partition_id: u8) -> Option<u8> {
        let type_bit = 1u32.checked_shl(file_class as u32)?;
        let id_bit = 1u32.checked_shl(partition_id as u32)?;
        self.specs
            .iter()
            .position(|s| s.type_mask & type_bit != 0 && s.id_mask & id_bit != 0)
            .map(|i| i as u8)
    }

    /// The configured subindex list, in routing order.
    pub fn specs(&self) -> &[SubIndexSpec] {
        &self.specs
    }

    /// Number of configured subindices.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Always false; a router carries at least the implicit main subindex.
    pub fn is_empty(&self) -> bool {
        false
    }
}
