//! Library linking for unlinked creation bytecode.
//!
//! Compilers leave a 20-byte placeholder wherever a library address is
//! embedded. The artifact's `linkReferences` lists those slots as byte
//! offsets into the bytecode.

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{Address, Bytes};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of bytes in an address slot
const ADDRESS_LEN: usize = 20;

/// One placeholder slot in the bytecode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkOffset {
    /// Byte offset of the slot
    pub start: usize,

    /// Length of the slot in bytes (always 20)
    pub length: usize,
}

/// source file -> library name -> placeholder slots
pub type LinkReferences = BTreeMap<String, BTreeMap<String, Vec<LinkOffset>>>;

/// Errors raised while linking bytecode
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("library '{0}' is required but no address was provided")]
    MissingLibrary(String),

    #[error("invalid link offset for library '{library}' at byte {start}")]
    BadOffset { library: String, start: usize },

    #[error("bytecode still contains unlinked library placeholders")]
    Unlinked,

    #[error("bytecode is not valid hex: {0}")]
    InvalidHex(String),
}

/// Creation bytecode that may still need library addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlinkedBytecode {
    /// Hex without the 0x prefix
    hex: String,
    link_references: LinkReferences,
}

impl UnlinkedBytecode {
    pub fn new(hex: impl AsRef<str>, link_references: LinkReferences) -> Self {
        let hex = hex.as_ref();
        Self {
            hex: hex.strip_prefix("0x").unwrap_or(hex).to_string(),
            link_references,
        }
    }

    /// Whether the artifact has no creation code (interfaces, abstract contracts)
    pub fn is_empty(&self) -> bool {
        self.hex.is_empty()
    }

    /// Names of the libraries that must be linked
    pub fn libraries(&self) -> BTreeSet<&str> {
        self.link_references
            .values()
            .flat_map(|libs| libs.keys().map(String::as_str))
            .collect()
    }

    /// Creation code as hex, without the 0x prefix
    pub fn hex(&self) -> &str {
        &self.hex
    }

    pub fn link_references(&self) -> &LinkReferences {
        &self.link_references
    }

    /// Substitute library addresses into every placeholder slot
    pub fn link(&self, libraries: &BTreeMap<String, Address>) -> Result<Bytes, LinkError> {
        if !self.hex.is_ascii() {
            return Err(LinkError::InvalidHex("non-ASCII characters".to_string()));
        }

        let mut code = self.hex.clone();

        for libs in self.link_references.values() {
            for (library, offsets) in libs {
                let address = libraries
                    .get(library)
                    .ok_or_else(|| LinkError::MissingLibrary(library.clone()))?;
                let address_hex = hex::encode(address.as_slice());

                for offset in offsets {
                    let slot = offset
                        .start
                        .checked_mul(2)
                        .and_then(|from| Some((from, from.checked_add(ADDRESS_LEN * 2)?)))
                        .filter(|&(_, to)| offset.length == ADDRESS_LEN && to <= code.len());
                    let Some((from, to)) = slot else {
                        return Err(LinkError::BadOffset {
                            library: library.clone(),
                            start: offset.start,
                        });
                    };
                    code.replace_range(from..to, &address_hex);
                }
            }
        }

        hex::decode(&code).map(Bytes::from).map_err(|e| {
            if code.contains("__") {
                LinkError::Unlinked
            } else {
                LinkError::InvalidHex(e.to_string())
            }
        })
    }
}
