//! Compiled contracts: artifacts, library linking and argument encoding.

pub mod args;
pub mod artifact;
pub mod linker;

pub use args::{encode_call, encode_constructor, find_function, ArgEnv};
pub use artifact::{ArtifactStore, ContractArtifact};
pub use linker::{LinkError, LinkOffset, LinkReferences, UnlinkedBytecode};
