//! Append-only registry of step outputs.
//!
//! Later steps read addresses and library maps of earlier steps from here.

use std::collections::BTreeMap;

use alloy_primitives::Address;
use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;

use super::output::ContractHandle;

/// Outputs of all succeeded steps, in plan order.
///
/// Deploy steps map to a [`ContractHandle`], read steps to the address they
/// read, and call steps to nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Registry {
    entries: IndexMap<String, Entry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
enum Entry {
    Contract(ContractHandle),
    Address(Address),
    Empty,
}

impl Entry {
    fn handle(&self) -> Option<&ContractHandle> {
        match self {
            Entry::Contract(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Returned when a name is written twice
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("registry entry '{0}' is already written")]
pub struct DuplicateEntry(pub String);

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the output of a step. A name can only be written once.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        handle: Option<ContractHandle>,
    ) -> Result<(), DuplicateEntry> {
        let entry = match handle {
            Some(handle) => Entry::Contract(handle),
            None => Entry::Empty,
        };
        self.put(name.into(), entry)
    }

    /// Record an address a step read from chain state
    pub fn insert_address(&mut self, name: impl Into<String>, address: Address) -> Result<(), DuplicateEntry> {
        self.put(name.into(), Entry::Address(address))
    }

    fn put(&mut self, name: String, entry: Entry) -> Result<(), DuplicateEntry> {
        if self.entries.contains_key(&name) {
            return Err(DuplicateEntry(name));
        }
        self.entries.insert(name, entry);
        Ok(())
    }

    /// Whether the step has an entry of any kind
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Raw entry lookup: `None` if the step never ran, `Some(None)` for a
    /// call or read step
    pub fn entry(&self, name: &str) -> Option<Option<&ContractHandle>> {
        self.entries.get(name).map(Entry::handle)
    }

    /// Contract handle produced by a deploy step
    pub fn get(&self, name: &str) -> Option<&ContractHandle> {
        self.entries.get(name).and_then(Entry::handle)
    }

    /// Address produced by a deploy or read step
    pub fn address(&self, name: &str) -> Option<Address> {
        match self.entries.get(name)? {
            Entry::Contract(handle) => Some(handle.address),
            Entry::Address(address) => Some(*address),
            Entry::Empty => None,
        }
    }

    /// Library linkage used by a deploy step
    pub fn libraries(&self, name: &str) -> Option<&BTreeMap<String, Address>> {
        self.get(name).map(|h| &h.libraries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Step names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Only the deploy entries, in insertion order
    pub fn deployed(&self) -> impl Iterator<Item = (&str, &ContractHandle)> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.handle().map(|h| (k.as_str(), h)))
    }
}
