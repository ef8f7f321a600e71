//! Outputs produced by plan steps.
//!
//! A deploy step yields a [`ContractHandle`] that later steps consume through
//! the registry. A read step yields an address taken from chain state, and a
//! call step only yields the transaction it mined.

use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

/// Kind of work a step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Creates a new contract
    Deploy,

    /// Executes a state-changing call on an existing contract
    Call,

    /// Reads an address from an existing contract with `eth_call`
    Read,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::Deploy => write!(f, "deploy"),
            StepKind::Call => write!(f, "call"),
            StepKind::Read => write!(f, "read"),
        }
    }
}

/// A deployed contract as seen by later steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractHandle {
    /// Name of the compiled contract
    pub contract: String,

    /// On-chain address
    pub address: Address,

    /// Libraries linked into the deployed bytecode (library name -> address)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub libraries: BTreeMap<String, Address>,

    /// Hash of the creation transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,

    /// ABI-encoded constructor arguments (needed for explorer verification)
    #[serde(default)]
    pub constructor_args: Bytes,
}

impl ContractHandle {
    /// Create a handle with no linked libraries
    pub fn new(contract: impl Into<String>, address: Address) -> Self {
        Self {
            contract: contract.into(),
            address,
            libraries: BTreeMap::new(),
            tx_hash: None,
            constructor_args: Bytes::new(),
        }
    }

    /// Attach the linked library map
    pub fn with_libraries(mut self, libraries: BTreeMap<String, Address>) -> Self {
        self.libraries = libraries;
        self
    }

    /// Attach the creation transaction hash
    pub fn with_tx_hash(mut self, tx_hash: B256) -> Self {
        self.tx_hash = Some(tx_hash);
        self
    }

    /// Attach the encoded constructor arguments
    pub fn with_constructor_args(mut self, args: Bytes) -> Self {
        self.constructor_args = args;
        self
    }
}

/// The recorded result of a succeeded step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutput {
    /// A contract was created
    Deployed(ContractHandle),

    /// A call was mined
    Called {
        #[serde(default, rename = "txHash", skip_serializing_if = "Option::is_none")]
        tx_hash: Option<B256>,
    },

    /// An address was read from chain state
    Read { address: Address },
}

impl StepOutput {
    /// The kind of step that produces this output
    pub fn kind(&self) -> StepKind {
        match self {
            StepOutput::Deployed(_) => StepKind::Deploy,
            StepOutput::Called { .. } => StepKind::Call,
            StepOutput::Read { .. } => StepKind::Read,
        }
    }

    /// The contract handle, if this output came from a deployment
    pub fn handle(&self) -> Option<&ContractHandle> {
        match self {
            StepOutput::Deployed(handle) => Some(handle),
            StepOutput::Called { .. } | StepOutput::Read { .. } => None,
        }
    }

    /// The address later steps can reference, if any
    pub fn address(&self) -> Option<Address> {
        match self {
            StepOutput::Deployed(handle) => Some(handle.address),
            StepOutput::Read { address } => Some(*address),
            StepOutput::Called { .. } => None,
        }
    }
}

/// Receipt of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub contract_address: Option<Address>,
    pub success: bool,
}

/// Result of a contract creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub address: Address,
    pub receipt: TxReceipt,
}
