//! Adapter interfaces for external systems.
//!
//! The executor talks to the chain through [`NetworkClient`] and to a
//! block explorer through [`Verifier`]. Both are injected, so tests can
//! substitute scripted implementations.

pub mod rpc;
pub mod verifier;

use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;

use crate::contracts::UnlinkedBytecode;
use crate::core::errors::StepError;
use crate::domain::{ContractHandle, Deployment, TxReceipt};

pub use rpc::{RpcClient, RpcSettings};
pub use verifier::{CommandVerifier, NoopVerifier};

/// A contract creation request
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Contract name (for logs and errors)
    pub contract: String,

    /// Creation code, linked by the client
    pub bytecode: UnlinkedBytecode,

    /// ABI-encoded constructor arguments, appended after linking
    pub constructor_args: Bytes,

    /// Library name -> address used for linking
    pub libraries: BTreeMap<String, Address>,
}

/// A call request, sent as a transaction or evaluated read-only
#[derive(Debug, Clone)]
pub struct CallRequest {
    /// Contract receiving the call
    pub to: Address,

    /// Function signature (for logs and errors)
    pub method: String,

    /// Selector plus encoded arguments
    pub calldata: Bytes,
}

/// Chain access used by plan steps
#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// Human-readable network name
    fn name(&self) -> &str;

    /// Account that sends every transaction
    async fn deployer(&self) -> Result<Address, StepError>;

    /// Chain id of the connected network
    async fn chain_id(&self) -> Result<u64, StepError>;

    /// Create a contract and wait for it to be mined
    async fn deploy_contract(&self, request: DeployRequest) -> Result<Deployment, StepError>;

    /// Send a call and wait for it to be mined
    async fn call_contract(&self, request: CallRequest) -> Result<TxReceipt, StepError>;

    /// Evaluate a call against current chain state without sending a
    /// transaction. Returns the raw return data.
    async fn read_contract(&self, request: CallRequest) -> Result<Bytes, StepError>;
}

/// Block-explorer source verification. Always best-effort.
#[async_trait]
pub trait Verifier: Send + Sync {
    fn name(&self) -> &str;

    /// Submit a deployed contract for verification
    async fn verify(&self, handle: &ContractHandle) -> anyhow::Result<()>;
}
