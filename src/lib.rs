//! deploy-plan - Resumable smart contract deployment plans
//!
//! Deploys a set of compiled contracts to a network, wires their addresses
//! together with configuration calls, and optionally verifies each contract
//! on a block explorer.
//!
//! # Architecture
//!
//! The system is built around a persisted execution record:
//! - A plan is an ordered list of deploy, call and read steps
//! - Each step reads earlier outputs from an append-only registry
//! - The record is saved after every step attempt
//! - Re-running a plan skips recorded steps and resumes at the first
//!   unapplied one
//!
//! # Modules
//!
//! - `adapters`: Network client (JSON-RPC) and explorer verifiers
//! - `contracts`: Artifacts, library linking, argument encoding
//! - `core`: Plans, plan files, executor, record stores
//! - `domain`: Data structures (Registry, ExecutionRecord, outputs)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Check a plan against the compiled artifacts
//! deploy-plan validate --plan asset-wrapper
//!
//! # Deploy (re-run the same command to resume after a failure)
//! deploy-plan run --network kovan --plan asset-wrapper
//!
//! # Inspect the execution record
//! deploy-plan status ~/.deploy-plan/records/asset-wrapper-kovan.json
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod contracts;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{NetworkClient, RpcClient, Verifier};
pub use core::{ConfigError, ExecutionError, Executor, ExecutorError, Plan, PlanDefinition, Step, StepError};
pub use domain::{ContractHandle, ExecutionRecord, Registry, StepKind, StepOutput};
