//! Domain types for deployment plans.
//!
//! This module contains the core data structures:
//! - Output: what a step produces (contract handles, receipts)
//! - Registry: outputs of succeeded steps, read by later steps
//! - Record: persisted per-step status used to resume runs

pub mod output;
pub mod record;
pub mod registry;

// Re-export commonly used types
pub use output::{ContractHandle, Deployment, StepKind, StepOutput, TxReceipt};
pub use record::{ExecutionRecord, RecordedError, StepRecord, StepStatus, RECORD_VERSION};
pub use registry::{DuplicateEntry, Registry};
