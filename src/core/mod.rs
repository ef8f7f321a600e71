//! Core execution logic.
//!
//! This module contains:
//! - Plan: steps, step actions and plan validation
//! - Definition: YAML plan files built into plans
//! - Executor: resumable step-by-step execution
//! - RecordStore: persistence of execution records

pub mod actions;
pub mod definition;
pub mod errors;
pub mod executor;
pub mod plan;
pub mod record_store;

// Re-export commonly used types
pub use actions::{CallAction, DeployAction, ReadAction};
pub use definition::{fingerprint, PlanDefinition, StepDefinition};
pub use errors::{ConfigError, ExecutionError, ExecutorError, StepError};
pub use executor::Executor;
pub use plan::{Plan, Step, StepAction, StepContext};
pub use record_store::{FileRecordStore, MemoryRecordStore, RecordLock, RecordStore};
