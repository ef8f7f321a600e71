//! Error kinds raised while building and executing a plan.

use std::time::Duration;

use alloy_primitives::B256;
use thiserror::Error;

use crate::domain::RecordedError;

/// A malformed plan. Always raised before any network activity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("plan '{0}' has no steps")]
    EmptyPlan(String),

    #[error("step {index} has an empty name")]
    EmptyStepName { index: usize },

    #[error("duplicate step name '{0}'")]
    DuplicateStep(String),

    #[error("step '{step}': {reason}")]
    InvalidStep { step: String, reason: String },

    #[error("step '{step}' references non-existent step '{reference}'")]
    UnknownReference { step: String, reference: String },

    #[error("step '{step}' references later step '{reference}' (forward references not allowed)")]
    ForwardReference { step: String, reference: String },

    #[error("step '{step}': {reason}")]
    Artifact { step: String, reason: String },

    #[error("execution record belongs to plan '{found}', expected '{expected}'")]
    RecordMismatch { expected: String, found: String },

    #[error("execution record was captured on network '{found}', not '{expected}'")]
    NetworkMismatch { expected: String, found: String },
}

impl ConfigError {
    pub(crate) fn invalid(step: &str, reason: impl Into<String>) -> Self {
        Self::InvalidStep {
            step: step.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure of a single step attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// RPC or transport failure; retrying the run may succeed
    #[error("network error: {0}")]
    Network(String),

    /// The transaction reverted on-chain
    #[error("transaction reverted: {reason}")]
    Revert {
        tx_hash: Option<B256>,
        reason: String,
    },

    /// No receipt arrived in time
    #[error("no receipt for transaction {tx_hash} after {waited:?}")]
    Timeout { tx_hash: B256, waited: Duration },

    /// A registry reference was missing when the step ran
    #[error("unresolved reference: {0}")]
    Resolve(String),

    /// Arguments could not be coerced, encoded or linked
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The step produced output that does not match its kind
    #[error("unexpected step output: {0}")]
    UnexpectedOutput(String),
}

impl StepError {
    /// Short kind name stored in the execution record
    pub fn kind(&self) -> &'static str {
        match self {
            StepError::Network(_) => "network",
            StepError::Revert { .. } => "revert",
            StepError::Timeout { .. } => "timeout",
            StepError::Resolve(_) => "resolve",
            StepError::Encoding(_) => "encoding",
            StepError::UnexpectedOutput(_) => "unexpected_output",
        }
    }

    /// Whether re-running the plan unchanged may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StepError::Network(_) | StepError::Timeout { .. })
    }
}

impl From<&StepError> for RecordedError {
    fn from(err: &StepError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// The first step failure of a run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("step '{step}' failed: {cause}")]
pub struct ExecutionError {
    /// Name of the failed step
    pub step: String,

    /// Underlying cause
    #[source]
    pub cause: StepError,
}

/// Everything `Executor::run` can fail with
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("execution record error: {0:#}")]
    Record(#[from] anyhow::Error),
}

impl ExecutorError {
    /// The step failure, if the run got as far as executing steps
    pub fn execution(&self) -> Option<&ExecutionError> {
        match self {
            ExecutorError::Execution(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_display() {
        let err = ExecutionError {
            step: "deployB".to_string(),
            cause: StepError::Revert {
                tx_hash: None,
                reason: "Ownable: caller is not the owner".to_string(),
            },
        };

        assert_eq!(
            err.to_string(),
            "step 'deployB' failed: transaction reverted: Ownable: caller is not the owner"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(StepError::Network("connection refused".to_string()).is_transient());
        assert!(StepError::Timeout {
            tx_hash: B256::ZERO,
            waited: Duration::from_secs(1)
        }
        .is_transient());
        assert!(!StepError::Revert {
            tx_hash: None,
            reason: String::new()
        }
        .is_transient());
    }

    #[test]
    fn test_recorded_error_keeps_kind() {
        let recorded = RecordedError::from(&StepError::Resolve("step 'a'".to_string()));

        assert_eq!(recorded.kind, "resolve");
        assert!(recorded.message.contains("step 'a'"));
    }
}
