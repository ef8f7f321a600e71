//! Plans and steps.
//!
//! A plan is an ordered list of steps. Each step reads the outputs of
//! earlier steps from the registry and either creates a contract or sends a
//! configuration call.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::errors::{ConfigError, StepError};
use crate::adapters::NetworkClient;
use crate::domain::{Registry, StepKind, StepOutput};

/// What a step sees while it runs
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    /// Outputs of every earlier succeeded step
    pub registry: &'a Registry,

    /// Chain access
    pub client: &'a dyn NetworkClient,
}

/// The work a step performs
#[async_trait]
pub trait StepAction: Send + Sync {
    async fn apply(&self, ctx: StepContext<'_>) -> Result<StepOutput, StepError>;

    /// Content hash of the step definition, used to spot edits between runs
    fn fingerprint(&self) -> Option<String> {
        None
    }
}

/// A named, immutable unit of a plan
#[derive(Clone)]
pub struct Step {
    /// Step name (unique within the plan)
    pub name: String,

    pub kind: StepKind,

    action: Arc<dyn StepAction>,
}

impl Step {
    pub fn new(name: impl Into<String>, kind: StepKind, action: impl StepAction + 'static) -> Self {
        Self {
            name: name.into(),
            kind,
            action: Arc::new(action),
        }
    }

    /// A step that creates a contract
    pub fn deploy(name: impl Into<String>, action: impl StepAction + 'static) -> Self {
        Self::new(name, StepKind::Deploy, action)
    }

    /// A step that calls an existing contract
    pub fn call(name: impl Into<String>, action: impl StepAction + 'static) -> Self {
        Self::new(name, StepKind::Call, action)
    }

    /// A step that reads an address from an existing contract
    pub fn read(name: impl Into<String>, action: impl StepAction + 'static) -> Self {
        Self::new(name, StepKind::Read, action)
    }

    pub async fn apply(&self, ctx: StepContext<'_>) -> Result<StepOutput, StepError> {
        self.action.apply(ctx).await
    }

    pub fn fingerprint(&self) -> Option<String> {
        self.action.fingerprint()
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// An ordered sequence of steps.
///
/// Steps may only read outputs of steps strictly earlier in the sequence.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Plan name (used for records and on the CLI)
    pub name: String,

    pub description: String,

    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Check that the plan is non-empty and step names are unique
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.steps.is_empty() {
            return Err(ConfigError::EmptyPlan(self.name.clone()));
        }

        let mut seen = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            if step.name.is_empty() {
                return Err(ConfigError::EmptyStepName { index });
            }
            if !seen.insert(step.name.as_str()) {
                return Err(ConfigError::DuplicateStep(step.name.clone()));
            }
        }

        Ok(())
    }

    /// Step names in plan order
    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.name.as_str())
    }

    pub fn get_step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn step_index(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
