//! Execution record: the persisted status of every step across run attempts.
//!
//! The record is what makes a plan resumable. It is rewritten after every
//! step attempt, so a crash never loses a succeeded step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::output::StepOutput;

/// Current on-disk format version
pub const RECORD_VERSION: u32 = 1;

/// Persisted state of a plan across run attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// Format version
    pub version: u32,

    /// Name of the plan this record tracks
    pub plan: String,

    /// Network the plan was run against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,

    /// Identifier of the latest attempt
    pub run_id: Uuid,

    /// Number of attempts started so far
    pub attempt: u32,

    /// When the latest attempt started
    pub started_at: DateTime<Utc>,

    /// When the latest attempt completed every step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Per-step records, in plan order
    pub steps: Vec<StepRecord>,
}

/// Status of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub step_name: String,

    pub status: StepStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<StepOutput>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordedError>,

    /// Fingerprint of the step definition when it succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    /// Explorer verification outcome (deploy steps only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    pub fn pending(step_name: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            status: StepStatus::Pending,
            output: None,
            error: None,
            fingerprint: None,
            verified: None,
            updated_at: None,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == StepStatus::Succeeded
    }
}

/// Status of a step within the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not attempted yet (or not attempted since the last failure)
    #[default]
    Pending,

    /// Applied on-chain; will be skipped on later runs
    Succeeded,

    /// Last attempt failed
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Succeeded => write!(f, "succeeded"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Error kept in the record for a failed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedError {
    /// Error kind, e.g. "network" or "revert"
    pub kind: String,

    /// Human-readable cause
    pub message: String,
}

impl ExecutionRecord {
    /// Create a fresh record with every step pending
    pub fn new<'a>(plan: impl Into<String>, step_names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            version: RECORD_VERSION,
            plan: plan.into(),
            network: None,
            run_id: Uuid::new_v4(),
            attempt: 0,
            started_at: Utc::now(),
            finished_at: None,
            steps: step_names.into_iter().map(StepRecord::pending).collect(),
        }
    }

    /// Tag the record with the network it runs against
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    /// Re-align the record with the current plan step order.
    ///
    /// Known steps keep their state, new steps become pending, and steps no
    /// longer in the plan are dropped.
    pub fn reconcile<'a>(mut self, step_names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut previous = std::mem::take(&mut self.steps);

        for name in step_names {
            let entry = match previous.iter().position(|s| s.step_name == name) {
                Some(idx) => previous.remove(idx),
                None => StepRecord::pending(name),
            };
            self.steps.push(entry);
        }

        for dropped in previous {
            warn!(
                step = %dropped.step_name,
                status = %dropped.status,
                "Step in execution record is no longer part of the plan, dropping"
            );
        }

        self
    }

    /// Start a new attempt
    pub fn begin_attempt(&mut self) {
        self.attempt += 1;
        self.run_id = Uuid::new_v4();
        self.started_at = Utc::now();
        self.finished_at = None;
    }

    /// Mark the latest attempt as finished
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.step_name == name)
    }

    fn step_mut(&mut self, name: &str) -> &mut StepRecord {
        let idx = match self.steps.iter().position(|s| s.step_name == name) {
            Some(idx) => idx,
            None => {
                self.steps.push(StepRecord::pending(name));
                self.steps.len() - 1
            }
        };
        &mut self.steps[idx]
    }

    /// Output of a step if it already succeeded
    pub fn succeeded_output(&self, name: &str) -> Option<&StepOutput> {
        self.step(name)
            .filter(|s| s.is_succeeded())
            .and_then(|s| s.output.as_ref())
    }

    /// Record a successful step
    pub fn mark_succeeded(&mut self, name: &str, output: StepOutput, fingerprint: Option<String>) {
        let step = self.step_mut(name);
        step.status = StepStatus::Succeeded;
        step.output = Some(output);
        step.error = None;
        step.fingerprint = fingerprint;
        step.verified = None;
        step.updated_at = Some(Utc::now());
    }

    /// Record a failed step
    pub fn mark_failed(&mut self, name: &str, error: RecordedError) {
        let step = self.step_mut(name);
        step.status = StepStatus::Failed;
        step.output = None;
        step.error = Some(error);
        step.updated_at = Some(Utc::now());
    }

    /// Record the explorer verification outcome of a deploy step
    pub fn mark_verified(&mut self, name: &str, verified: bool) {
        let step = self.step_mut(name);
        step.verified = Some(verified);
        step.updated_at = Some(Utc::now());
    }

    /// Whether every step succeeded
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(StepRecord::is_succeeded)
    }

    /// First step that still needs to run
    pub fn first_unapplied(&self) -> Option<&StepRecord> {
        self.steps.iter().find(|s| !s.is_succeeded())
    }

    /// Number of steps in each status: (succeeded, failed, pending)
    pub fn counts(&self) -> (usize, usize, usize) {
        self.steps.iter().fold((0, 0, 0), |(ok, failed, pending), s| match s.status {
            StepStatus::Succeeded => (ok + 1, failed, pending),
            StepStatus::Failed => (ok, failed + 1, pending),
            StepStatus::Pending => (ok, failed, pending + 1),
        })
    }
}
