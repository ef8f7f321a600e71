//! Plan executor.
//!
//! Runs the steps of a plan in order against a network client, persisting
//! the execution record after every step attempt. Steps the record already
//! marks as succeeded are skipped, so re-running after a failure resumes at
//! the first unapplied step.

use tracing::{debug, error, info, instrument, warn};

use super::errors::{ConfigError, ExecutionError, ExecutorError, StepError};
use super::plan::{Plan, Step, StepContext};
use super::record_store::RecordStore;
use crate::adapters::{NetworkClient, Verifier};
use crate::domain::{ContractHandle, ExecutionRecord, Registry, StepOutput};

/// Executes plans against one network
pub struct Executor<'a> {
    client: &'a dyn NetworkClient,
    store: &'a dyn RecordStore,
    verifier: Option<&'a dyn Verifier>,
}

impl<'a> Executor<'a> {
    pub fn new(client: &'a dyn NetworkClient, store: &'a dyn RecordStore) -> Self {
        Self {
            client,
            store,
            verifier: None,
        }
    }

    /// Submit every deployed contract to a verifier
    pub fn with_verifier(mut self, verifier: &'a dyn Verifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Run a plan, skipping steps `existing` marks as succeeded.
    ///
    /// Returns the registry only when every step succeeded. The first failing
    /// step stops the run with an [`ExecutionError`].
    #[instrument(skip(self, plan, existing), fields(plan = %plan.name, network = %self.client.name()))]
    pub async fn run(&self, plan: &Plan, existing: Option<ExecutionRecord>) -> Result<Registry, ExecutorError> {
        plan.validate()?;

        let mut record = self.prepare_record(plan, existing)?;
        record.begin_attempt();
        info!(run_id = %record.run_id, attempt = record.attempt, steps = plan.len(), "Starting plan execution");
        self.store.save(&record).await?;

        let mut registry = Registry::new();

        for step in &plan.steps {
            if let Some(output) = record.succeeded_output(&step.name).cloned() {
                self.skip_applied(step, &output, &mut record).await?;
                insert(&mut registry, step, &output)?;
                continue;
            }

            debug!(step = %step.name, kind = %step.kind, "Applying step");
            let ctx = StepContext {
                registry: &registry,
                client: self.client,
            };

            let result = step.apply(ctx).await.and_then(|output| check_kind(step, output));

            match result {
                Ok(output) => {
                    record.mark_succeeded(&step.name, output.clone(), step.fingerprint());
                    self.store.save(&record).await?;
                    insert(&mut registry, step, &output)?;

                    match &output {
                        StepOutput::Deployed(handle) => {
                            info!(step = %step.name, address = %handle.address, "Contract deployed");
                            self.verify(&step.name, handle, &mut record).await?;
                        }
                        StepOutput::Read { address } => info!(step = %step.name, %address, "Address read"),
                        StepOutput::Called { .. } => info!(step = %step.name, "Call applied"),
                    }
                }
                Err(cause) => {
                    error!(step = %step.name, error = %cause, "Step failed");
                    record.mark_failed(&step.name, (&cause).into());
                    self.store.save(&record).await?;

                    return Err(ExecutionError {
                        step: step.name.clone(),
                        cause,
                    }
                    .into());
                }
            }
        }

        record.finish();
        self.store.save(&record).await?;
        info!(run_id = %record.run_id, "Plan completed");

        Ok(registry)
    }

    /// Align an existing record with the plan, or start a fresh one
    fn prepare_record(&self, plan: &Plan, existing: Option<ExecutionRecord>) -> Result<ExecutionRecord, ConfigError> {
        let network = self.client.name();

        let record = match existing {
            Some(record) => {
                if record.plan != plan.name {
                    return Err(ConfigError::RecordMismatch {
                        expected: plan.name.clone(),
                        found: record.plan,
                    });
                }
                if let Some(found) = record.network.as_deref() {
                    if found != network {
                        return Err(ConfigError::NetworkMismatch {
                            expected: network.to_string(),
                            found: found.to_string(),
                        });
                    }
                }

                let (succeeded, failed, pending) = record.counts();
                info!(succeeded, failed, pending, "Resuming from execution record");
                record.reconcile(plan.step_names())
            }
            None => ExecutionRecord::new(plan.name.clone(), plan.step_names()),
        };

        Ok(record.with_network(network))
    }

    /// Handle a step the record already marks as succeeded
    async fn skip_applied(&self, step: &Step, output: &StepOutput, record: &mut ExecutionRecord) -> Result<(), ExecutorError> {
        if output.kind() != step.kind {
            let cause = StepError::UnexpectedOutput(format!(
                "recorded output is a {} result but the step is a {} step",
                output.kind(),
                step.kind
            ));
            error!(step = %step.name, error = %cause, "Recorded output does not match step");
            record.mark_failed(&step.name, (&cause).into());
            self.store.save(record).await?;
            return Err(ExecutionError {
                step: step.name.clone(),
                cause,
            }
            .into());
        }

        let recorded = record.step(&step.name);
        if let (Some(current), Some(previous)) = (step.fingerprint(), recorded.and_then(|s| s.fingerprint.clone())) {
            if current != previous {
                warn!(
                    step = %step.name,
                    recorded = %previous,
                    current = %current,
                    "Step definition changed since it was applied; keeping recorded output"
                );
            }
        }

        info!(step = %step.name, "Step already applied, skipping");

        let unverified = recorded.and_then(|s| s.verified) == Some(false);
        if let (true, Some(handle)) = (unverified, output.handle()) {
            self.verify(&step.name, handle, record).await?;
        }

        Ok(())
    }

    /// Best-effort explorer verification; failures never abort the run
    async fn verify(&self, step: &str, handle: &ContractHandle, record: &mut ExecutionRecord) -> Result<(), ExecutorError> {
        let Some(verifier) = self.verifier else {
            return Ok(());
        };

        let verified = match verifier.verify(handle).await {
            Ok(()) => {
                info!(step, verifier = verifier.name(), "Contract verified");
                true
            }
            Err(e) => {
                warn!(step, verifier = verifier.name(), error = %format!("{:#}", e), "Verification failed");
                false
            }
        };

        record.mark_verified(step, verified);
        self.store.save(record).await?;
        Ok(())
    }
}

/// A step must produce the output its kind promises
fn check_kind(step: &Step, output: StepOutput) -> Result<StepOutput, StepError> {
    if output.kind() == step.kind {
        Ok(output)
    } else {
        Err(StepError::UnexpectedOutput(format!(
            "{} step produced a {} result",
            step.kind,
            output.kind()
        )))
    }
}

fn insert(registry: &mut Registry, step: &Step, output: &StepOutput) -> Result<(), ConfigError> {
    let inserted = match (output.handle(), output.address()) {
        (Some(handle), _) => registry.insert(step.name.clone(), Some(handle.clone())),
        (None, Some(address)) => registry.insert_address(step.name.clone(), address),
        (None, None) => registry.insert(step.name.clone(), None),
    };
    inserted.map_err(|e| ConfigError::DuplicateStep(e.0))
}
