//! Declarative plan files.
//!
//! A plan file is YAML listing `deploy`, `call` and `read` steps. Building it into a
//! [`Plan`] loads every artifact and checks every reference, so a malformed
//! plan fails before anything touches the network.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

use super::actions::{CallAction, DeployAction, ReadAction};
use super::errors::ConfigError;
use super::plan::{Plan, Step};
use crate::contracts::args::{self, find_function};
use crate::contracts::{ArtifactStore, ContractArtifact};
use crate::domain::StepKind;

/// A plan as written in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDefinition {
    /// Plan name (used for records and on the CLI)
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub steps: Vec<StepDefinition>,
}

/// One step as written in YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDefinition {
    pub name: String,

    pub kind: StepKind,

    /// Contract to deploy (deploy steps)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,

    /// Step whose contract receives the call (call and read steps)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Contract whose ABI encodes the call, when it differs from the
    /// target's (calls through a proxy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi: Option<String>,

    /// Function name or full signature (call and read steps)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,

    /// library name -> step that deployed it
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub libraries: BTreeMap<String, String>,
}

/// Hash content into a short fingerprint (first 16 hex chars of SHA-256)
pub fn fingerprint(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(&digest[..8])
}

impl StepDefinition {
    /// Fingerprint of the definition plus the bytecode it deploys
    fn fingerprint(&self, artifact: &ContractArtifact) -> String {
        let definition = serde_json::to_string(self).unwrap_or_default();
        fingerprint(&format!("{}\n{}", definition, artifact.bytecode.hex()))
    }
}

impl PlanDefinition {
    /// Load a plan definition from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;

        Self::from_yaml(&content).with_context(|| format!("Invalid plan file: {}", path.display()))
    }

    /// Parse a plan definition from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse plan YAML")
    }

    /// Build an executable plan, loading artifacts from `artifacts`
    pub fn build(&self, artifacts: &ArtifactStore) -> Result<Plan, ConfigError> {
        if self.steps.is_empty() {
            return Err(ConfigError::EmptyPlan(self.name.clone()));
        }

        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, step) in self.steps.iter().enumerate() {
            if step.name.is_empty() {
                return Err(ConfigError::EmptyStepName { index: i });
            }
            if index.insert(step.name.as_str(), i).is_some() {
                return Err(ConfigError::DuplicateStep(step.name.clone()));
            }
        }

        let mut loader = ArtifactLoader::new(artifacts);
        let mut steps = Vec::with_capacity(self.steps.len());

        for (position, step) in self.steps.iter().enumerate() {
            let refs = References {
                steps: &self.steps,
                index: &index,
                position,
            };

            for reference in args::references(&step.args) {
                refs.deployed(&step.name, reference)?;
            }

            let built = match step.kind {
                StepKind::Deploy => self.build_deploy(step, &refs, &mut loader)?,
                StepKind::Call | StepKind::Read => self.build_call(step, &refs, &mut loader)?,
            };
            steps.push(built);
        }

        let plan = Plan::new(self.name.clone(), steps).with_description(self.description.clone());
        plan.validate()?;
        Ok(plan)
    }

    fn build_deploy(&self, step: &StepDefinition, refs: &References<'_>, loader: &mut ArtifactLoader<'_>) -> Result<Step, ConfigError> {
        let contract = step
            .contract
            .as_deref()
            .ok_or_else(|| ConfigError::invalid(&step.name, "deploy step needs a 'contract'"))?;
        if step.target.is_some() || step.method.is_some() || step.abi.is_some() {
            return Err(ConfigError::invalid(
                &step.name,
                "'target', 'abi' and 'method' only apply to call and read steps",
            ));
        }

        let artifact = loader.load(&step.name, contract)?;
        if artifact.bytecode.is_empty() {
            return Err(ConfigError::Artifact {
                step: step.name.clone(),
                reason: format!("contract '{}' has no creation bytecode", contract),
            });
        }

        for library in artifact.bytecode.libraries() {
            if !step.libraries.contains_key(library) {
                return Err(ConfigError::invalid(
                    &step.name,
                    format!("library '{}' must be linked but is not listed", library),
                ));
            }
        }
        for (library, source) in &step.libraries {
            refs.deployed(&step.name, source)?;
            if !artifact.bytecode.libraries().contains(library.as_str()) {
                warn!(step = %step.name, library = %library, "Library is not referenced by the bytecode");
            }
        }

        let expected = artifact
            .abi
            .constructor
            .as_ref()
            .map_or(0, |c| c.inputs.len());
        if expected != step.args.len() {
            return Err(ConfigError::invalid(
                &step.name,
                format!(
                    "constructor of '{}' takes {} arguments, got {}",
                    contract,
                    expected,
                    step.args.len()
                ),
            ));
        }

        let mut action = DeployAction::new(artifact.clone())
            .with_args(step.args.clone())
            .with_fingerprint(step.fingerprint(&artifact));
        for (library, source) in &step.libraries {
            action = action.with_library(library.clone(), source.clone());
        }

        Ok(Step::deploy(step.name.clone(), action))
    }

    /// Build a call or read step; both resolve a function on a target
    fn build_call(&self, step: &StepDefinition, refs: &References<'_>, loader: &mut ArtifactLoader<'_>) -> Result<Step, ConfigError> {
        let target = step
            .target
            .as_deref()
            .ok_or_else(|| ConfigError::invalid(&step.name, format!("{} step needs a 'target'", step.kind)))?;
        let method = step
            .method
            .as_deref()
            .ok_or_else(|| ConfigError::invalid(&step.name, format!("{} step needs a 'method'", step.kind)))?;
        if step.contract.is_some() || !step.libraries.is_empty() {
            return Err(ConfigError::invalid(
                &step.name,
                "'contract' and 'libraries' only apply to deploy steps",
            ));
        }

        let target_step = refs.deployed(&step.name, target)?;
        let abi_contract = match (&step.abi, &target_step.contract) {
            (Some(abi), _) => abi.as_str(),
            (None, Some(contract)) => contract.as_str(),
            (None, None) => {
                return Err(ConfigError::invalid(
                    &step.name,
                    format!("cannot tell which ABI target '{}' uses; set 'abi'", target),
                ))
            }
        };

        let artifact = loader.load(&step.name, abi_contract)?;
        let function = find_function(&artifact.abi, method, step.args.len())
            .map_err(|reason| ConfigError::invalid(&step.name, format!("{}: {}", abi_contract, reason)))?
            .clone();

        let fingerprint = step.fingerprint(&artifact);
        if step.kind == StepKind::Read {
            if !args::returns_address(&function) {
                return Err(ConfigError::invalid(
                    &step.name,
                    format!("{}.{} must return a single address", abi_contract, function.name),
                ));
            }
            let action = ReadAction::new(target, function)
                .with_args(step.args.clone())
                .with_fingerprint(fingerprint);
            return Ok(Step::read(step.name.clone(), action));
        }

        let action = CallAction::new(target, function)
            .with_args(step.args.clone())
            .with_fingerprint(fingerprint);

        Ok(Step::call(step.name.clone(), action))
    }
}

/// Reference checks relative to one step's position
struct References<'a> {
    steps: &'a [StepDefinition],
    index: &'a HashMap<&'a str, usize>,
    position: usize,
}

impl<'a> References<'a> {
    /// Resolve a reference to an earlier step that yields an address
    fn deployed(&self, step: &str, reference: &str) -> Result<&'a StepDefinition, ConfigError> {
        let target = match self.index.get(reference) {
            None => {
                return Err(ConfigError::UnknownReference {
                    step: step.to_string(),
                    reference: reference.to_string(),
                })
            }
            Some(&i) if i >= self.position => {
                return Err(ConfigError::ForwardReference {
                    step: step.to_string(),
                    reference: reference.to_string(),
                })
            }
            Some(&i) => &self.steps[i],
        };

        if target.kind == StepKind::Call {
            return Err(ConfigError::invalid(
                step,
                format!("'{}' is a call step and has no address", reference),
            ));
        }

        Ok(target)
    }
}

/// Loads each artifact once per build
struct ArtifactLoader<'a> {
    store: &'a ArtifactStore,
    cache: HashMap<String, Arc<ContractArtifact>>,
}

impl<'a> ArtifactLoader<'a> {
    fn new(store: &'a ArtifactStore) -> Self {
        Self {
            store,
            cache: HashMap::new(),
        }
    }

    fn load(&mut self, step: &str, contract: &str) -> Result<Arc<ContractArtifact>, ConfigError> {
        if let Some(artifact) = self.cache.get(contract) {
            return Ok(artifact.clone());
        }

        let artifact = self
            .store
            .load(contract)
            .map(Arc::new)
            .map_err(|e| ConfigError::Artifact {
                step: step.to_string(),
                reason: format!("{:#}", e),
            })?;

        self.cache.insert(contract.to_string(), artifact.clone());
        Ok(artifact)
    }
}
