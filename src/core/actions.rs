//! Deploy, call and read steps built from compiled artifacts.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy_json_abi::Function;
use alloy_primitives::Address;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::errors::StepError;
use super::plan::{StepAction, StepContext};
use crate::adapters::{CallRequest, DeployRequest, NetworkClient};
use crate::contracts::args::{self, ArgEnv, CHAIN_ID_PLACEHOLDER, DEPLOYER_PLACEHOLDER};
use crate::contracts::ContractArtifact;
use crate::domain::{ContractHandle, Registry, StepOutput};

/// Fetch only the network facts the arguments actually mention
async fn arg_env(client: &dyn NetworkClient, values: &[Value]) -> Result<ArgEnv, StepError> {
    let mut env = ArgEnv::default();
    if args::mentions(values, DEPLOYER_PLACEHOLDER) {
        env.deployer = Some(client.deployer().await?);
    }
    if args::mentions(values, CHAIN_ID_PLACEHOLDER) {
        env.chain_id = Some(client.chain_id().await?);
    }
    Ok(env)
}

fn address_of(registry: &Registry, step: &str) -> Result<Address, StepError> {
    registry
        .address(step)
        .ok_or_else(|| StepError::Resolve(format!("step '{}' has no address", step)))
}

/// Deploy a contract, linking libraries deployed by earlier steps
#[derive(Debug, Clone)]
pub struct DeployAction {
    artifact: Arc<ContractArtifact>,
    args: Vec<Value>,
    /// library name -> step that deployed it
    libraries: BTreeMap<String, String>,
    fingerprint: Option<String>,
}

impl DeployAction {
    pub fn new(artifact: Arc<ContractArtifact>) -> Self {
        Self {
            artifact,
            args: Vec::new(),
            libraries: BTreeMap::new(),
            fingerprint: None,
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Link `library` to the address deployed by `step`
    pub fn with_library(mut self, library: impl Into<String>, step: impl Into<String>) -> Self {
        self.libraries.insert(library.into(), step.into());
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn contract(&self) -> &str {
        &self.artifact.contract_name
    }
}

#[async_trait]
impl StepAction for DeployAction {
    async fn apply(&self, ctx: StepContext<'_>) -> Result<StepOutput, StepError> {
        let env = arg_env(ctx.client, &self.args).await?;
        let constructor_args = args::encode_constructor(&self.artifact.abi, &self.args, ctx.registry, &env)?;

        let libraries = self
            .libraries
            .iter()
            .map(|(library, step)| Ok((library.clone(), address_of(ctx.registry, step)?)))
            .collect::<Result<BTreeMap<_, _>, StepError>>()?;

        debug!(contract = %self.contract(), libraries = libraries.len(), "Deploying contract");

        let deployment = ctx
            .client
            .deploy_contract(DeployRequest {
                contract: self.contract().to_string(),
                bytecode: self.artifact.bytecode.clone(),
                constructor_args: constructor_args.clone(),
                libraries: libraries.clone(),
            })
            .await?;

        let handle = ContractHandle::new(self.contract(), deployment.address)
            .with_libraries(libraries)
            .with_tx_hash(deployment.receipt.tx_hash)
            .with_constructor_args(constructor_args);

        Ok(StepOutput::Deployed(handle))
    }

    fn fingerprint(&self) -> Option<String> {
        self.fingerprint.clone()
    }
}

/// Send a state-changing call to a contract deployed by an earlier step
#[derive(Debug, Clone)]
pub struct CallAction {
    target: String,
    function: Function,
    args: Vec<Value>,
    fingerprint: Option<String>,
}

impl CallAction {
    pub fn new(target: impl Into<String>, function: Function) -> Self {
        Self {
            target: target.into(),
            function,
            args: Vec::new(),
            fingerprint: None,
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl StepAction for CallAction {
    async fn apply(&self, ctx: StepContext<'_>) -> Result<StepOutput, StepError> {
        let to = address_of(ctx.registry, &self.target)?;
        let env = arg_env(ctx.client, &self.args).await?;
        let calldata = args::encode_call(&self.function, &self.args, ctx.registry, &env)?;

        let receipt = ctx
            .client
            .call_contract(CallRequest {
                to,
                method: self.function.signature(),
                calldata,
            })
            .await?;

        Ok(StepOutput::Called {
            tx_hash: Some(receipt.tx_hash),
        })
    }

    fn fingerprint(&self) -> Option<String> {
        self.fingerprint.clone()
    }
}

/// Read an address from a contract deployed by an earlier step. Nothing is
/// sent; the result is registered under the step name.
#[derive(Debug, Clone)]
pub struct ReadAction {
    target: String,
    function: Function,
    args: Vec<Value>,
    fingerprint: Option<String>,
}

impl ReadAction {
    pub fn new(target: impl Into<String>, function: Function) -> Self {
        Self {
            target: target.into(),
            function,
            args: Vec::new(),
            fingerprint: None,
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl StepAction for ReadAction {
    async fn apply(&self, ctx: StepContext<'_>) -> Result<StepOutput, StepError> {
        let to = address_of(ctx.registry, &self.target)?;
        let env = arg_env(ctx.client, &self.args).await?;
        let calldata = args::encode_call(&self.function, &self.args, ctx.registry, &env)?;

        let data = ctx
            .client
            .read_contract(CallRequest {
                to,
                method: self.function.signature(),
                calldata,
            })
            .await?;

        let address = args::decode_address(&self.function, &data)?;
        debug!(target = %self.target, method = %self.function.name, %address, "Read address");

        Ok(StepOutput::Read { address })
    }

    fn fingerprint(&self) -> Option<String> {
        self.fingerprint.clone()
    }
}
