//! JSON-RPC network client.
//!
//! Transactions are sent with `eth_sendTransaction`, so the node signs with
//! an unlocked account. Receipts are polled until mined or until the
//! receipt timeout elapses. Reads use `eth_call` against the latest block.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U64};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

use super::{CallRequest, DeployRequest, NetworkClient};
use crate::core::errors::StepError;
use crate::domain::{Deployment, TxReceipt};

/// Default interval between receipt polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default time to wait for a receipt
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Connection and transaction settings for one network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcSettings {
    /// HTTP endpoint of the node
    pub rpc_url: String,

    /// Sending account; the node's first account when unset
    pub from: Option<Address>,

    /// Fixed gas limit; the node estimates when unset
    pub gas_limit: Option<u64>,

    /// Fixed gas price in wei; the node decides when unset
    pub gas_price: Option<u64>,

    pub poll_interval: Duration,

    pub receipt_timeout: Duration,
}

impl RpcSettings {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            from: None,
            gas_limit: None,
            gas_price: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Clone, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: B256,
    #[serde(default)]
    block_number: Option<U64>,
    #[serde(default)]
    gas_used: Option<U64>,
    #[serde(default)]
    contract_address: Option<Address>,
    /// Absent on pre-byzantium chains
    #[serde(default)]
    status: Option<U64>,
}

impl From<RawReceipt> for TxReceipt {
    fn from(raw: RawReceipt) -> Self {
        Self {
            tx_hash: raw.transaction_hash,
            block_number: raw.block_number.map(|n| n.to::<u64>()),
            gas_used: raw.gas_used.map(|n| n.to::<u64>()),
            contract_address: raw.contract_address,
            success: raw.status.map_or(true, |s| s != U64::ZERO),
        }
    }
}

/// Map a JSON-RPC error object to a step error
fn classify_rpc_error(method: &str, err: RpcErrorObject) -> StepError {
    let mut reason = err.message;
    if let Some(Value::String(data)) = &err.data {
        reason = format!("{} ({})", reason, data);
    }

    if reason.to_lowercase().contains("revert") {
        StepError::Revert {
            tx_hash: None,
            reason,
        }
    } else {
        StepError::Network(format!("{} failed with code {}: {}", method, err.code, reason))
    }
}

/// Network client speaking Ethereum JSON-RPC over HTTP
pub struct RpcClient {
    name: String,
    settings: RpcSettings,
    http: reqwest::Client,
    next_id: AtomicU64,
    chain_id: OnceCell<u64>,
    deployer: OnceCell<Address>,
}

impl RpcClient {
    pub fn new(name: impl Into<String>, settings: RpcSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            http: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
            chain_id: OnceCell::new(),
            deployer: OnceCell::new(),
        }
    }

    /// Send one JSON-RPC request. A `null` result yields `None`.
    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<Option<T>, StepError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, "JSON-RPC request");

        let response = self
            .http
            .post(&self.settings.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .map_err(|e| StepError::Network(format!("{} request to {} failed: {}", method, self.settings.rpc_url, e)))?;

        if !response.status().is_success() {
            return Err(StepError::Network(format!(
                "{} returned HTTP {}",
                method,
                response.status()
            )));
        }

        let body: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| StepError::Network(format!("invalid {} response: {}", method, e)))?;

        match body.error {
            Some(err) => Err(classify_rpc_error(method, err)),
            None => Ok(body.result),
        }
    }

    /// Like `request`, but a `null` result is an error
    async fn request_some<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, StepError> {
        self.request(method, params)
            .await?
            .ok_or_else(|| StepError::Network(format!("{} returned no result", method)))
    }

    /// Build the transaction object for `eth_sendTransaction`
    fn transaction(&self, from: Address, to: Option<Address>, data: &Bytes) -> Value {
        let mut tx = json!({
            "from": from,
            "data": data,
        });
        if let Some(to) = to {
            tx["to"] = json!(to);
        }
        if let Some(gas) = self.settings.gas_limit {
            tx["gas"] = json!(format!("{:#x}", gas));
        }
        if let Some(price) = self.settings.gas_price {
            tx["gasPrice"] = json!(format!("{:#x}", price));
        }
        tx
    }

    /// Send a transaction and wait until it is mined successfully
    async fn send_and_wait(&self, to: Option<Address>, data: &Bytes) -> Result<TxReceipt, StepError> {
        let from = self.deployer().await?;
        let tx = self.transaction(from, to, data);

        let tx_hash: B256 = self.request_some("eth_sendTransaction", json!([tx])).await?;
        info!(%tx_hash, "Transaction sent");

        let receipt = self.wait_for_receipt(tx_hash).await?;
        if !receipt.success {
            return Err(StepError::Revert {
                tx_hash: Some(tx_hash),
                reason: format!("transaction {} mined with status 0", tx_hash),
            });
        }

        Ok(receipt)
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt, StepError> {
        let waited = self.settings.receipt_timeout;

        let raw = timeout(waited, self.poll_receipt(tx_hash))
            .await
            .map_err(|_| StepError::Timeout { tx_hash, waited })??;

        Ok(raw.into())
    }

    async fn poll_receipt(&self, tx_hash: B256) -> Result<RawReceipt, StepError> {
        loop {
            if let Some(receipt) = self
                .request::<RawReceipt>("eth_getTransactionReceipt", json!([tx_hash]))
                .await?
            {
                return Ok(receipt);
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}

#[async_trait]
impl NetworkClient for RpcClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deployer(&self) -> Result<Address, StepError> {
        self.deployer
            .get_or_try_init(|| async {
                if let Some(from) = self.settings.from {
                    return Ok::<_, StepError>(from);
                }
                let accounts: Vec<Address> = self.request_some("eth_accounts", json!([])).await?;
                accounts
                    .first()
                    .copied()
                    .ok_or_else(|| StepError::Network("node has no unlocked accounts".to_string()))
            })
            .await
            .copied()
    }

    async fn chain_id(&self) -> Result<u64, StepError> {
        self.chain_id
            .get_or_try_init(|| async {
                let id: U64 = self.request_some("eth_chainId", json!([])).await?;
                Ok::<_, StepError>(id.to::<u64>())
            })
            .await
            .copied()
    }

    #[instrument(skip(self, request), fields(network = %self.name, contract = %request.contract))]
    async fn deploy_contract(&self, request: DeployRequest) -> Result<Deployment, StepError> {
        let code = request
            .bytecode
            .link(&request.libraries)
            .map_err(|e| StepError::Encoding(format!("{}: {}", request.contract, e)))?;

        let mut data = code.to_vec();
        data.extend_from_slice(&request.constructor_args);

        let receipt = self.send_and_wait(None, &Bytes::from(data)).await?;
        let address = receipt.contract_address.ok_or_else(|| {
            StepError::UnexpectedOutput(format!(
                "receipt {} has no contract address",
                receipt.tx_hash
            ))
        })?;

        info!(%address, "Contract deployed");
        Ok(Deployment { address, receipt })
    }

    #[instrument(skip(self, request), fields(network = %self.name, to = %request.to, method = %request.method))]
    async fn call_contract(&self, request: CallRequest) -> Result<TxReceipt, StepError> {
        self.send_and_wait(Some(request.to), &request.calldata).await
    }

    #[instrument(skip(self, request), fields(network = %self.name, to = %request.to, method = %request.method))]
    async fn read_contract(&self, request: CallRequest) -> Result<Bytes, StepError> {
        let from = self.deployer().await?;
        let call = json!({
            "from": from,
            "to": request.to,
            "data": request.calldata,
        });

        let data: Bytes = self.request_some("eth_call", json!([call, "latest"])).await?;
        debug!(len = data.len(), "eth_call returned");
        Ok(data)
    }
}
