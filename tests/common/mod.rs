//! Shared fixtures for integration tests: a scripted network client, a
//! mock JSON-RPC node and small contract artifacts.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use deploy_plan::adapters::{CallRequest, DeployRequest, NetworkClient};
use deploy_plan::contracts::ContractArtifact;
use deploy_plan::domain::{Deployment, TxReceipt};
use deploy_plan::StepError;
use alloy_primitives::{Address, Bytes, B256};

pub const CHAIN_ID: u64 = 1337;

pub fn deployer() -> Address {
    Address::repeat_byte(0xde)
}

/// Network client that answers from a script and logs every request
#[derive(Default)]
pub struct ScriptedClient {
    /// contract name -> address to deploy it at
    addresses: HashMap<String, Address>,
    /// contracts whose deployment reverts
    reverting: HashSet<String>,
    /// methods whose calls time out at the network layer
    failing_methods: HashSet<String>,
    /// method signature -> address returned by a read
    reads: HashMap<String, Address>,
    next_tx: AtomicU8,
    log: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deploys(mut self, contract: &str, address: Address) -> Self {
        self.addresses.insert(contract.to_string(), address);
        self
    }

    pub fn reverts(mut self, contract: &str) -> Self {
        self.reverting.insert(contract.to_string());
        self
    }

    pub fn drops(mut self, method: &str) -> Self {
        self.failing_methods.insert(method.to_string());
        self
    }

    /// Answer reads of `method` (full signature) with `address`
    pub fn reads(mut self, method: &str, address: Address) -> Self {
        self.reads.insert(method.to_string(), address);
        self
    }

    /// Every request seen so far, e.g. `deploy:Exchange`, `call:setB(address)`
    /// or `read:getBootstrapper()`
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn tx_hash(&self) -> B256 {
        B256::repeat_byte(self.next_tx.fetch_add(1, Ordering::SeqCst).wrapping_add(1))
    }

    fn receipt(&self, contract_address: Option<Address>) -> TxReceipt {
        TxReceipt {
            tx_hash: self.tx_hash(),
            block_number: Some(1),
            gas_used: Some(21_000),
            contract_address,
            success: true,
        }
    }
}

#[async_trait]
impl NetworkClient for ScriptedClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn deployer(&self) -> Result<Address, StepError> {
        Ok(deployer())
    }

    async fn chain_id(&self) -> Result<u64, StepError> {
        Ok(CHAIN_ID)
    }

    async fn deploy_contract(&self, request: DeployRequest) -> Result<Deployment, StepError> {
        self.log.lock().unwrap().push(format!("deploy:{}", request.contract));

        request
            .bytecode
            .link(&request.libraries)
            .map_err(|e| StepError::Encoding(e.to_string()))?;

        if self.reverting.contains(&request.contract) {
            return Err(StepError::Revert {
                tx_hash: Some(self.tx_hash()),
                reason: format!("{} constructor reverted", request.contract),
            });
        }

        let address = self
            .addresses
            .get(&request.contract)
            .copied()
            .ok_or_else(|| StepError::Network(format!("no address scripted for {}", request.contract)))?;

        Ok(Deployment {
            address,
            receipt: self.receipt(Some(address)),
        })
    }

    async fn call_contract(&self, request: CallRequest) -> Result<TxReceipt, StepError> {
        self.log.lock().unwrap().push(format!("call:{}", request.method));

        if self.failing_methods.contains(&request.method) {
            return Err(StepError::Network("connection reset by peer".to_string()));
        }

        Ok(self.receipt(None))
    }

    async fn read_contract(&self, request: CallRequest) -> Result<Bytes, StepError> {
        self.log.lock().unwrap().push(format!("read:{}", request.method));

        let address = self
            .reads
            .get(&request.method)
            .copied()
            .ok_or_else(|| StepError::Revert {
                tx_hash: None,
                reason: format!("no read scripted for {}", request.method),
            })?;
        Ok(Bytes::copy_from_slice(address.into_word().as_slice()))
    }
}

/// Answers one JSON-RPC call: `Ok(result)` or `Err(error object)`
pub type RpcHandler = Arc<dyn Fn(&str, &Value) -> Result<Value, Value> + Send + Sync>;

/// HTTP JSON-RPC node on a local port, answering through a handler
pub struct MockNode {
    url: String,
    requests: Arc<Mutex<Vec<(String, Value)>>>,
}

impl MockNode {
    pub async fn start(handler: impl Fn(&str, &Value) -> Result<Value, Value> + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        tokio::spawn(serve(listener, Arc::new(handler), requests.clone()));
        Self { url, requests }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Methods called so far, in order
    pub fn methods(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    /// Params of every call to `method`
    pub fn params(&self, method: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

async fn serve(listener: TcpListener, handler: RpcHandler, requests: Arc<Mutex<Vec<(String, Value)>>>) {
    while let Ok((stream, _)) = listener.accept().await {
        let handler = handler.clone();
        let requests = requests.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stream);
            // keep-alive: one request per loop
            while let Some(body) = read_request(&mut reader).await {
                let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
                let method = request["method"].as_str().unwrap_or_default().to_string();
                let params = request["params"].clone();
                requests.lock().unwrap().push((method.clone(), params.clone()));

                let response = match handler(method.as_str(), &params) {
                    Ok(result) => json!({ "jsonrpc": "2.0", "id": request["id"], "result": result }),
                    Err(error) => json!({ "jsonrpc": "2.0", "id": request["id"], "error": error }),
                };
                if write_response(reader.get_mut(), &response.to_string()).await.is_err() {
                    break;
                }
            }
        });
    }
}

async fn read_request(reader: &mut BufReader<TcpStream>) -> Option<Vec<u8>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }

    let mut content_length = 0;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).await.ok()? == 0 {
            return None;
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().ok()?;
            }
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await.ok()?;
    Some(body)
}

async fn write_response(stream: &mut TcpStream, body: &str) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body.as_bytes()).await?;
    stream.flush().await
}

/// Receipt JSON as a node returns it
pub fn receipt_json(tx_hash: B256, contract_address: Option<Address>, success: bool) -> Value {
    json!({
        "transactionHash": tx_hash,
        "blockNumber": "0x1",
        "gasUsed": "0x5208",
        "contractAddress": contract_address,
        "status": if success { "0x1" } else { "0x0" },
    })
}

/// Contract `A`: no constructor, `setB(address)` setter
pub const ARTIFACT_A: &str = r#"{
    "contractName": "A",
    "sourceName": "contracts/A.sol",
    "abi": [
        {
            "type": "function",
            "name": "setB",
            "inputs": [{ "name": "b", "type": "address" }],
            "outputs": [],
            "stateMutability": "nonpayable"
        }
    ],
    "bytecode": "0x60806040",
    "linkReferences": {}
}"#;

/// Contract `B`: constructor takes the address of `A`
pub const ARTIFACT_B: &str = r#"{
    "contractName": "B",
    "sourceName": "contracts/B.sol",
    "abi": [
        {
            "type": "constructor",
            "inputs": [{ "name": "a", "type": "address" }],
            "stateMutability": "nonpayable"
        }
    ],
    "bytecode": "0x60806041",
    "linkReferences": {}
}"#;

/// Library `LibMath`
pub const ARTIFACT_LIB: &str = r#"{
    "contractName": "LibMath",
    "sourceName": "contracts/LibMath.sol",
    "abi": [],
    "bytecode": "0x60806042",
    "linkReferences": {}
}"#;

/// Contract `Calc`: links `LibMath` at byte 1, constructor takes a chain id
pub const ARTIFACT_CALC: &str = r#"{
    "contractName": "Calc",
    "sourceName": "contracts/Calc.sol",
    "abi": [
        {
            "type": "constructor",
            "inputs": [{ "name": "chainId", "type": "uint256" }],
            "stateMutability": "nonpayable"
        },
        {
            "type": "function",
            "name": "setOwner",
            "inputs": [{ "name": "owner", "type": "address" }],
            "outputs": [],
            "stateMutability": "nonpayable"
        }
    ],
    "bytecode": "0x73__$4f1a7c9b0e2d3a5f6c8b9d0e1f2a3b4c5d$__00",
    "linkReferences": {
        "contracts/LibMath.sol": {
            "LibMath": [{ "start": 1, "length": 20 }]
        }
    }
}"#;

/// Contract `Migrator`: hands out a bootstrapper and takes a struct config
pub const ARTIFACT_MIGRATOR: &str = r#"{
    "contractName": "Migrator",
    "sourceName": "contracts/Migrator.sol",
    "abi": [
        {
            "type": "function",
            "name": "getBootstrapper",
            "inputs": [],
            "outputs": [{ "name": "", "type": "address", "internalType": "address" }],
            "stateMutability": "view"
        },
        {
            "type": "function",
            "name": "migrate",
            "inputs": [
                { "name": "target", "type": "address" },
                {
                    "name": "config",
                    "type": "tuple",
                    "internalType": "struct Migrator.Config",
                    "components": [
                        { "name": "owner", "type": "address" },
                        { "name": "fee", "type": "uint256" },
                        { "name": "names", "type": "string[]" }
                    ]
                }
            ],
            "outputs": [],
            "stateMutability": "nonpayable"
        }
    ],
    "bytecode": "0x60806043",
    "linkReferences": {}
}"#;

pub fn artifact(json: &str) -> Arc<ContractArtifact> {
    Arc::new(ContractArtifact::from_json(json).unwrap())
}

/// Write every fixture artifact under `dir` in hardhat layout
pub fn write_artifacts(dir: &std::path::Path) {
    for (name, json) in [
        ("A", ARTIFACT_A),
        ("B", ARTIFACT_B),
        ("LibMath", ARTIFACT_LIB),
        ("Calc", ARTIFACT_CALC),
        ("Migrator", ARTIFACT_MIGRATOR),
    ] {
        let sol = dir.join("contracts").join(format!("{}.sol", name));
        std::fs::create_dir_all(&sol).unwrap();
        std::fs::write(sol.join(format!("{}.json", name)), json).unwrap();
    }
}
