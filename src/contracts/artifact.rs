//! Compiled contract artifacts.
//!
//! Artifacts follow the hardhat layout: one `<Contract>.json` per contract
//! somewhere below the artifacts directory, holding the ABI, the creation
//! bytecode and its link references.

use std::path::{Path, PathBuf};

use alloy_json_abi::JsonAbi;
use anyhow::{Context, Result};
use serde::Deserialize;

use super::linker::{LinkReferences, UnlinkedBytecode};

/// A compiled contract: ABI plus unlinked creation code
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    /// Contract name as declared in source
    pub contract_name: String,

    /// Source file the contract was compiled from
    pub source_name: Option<String>,

    /// Contract ABI
    pub abi: JsonAbi,

    /// Creation bytecode (may need linking)
    pub bytecode: UnlinkedBytecode,
}

/// Raw hardhat artifact schema
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifact {
    contract_name: String,
    #[serde(default)]
    source_name: Option<String>,
    abi: JsonAbi,
    #[serde(default)]
    bytecode: String,
    #[serde(default)]
    link_references: LinkReferences,
}

impl ContractArtifact {
    /// Parse an artifact from JSON content
    pub fn from_json(content: &str) -> Result<Self> {
        let raw: RawArtifact =
            serde_json::from_str(content).context("Failed to parse contract artifact")?;

        Ok(Self {
            bytecode: UnlinkedBytecode::new(&raw.bytecode, raw.link_references),
            contract_name: raw.contract_name,
            source_name: raw.source_name,
            abi: raw.abi,
        })
    }

    /// Load an artifact from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read artifact: {}", path.display()))?;

        Self::from_json(&content).with_context(|| format!("Invalid artifact: {}", path.display()))
    }
}

/// Locates artifacts by contract name under a root directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find the artifact file for a contract.
    ///
    /// `<root>/<Contract>.json` wins; otherwise the tree is searched and the
    /// name must be unique.
    pub fn locate(&self, contract: &str) -> Result<PathBuf> {
        let direct = self.root.join(format!("{}.json", contract));
        if direct.is_file() {
            return Ok(direct);
        }

        let pattern = format!(
            "{}/**/{}.json",
            glob::Pattern::escape(&self.root.to_string_lossy()),
            glob::Pattern::escape(contract)
        );

        let matches: Vec<PathBuf> = glob::glob(&pattern)
            .with_context(|| format!("Invalid artifact search pattern: {}", pattern))?
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect();

        match matches.as_slice() {
            [] => anyhow::bail!(
                "No artifact for contract '{}' under {}",
                contract,
                self.root.display()
            ),
            [path] => Ok(path.clone()),
            many => anyhow::bail!(
                "Contract name '{}' is ambiguous, found {} artifacts: {}",
                contract,
                many.len(),
                many.iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }

    /// Load the artifact for a contract
    pub fn load(&self, contract: &str) -> Result<ContractArtifact> {
        let path = self.locate(contract)?;
        let artifact = ContractArtifact::from_file(&path)?;

        if artifact.contract_name != contract {
            anyhow::bail!(
                "Artifact {} declares contract '{}', expected '{}'",
                path.display(),
                artifact.contract_name,
                contract
            );
        }

        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PROXY_ARTIFACT: &str = r#"{
        "_format": "hh-sol-artifact-1",
        "contractName": "ERC20Proxy",
        "sourceName": "contracts/ERC20Proxy.sol",
        "abi": [
            {
                "type": "function",
                "name": "addAuthorizedAddress",
                "inputs": [{ "name": "target", "type": "address", "internalType": "address" }],
                "outputs": [],
                "stateMutability": "nonpayable"
            }
        ],
        "bytecode": "0x6080604052",
        "deployedBytecode": "0x6080",
        "linkReferences": {},
        "deployedLinkReferences": {}
    }"#;

    #[test]
    fn test_parse_hardhat_artifact() {
        let artifact = ContractArtifact::from_json(PROXY_ARTIFACT).unwrap();

        assert_eq!(artifact.contract_name, "ERC20Proxy");
        assert_eq!(artifact.source_name.as_deref(), Some("contracts/ERC20Proxy.sol"));
        assert!(artifact.abi.function("addAuthorizedAddress").is_some());
        assert!(artifact.abi.constructor.is_none());
        assert!(!artifact.bytecode.is_empty());
    }

    #[test]
    fn test_locate_in_nested_directory() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("contracts").join("ERC20Proxy.sol");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("ERC20Proxy.json"), PROXY_ARTIFACT).unwrap();
        std::fs::write(nested.join("ERC20Proxy.dbg.json"), "{}").unwrap();

        let store = ArtifactStore::new(temp.path());
        let artifact = store.load("ERC20Proxy").unwrap();

        assert_eq!(artifact.contract_name, "ERC20Proxy");
    }

    #[test]
    fn test_missing_artifact() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path());

        let err = store.load("Exchange").unwrap_err();
        assert!(err.to_string().contains("No artifact for contract 'Exchange'"));
    }
}
