//! Configuration for deploy-plan paths and networks.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (DEPLOY_PLAN_HOME, DEPLOY_PLAN_ARTIFACTS, DEPLOY_PLAN_PLANS)
//! 2. Config file (.deploy-plan/config.yaml)
//! 3. Defaults (~/.deploy-plan, ./artifacts, ./plans)
//!
//! Config file discovery:
//! - Searches current directory and parents for .deploy-plan/config.yaml
//! - Paths in config file are relative to the project root (the parent of
//!   .deploy-plan/), except `home` which is relative to .deploy-plan/

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use alloy_primitives::Address;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::adapters::rpc::{RpcSettings, DEFAULT_POLL_INTERVAL, DEFAULT_RECEIPT_TIMEOUT};

/// Directory holding the config file
pub const CONFIG_DIR: &str = ".deploy-plan";

/// Network available without configuration
pub const LOCALHOST: &str = "localhost";

/// RPC endpoint of the built-in localhost network
pub const LOCALHOST_RPC: &str = "http://127.0.0.1:8545";

/// Plan used when none is given
pub const DEFAULT_PLAN: &str = "asset-wrapper";

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub default_plan: Option<String>,
    #[serde(default)]
    pub networks: IndexMap<String, NetworkConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .deploy-plan/)
    pub home: Option<String>,
    /// Compiled artifacts directory
    pub artifacts: Option<String>,
    /// Plan files directory
    pub plans: Option<String>,
    /// Execution records directory (defaults to <home>/records)
    pub records: Option<String>,
}

/// Settings for one network as written in the config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Node endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,

    /// Environment variable holding the node endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url_env: Option<String>,

    /// Sending account (node's first account if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,

    /// Gas price in wei
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_timeout_seconds: Option<u64>,

    /// Explorer verification command, with {address}, {contract} and
    /// {constructor_args} placeholders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_command: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state directory
    pub home: PathBuf,
    /// Compiled artifacts directory
    pub artifacts: PathBuf,
    /// Plan files directory
    pub plans: PathBuf,
    /// Execution records directory
    pub records: PathBuf,
    /// Plan used when none is given
    pub default_plan: String,
    /// Configured networks
    pub networks: IndexMap<String, NetworkConfig>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

/// Everything needed to connect to one network
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    pub name: String,
    pub rpc: RpcSettings,
    pub verify_command: Option<String>,
}

/// Environment variable consulted when a network names no endpoint
pub fn rpc_env_var(network: &str) -> String {
    format!("{}_RPC", network.to_uppercase().replace('-', "_"))
}

impl ResolvedConfig {
    /// Connection settings for a network
    pub fn network(&self, name: &str) -> Result<NetworkSettings> {
        self.network_with_env(name, &|key| std::env::var(key).ok())
    }

    fn network_with_env(&self, name: &str, env: &dyn Fn(&str) -> Option<String>) -> Result<NetworkSettings> {
        let configured = self.networks.get(name);
        if configured.is_none() && name != LOCALHOST && env(&rpc_env_var(name)).is_none() {
            anyhow::bail!(
                "Unknown network '{}' (configured: {})",
                name,
                self.network_names().join(", ")
            );
        }
        let network = configured.cloned().unwrap_or_default();

        let rpc_url = match (&network.rpc_url, &network.rpc_url_env) {
            (Some(url), _) => url.clone(),
            (None, Some(var)) => env(var)
                .with_context(|| format!("Network '{}' reads its RPC URL from ${}, which is not set", name, var))?,
            (None, None) => match env(&rpc_env_var(name)) {
                Some(url) => url,
                None if name == LOCALHOST => LOCALHOST_RPC.to_string(),
                None => anyhow::bail!(
                    "Network '{}' has no rpc_url; set rpc_url, rpc_url_env or ${}",
                    name,
                    rpc_env_var(name)
                ),
            },
        };

        let mut rpc = RpcSettings::new(rpc_url);
        rpc.from = network.from;
        rpc.gas_limit = network.gas_limit;
        rpc.gas_price = network.gas_price;
        rpc.poll_interval = network
            .poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        rpc.receipt_timeout = network
            .receipt_timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RECEIPT_TIMEOUT);

        Ok(NetworkSettings {
            name: name.to_string(),
            rpc,
            verify_command: network.verify_command,
        })
    }

    /// Configured network names, localhost included
    pub fn network_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.networks.keys().map(String::as_str).collect();
        if !self.networks.contains_key(LOCALHOST) {
            names.push(LOCALHOST);
        }
        names
    }

    /// Resolve a plan argument: an existing path, or a name in the plans directory
    pub fn plan_path(&self, plan: &str) -> PathBuf {
        let direct = PathBuf::from(plan);
        if direct.is_file() {
            return direct;
        }
        self.plans.join(format!("{}.yaml", plan))
    }

    /// Default record path for a plan on a network
    pub fn record_path(&self, plan: &str, network: &str) -> PathBuf {
        self.records.join(format!("{}-{}.json", plan, network))
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to a base directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Combine config file, environment and defaults
fn resolve(config_file: Option<(PathBuf, ConfigFile)>, env: &dyn Fn(&str) -> Option<String>) -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let (config_path, config) = match config_file {
        Some((path, config)) => (Some(path), config),
        None => (None, ConfigFile::default()),
    };

    // Project root is the parent of .deploy-plan/; without a config file, the current directory
    let config_dir = config_path.as_deref().and_then(Path::parent);
    let base_dir = match config_dir.and_then(Path::parent) {
        Some(root) => root.to_path_buf(),
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };

    let home = match (env("DEPLOY_PLAN_HOME"), &config.paths.home, config_dir) {
        (Some(env_home), _, _) => PathBuf::from(env_home),
        (None, Some(home), Some(dir)) => resolve_path(dir, home),
        _ => default_home,
    };

    let artifacts = match (env("DEPLOY_PLAN_ARTIFACTS"), &config.paths.artifacts) {
        (Some(path), _) => PathBuf::from(path),
        (None, Some(path)) => resolve_path(&base_dir, path),
        (None, None) => base_dir.join("artifacts"),
    };

    let plans = match (env("DEPLOY_PLAN_PLANS"), &config.paths.plans) {
        (Some(path), _) => PathBuf::from(path),
        (None, Some(path)) => resolve_path(&base_dir, path),
        (None, None) => base_dir.join("plans"),
    };

    let records = match &config.paths.records {
        Some(path) => resolve_path(&base_dir, path),
        None => home.join("records"),
    };

    Ok(ResolvedConfig {
        home,
        artifacts,
        plans,
        records,
        default_plan: config
            .default_plan
            .unwrap_or_else(|| DEFAULT_PLAN.to_string()),
        networks: config.networks,
        config_file: config_path,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let config_file = match find_config_file() {
        Some(path) => {
            let config = load_config_file(&path)?;
            Some((path, config))
        }
        None => None,
    };

    resolve(config_file, &|key| std::env::var(key).ok())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
