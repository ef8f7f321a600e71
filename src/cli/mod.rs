//! Command-line interface for deploy-plan.
//!
//! Provides commands for running plans against a network, inspecting
//! execution records, validating plan files and showing configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::{CommandVerifier, RpcClient, Verifier};
use crate::config::{self, ResolvedConfig};
use crate::contracts::ArtifactStore;
use crate::core::{Executor, ExecutorError, FileRecordStore, Plan, PlanDefinition, RecordStore};
use crate::domain::{ExecutionRecord, StepKind, StepOutput, StepStatus};

/// deploy-plan - Resumable smart contract deployment plans
#[derive(Parser, Debug)]
#[command(name = "deploy-plan")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a plan against a network, resuming from its execution record
    Run {
        /// Network name (from config, or `localhost`)
        #[arg(short, long, env = "DEPLOY_PLAN_NETWORK")]
        network: String,

        /// Plan name (looks for <plans>/<name>.yaml) or path
        #[arg(short, long)]
        plan: Option<String>,

        /// Resume from this execution record (must exist)
        #[arg(long, conflicts_with = "record")]
        resume: Option<PathBuf>,

        /// Execution record path (default: <home>/records/<plan>-<network>.json)
        #[arg(long)]
        record: Option<PathBuf>,

        /// Ignore any existing execution record and start over
        #[arg(long, conflicts_with = "resume")]
        fresh: bool,

        /// Skip explorer verification
        #[arg(long)]
        no_verify: bool,

        /// Print the registry as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show per-step status of an execution record
    Status {
        /// Execution record path
        record: PathBuf,

        /// Compare against this plan to report edited steps
        #[arg(short, long)]
        plan: Option<String>,
    },

    /// Build a plan against the artifacts without touching the network
    Validate {
        /// Plan name or path
        #[arg(short, long)]
        plan: Option<String>,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                network,
                plan,
                resume,
                record,
                fresh,
                no_verify,
                json,
            } => {
                let options = RunOptions {
                    network,
                    plan,
                    resume,
                    record,
                    fresh,
                    verify: !no_verify,
                    json,
                };
                run_plan(options).await
            }
            Commands::Status { record, plan } => show_status(&record, plan.as_deref()).await,
            Commands::Validate { plan } => validate_plan(plan.as_deref()),
            Commands::Config => show_config(),
        }
    }
}

struct RunOptions {
    network: String,
    plan: Option<String>,
    resume: Option<PathBuf>,
    record: Option<PathBuf>,
    fresh: bool,
    verify: bool,
    json: bool,
}

/// Run a plan and print the deployed addresses
async fn run_plan(options: RunOptions) -> Result<()> {
    let cfg = config::config()?;
    let plan = load_plan(cfg, options.plan.as_deref())?;
    let network = cfg.network(&options.network)?;

    let record_path = match (&options.resume, &options.record) {
        (Some(path), _) => {
            if !path.is_file() {
                anyhow::bail!("Execution record not found: {}", path.display());
            }
            path.clone()
        }
        (None, Some(path)) => path.clone(),
        (None, None) => cfg.record_path(&plan.name, &network.name),
    };

    let store = FileRecordStore::new(&record_path);
    let _lock = store.lock()?;

    let existing = if options.fresh { None } else { store.load().await? };
    if let Some(record) = &existing {
        let (succeeded, _, _) = record.counts();
        eprintln!(
            "Resuming from {} ({} of {} steps already applied)",
            record_path.display(),
            succeeded,
            record.steps.len()
        );
    }

    let verifier: Option<Box<dyn Verifier>> = match (&network.verify_command, options.verify) {
        (Some(command), true) => Some(Box::new(CommandVerifier::from_command_line(command)?)),
        _ => None,
    };

    let client = RpcClient::new(network.name.clone(), network.rpc.clone());
    let mut executor = Executor::new(&client, &store);
    if let Some(verifier) = verifier.as_deref() {
        executor = executor.with_verifier(verifier);
    }

    match executor.run(&plan, existing).await {
        Ok(registry) => {
            if options.json {
                println!("{}", serde_json::to_string_pretty(&registry)?);
            } else {
                for (name, handle) in registry.deployed() {
                    println!("{}={}", name.to_uppercase(), handle.address);
                }
            }
            eprintln!(
                "\n[Plan '{}' completed on {}; record: {}]",
                plan.name,
                network.name,
                record_path.display()
            );
            Ok(())
        }
        Err(ExecutorError::Execution(failure)) => {
            eprintln!("Step '{}' failed: {}", failure.step, failure.cause);
            if failure.cause.is_transient() {
                eprintln!("The failure looks transient; re-run the same command to resume.");
            }
            eprintln!("[Execution record saved to {}]", record_path.display());
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

/// Show the status of an execution record
async fn show_status(record_path: &Path, plan: Option<&str>) -> Result<()> {
    let store = FileRecordStore::new(record_path);
    let record = store
        .load()
        .await?
        .with_context(|| format!("Execution record not found: {}", record_path.display()))?;

    let plan = match plan {
        Some(name) => Some(load_plan(config::config()?, Some(name))?),
        None => None,
    };

    print!("{}", format_status(&record, plan.as_ref()));
    Ok(())
}

/// Render a record as a status table
fn format_status(record: &ExecutionRecord, plan: Option<&Plan>) -> String {
    let (succeeded, failed, pending) = record.counts();
    let mut out = String::new();

    out.push_str(&format!("Plan:     {}\n", record.plan));
    out.push_str(&format!("Network:  {}\n", record.network.as_deref().unwrap_or("(unknown)")));
    out.push_str(&format!("Run ID:   {} (attempt {})\n", record.run_id, record.attempt));
    out.push_str(&format!("Started:  {}\n", record.started_at));
    if let Some(finished) = record.finished_at {
        out.push_str(&format!("Finished: {}\n", finished));
    }
    out.push_str(&format!(
        "Steps:    {} succeeded, {} failed, {} pending\n\n",
        succeeded, failed, pending
    ));

    for step in &record.steps {
        let detail = match (&step.status, &step.output, &step.error) {
            (StepStatus::Succeeded, Some(StepOutput::Deployed(handle)), _) => {
                let verified = match step.verified {
                    Some(true) => " (verified)",
                    Some(false) => " (verification failed)",
                    None => "",
                };
                format!("{} {}{}", handle.contract, handle.address, verified)
            }
            (StepStatus::Succeeded, Some(StepOutput::Read { address }), _) => format!("-> {}", address),
            (StepStatus::Succeeded, Some(StepOutput::Called { tx_hash: Some(tx) }), _) => format!("tx {}", tx),
            (StepStatus::Failed, _, Some(error)) => format!("[{}] {}", error.kind, error.message),
            _ => String::new(),
        };

        let drifted = plan
            .and_then(|p| p.get_step(&step.step_name))
            .and_then(|s| s.fingerprint())
            .zip(step.fingerprint.as_ref())
            .is_some_and(|(current, recorded)| step.is_succeeded() && &current != recorded);

        out.push_str(&format!("  {:<40} {:<10} {}", step.step_name, step.status.to_string(), detail));
        if drifted {
            out.push_str("  [definition changed]");
        }
        out.push('\n');
    }

    out
}

/// Build a plan and print its steps
fn validate_plan(plan: Option<&str>) -> Result<()> {
    let cfg = config::config()?;
    let plan = load_plan(cfg, plan)?;

    let count = |kind: StepKind| plan.steps.iter().filter(|s| s.kind == kind).count();
    println!(
        "Plan '{}' is valid: {} steps ({} deploys, {} calls, {} reads)",
        plan.name,
        plan.len(),
        count(StepKind::Deploy),
        count(StepKind::Call),
        count(StepKind::Read)
    );
    for (i, step) in plan.steps.iter().enumerate() {
        println!("  {:>3}. {:<6} {}", i + 1, step.kind.to_string(), step.name);
    }

    Ok(())
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("deploy-plan configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:      {}", cfg.home.display());
    println!("  Artifacts: {}", cfg.artifacts.display());
    println!("  Plans:     {}", cfg.plans.display());
    println!("  Records:   {}", cfg.records.display());
    println!();
    println!("Default plan: {}", cfg.default_plan);
    println!();
    println!("Networks:");
    for name in cfg.network_names() {
        match cfg.network(name) {
            Ok(network) => {
                let verify = if network.verify_command.is_some() { " (verify)" } else { "" };
                println!("  {:<16} {}{}", name, network.rpc.rpc_url, verify);
            }
            Err(e) => println!("  {:<16} ({})", name, e),
        }
    }

    Ok(())
}

/// Load a plan file by name or path and build it against the artifacts
fn load_plan(cfg: &ResolvedConfig, plan: Option<&str>) -> Result<Plan> {
    let name = plan.unwrap_or(cfg.default_plan.as_str());
    let path = cfg.plan_path(name);

    if !path.is_file() {
        anyhow::bail!(
            "Plan '{}' not found. Looked for:\n  - {}\n  - {}",
            name,
            name,
            path.display()
        );
    }

    let definition = PlanDefinition::from_file(&path)?;
    let artifacts = ArtifactStore::new(&cfg.artifacts);

    definition
        .build(&artifacts)
        .with_context(|| format!("Invalid plan: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContractHandle, RecordedError};
    use alloy_primitives::Address;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "deploy-plan",
            "run",
            "--network",
            "kovan",
            "--plan",
            "asset-wrapper",
            "--json",
        ])
        .unwrap();

        match cli.command {
            Commands::Run { network, plan, json, fresh, .. } => {
                assert_eq!(network, "kovan");
                assert_eq!(plan.as_deref(), Some("asset-wrapper"));
                assert!(json);
                assert!(!fresh);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_resume_conflicts_with_fresh() {
        let result = Cli::try_parse_from([
            "deploy-plan",
            "run",
            "--network",
            "localhost",
            "--resume",
            "r.json",
            "--fresh",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_status_table() {
        let mut record = ExecutionRecord::new("asset-wrapper", ["erc20_proxy", "exchange", "authorize", "bootstrapper"])
            .with_network("kovan");
        record.mark_succeeded(
            "bootstrapper",
            StepOutput::Read {
                address: Address::repeat_byte(0x0b),
            },
            None,
        );
        record.mark_succeeded(
            "erc20_proxy",
            StepOutput::Deployed(ContractHandle::new("ERC20Proxy", Address::repeat_byte(0x01))),
            None,
        );
        record.mark_verified("erc20_proxy", false);
        record.mark_failed(
            "exchange",
            RecordedError {
                kind: "revert".to_string(),
                message: "transaction reverted: out of gas".to_string(),
            },
        );

        let table = format_status(&record, None);

        assert!(table.contains("2 succeeded, 1 failed, 1 pending"));
        assert!(table.contains(&format!("-> {}", Address::repeat_byte(0x0b))));
        assert!(table.contains("ERC20Proxy"));
        assert!(table.contains("(verification failed)"));
        assert!(table.contains("[revert] transaction reverted: out of gas"));
    }
}
