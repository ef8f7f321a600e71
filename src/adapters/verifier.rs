//! Explorer verification backends.
//!
//! The explorer API itself is not implemented here. [`CommandVerifier`]
//! shells out to an external tool (for example `npx hardhat verify`), with
//! the contract details substituted into its arguments.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::Verifier;
use crate::domain::ContractHandle;

/// Default time allowed for one verification command
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(300);

/// Verifier that accepts everything without doing anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVerifier;

#[async_trait]
impl Verifier for NoopVerifier {
    fn name(&self) -> &str {
        "noop"
    }

    async fn verify(&self, handle: &ContractHandle) -> Result<()> {
        debug!(contract = %handle.contract, address = %handle.address, "Skipping verification");
        Ok(())
    }
}

/// Verifier that runs an external command per contract.
///
/// Arguments may contain `{address}`, `{contract}` and `{constructor_args}`
/// (hex, `0x`-prefixed).
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandVerifier {
    /// Build from a command line split on whitespace
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .context("Verification command is empty")?;

        Ok(Self {
            program,
            args: parts.collect(),
            timeout: DEFAULT_VERIFY_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments with the handle's details substituted
    fn render_args(&self, handle: &ContractHandle) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{address}", &handle.address.to_string())
                    .replace("{contract}", &handle.contract)
                    .replace("{constructor_args}", &handle.constructor_args.to_string())
            })
            .collect()
    }
}

#[async_trait]
impl Verifier for CommandVerifier {
    fn name(&self) -> &str {
        &self.program
    }

    async fn verify(&self, handle: &ContractHandle) -> Result<()> {
        let args = self.render_args(handle);
        debug!(program = %self.program, ?args, "Running verification command");

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn verification command '{}'", self.program))?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .with_context(|| {
                format!(
                    "Verification of {} timed out after {:?}",
                    handle.contract, self.timeout
                )
            })?
            .with_context(|| format!("Failed to wait for verification of {}", handle.contract))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Verification of {} at {} failed with exit code {}: {}",
                handle.contract,
                handle.address,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        Ok(())
    }
}
