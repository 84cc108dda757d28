//! Deployment configuration.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    fs::FsHandler,
    ledger::DEFAULT_LEDGER_PATH,
    marketplace::MarketplaceParams,
    plan::DeploymentPlan,
    request::ResourceLimits,
    step::SaltStrategy,
    tracker::DEFAULT_TX_TIMEOUT,
};

/// Name of the configuration file looked up in configuration directories.
pub const CONFIG_FILENAME: &str = "Zkdata.toml";

/// Rococo contracts parachain.
pub const DEFAULT_ENDPOINT: &str = "wss://rococo-contracts-rpc.polkadot.io";

const DEFAULT_GAS_LIMIT: u64 = 200_000_000_000;
const DEFAULT_STORAGE_DEPOSIT_LIMIT: u64 = 500_000_000_000;

/// What to do with a wiring or smoke-test call whose contract (or a dependency of its arguments)
/// was never deployed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingContractPolicy {
    /// Log and skip the call.
    Skip,
    /// Wiring aborts the run; a smoke test is recorded as failed.
    #[default]
    Fail,
}

/// Everything a pipeline run needs besides the plan and the signing credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Chain endpoint URL.
    pub endpoint: String,
    /// Root of the compiled contract artifacts.
    pub artifacts_dir: PathBuf,
    pub ledger_path: PathBuf,
    /// Compute bound for wiring and smoke-test calls.
    pub call_gas_limit: u64,
    pub tx_timeout_secs: u64,
    /// How many times a failed connection attempt is retried.
    pub connect_retries: usize,
    pub smoke_tests: bool,
    pub missing_contracts: MissingContractPolicy,
    /// Fixed salt seed. A random salt is used per instantiation when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    /// Custom plan file. The marketplace plan is deployed when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_path: Option<PathBuf>,
    pub instantiate_limits: ResourceLimits,
    pub marketplace: MarketplaceParams,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            artifacts_dir: PathBuf::from("contracts"),
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            call_gas_limit: DEFAULT_GAS_LIMIT,
            tx_timeout_secs: DEFAULT_TX_TIMEOUT.as_secs(),
            connect_retries: 3,
            smoke_tests: true,
            missing_contracts: MissingContractPolicy::default(),
            salt: None,
            plan_path: None,
            instantiate_limits: ResourceLimits {
                gas_limit: DEFAULT_GAS_LIMIT,
                storage_deposit_limit: Some(DEFAULT_STORAGE_DEPOSIT_LIMIT),
                // The marketplace constructors are not payable.
                value: 0,
            },
            marketplace: MarketplaceParams::default(),
        }
    }
}

impl DeployConfig {
    pub fn tx_timeout(&self) -> Duration {
        Duration::from_secs(self.tx_timeout_secs)
    }

    /// Limits for a wiring or smoke-test call transferring `value`.
    pub fn call_limits(&self, value: u64) -> ResourceLimits {
        ResourceLimits {
            gas_limit: self.call_gas_limit,
            storage_deposit_limit: None,
            value,
        }
    }

    pub fn salt_strategy(&self) -> SaltStrategy {
        self.salt
            .clone()
            .map(SaltStrategy::Fixed)
            .unwrap_or_default()
    }

    /// The plan to deploy: the configured plan file, or the marketplace plan.
    pub fn plan(&self) -> Result<DeploymentPlan> {
        match &self.plan_path {
            Some(path) => DeploymentPlan::load_from_file(path),
            None => Ok(self.marketplace.plan()),
        }
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize deploy config to TOML")?;
        FsHandler::write_file(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Load the configuration from a TOML file, or from [`CONFIG_FILENAME`] inside a directory.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let config_path = Self::resolve_config_path(path)?;

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
        let config: Self =
            toml::from_str(&content).context("Failed to parse config file as TOML")?;
        tracing::info!(path = %config_path.display(), "Configuration loaded");
        Ok(config)
    }

    /// The configuration file `path` designates.
    pub fn resolve_config_path(path: &Path) -> Result<PathBuf> {
        if !path.exists() {
            anyhow::bail!("Configuration file or directory not found: {}", path.display());
        }

        Ok(if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        })
    }
}
