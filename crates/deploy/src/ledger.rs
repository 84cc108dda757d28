//! Deployment records and their persistence.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::primitives::{Address, B256};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::fs::FsHandler;

/// Default location of the deployment ledger.
pub const DEFAULT_LEDGER_PATH: &str = "deployment/addresses.json";

/// Summary of one deployed contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractEntry {
    pub address: Address,
    pub code_hash: B256,
    pub deployed: bool,
}

/// Result of a completed run, handed to a [`DeploymentLedger`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// RFC 3339 timestamp of the end of the run.
    pub timestamp: String,
    /// Endpoint the contracts were deployed to.
    pub network: String,
    pub deployer: Address,
    /// Fingerprint of the plan that produced this record.
    pub plan_hash: String,
    pub contracts: BTreeMap<String, ContractEntry>,
    /// Smoke-test failures. Empty when the deployment validated cleanly.
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl DeploymentRecord {
    pub fn new(network: impl Into<String>, deployer: Address, plan_hash: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            network: network.into(),
            deployer,
            plan_hash: plan_hash.into(),
            contracts: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    pub fn address_of(&self, contract: &str) -> Option<Address> {
        self.contracts.get(contract).map(|entry| entry.address)
    }
}

/// Durable sink for deployment records.
pub trait DeploymentLedger: Send + Sync {
    fn persist(&self, record: &DeploymentRecord) -> Result<()>;
}

/// Ledger writing each record as pretty JSON to a single file, replacing the previous one.
#[derive(Debug, Clone)]
pub struct JsonFileLedger {
    path: PathBuf,
}

impl Default for JsonFileLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_PATH)
    }
}

impl JsonFileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back the last persisted record.
    pub fn load(&self) -> Result<DeploymentRecord> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read ledger from {}", self.path.display()))?;
        serde_json::from_str(&content).context("Failed to parse ledger as JSON")
    }
}

impl DeploymentLedger for JsonFileLedger {
    fn persist(&self, record: &DeploymentRecord) -> Result<()> {
        let content = serde_json::to_string_pretty(record)
            .context("Failed to serialize deployment record to JSON")?;
        FsHandler::write_file(&self.path, content)?;
        tracing::info!(path = %self.path.display(), "Deployment record saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    #[test]
    fn test_record_survives_the_file_ledger() {
        let dir = TempDir::new("zkdata-ledger").unwrap();
        let ledger = JsonFileLedger::new(dir.path().join("deployment").join("addresses.json"));

        let mut record = DeploymentRecord::new("ws://127.0.0.1:9944", Address::repeat_byte(1), "ab");
        record.contracts.insert(
            "dataset_registry".to_string(),
            ContractEntry {
                address: Address::repeat_byte(2),
                code_hash: B256::repeat_byte(3),
                deployed: true,
            },
        );
        record.warnings.push("create payment failed".to_string());

        ledger.persist(&record).unwrap();
        let loaded = ledger.load().unwrap();

        assert_eq!(loaded, record);
        assert_eq!(loaded.address_of("dataset_registry"), Some(Address::repeat_byte(2)));
        assert_eq!(loaded.address_of("zk_verifier"), None);
        assert!(chrono::DateTime::parse_from_rfc3339(&loaded.timestamp).is_ok());
    }

    #[test]
    fn test_ledger_is_human_readable() {
        let dir = TempDir::new("zkdata-ledger").unwrap();
        let ledger = JsonFileLedger::new(dir.path().join("addresses.json"));
        let record = DeploymentRecord::new("dev", Address::ZERO, "00");

        ledger.persist(&record).unwrap();
        let raw = std::fs::read_to_string(ledger.path()).unwrap();

        assert!(raw.contains("\n  \"network\": \"dev\""));
        assert!(raw.contains("\"contracts\": {}"));
    }
}
