//! Deployment plans: which contracts to instantiate, in which order, with which arguments, and
//! the calls to make once they are all deployed.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::request::ResourceLimits;

/// Source of one constructor or call argument.
///
/// Anything other than a literal refers to the output of an earlier step and is resolved
/// lazily, right before the step that needs it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentProducer {
    Literal(Value),
    /// Address of a contract deployed earlier in the run.
    AddressOf(String),
    /// Code hash of a contract deployed earlier in the run.
    CodeHashOf(String),
    /// Extracted result of an earlier wiring or smoke-test call, by call label.
    ResultOf(String),
}

impl ArgumentProducer {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn address_of(contract: impl Into<String>) -> Self {
        Self::AddressOf(contract.into())
    }

    pub fn code_hash_of(contract: impl Into<String>) -> Self {
        Self::CodeHashOf(contract.into())
    }

    pub fn result_of(label: impl Into<String>) -> Self {
        Self::ResultOf(label.into())
    }

    /// Name of the contract or call this argument depends on.
    pub fn dependency(&self) -> Option<&str> {
        match self {
            Self::Literal(_) => None,
            Self::AddressOf(name) | Self::CodeHashOf(name) | Self::ResultOf(name) => Some(name),
        }
    }
}

fn default_constructor() -> String {
    "new".to_string()
}

/// One contract to instantiate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSpec {
    /// Name the deployed contract is recorded under.
    pub name: String,
    /// Artifact to deploy; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default = "default_constructor")]
    pub constructor: String,
    #[serde(default)]
    pub args: Vec<ArgumentProducer>,
    /// Overrides the configured instantiation limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceLimits>,
}

impl ContractSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            artifact: None,
            constructor: default_constructor(),
            args: Vec::new(),
            limits: None,
        }
    }

    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }

    pub fn with_constructor(mut self, constructor: impl Into<String>) -> Self {
        self.constructor = constructor.into();
        self
    }

    pub fn with_arg(mut self, arg: ArgumentProducer) -> Self {
        self.args.push(arg);
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn artifact_name(&self) -> &str {
        self.artifact.as_deref().unwrap_or(&self.name)
    }
}

/// A message call on a deployed contract, used for wiring and smoke tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSpec {
    /// Unique label; later calls refer to this call's result by it.
    pub label: String,
    pub contract: String,
    pub message: String,
    #[serde(default)]
    pub args: Vec<ArgumentProducer>,
    /// Value transferred with the call.
    #[serde(default)]
    pub value: u64,
}

impl CallSpec {
    pub fn new(
        label: impl Into<String>,
        contract: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            contract: contract.into(),
            message: message.into(),
            args: Vec::new(),
            value: 0,
        }
    }

    pub fn with_arg(mut self, arg: ArgumentProducer) -> Self {
        self.args.push(arg);
        self
    }

    pub fn with_value(mut self, value: u64) -> Self {
        self.value = value;
        self
    }
}

/// Ordered deployment steps plus post-deployment calls.
///
/// The order of `contracts` encodes the dependency graph; it is not reordered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    #[serde(default)]
    pub contracts: Vec<ContractSpec>,
    #[serde(default)]
    pub wiring: Vec<CallSpec>,
    #[serde(default)]
    pub smoke_tests: Vec<CallSpec>,
}

impl DeploymentPlan {
    /// Load a plan from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read deployment plan from {}", path.display()))?;
        let plan: Self =
            toml::from_str(&content).context("Failed to parse deployment plan as TOML")?;
        tracing::info!(
            path = %path.display(),
            contracts = plan.contracts.len(),
            "Deployment plan loaded"
        );
        Ok(plan)
    }

    /// SHA-256 of the plan's JSON encoding, hex encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(self).unwrap_or_default());
        hex::encode(hasher.finalize())
    }

    pub fn contract_names(&self) -> impl Iterator<Item = &str> {
        self.contracts.iter().map(|spec| spec.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempdir::TempDir;

    use super::*;

    #[test]
    fn test_plan_loads_from_toml() {
        let dir = TempDir::new("zkdata-plan").unwrap();
        let path = dir.path().join("plan.toml");
        std::fs::write(
            &path,
            r#"
[[contracts]]
name = "registry"
args = [{ literal = 1000 }]

[[contracts]]
name = "verifier"
artifact = "zk_verifier"
constructor = "with_registry"
args = [{ address_of = "registry" }, { literal = "halo2" }]

[[wiring]]
label = "authorize"
contract = "verifier"
message = "add_validator"
args = [{ address_of = "registry" }]

[[smoke_tests]]
label = "register"
contract = "registry"
message = "register"
value = 1000
args = [{ result_of = "authorize" }]
"#,
        )
        .unwrap();

        let plan = DeploymentPlan::load_from_file(&path).unwrap();

        assert_eq!(plan.contract_names().collect::<Vec<_>>(), vec!["registry", "verifier"]);
        assert_eq!(plan.contracts[0].constructor, "new");
        assert_eq!(plan.contracts[0].args, vec![ArgumentProducer::literal(1000)]);
        assert_eq!(plan.contracts[1].artifact_name(), "zk_verifier");
        assert_eq!(
            plan.contracts[1].args,
            vec![
                ArgumentProducer::address_of("registry"),
                ArgumentProducer::literal("halo2")
            ]
        );
        assert_eq!(plan.wiring[0].args[0].dependency(), Some("registry"));
        assert_eq!(plan.smoke_tests[0].value, 1000);
        assert_eq!(plan.smoke_tests[0].args[0], ArgumentProducer::result_of("authorize"));
    }

    #[test]
    fn test_fingerprint_tracks_plan_changes() {
        let plan = DeploymentPlan {
            contracts: vec![ContractSpec::new("a").with_arg(ArgumentProducer::literal(json!(1)))],
            ..Default::default()
        };
        let mut changed = plan.clone();
        changed.contracts[0].args[0] = ArgumentProducer::literal(json!(2));

        assert_eq!(plan.fingerprint(), plan.clone().fingerprint());
        assert_ne!(plan.fingerprint(), changed.fingerprint());
        assert_eq!(plan.fingerprint().len(), 64);
    }

    #[test]
    fn test_literal_has_no_dependency() {
        assert_eq!(ArgumentProducer::literal(json!([1, 2])).dependency(), None);
        assert_eq!(ArgumentProducer::code_hash_of("a").dependency(), Some("a"));
    }
}
