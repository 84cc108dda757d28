//! Compiled contract artifacts.
//!
//! Every contract is addressed by name and consists of a code blob and an ink! metadata
//! document. The metadata's `spec` section describes constructors and messages; it is used to
//! reject malformed calls before they are submitted.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use alloy_core::primitives::{B256, Bytes, keccak256};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AbiError, ArtifactError};

/// A constructor or message described by contract metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSpec {
    pub label: String,
    /// Argument labels, in call order.
    pub args: Vec<String>,
    pub payable: bool,
}

#[derive(Deserialize)]
struct RawMessageSpec {
    label: String,
    #[serde(default)]
    args: Vec<RawArgSpec>,
    #[serde(default)]
    payable: bool,
}

#[derive(Deserialize)]
struct RawArgSpec {
    label: String,
}

impl From<RawMessageSpec> for MessageSpec {
    fn from(raw: RawMessageSpec) -> Self {
        Self {
            label: raw.label,
            args: raw.args.into_iter().map(|arg| arg.label).collect(),
            payable: raw.payable,
        }
    }
}

/// Contract metadata document.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractMetadata(Value);

impl ContractMetadata {
    pub fn parse(contract: &str, raw: &[u8]) -> Result<Self, ArtifactError> {
        let value: Value =
            serde_json::from_slice(raw).map_err(|e| ArtifactError::InvalidMetadata {
                contract: contract.to_string(),
                reason: e.to_string(),
            })?;

        if !value.is_object() {
            return Err(ArtifactError::InvalidMetadata {
                contract: contract.to_string(),
                reason: "metadata must be a JSON object".to_string(),
            });
        }

        Ok(Self(value))
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Contract name declared by the metadata, if any.
    pub fn contract_name(&self) -> Option<&str> {
        self.0.pointer("/contract/name").and_then(Value::as_str)
    }

    fn specs(&self, pointer: &str) -> Option<Vec<MessageSpec>> {
        let entries = self.0.pointer(pointer)?.as_array()?;
        Some(
            entries
                .iter()
                .filter_map(|entry| RawMessageSpec::deserialize(entry).ok())
                .map(MessageSpec::from)
                .collect(),
        )
    }

    /// Declared constructors, `None` when the metadata has no interface section.
    pub fn constructors(&self) -> Option<Vec<MessageSpec>> {
        self.specs("/spec/constructors")
    }

    /// Declared messages, `None` when the metadata has no interface section.
    pub fn messages(&self) -> Option<Vec<MessageSpec>> {
        self.specs("/spec/messages")
    }

    pub fn check_constructor(
        &self,
        contract: &str,
        label: &str,
        args: usize,
        value: u64,
    ) -> Result<(), AbiError> {
        let Some(constructors) = self.constructors() else {
            return Ok(());
        };
        let spec = constructors
            .iter()
            .find(|c| c.label == label)
            .ok_or_else(|| AbiError::UnknownConstructor {
                contract: contract.to_string(),
                label: label.to_string(),
            })?;
        check_call(spec, args, value)
    }

    pub fn check_message(
        &self,
        contract: &str,
        label: &str,
        args: usize,
        value: u64,
    ) -> Result<(), AbiError> {
        let Some(messages) = self.messages() else {
            return Ok(());
        };
        let spec = messages
            .iter()
            .find(|m| m.label == label)
            .ok_or_else(|| AbiError::UnknownMessage {
                contract: contract.to_string(),
                label: label.to_string(),
            })?;
        check_call(spec, args, value)
    }
}

fn check_call(spec: &MessageSpec, args: usize, value: u64) -> Result<(), AbiError> {
    if spec.args.len() != args {
        return Err(AbiError::ArityMismatch {
            label: spec.label.clone(),
            expected: spec.args.len(),
            got: args,
        });
    }
    if value > 0 && !spec.payable {
        return Err(AbiError::NotPayable {
            label: spec.label.clone(),
            value,
        });
    }
    Ok(())
}

/// Code and metadata of one contract.
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub name: String,
    pub code: Bytes,
    pub code_hash: B256,
    pub metadata: Arc<ContractMetadata>,
}

impl ContractArtifact {
    pub fn new(name: impl Into<String>, code: Bytes, metadata: ContractMetadata) -> Self {
        Self {
            name: name.into(),
            code_hash: keccak256(&code),
            code,
            metadata: Arc::new(metadata),
        }
    }
}

/// Read-only source of contract artifacts, addressed by contract name.
pub trait ArtifactSource: Send + Sync {
    fn load(&self, name: &str) -> Result<ContractArtifact, ArtifactError>;
}

/// Artifacts laid out the way `cargo contract build` leaves them:
/// `<root>/<name>/target/ink/<name>.wasm` and `<name>.json`.
#[derive(Debug, Clone)]
pub struct ArtifactDir {
    root: PathBuf,
}

impl ArtifactDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ink_dir(&self, name: &str) -> PathBuf {
        self.root.join(name).join("target").join("ink")
    }

    pub fn code_path(&self, name: &str) -> PathBuf {
        self.ink_dir(name).join(format!("{}.wasm", name))
    }

    pub fn metadata_path(&self, name: &str) -> PathBuf {
        self.ink_dir(name).join(format!("{}.json", name))
    }
}

fn read_artifact(contract: &str, path: PathBuf) -> Result<Vec<u8>, ArtifactError> {
    std::fs::read(&path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => ArtifactError::Missing {
            contract: contract.to_string(),
            path,
        },
        _ => ArtifactError::Unreadable { path, source },
    })
}

impl ArtifactSource for ArtifactDir {
    fn load(&self, name: &str) -> Result<ContractArtifact, ArtifactError> {
        let code = read_artifact(name, self.code_path(name))?;
        if code.is_empty() {
            return Err(ArtifactError::EmptyCode {
                contract: name.to_string(),
            });
        }

        let metadata = ContractMetadata::parse(name, &read_artifact(name, self.metadata_path(name))?)?;
        if let Some(declared) = metadata.contract_name() {
            if declared != name {
                tracing::warn!(contract = %name, declared, "Metadata declares a different contract name");
            }
        }

        let artifact = ContractArtifact::new(name, Bytes::from(code), metadata);
        tracing::debug!(
            contract = %name,
            code_hash = %artifact.code_hash,
            size = artifact.code.len(),
            "Loaded contract artifact"
        );

        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempdir::TempDir;

    use super::*;

    fn metadata() -> ContractMetadata {
        ContractMetadata::from_value(json!({
            "contract": { "name": "registry" },
            "spec": {
                "constructors": [{ "label": "new", "args": [{ "label": "fee" }], "payable": false }],
                "messages": [
                    { "label": "register", "args": [{ "label": "name" }, { "label": "hash" }], "payable": true },
                    { "label": "owner", "args": [] }
                ]
            }
        }))
    }

    #[test]
    fn test_metadata_exposes_interface() {
        let metadata = metadata();
        assert_eq!(metadata.contract_name(), Some("registry"));

        let messages = metadata.messages().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].args, vec!["name".to_string(), "hash".to_string()]);
        assert!(messages[0].payable);
        assert!(!messages[1].payable);
    }

    #[test]
    fn test_calls_are_checked_against_metadata() {
        let metadata = metadata();

        assert!(metadata.check_constructor("registry", "new", 1, 0).is_ok());
        assert_eq!(
            metadata.check_constructor("registry", "default", 0, 0),
            Err(AbiError::UnknownConstructor {
                contract: "registry".to_string(),
                label: "default".to_string()
            })
        );
        assert_eq!(
            metadata.check_message("registry", "register", 1, 0),
            Err(AbiError::ArityMismatch {
                label: "register".to_string(),
                expected: 2,
                got: 1
            })
        );
        assert!(metadata.check_message("registry", "register", 2, 10).is_ok());
        assert!(matches!(
            metadata.check_message("registry", "owner", 0, 10),
            Err(AbiError::NotPayable { .. })
        ));
        assert!(matches!(
            metadata.check_message("registry", "transfer", 0, 0),
            Err(AbiError::UnknownMessage { .. })
        ));
    }

    #[test]
    fn test_metadata_without_spec_is_unchecked() {
        let metadata = ContractMetadata::from_value(json!({ "contract": { "name": "bare" } }));
        assert!(metadata.messages().is_none());
        assert!(metadata.check_message("bare", "anything", 3, 5).is_ok());
    }

    #[test]
    fn test_invalid_metadata_is_rejected() {
        assert!(matches!(
            ContractMetadata::parse("broken", b"{ not json"),
            Err(ArtifactError::InvalidMetadata { .. })
        ));
        assert!(matches!(
            ContractMetadata::parse("broken", b"[1, 2]"),
            Err(ArtifactError::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn test_artifact_dir_loads_ink_layout() {
        let dir = TempDir::new("zkdata-artifacts").unwrap();
        let artifacts = ArtifactDir::new(dir.path());
        std::fs::create_dir_all(artifacts.code_path("registry").parent().unwrap()).unwrap();
        std::fs::write(artifacts.code_path("registry"), b"\0asm\x01\0\0\0").unwrap();
        std::fs::write(
            artifacts.metadata_path("registry"),
            serde_json::to_vec(metadata().as_value()).unwrap(),
        )
        .unwrap();

        let artifact = artifacts.load("registry").unwrap();
        assert_eq!(artifact.name, "registry");
        assert_eq!(artifact.code_hash, keccak256(b"\0asm\x01\0\0\0"));
        assert_eq!(*artifact.metadata, metadata());
        assert!(
            artifacts
                .code_path("registry")
                .ends_with("registry/target/ink/registry.wasm")
        );
    }

    #[test]
    fn test_missing_and_empty_artifacts() {
        let dir = TempDir::new("zkdata-artifacts").unwrap();
        let artifacts = ArtifactDir::new(dir.path());

        assert!(matches!(
            artifacts.load("absent"),
            Err(ArtifactError::Missing { contract, .. }) if contract == "absent"
        ));

        std::fs::create_dir_all(artifacts.code_path("empty").parent().unwrap()).unwrap();
        std::fs::write(artifacts.code_path("empty"), b"").unwrap();
        assert!(matches!(
            artifacts.load("empty"),
            Err(ArtifactError::EmptyCode { .. })
        ));
    }
}
