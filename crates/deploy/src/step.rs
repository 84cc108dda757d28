//! Deployment of a single contract.

use std::sync::Arc;

use alloy_core::primitives::{Address, B256, keccak256};
use serde_json::Value;

use crate::{
    artifact::{ArtifactSource, ContractMetadata},
    chain::{BlockHash, ChainClient},
    credential::Credential,
    error::{AbiError, DeployError},
    plan::ContractSpec,
    request::{ResourceLimits, TransactionRequest},
    tracker::{EventFilter, TransactionTracker},
};

/// Callable handle on a deployed contract, bound to its address and metadata.
#[derive(Debug, Clone)]
pub struct ContractHandle {
    name: String,
    address: Address,
    metadata: Arc<ContractMetadata>,
}

impl ContractHandle {
    pub fn new(name: impl Into<String>, address: Address, metadata: Arc<ContractMetadata>) -> Self {
        Self {
            name: name.into(),
            address,
            metadata,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn metadata(&self) -> &ContractMetadata {
        &self.metadata
    }

    /// Build a call to `message`, checked against the contract's metadata.
    pub fn call(
        &self,
        label: impl Into<String>,
        message: &str,
        args: Vec<Value>,
        limits: ResourceLimits,
    ) -> Result<TransactionRequest, AbiError> {
        self.metadata
            .check_message(&self.name, message, args.len(), limits.value)?;
        Ok(TransactionRequest::call(
            label,
            self.address,
            message,
            args,
            limits,
        ))
    }
}

/// A contract whose instantiation has been finalized.
#[derive(Debug, Clone)]
pub struct DeployedContract {
    pub name: String,
    pub address: Address,
    pub code_hash: B256,
    /// Block the instantiation was finalized in.
    pub block: BlockHash,
    pub handle: ContractHandle,
}

/// How instantiation salts are chosen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SaltStrategy {
    /// A fresh random salt per instantiation.
    #[default]
    Random,
    /// Salts derived from a fixed seed and the contract name. Redeploying the same code with
    /// the same seed collides with the earlier instance.
    Fixed(String),
}

impl SaltStrategy {
    pub fn salt_for(&self, contract: &str) -> B256 {
        match self {
            Self::Random => B256::from(rand::random::<[u8; 32]>()),
            Self::Fixed(seed) => keccak256(format!("{}/{}", seed, contract)),
        }
    }
}

/// Uploads and instantiates one contract through the transaction tracker.
pub struct DeploymentStep<'a, C, A> {
    client: &'a C,
    artifacts: &'a A,
    tracker: &'a TransactionTracker,
    limits: ResourceLimits,
    salt: &'a SaltStrategy,
}

impl<'a, C: ChainClient, A: ArtifactSource> DeploymentStep<'a, C, A> {
    pub fn new(
        client: &'a C,
        artifacts: &'a A,
        tracker: &'a TransactionTracker,
        limits: ResourceLimits,
        salt: &'a SaltStrategy,
    ) -> Self {
        Self {
            client,
            artifacts,
            tracker,
            limits,
            salt,
        }
    }

    /// Instantiate `spec` with already resolved constructor arguments.
    pub async fn execute(
        &self,
        spec: &ContractSpec,
        args: Vec<Value>,
        signer: &Credential,
    ) -> Result<DeployedContract, DeployError> {
        let artifact = self.artifacts.load(spec.artifact_name())?;
        let limits = spec.limits.unwrap_or(self.limits);
        artifact
            .metadata
            .check_constructor(&spec.name, &spec.constructor, args.len(), limits.value)?;

        tracing::info!(
            contract = %spec.name,
            constructor = %spec.constructor,
            code_hash = %artifact.code_hash,
            "Deploying contract..."
        );

        let request = TransactionRequest::instantiate(
            format!("instantiate {}", spec.name),
            artifact.code.clone(),
            spec.constructor.clone(),
            self.salt.salt_for(&spec.name),
            args,
            limits,
        );

        let receipt = self
            .tracker
            .submit_and_await(
                self.client,
                &request,
                signer,
                &EventFilter::instantiated(signer.address()),
            )
            .await?;

        let address = receipt
            .extracted
            .event()
            .and_then(|event| event.field("contract"))
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse::<Address>().ok())
            .ok_or_else(|| DeployError::MissingAddress {
                contract: spec.name.clone(),
            })?;

        tracing::info!(contract = %spec.name, address = %address, "Contract deployed");

        Ok(DeployedContract {
            name: spec.name.clone(),
            address,
            code_hash: artifact.code_hash,
            block: receipt.block,
            handle: ContractHandle::new(spec.name.clone(), address, artifact.metadata),
        })
    }

    /// Store the code of `artifact` without instantiating it. Returns the code hash.
    pub async fn upload(&self, artifact: &str, signer: &Credential) -> Result<B256, DeployError> {
        let artifact = self.artifacts.load(artifact)?;
        let request = TransactionRequest::upload(
            format!("upload {}", artifact.name),
            artifact.code.clone(),
            self.limits,
        );

        let receipt = self
            .tracker
            .submit_and_await(self.client, &request, signer, &EventFilter::code_stored())
            .await?;

        let stored = receipt
            .extracted
            .event()
            .and_then(|event| event.field("code_hash"))
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse::<B256>().ok());

        match stored {
            Some(hash) if hash != artifact.code_hash => {
                tracing::warn!(
                    contract = %artifact.name,
                    local = %artifact.code_hash,
                    stored = %hash,
                    "Chain reports a different code hash"
                );
                Ok(hash)
            }
            Some(hash) => Ok(hash),
            // Code that is already stored emits no event.
            None => Ok(artifact.code_hash),
        }
    }
}
