//! Error taxonomy for the deployment pipeline.
//!
//! Every error below is fatal to the operation that produced it. The only non-fatal failures are
//! smoke-test calls, which the pipeline records as warnings instead of returning an error.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Failure to derive a signing credential from a seed.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("seed must not be empty")]
    EmptySeed,
    #[error("seed does not derive a valid secp256k1 signing key")]
    InvalidKey,
}

/// Failure reported by a chain client.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("transaction rejected on submission: {0}")]
    Submit(String),
    #[error("chain query failed: {0}")]
    Query(String),
}

/// Missing or corrupt code/metadata for a contract.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact for `{contract}` not found at {}", .path.display())]
    Missing { contract: String, path: PathBuf },
    #[error("failed to read {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("code blob for `{contract}` is empty")]
    EmptyCode { contract: String },
    #[error("invalid metadata for `{contract}`: {reason}")]
    InvalidMetadata { contract: String, reason: String },
}

/// A constructor or message call that does not match the contract's metadata.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AbiError {
    #[error("`{contract}` has no constructor `{label}`")]
    UnknownConstructor { contract: String, label: String },
    #[error("`{contract}` has no message `{label}`")]
    UnknownMessage { contract: String, label: String },
    #[error("`{label}` expects {expected} argument(s), got {got}")]
    ArityMismatch {
        label: String,
        expected: usize,
        got: usize,
    },
    #[error("`{label}` is not payable but {value} would be transferred")]
    NotPayable { label: String, value: u64 },
}

/// Transaction-layer failure. None of these are retried.
#[derive(Debug, Error)]
pub enum TxError {
    #[error(transparent)]
    Submit(#[from] ChainError),
    #[error("status stream ended before a terminal status (last state: {last})")]
    Incomplete { last: &'static str },
    #[error("no terminal status within {0:?}")]
    Timeout(Duration),
    #[error("dispatch error: {0}")]
    DispatchFailure(String),
    #[error("wait for transaction status was cancelled")]
    Cancelled,
}

/// Failure to deploy (or call) a single contract.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Abi(#[from] AbiError),
    #[error(transparent)]
    Tx(#[from] TxError),
    #[error("`{contract}` finalized without an instantiated contract address")]
    MissingAddress { contract: String },
}

impl DeployError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Tx(TxError::Cancelled))
    }
}

/// Failure that aborts a whole pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline has already been started")]
    AlreadyStarted,
    #[error("could not connect to chain: {0}")]
    Connect(ChainError),
    #[error("`{step}` depends on `{dependency}`, which has not been produced yet")]
    UnresolvedDependency { step: String, dependency: String },
    #[error("contract `{0}` is already deployed in this run")]
    DuplicateContract(String),
    #[error("deployment of `{step}` failed: {source}")]
    Deploy {
        step: String,
        #[source]
        source: DeployError,
    },
    #[error("`{operation}` requires `{contract}`, which is not deployed")]
    MissingContract { operation: String, contract: String },
    #[error("wiring operation `{operation}` failed: {source}")]
    Wiring {
        operation: String,
        #[source]
        source: DeployError,
    },
    #[error("failed to persist deployment record: {0:#}")]
    Ledger(anyhow::Error),
    #[error("run cancelled during {0}")]
    Cancelled(String),
}
