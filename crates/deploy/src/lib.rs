//! zkdata-deploy - Deployment library for the zkdata marketplace contracts.
//!
//! This crate uploads, instantiates and wires a set of interdependent contracts, tracking every
//! transaction to finality and recording the resulting addresses.

pub mod artifact;
pub mod chain;
pub mod config;
pub mod credential;
pub mod error;
mod fs;
pub mod ledger;
pub mod marketplace;
pub mod pipeline;
pub mod plan;
pub mod request;
pub mod step;
pub mod tracker;

pub use artifact::{ArtifactDir, ArtifactSource, ContractArtifact, ContractMetadata, MessageSpec};
pub use chain::{
    Balance, BlockHash, ChainClient, ChainConnector, ChainEvent, DEV_ENDOWMENT, Fault, RpcClient,
    RpcConnector, SimulatedClient, SimulatedNetwork, StatusEvent, StatusStream, Submission,
};
pub use config::{CONFIG_FILENAME, DEFAULT_ENDPOINT, DeployConfig, MissingContractPolicy};
pub use credential::Credential;
pub use error::{
    AbiError, ArtifactError, ChainError, CredentialError, DeployError, PipelineError, TxError,
};
pub use ledger::{
    ContractEntry, DEFAULT_LEDGER_PATH, DeploymentLedger, DeploymentRecord, JsonFileLedger,
};
pub use marketplace::MarketplaceParams;
pub use pipeline::{
    DeployedContracts, Pipeline, PipelineAbort, PipelineSnapshot, PipelineState, RunOutcome,
    RunReport, SmokeFailure,
};
pub use plan::{ArgumentProducer, CallSpec, ContractSpec, DeploymentPlan};
pub use request::{ResourceLimits, TransactionRequest, TxTarget};
pub use step::{ContractHandle, DeployedContract, DeploymentStep, SaltStrategy};
pub use tracker::{
    CancelHandle, CancelSignal, DEFAULT_TX_TIMEOUT, EventFilter, Extracted, TransactionOutcome,
    TransactionTracker, TxReceipt, cancel_pair,
};
