//! Chain client abstraction.
//!
//! The pipeline only needs three primitives from a network connection: submit a signed
//! transaction and observe its status notifications, query an account balance, and disconnect.
//! Two implementations ship with the crate: [`SimulatedNetwork`], an in-process development
//! chain, and [`RpcConnector`], a JSON-RPC client for a signing gateway.

mod rpc;
mod simulated;

pub use rpc::{RpcClient, RpcConnector};
pub use simulated::{DEV_ENDOWMENT, Fault, SimulatedClient, SimulatedNetwork, Submission};

use std::{fmt, future::Future};

use alloy_core::primitives::{Address, B256};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{credential::Credential, error::ChainError, request::TransactionRequest};

/// Hash identifying a block.
pub type BlockHash = B256;

/// An event emitted by the chain while executing a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    /// Emitting module, e.g. `contracts`.
    pub section: String,
    /// Event name, e.g. `Instantiated`.
    pub method: String,
    #[serde(default)]
    pub data: Value,
}

impl ChainEvent {
    pub fn new(section: impl Into<String>, method: impl Into<String>, data: Value) -> Self {
        Self {
            section: section.into(),
            method: method.into(),
            data,
        }
    }

    pub fn is(&self, section: &str, method: &str) -> bool {
        self.section == section && self.method == method
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

/// One status notification for a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StatusEvent {
    Ready,
    Broadcast,
    InBlock {
        block: BlockHash,
    },
    Finalized {
        block: BlockHash,
        #[serde(default)]
        events: Vec<ChainEvent>,
    },
    DispatchError {
        detail: String,
    },
}

impl StatusEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized { .. } | Self::DispatchError { .. })
    }
}

/// Status notifications of one transaction, in the order the chain reports them.
pub type StatusStream = BoxStream<'static, StatusEvent>;

/// Free balance of an account, in the chain's smallest unit.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    derive_more::From,
    derive_more::Deref,
)]
pub struct Balance(pub u128);

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opens connections to a chain endpoint.
pub trait ChainConnector: Send + Sync {
    type Client: ChainClient;

    fn connect(
        &self,
        endpoint: &str,
    ) -> impl Future<Output = Result<Self::Client, ChainError>> + Send;
}

/// An open connection to a chain.
pub trait ChainClient: Send + Sync {
    /// Submit a signed transaction and return its status notifications.
    fn submit(
        &self,
        request: &TransactionRequest,
        signer: &Credential,
    ) -> impl Future<Output = Result<StatusStream, ChainError>> + Send;

    fn query_balance(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<Balance, ChainError>> + Send;

    /// Close the connection. Consumes the client so it can only happen once.
    fn disconnect(self) -> impl Future<Output = ()> + Send
    where
        Self: Sized;
}
