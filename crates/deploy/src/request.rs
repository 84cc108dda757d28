//! Transaction requests routed through the tracker.

use alloy_core::primitives::{Address, B256, Bytes, keccak256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a transaction does on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxTarget {
    /// Store contract code without instantiating it.
    Upload { code: Bytes },
    /// Upload code and instantiate it in a single transaction.
    Instantiate {
        code: Bytes,
        constructor: String,
        salt: B256,
    },
    /// Call a message on a deployed contract.
    Call { contract: Address, message: String },
}

/// Resource bounds attached to every transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Compute bound.
    pub gas_limit: u64,
    /// Storage bound; `None` lets the chain charge whatever is needed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_deposit_limit: Option<u64>,
    /// Value transferred with the transaction.
    #[serde(default)]
    pub value: u64,
}

impl ResourceLimits {
    pub fn with_value(self, value: u64) -> Self {
        Self { value, ..self }
    }
}

/// A fully resolved transaction. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    /// Human readable operation name, used for logging and reporting.
    pub label: String,
    pub target: TxTarget,
    pub args: Vec<Value>,
    pub limits: ResourceLimits,
}

impl TransactionRequest {
    pub fn upload(label: impl Into<String>, code: Bytes, limits: ResourceLimits) -> Self {
        Self {
            label: label.into(),
            target: TxTarget::Upload { code },
            args: Vec::new(),
            limits,
        }
    }

    pub fn instantiate(
        label: impl Into<String>,
        code: Bytes,
        constructor: impl Into<String>,
        salt: B256,
        args: Vec<Value>,
        limits: ResourceLimits,
    ) -> Self {
        Self {
            label: label.into(),
            target: TxTarget::Instantiate {
                code,
                constructor: constructor.into(),
                salt,
            },
            args,
            limits,
        }
    }

    pub fn call(
        label: impl Into<String>,
        contract: Address,
        message: impl Into<String>,
        args: Vec<Value>,
        limits: ResourceLimits,
    ) -> Self {
        Self {
            label: label.into(),
            target: TxTarget::Call {
                contract,
                message: message.into(),
            },
            args,
            limits,
        }
    }

    /// Keccak digest of the JSON encoding of the request. Used as transaction hash and signed by
    /// the submitting credential.
    pub fn digest(&self) -> B256 {
        keccak256(serde_json::to_vec(self).unwrap_or_default())
    }
}
