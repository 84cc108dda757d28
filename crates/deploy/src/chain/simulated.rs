//! In-process development chain.
//!
//! Plays the role a local dev node plays for a real deployment: it executes uploads,
//! instantiations and calls immediately, emits the same status sequence a node would
//! (ready, broadcast, in block, finalized) and derives contract addresses deterministically.
//! Faults can be injected per request label to exercise the failure paths of the pipeline.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use alloy_core::primitives::{Address, B256, keccak256};
use futures::{StreamExt, stream};
use serde_json::{Value, json};

use super::{Balance, BlockHash, ChainClient, ChainConnector, ChainEvent, StatusEvent, StatusStream};
use crate::{
    credential::Credential,
    error::ChainError,
    request::{TransactionRequest, TxTarget},
};

/// Balance every account starts with on the development chain.
pub const DEV_ENDOWMENT: u128 = 1_000_000 * 1_000_000_000_000;

/// Misbehaviour injected for a request label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The transaction is included, then fails with this dispatch error.
    DispatchError(String),
    /// The transaction is included but never finalized.
    Stall,
    /// The status stream ends right after inclusion.
    DropStream,
    /// The instantiated event carries no contract address.
    OmitAddress,
    /// The block is finalized without the contract events.
    OmitEvent,
    /// The finalized notification is delivered twice.
    DuplicateFinalized,
}

/// A transaction seen by the development chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub label: String,
    pub signer: Address,
    pub tx_hash: B256,
    pub args: Vec<Value>,
    pub succeeded: bool,
}

#[derive(Debug, Default)]
struct DevState {
    block_number: u64,
    balances: HashMap<Address, u128>,
    code: HashSet<B256>,
    contracts: HashMap<Address, B256>,
    faults: HashMap<String, Fault>,
    submissions: Vec<Submission>,
    refused_connections: usize,
    connections: usize,
    disconnections: usize,
}

impl DevState {
    fn balance_of(&self, address: &Address) -> u128 {
        self.balances
            .get(address)
            .copied()
            .unwrap_or(DEV_ENDOWMENT)
    }

    fn transfer(&mut self, from: Address, to: Address, value: u128) -> Result<(), String> {
        let available = self.balance_of(&from);
        if value > available {
            return Err("balances.InsufficientBalance".to_string());
        }
        let target = self.balances.get(&to).copied().unwrap_or(0);
        self.balances.insert(from, available - value);
        self.balances.insert(to, target + value);
        Ok(())
    }

    /// Execute a request against the chain state, returning the emitted events.
    fn execute(
        &mut self,
        request: &TransactionRequest,
        signer: Address,
    ) -> Result<Vec<ChainEvent>, String> {
        if request.limits.gas_limit == 0 {
            return Err("contracts.OutOfGas".to_string());
        }
        let value = u128::from(request.limits.value);

        match &request.target {
            TxTarget::Upload { code } => {
                if code.is_empty() {
                    return Err("contracts.CodeRejected".to_string());
                }
                let code_hash = keccak256(code);
                self.code.insert(code_hash);
                Ok(vec![code_stored(code_hash)])
            }
            TxTarget::Instantiate { code, salt, .. } => {
                if code.is_empty() {
                    return Err("contracts.CodeRejected".to_string());
                }
                let code_hash = keccak256(code);
                let address = contract_address(signer, code_hash, *salt);
                if self.contracts.contains_key(&address) {
                    return Err("contracts.DuplicateContract".to_string());
                }

                self.transfer(signer, address, value)?;
                self.contracts.insert(address, code_hash);

                let mut events = Vec::new();
                if self.code.insert(code_hash) {
                    events.push(code_stored(code_hash));
                }
                events.push(ChainEvent::new(
                    "contracts",
                    "Instantiated",
                    json!({ "deployer": signer, "contract": address }),
                ));
                Ok(events)
            }
            TxTarget::Call { contract, message } => {
                if !self.contracts.contains_key(contract) {
                    return Err("contracts.ContractNotFound".to_string());
                }
                self.transfer(signer, *contract, value)?;

                let output = keccak256(
                    serde_json::to_vec(&json!([message, request.args])).unwrap_or_default(),
                );
                Ok(vec![ChainEvent::new(
                    "contracts",
                    "ContractEmitted",
                    json!({ "contract": contract, "data": output }),
                )])
            }
        }
    }

    fn apply(&mut self, request: &TransactionRequest, signer: Address) -> StatusStream {
        self.block_number += 1;
        let block: BlockHash = keccak256(self.block_number.to_be_bytes());
        let fault = self.faults.get(&request.label).cloned();

        let outcome = match &fault {
            Some(Fault::DispatchError(detail)) => Err(detail.clone()),
            _ => self.execute(request, signer),
        };

        self.submissions.push(Submission {
            label: request.label.clone(),
            signer,
            tx_hash: request.digest(),
            args: request.args.clone(),
            succeeded: outcome.is_ok(),
        });

        let mut statuses = vec![
            StatusEvent::Ready,
            StatusEvent::Broadcast,
            StatusEvent::InBlock { block },
        ];

        match (outcome, fault) {
            (Err(detail), _) => statuses.push(StatusEvent::DispatchError { detail }),
            (Ok(_), Some(Fault::Stall)) => {
                return stream::iter(statuses).chain(stream::pending()).boxed();
            }
            (Ok(_), Some(Fault::DropStream)) => {}
            (Ok(mut events), fault) => {
                match fault {
                    Some(Fault::OmitEvent) => events.retain(|event| {
                        !event.is("contracts", "Instantiated")
                            && !event.is("contracts", "ContractEmitted")
                    }),
                    Some(Fault::OmitAddress) => {
                        for event in &mut events {
                            if let Some(data) = event.data.as_object_mut() {
                                data.remove("contract");
                            }
                        }
                    }
                    _ => {}
                }

                let finalized = StatusEvent::Finalized { block, events };
                if fault == Some(Fault::DuplicateFinalized) {
                    statuses.push(finalized.clone());
                }
                statuses.push(finalized);
            }
        }

        stream::iter(statuses).boxed()
    }
}

fn code_stored(code_hash: B256) -> ChainEvent {
    ChainEvent::new("contracts", "CodeStored", json!({ "code_hash": code_hash }))
}

/// Address of a contract instantiated by `deployer` from `code_hash` with `salt`.
pub fn contract_address(deployer: Address, code_hash: B256, salt: B256) -> Address {
    let hash = keccak256([deployer.as_slice(), code_hash.as_slice(), salt.as_slice()].concat());
    Address::from_slice(&hash[12..])
}

/// Handle on a development chain. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct SimulatedNetwork {
    state: Arc<Mutex<DevState>>,
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DevState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every transaction labelled `label` misbehave.
    pub fn inject(&self, label: impl Into<String>, fault: Fault) {
        self.lock().faults.insert(label.into(), fault);
    }

    /// Refuse the next `attempts` connection attempts.
    pub fn refuse_connections(&self, attempts: usize) {
        self.lock().refused_connections = attempts;
    }

    /// Set the free balance of an account.
    pub fn fund(&self, address: Address, amount: u128) {
        self.lock().balances.insert(address, amount);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.lock().submissions.clone()
    }

    pub fn connections(&self) -> usize {
        self.lock().connections
    }

    pub fn disconnections(&self) -> usize {
        self.lock().disconnections
    }

    /// Code hash of the contract deployed at `address`, if any.
    pub fn contract_at(&self, address: &Address) -> Option<B256> {
        self.lock().contracts.get(address).copied()
    }
}

impl ChainConnector for SimulatedNetwork {
    type Client = SimulatedClient;

    async fn connect(&self, endpoint: &str) -> Result<SimulatedClient, ChainError> {
        let mut state = self.lock();
        if state.refused_connections > 0 {
            state.refused_connections -= 1;
            return Err(ChainError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        state.connections += 1;
        tracing::debug!(endpoint, "Connected to development chain");

        Ok(SimulatedClient {
            network: self.clone(),
        })
    }
}

/// Open connection to a [`SimulatedNetwork`].
#[derive(Debug)]
pub struct SimulatedClient {
    network: SimulatedNetwork,
}

impl ChainClient for SimulatedClient {
    async fn submit(
        &self,
        request: &TransactionRequest,
        signer: &Credential,
    ) -> Result<StatusStream, ChainError> {
        Ok(self.network.lock().apply(request, signer.address()))
    }

    async fn query_balance(&self, address: Address) -> Result<Balance, ChainError> {
        Ok(Balance(self.network.lock().balance_of(&address)))
    }

    async fn disconnect(self) {
        self.network.lock().disconnections += 1;
        tracing::debug!("Disconnected from development chain");
    }
}
