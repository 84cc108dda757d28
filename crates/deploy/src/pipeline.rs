//! Deployment pipeline.
//!
//! Instantiates the contracts of a [`DeploymentPlan`] strictly in plan order, threading the
//! addresses and results of earlier steps into the arguments of later ones, then runs the
//! wiring calls, the smoke tests, and finally hands a [`DeploymentRecord`] to the ledger.
//!
//! ```text
//! NotStarted -> Deploying(0..n) -> WiringCrossContract -> Testing -> Saving -> Done
//!                        \_______________ any fatal error ________________/-> Aborted
//! ```
//!
//! Nothing is rolled back on abort: whatever reached the chain stays there, and the abort
//! reports which contracts were already deployed.

use std::{collections::BTreeMap, fmt, time::Duration};

use alloy_core::primitives::{Address, B256};
use backon::{ExponentialBuilder, Retryable};
use serde_json::{Value, json};
use tokio::sync::watch;

use crate::{
    artifact::ArtifactSource,
    chain::{ChainClient, ChainConnector},
    config::{DeployConfig, MissingContractPolicy},
    credential::Credential,
    error::{ChainError, DeployError, PipelineError},
    ledger::{ContractEntry, DeploymentLedger, DeploymentRecord},
    plan::{ArgumentProducer, CallSpec, DeploymentPlan},
    step::{DeployedContract, DeploymentStep},
    tracker::{CancelSignal, EventFilter, TransactionTracker},
};

/// Lifecycle state of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PipelineState {
    #[default]
    NotStarted,
    Deploying {
        index: usize,
        name: String,
    },
    WiringCrossContract,
    Testing,
    Saving,
    Done,
    Aborted,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Deploying { index, name } => write!(f, "deploying {} (step {})", name, index + 1),
            Self::WiringCrossContract => write!(f, "cross-contract wiring"),
            Self::Testing => write!(f, "smoke testing"),
            Self::Saving => write!(f, "saving"),
            Self::Done => write!(f, "done"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Observable view of a run, published on every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSnapshot {
    pub state: PipelineState,
    /// Deployed contracts in deployment order.
    pub deployed: Vec<(String, Address)>,
}

/// Contracts deployed during a run, in deployment order. Entries are never replaced.
#[derive(Debug, Default)]
pub struct DeployedContracts(Vec<DeployedContract>);

impl DeployedContracts {
    pub fn get(&self, name: &str) -> Option<&DeployedContract> {
        self.0.iter().find(|contract| contract.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeployedContract> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn summaries(&self) -> Vec<(String, Address)> {
        self.0
            .iter()
            .map(|contract| (contract.name.clone(), contract.address))
            .collect()
    }

    fn insert(&mut self, contract: DeployedContract) -> Result<(), PipelineError> {
        if self.contains(&contract.name) {
            return Err(PipelineError::DuplicateContract(contract.name));
        }
        self.0.push(contract);
        Ok(())
    }
}

/// A run that ended in [`PipelineState::Aborted`].
#[derive(Debug, thiserror::Error)]
#[error("pipeline aborted during {failed_at}: {error}")]
pub struct PipelineAbort {
    /// State the pipeline was in when the error occurred.
    pub failed_at: PipelineState,
    pub error: PipelineError,
    /// Contracts deployed before the abort, in deployment order.
    pub deployed: Vec<(String, Address)>,
}

/// A smoke test that did not pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeFailure {
    pub label: String,
    pub reason: String,
}

impl fmt::Display for SmokeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.reason)
    }
}

/// How a completed run went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// Everything was deployed and wired but at least one smoke test failed.
    CompletedWithWarnings,
}

/// Result of a run that reached [`PipelineState::Done`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub record: DeploymentRecord,
    pub smoke_tests_run: usize,
    pub smoke_failures: Vec<SmokeFailure>,
    /// Labels of wiring and smoke-test calls skipped because a contract was missing.
    pub skipped: Vec<String>,
}

impl RunReport {
    pub fn outcome(&self) -> RunOutcome {
        if self.smoke_failures.is_empty() {
            RunOutcome::Success
        } else {
            RunOutcome::CompletedWithWarnings
        }
    }
}

/// Why a wiring or smoke-test call did not go through.
enum CallFailure {
    MissingContract(String),
    Unresolved(String),
    Failed(DeployError),
}

/// Orchestrates one deployment run. A pipeline runs at most once.
pub struct Pipeline<K, A, L> {
    config: DeployConfig,
    connector: K,
    artifacts: A,
    ledger: L,
    state: watch::Sender<PipelineSnapshot>,
    deployed: DeployedContracts,
    results: BTreeMap<String, Value>,
    cancel: Option<CancelSignal>,
}

impl<K, A, L> Pipeline<K, A, L>
where
    K: ChainConnector,
    A: ArtifactSource,
    L: DeploymentLedger,
{
    pub fn new(config: DeployConfig, connector: K, artifacts: A, ledger: L) -> Self {
        let (state, _) = watch::channel(PipelineSnapshot::default());
        Self {
            config,
            connector,
            artifacts,
            ledger,
            state,
            deployed: DeployedContracts::default(),
            results: BTreeMap::new(),
            cancel: None,
        }
    }

    /// Abort the run as soon as `signal` fires.
    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state.borrow().state.clone()
    }

    pub fn deployed(&self) -> &DeployedContracts {
        &self.deployed
    }

    /// Follow the run's state and deployed contracts while it is in progress.
    pub fn subscribe(&self) -> watch::Receiver<PipelineSnapshot> {
        self.state.subscribe()
    }

    fn set_state(&self, state: PipelineState) {
        tracing::debug!(state = %state, "Pipeline state changed");
        self.state.send_modify(|snapshot| snapshot.state = state);
    }

    fn record(&mut self, contract: DeployedContract) -> Result<(), PipelineError> {
        let summary = (contract.name.clone(), contract.address);
        self.deployed.insert(contract)?;
        self.state
            .send_modify(|snapshot| snapshot.deployed.push(summary));
        Ok(())
    }

    fn tracker(&self) -> TransactionTracker {
        let tracker = TransactionTracker::new(self.config.tx_timeout());
        match &self.cancel {
            Some(signal) => tracker.with_cancel(signal.clone()),
            None => tracker,
        }
    }

    fn check_cancelled(&self) -> Result<(), PipelineError> {
        match &self.cancel {
            Some(signal) if signal.is_cancelled() => {
                Err(PipelineError::Cancelled(self.state().to_string()))
            }
            _ => Ok(()),
        }
    }

    fn abort(&self, error: PipelineError) -> PipelineAbort {
        let failed_at = self.state();
        let deployed = self.deployed.summaries();
        self.set_state(PipelineState::Aborted);

        tracing::error!(
            state = %failed_at,
            error = %error,
            deployed = ?deployed,
            "Deployment aborted"
        );

        PipelineAbort {
            failed_at,
            error,
            deployed,
        }
    }

    async fn connect(&self) -> Result<K::Client, PipelineError> {
        let endpoint = self.config.endpoint.as_str();
        tracing::info!(endpoint, "Connecting to chain...");

        let attempts = (|| self.connector.connect(endpoint))
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(500))
                    .with_max_times(self.config.connect_retries),
            )
            .notify(|err: &ChainError, delay: Duration| {
                tracing::warn!(error = %err, retry_in = ?delay, "Connection failed, retrying...");
            });

        match &self.cancel {
            Some(signal) => {
                let mut signal = signal.clone();
                tokio::select! {
                    biased;
                    _ = signal.cancelled() => Err(PipelineError::Cancelled(self.state().to_string())),
                    result = attempts => result.map_err(PipelineError::Connect),
                }
            }
            None => attempts.await.map_err(PipelineError::Connect),
        }
    }

    /// Deploy `plan` with `signer`.
    ///
    /// The connection is opened once and closed once, whatever the outcome.
    pub async fn run(
        &mut self,
        plan: &DeploymentPlan,
        signer: &Credential,
    ) -> Result<RunReport, PipelineAbort> {
        if self.state() != PipelineState::NotStarted {
            return Err(PipelineAbort {
                failed_at: self.state(),
                error: PipelineError::AlreadyStarted,
                deployed: self.deployed.summaries(),
            });
        }

        let client = match self.connect().await {
            Ok(client) => client,
            Err(e) => return Err(self.abort(e)),
        };

        let result = self.execute(&client, plan, signer).await;
        client.disconnect().await;

        result.map_err(|e| self.abort(e))
    }

    /// Upload the code of every contract in `plan` without instantiating anything.
    pub async fn upload(
        &mut self,
        plan: &DeploymentPlan,
        signer: &Credential,
    ) -> Result<Vec<(String, B256)>, PipelineAbort> {
        if self.state() != PipelineState::NotStarted {
            return Err(PipelineAbort {
                failed_at: self.state(),
                error: PipelineError::AlreadyStarted,
                deployed: Vec::new(),
            });
        }

        let client = match self.connect().await {
            Ok(client) => client,
            Err(e) => return Err(self.abort(e)),
        };

        let result = self.upload_all(&client, plan, signer).await;
        client.disconnect().await;

        match result {
            Ok(hashes) => {
                self.set_state(PipelineState::Done);
                Ok(hashes)
            }
            Err(e) => Err(self.abort(e)),
        }
    }

    async fn upload_all(
        &self,
        client: &K::Client,
        plan: &DeploymentPlan,
        signer: &Credential,
    ) -> Result<Vec<(String, B256)>, PipelineError> {
        let tracker = self.tracker();
        let salt = self.config.salt_strategy();
        let step = DeploymentStep::new(
            client,
            &self.artifacts,
            &tracker,
            self.config.instantiate_limits,
            &salt,
        );

        let mut hashes = Vec::with_capacity(plan.contracts.len());
        for (index, spec) in plan.contracts.iter().enumerate() {
            self.check_cancelled()?;
            self.set_state(PipelineState::Deploying {
                index,
                name: spec.name.clone(),
            });

            let hash = step
                .upload(spec.artifact_name(), signer)
                .await
                .map_err(|source| self.step_error(&spec.name, source))?;
            tracing::info!(contract = %spec.name, code_hash = %hash, "Code uploaded");
            hashes.push((spec.name.clone(), hash));
        }

        Ok(hashes)
    }

    fn step_error(&self, step: &str, source: DeployError) -> PipelineError {
        if source.is_cancelled() {
            PipelineError::Cancelled(self.state().to_string())
        } else {
            PipelineError::Deploy {
                step: step.to_string(),
                source,
            }
        }
    }

    async fn execute(
        &mut self,
        client: &K::Client,
        plan: &DeploymentPlan,
        signer: &Credential,
    ) -> Result<RunReport, PipelineError> {
        match client.query_balance(signer.address()).await {
            Ok(balance) => {
                tracing::info!(deployer = %signer.address(), balance = %balance, "Deployer balance")
            }
            Err(e) => tracing::warn!(error = %e, "Failed to query deployer balance"),
        }

        let tracker = self.tracker();
        let salt = self.config.salt_strategy();
        let mut skipped = Vec::new();

        for (index, spec) in plan.contracts.iter().enumerate() {
            self.check_cancelled()?;
            self.set_state(PipelineState::Deploying {
                index,
                name: spec.name.clone(),
            });

            if self.deployed.contains(&spec.name) {
                return Err(PipelineError::DuplicateContract(spec.name.clone()));
            }

            let args = self.resolve_args(&spec.args).map_err(|dependency| {
                PipelineError::UnresolvedDependency {
                    step: spec.name.clone(),
                    dependency,
                }
            })?;

            let step = DeploymentStep::new(
                client,
                &self.artifacts,
                &tracker,
                self.config.instantiate_limits,
                &salt,
            );
            let deployed = step
                .execute(spec, args, signer)
                .await
                .map_err(|source| self.step_error(&spec.name, source))?;

            self.record(deployed)?;
        }

        self.set_state(PipelineState::WiringCrossContract);
        for call in &plan.wiring {
            self.check_cancelled()?;

            match self.perform_call(client, &tracker, call, signer).await {
                Ok(()) => {}
                Err(CallFailure::Failed(source)) if source.is_cancelled() => {
                    return Err(PipelineError::Cancelled(self.state().to_string()));
                }
                Err(CallFailure::Failed(source)) => {
                    return Err(PipelineError::Wiring {
                        operation: call.label.clone(),
                        source,
                    });
                }
                Err(CallFailure::MissingContract(contract)) | Err(CallFailure::Unresolved(contract)) => {
                    match self.config.missing_contracts {
                        MissingContractPolicy::Skip => {
                            tracing::warn!(operation = %call.label, contract = %contract, "Skipping wiring operation");
                            skipped.push(call.label.clone());
                        }
                        MissingContractPolicy::Fail => {
                            return Err(PipelineError::MissingContract {
                                operation: call.label.clone(),
                                contract,
                            });
                        }
                    }
                }
            }
        }

        let mut smoke_failures = Vec::new();
        let mut smoke_tests_run = 0;
        if self.config.smoke_tests {
            self.set_state(PipelineState::Testing);

            for call in &plan.smoke_tests {
                self.check_cancelled()?;

                let reason = match self.perform_call(client, &tracker, call, signer).await {
                    Ok(()) => {
                        smoke_tests_run += 1;
                        continue;
                    }
                    Err(CallFailure::Failed(source)) if source.is_cancelled() => {
                        return Err(PipelineError::Cancelled(self.state().to_string()));
                    }
                    Err(CallFailure::Failed(source)) => {
                        smoke_tests_run += 1;
                        source.to_string()
                    }
                    Err(CallFailure::MissingContract(contract))
                    | Err(CallFailure::Unresolved(contract)) => {
                        if self.config.missing_contracts == MissingContractPolicy::Skip {
                            tracing::warn!(operation = %call.label, contract = %contract, "Skipping smoke test");
                            skipped.push(call.label.clone());
                            continue;
                        }
                        format!("`{}` is not available", contract)
                    }
                };

                tracing::warn!(operation = %call.label, reason = %reason, "Smoke test failed");
                smoke_failures.push(SmokeFailure {
                    label: call.label.clone(),
                    reason,
                });
            }
        } else {
            tracing::info!("Smoke tests disabled");
        }

        self.set_state(PipelineState::Saving);
        let mut record =
            DeploymentRecord::new(&self.config.endpoint, signer.address(), plan.fingerprint());
        for contract in self.deployed.iter() {
            record.contracts.insert(
                contract.name.clone(),
                ContractEntry {
                    address: contract.address,
                    code_hash: contract.code_hash,
                    deployed: true,
                },
            );
        }
        record.warnings = smoke_failures.iter().map(ToString::to_string).collect();

        self.ledger.persist(&record).map_err(PipelineError::Ledger)?;
        self.set_state(PipelineState::Done);

        tracing::info!(
            contracts = record.contracts.len(),
            warnings = record.warnings.len(),
            "Deployment complete"
        );

        Ok(RunReport {
            record,
            smoke_tests_run,
            smoke_failures,
            skipped,
        })
    }

    /// Run a wiring or smoke-test call and remember its extracted result under its label.
    async fn perform_call(
        &mut self,
        client: &K::Client,
        tracker: &TransactionTracker,
        call: &CallSpec,
        signer: &Credential,
    ) -> Result<(), CallFailure> {
        let handle = self
            .deployed
            .get(&call.contract)
            .map(|contract| contract.handle.clone())
            .ok_or_else(|| CallFailure::MissingContract(call.contract.clone()))?;
        let args = self
            .resolve_args(&call.args)
            .map_err(CallFailure::Unresolved)?;

        let request = handle
            .call(
                call.label.clone(),
                &call.message,
                args,
                self.config.call_limits(call.value),
            )
            .map_err(|e| CallFailure::Failed(e.into()))?;

        tracing::info!(operation = %call.label, contract = %call.contract, message = %call.message, "Calling contract...");

        let receipt = tracker
            .submit_and_await(
                client,
                &request,
                signer,
                &EventFilter::contract_emitted(handle.address()),
            )
            .await
            .map_err(|e| CallFailure::Failed(e.into()))?;

        let output = receipt.extracted.output();
        tracing::info!(operation = %call.label, result = %output, "Call finalized");
        self.results.insert(call.label.clone(), output);

        Ok(())
    }

    fn resolve(&self, producer: &ArgumentProducer) -> Option<Value> {
        match producer {
            ArgumentProducer::Literal(value) => Some(value.clone()),
            ArgumentProducer::AddressOf(name) => {
                self.deployed.get(name).map(|contract| json!(contract.address))
            }
            ArgumentProducer::CodeHashOf(name) => {
                self.deployed.get(name).map(|contract| json!(contract.code_hash))
            }
            ArgumentProducer::ResultOf(label) => self.results.get(label).cloned(),
        }
    }

    /// Resolve every argument, or name the first dependency that is not available yet.
    fn resolve_args(&self, args: &[ArgumentProducer]) -> Result<Vec<Value>, String> {
        args.iter()
            .map(|arg| {
                self.resolve(arg)
                    .ok_or_else(|| arg.dependency().unwrap_or_default().to_string())
            })
            .collect()
    }
}
