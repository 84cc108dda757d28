//! Transaction tracker.
//!
//! Drives one submitted transaction through its status notifications to a terminal outcome and
//! extracts the result the caller is interested in from the finalized block's events.

use std::{sync::Arc, time::Duration};

use alloy_core::primitives::B256;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::watch;

use crate::{
    chain::{BlockHash, ChainClient, ChainEvent, StatusEvent, StatusStream},
    credential::Credential,
    error::TxError,
    request::TransactionRequest,
};

/// Default bound on the wait for a terminal status.
pub const DEFAULT_TX_TIMEOUT: Duration = Duration::from_secs(120);

/// Selects the event a caller wants out of a finalized block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    section: &'static str,
    method: &'static str,
    field: Option<(&'static str, String)>,
}

impl EventFilter {
    pub fn new(section: &'static str, method: &'static str) -> Self {
        Self {
            section,
            method,
            field: None,
        }
    }

    /// A contract instantiated by `deployer`.
    pub fn instantiated(deployer: impl ToString) -> Self {
        Self::new("contracts", "Instantiated").with_field("deployer", deployer)
    }

    pub fn code_stored() -> Self {
        Self::new("contracts", "CodeStored")
    }

    /// An event emitted by `contract`.
    pub fn contract_emitted(contract: impl ToString) -> Self {
        Self::new("contracts", "ContractEmitted").with_field("contract", contract)
    }

    /// Only match events whose `key` field equals `value`.
    pub fn with_field(mut self, key: &'static str, value: impl ToString) -> Self {
        self.field = Some((key, value.to_string()));
        self
    }

    pub fn matches(&self, event: &ChainEvent) -> bool {
        if !event.is(self.section, self.method) {
            return false;
        }

        match &self.field {
            None => true,
            // Addresses may come back checksummed or lowercase.
            Some((key, expected)) => event
                .field(key)
                .and_then(Value::as_str)
                .is_some_and(|actual| actual.eq_ignore_ascii_case(expected)),
        }
    }
}

/// Lifecycle state of a submitted transaction.
///
/// `Finalized` and `Failed` are terminal: once reached, [`TransactionOutcome::advance`] leaves
/// the outcome unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    Pending,
    IncludedInBlock(BlockHash),
    Finalized {
        block: BlockHash,
        events: Vec<ChainEvent>,
    },
    Failed(String),
}

impl TransactionOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized { .. } | Self::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::IncludedInBlock(_) => "included in block",
            Self::Finalized { .. } => "finalized",
            Self::Failed(_) => "failed",
        }
    }

    /// Apply one status notification.
    pub fn advance(self, status: StatusEvent) -> Self {
        if self.is_terminal() {
            return self;
        }

        match status {
            // Inclusion is never undone by a late pool notification.
            StatusEvent::Ready | StatusEvent::Broadcast => self,
            StatusEvent::InBlock { block } => Self::IncludedInBlock(block),
            StatusEvent::Finalized { block, events } => Self::Finalized { block, events },
            StatusEvent::DispatchError { detail } => Self::Failed(detail),
        }
    }

    /// The result of a terminal outcome, `None` while the transaction is still in flight.
    ///
    /// A finalized outcome yields the first event matching `filter` in block order, or the
    /// block hash when no event matches.
    pub fn resolve(&self, filter: &EventFilter) -> Option<Result<(BlockHash, Extracted), TxError>> {
        match self {
            Self::Pending | Self::IncludedInBlock(_) => None,
            Self::Failed(detail) => Some(Err(TxError::DispatchFailure(detail.clone()))),
            Self::Finalized { block, events } => {
                let extracted = events
                    .iter()
                    .find(|event| filter.matches(event))
                    .cloned()
                    .map(Extracted::Event)
                    .unwrap_or(Extracted::Receipt(*block));
                Some(Ok((*block, extracted)))
            }
        }
    }
}

/// Value extracted from a finalized transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    /// The first event matching the caller's filter.
    Event(ChainEvent),
    /// No event matched; the finalized block hash stands in as the receipt.
    Receipt(BlockHash),
}

impl Extracted {
    pub fn event(&self) -> Option<&ChainEvent> {
        match self {
            Self::Event(event) => Some(event),
            Self::Receipt(_) => None,
        }
    }

    /// The payload handed to later operations: the event's `data` field if it has one, the
    /// whole event payload otherwise, or the block hash for a bare receipt.
    pub fn output(&self) -> Value {
        match self {
            Self::Event(event) => event
                .field("data")
                .cloned()
                .unwrap_or_else(|| event.data.clone()),
            Self::Receipt(block) => json!(block),
        }
    }
}

/// Result of a transaction that reached `Finalized`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block: BlockHash,
    pub extracted: Extracted,
}

/// Triggers cancellation of every wait observing the paired [`CancelSignal`].
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Observes a [`CancelHandle`].
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation has been requested. Never resolves if the handle is dropped
    /// without cancelling.
    pub async fn cancelled(&mut self) {
        if self.0.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Create a connected cancellation handle and signal.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(Arc::new(tx)), CancelSignal(rx))
}

/// Submits transactions and waits for their terminal outcome.
///
/// Nothing is retried here: a failed, incomplete or timed out transaction is reported as is.
#[derive(Debug, Clone)]
pub struct TransactionTracker {
    timeout: Duration,
    cancel: Option<CancelSignal>,
}

impl Default for TransactionTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TX_TIMEOUT)
    }
}

impl TransactionTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelSignal::is_cancelled)
    }

    /// Submit `request` signed by `signer` and wait until it is finalized or fails.
    ///
    /// The whole wait is bounded by the tracker's timeout and raced against its cancellation
    /// signal.
    pub async fn submit_and_await<C: ChainClient>(
        &self,
        client: &C,
        request: &TransactionRequest,
        signer: &Credential,
        filter: &EventFilter,
    ) -> Result<TxReceipt, TxError> {
        if self.is_cancelled() {
            return Err(TxError::Cancelled);
        }

        let tx_hash = request.digest();
        tracing::debug!(operation = %request.label, tx_hash = %tx_hash, "Submitting transaction");

        let wait = async {
            let statuses = client.submit(request, signer).await?;
            Self::follow_status(statuses, &request.label, filter).await
        };
        let bounded = async {
            tokio::time::timeout(self.timeout, wait)
                .await
                .unwrap_or(Err(TxError::Timeout(self.timeout)))
        };

        let result = match &self.cancel {
            Some(signal) => {
                let mut signal = signal.clone();
                tokio::select! {
                    biased;
                    _ = signal.cancelled() => Err(TxError::Cancelled),
                    result = bounded => result,
                }
            }
            None => bounded.await,
        };

        let (block, extracted) = result?;
        tracing::info!(operation = %request.label, block = %block, "Transaction finalized");

        Ok(TxReceipt {
            tx_hash,
            block,
            extracted,
        })
    }

    async fn follow_status(
        mut statuses: StatusStream,
        label: &str,
        filter: &EventFilter,
    ) -> Result<(BlockHash, Extracted), TxError> {
        let mut outcome = TransactionOutcome::Pending;

        while let Some(status) = statuses.next().await {
            match &status {
                StatusEvent::Ready | StatusEvent::Broadcast => {
                    tracing::debug!(operation = %label, status = ?status, "Transaction pending");
                }
                StatusEvent::InBlock { block } => {
                    tracing::info!(operation = %label, block = %block, "Included in block");
                }
                StatusEvent::Finalized { block, events } => {
                    tracing::debug!(operation = %label, block = %block, events = events.len(), "Block finalized");
                }
                StatusEvent::DispatchError { detail } => {
                    tracing::warn!(operation = %label, detail = %detail, "Dispatch error");
                }
            }

            outcome = outcome.advance(status);
            if let Some(result) = outcome.resolve(filter) {
                return result;
            }
        }

        Err(TxError::Incomplete {
            last: outcome.name(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use alloy_core::primitives::Address;
    use futures::stream;

    use super::*;
    use crate::{chain::Balance, error::ChainError, request::ResourceLimits};

    /// Client replaying a fixed list of statuses for every submission.
    struct ScriptedClient {
        script: Vec<StatusEvent>,
        stall: bool,
        submits: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(script: Vec<StatusEvent>) -> Self {
            Self {
                script,
                stall: false,
                submits: AtomicUsize::new(0),
            }
        }

        fn stalling(script: Vec<StatusEvent>) -> Self {
            Self {
                stall: true,
                ..Self::new(script)
            }
        }
    }

    impl ChainClient for ScriptedClient {
        async fn submit(
            &self,
            _request: &TransactionRequest,
            _signer: &Credential,
        ) -> Result<StatusStream, ChainError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            let statuses = stream::iter(self.script.clone()).boxed();
            if self.stall {
                Ok(statuses.chain(stream::pending()).boxed())
            } else {
                Ok(statuses)
            }
        }

        async fn query_balance(&self, _address: Address) -> Result<Balance, ChainError> {
            Ok(Balance(0))
        }

        async fn disconnect(self) {}
    }

    fn request() -> TransactionRequest {
        let limits = ResourceLimits {
            gas_limit: 1,
            storage_deposit_limit: None,
            value: 0,
        };
        TransactionRequest::call("ping", Address::repeat_byte(1), "ping", vec![], limits)
    }

    fn signer() -> Credential {
        Credential::from_seed("//Alice").unwrap()
    }

    fn emitted(contract: &str, data: u64) -> ChainEvent {
        ChainEvent::new(
            "contracts",
            "ContractEmitted",
            json!({ "contract": contract, "data": data }),
        )
    }

    fn finalized(events: Vec<ChainEvent>) -> StatusEvent {
        StatusEvent::Finalized {
            block: B256::repeat_byte(2),
            events,
        }
    }

    fn in_block() -> StatusEvent {
        StatusEvent::InBlock {
            block: B256::repeat_byte(2),
        }
    }

    #[test]
    fn test_event_filter_matches_field_case_insensitively() {
        let filter = EventFilter::contract_emitted("0xABCDEF");
        assert!(filter.matches(&emitted("0xabcdef", 1)));
        assert!(!filter.matches(&emitted("0x123456", 1)));
        assert!(!EventFilter::code_stored().matches(&emitted("0xabcdef", 1)));
    }

    #[test]
    fn test_terminal_outcome_is_final() {
        let outcome = TransactionOutcome::Pending
            .advance(StatusEvent::Ready)
            .advance(in_block())
            .advance(StatusEvent::DispatchError {
                detail: "contracts.ContractTrapped".to_string(),
            });
        assert_eq!(
            outcome,
            TransactionOutcome::Failed("contracts.ContractTrapped".to_string())
        );

        let after = outcome.clone().advance(finalized(vec![]));
        assert_eq!(after, outcome);
    }

    #[test]
    fn test_repeated_finalized_yields_same_result() {
        let filter = EventFilter::contract_emitted("0x01");
        let outcome =
            TransactionOutcome::Pending.advance(finalized(vec![emitted("0x01", 7), emitted("0x01", 8)]));
        let first = outcome.resolve(&filter).unwrap().unwrap();

        let repeated = outcome.advance(finalized(vec![emitted("0x01", 9)]));
        let second = repeated.resolve(&filter).unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(second.1.output(), json!(7));
    }

    #[tokio::test]
    async fn test_first_matching_event_is_extracted() {
        let client = ScriptedClient::new(vec![
            StatusEvent::Ready,
            StatusEvent::Broadcast,
            in_block(),
            finalized(vec![emitted("0x02", 1), emitted("0x01", 2), emitted("0x01", 3)]),
        ]);
        let tracker = TransactionTracker::default();

        let receipt = tracker
            .submit_and_await(&client, &request(), &signer(), &EventFilter::contract_emitted("0x01"))
            .await
            .unwrap();

        assert_eq!(receipt.block, B256::repeat_byte(2));
        assert_eq!(receipt.tx_hash, request().digest());
        assert_eq!(receipt.extracted.output(), json!(2));
    }

    #[tokio::test]
    async fn test_duplicate_finalized_notification_is_ignored() {
        let client = ScriptedClient::new(vec![
            in_block(),
            finalized(vec![emitted("0x01", 7)]),
            StatusEvent::Finalized {
                block: B256::repeat_byte(3),
                events: vec![emitted("0x01", 8)],
            },
        ]);

        let receipt = TransactionTracker::default()
            .submit_and_await(&client, &request(), &signer(), &EventFilter::contract_emitted("0x01"))
            .await
            .unwrap();

        assert_eq!(receipt.block, B256::repeat_byte(2));
        assert_eq!(receipt.extracted.output(), json!(7));
        assert_eq!(client.submits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_receipt_fallback_without_matching_event() {
        let client = ScriptedClient::new(vec![in_block(), finalized(vec![emitted("0x02", 1)])]);

        let receipt = TransactionTracker::default()
            .submit_and_await(&client, &request(), &signer(), &EventFilter::contract_emitted("0x01"))
            .await
            .unwrap();

        assert_eq!(receipt.extracted, Extracted::Receipt(B256::repeat_byte(2)));
        assert_eq!(receipt.extracted.output(), json!(B256::repeat_byte(2)));
    }

    #[tokio::test]
    async fn test_stream_end_without_terminal_status_is_incomplete() {
        let client = ScriptedClient::new(vec![StatusEvent::Ready, in_block()]);

        let err = TransactionTracker::default()
            .submit_and_await(&client, &request(), &signer(), &EventFilter::code_stored())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TxError::Incomplete {
                last: "included in block"
            }
        ));
    }

    #[tokio::test]
    async fn test_dispatch_error_is_reported() {
        let client = ScriptedClient::new(vec![
            in_block(),
            StatusEvent::DispatchError {
                detail: "contracts.OutOfGas".to_string(),
            },
        ]);

        let err = TransactionTracker::default()
            .submit_and_await(&client, &request(), &signer(), &EventFilter::code_stored())
            .await
            .unwrap_err();

        assert!(matches!(err, TxError::DispatchFailure(detail) if detail == "contracts.OutOfGas"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_at_the_bound() {
        let client = ScriptedClient::stalling(vec![StatusEvent::Ready, in_block()]);
        let tracker = TransactionTracker::new(Duration::from_secs(30));

        let start = tokio::time::Instant::now();
        let err = tracker
            .submit_and_await(&client, &request(), &signer(), &EventFilter::code_stored())
            .await
            .unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, TxError::Timeout(bound) if bound == Duration::from_secs(30)));
        assert!(elapsed >= Duration::from_secs(30));
        assert!(elapsed < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let client = ScriptedClient::stalling(vec![StatusEvent::Ready]);
        let (handle, signal) = cancel_pair();
        let tracker = TransactionTracker::new(Duration::from_secs(600)).with_cancel(signal);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            handle.cancel();
        });

        let start = tokio::time::Instant::now();
        let err = tracker
            .submit_and_await(&client, &request(), &signer(), &EventFilter::code_stored())
            .await
            .unwrap_err();

        assert!(matches!(err, TxError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_cancelled_tracker_submits_nothing() {
        let client = ScriptedClient::new(vec![finalized(vec![])]);
        let (handle, signal) = cancel_pair();
        handle.cancel();

        let err = TransactionTracker::default()
            .with_cancel(signal)
            .submit_and_await(&client, &request(), &signer(), &EventFilter::code_stored())
            .await
            .unwrap_err();

        assert!(matches!(err, TxError::Cancelled));
        assert_eq!(client.submits.load(Ordering::SeqCst), 0);
    }
}
