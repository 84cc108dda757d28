//! JSON-RPC chain client.
//!
//! Talks to a signing gateway that owns the network specific transaction encoding. Requests are
//! sent as JSON together with the signer address and a signature over the request digest; the
//! transaction status is then polled until it reaches a terminal state.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use alloy_core::primitives::{Address, B256};
use anyhow::Context;
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use url::Url;

use super::{Balance, ChainClient, ChainConnector, StatusEvent, StatusStream};
use crate::{credential::Credential, error::ChainError, request::TransactionRequest};

/// Default timeout for gateway requests.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between status polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Consecutive failed polls after which the status stream is closed.
const MAX_POLL_FAILURES: usize = 5;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<GatewayError>,
}

/// Error object returned by the gateway.
#[derive(Debug, Deserialize, thiserror::Error)]
#[error("gateway error {code}: {message}")]
struct GatewayError {
    code: i64,
    message: String,
}

impl RpcResponse {
    fn into_result<T: DeserializeOwned>(self, method: &str) -> anyhow::Result<T> {
        if let Some(error) = self.error {
            return Err(anyhow::Error::new(error).context(format!("{} rejected", method)));
        }

        let result = self
            .result
            .with_context(|| format!("{} returned no result", method))?;
        serde_json::from_value(result).with_context(|| format!("Unexpected {} result", method))
    }
}

/// Map websocket endpoints onto the HTTP transport the gateway is reached through.
fn http_endpoint(endpoint: &str) -> Result<Url, ChainError> {
    let connect_error = |reason: String| ChainError::Connect {
        endpoint: endpoint.to_string(),
        reason,
    };

    let mut url = Url::parse(endpoint).map_err(|e| connect_error(e.to_string()))?;
    let scheme = match url.scheme() {
        "ws" => "http",
        "wss" => "https",
        "http" | "https" => return Ok(url),
        other => return Err(connect_error(format!("unsupported scheme `{}`", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| connect_error(format!("cannot switch scheme to {}", scheme)))?;

    Ok(url)
}

/// Connector for JSON-RPC gateways.
#[derive(Debug, Clone)]
pub struct RpcConnector {
    request_timeout: Duration,
    poll_interval: Duration,
}

impl Default for RpcConnector {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl RpcConnector {
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl ChainConnector for RpcConnector {
    type Client = RpcClient;

    async fn connect(&self, endpoint: &str) -> Result<RpcClient, ChainError> {
        let connect_error = |e: anyhow::Error| ChainError::Connect {
            endpoint: endpoint.to_string(),
            reason: format!("{:#}", e),
        };

        let url = http_endpoint(endpoint)?;
        let http = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
            .context("Failed to create HTTP client")
            .map_err(connect_error)?;

        let client = RpcClient {
            http,
            url,
            poll_interval: self.poll_interval,
            next_id: Arc::new(AtomicU64::new(1)),
        };

        let health: Value = client
            .call("system_health", vec![])
            .await
            .map_err(connect_error)?;
        tracing::debug!(endpoint, health = %health, "Connected to gateway");

        Ok(client)
    }
}

/// Open session with a JSON-RPC gateway. Clones share the request id counter.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    url: Url,
    poll_interval: Duration,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> anyhow::Result<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response: RpcResponse = self
            .http
            .post(self.url.clone())
            .json(&request)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .with_context(|| format!("{} request to {} failed", method, self.url))?
            .json()
            .await
            .with_context(|| format!("Malformed {} response", method))?;

        response.into_result(method)
    }

    /// Poll the status of `tx_hash`, yielding each status change once. The stream ends after a
    /// terminal status or after too many consecutive failed polls.
    fn poll_status(&self, tx_hash: B256) -> StatusStream {
        struct PollState {
            client: RpcClient,
            tx_hash: B256,
            last: Option<StatusEvent>,
            failures: usize,
        }

        let state = PollState {
            client: self.clone(),
            tx_hash,
            last: None,
            failures: 0,
        };

        stream::unfold(state, |mut state| async move {
            if state.last.as_ref().is_some_and(StatusEvent::is_terminal) {
                return None;
            }

            loop {
                match state
                    .client
                    .call::<StatusEvent>("contracts_transactionStatus", vec![json!(state.tx_hash)])
                    .await
                {
                    Ok(status) => {
                        state.failures = 0;
                        if state.last.as_ref() != Some(&status) {
                            state.last = Some(status.clone());
                            return Some((status, state));
                        }
                    }
                    Err(e) => {
                        state.failures += 1;
                        tracing::trace!(
                            error = %e,
                            tx_hash = %state.tx_hash,
                            failures = state.failures,
                            "Status poll failed, retrying..."
                        );
                        if state.failures >= MAX_POLL_FAILURES {
                            tracing::warn!(tx_hash = %state.tx_hash, "Giving up on status polling");
                            return None;
                        }
                    }
                }

                tokio::time::sleep(state.client.poll_interval).await;
            }
        })
        .boxed()
    }
}

impl ChainClient for RpcClient {
    async fn submit(
        &self,
        request: &TransactionRequest,
        signer: &Credential,
    ) -> Result<StatusStream, ChainError> {
        let signature = signer.sign(&request.digest());
        let payload =
            serde_json::to_value(request).map_err(|e| ChainError::Submit(e.to_string()))?;

        let tx_hash: B256 = self
            .call(
                "contracts_submit",
                vec![payload, json!(signer.address()), json!(signature)],
            )
            .await
            .map_err(|e| ChainError::Submit(format!("{:#}", e)))?;

        tracing::debug!(operation = %request.label, tx_hash = %tx_hash, "Transaction accepted by gateway");

        Ok(self.poll_status(tx_hash))
    }

    async fn query_balance(&self, address: Address) -> Result<Balance, ChainError> {
        let raw: String = self
            .call("system_accountBalance", vec![json!(address)])
            .await
            .map_err(|e| ChainError::Query(format!("{:#}", e)))?;

        raw.parse::<u128>()
            .map(Balance)
            .map_err(|e| ChainError::Query(format!("invalid balance `{}`: {}", raw, e)))
    }

    async fn disconnect(self) {
        tracing::debug!(endpoint = %self.url, "Closed gateway session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_endpoints_map_to_http() {
        assert_eq!(
            http_endpoint("wss://rococo-contracts-rpc.polkadot.io").unwrap().as_str(),
            "https://rococo-contracts-rpc.polkadot.io/"
        );
        assert_eq!(
            http_endpoint("ws://127.0.0.1:9944").unwrap().as_str(),
            "http://127.0.0.1:9944/"
        );
        assert_eq!(
            http_endpoint("http://localhost:8080/rpc").unwrap().as_str(),
            "http://localhost:8080/rpc"
        );
    }

    #[test]
    fn test_unsupported_endpoints_are_rejected() {
        assert!(matches!(
            http_endpoint("ftp://example.com"),
            Err(ChainError::Connect { .. })
        ));
        assert!(http_endpoint("not a url").is_err());
    }

    #[test]
    fn test_gateway_error_is_reported_with_code() {
        let response: RpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "error": { "code": -32000, "message": "insufficient balance" }
        }))
        .unwrap();

        let err = response.into_result::<B256>("contracts_submit").unwrap_err();
        assert_eq!(
            format!("{:#}", err),
            "contracts_submit rejected: gateway error -32000: insufficient balance"
        );
    }

    #[test]
    fn test_response_result_is_typed() {
        let response: RpcResponse =
            serde_json::from_value(json!({ "jsonrpc": "2.0", "id": 1, "result": "42" })).unwrap();
        assert_eq!(response.into_result::<String>("system_accountBalance").unwrap(), "42");

        let empty: RpcResponse = serde_json::from_value(json!({ "jsonrpc": "2.0", "id": 2 })).unwrap();
        assert!(empty.into_result::<Value>("system_health").is_err());
    }

    #[test]
    fn test_request_envelope() {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 7,
            method: "system_health",
            params: vec![],
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({ "jsonrpc": "2.0", "id": 7, "method": "system_health", "params": [] })
        );
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_gateway_fails() {
        let connector = RpcConnector::default().with_request_timeout(Duration::from_secs(1));
        let result = connector.connect("http://127.0.0.1:1").await;
        assert!(matches!(result, Err(ChainError::Connect { .. })));
    }
}
