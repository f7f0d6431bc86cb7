use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use starproof_ledger_mock::MockLedger;
use starproof_rpc::model::{
    GetLedgerEntriesRequest, GetLedgerEntriesResponse, GetNetworkResponse, GetTransactionRequest,
    GetTransactionResponse, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    SendTransactionRequest, SendTransactionResponse, SimulateTransactionRequest,
    SimulateTransactionResponse, METHOD_GET_LEDGER_ENTRIES, METHOD_GET_NETWORK,
    METHOD_GET_TRANSACTION, METHOD_SEND_TRANSACTION, METHOD_SIMULATE_TRANSACTION,
};
use thiserror::Error;
use tokio::time::Instant;

pub const DEFAULT_RPC_URL: &str = "https://soroban-testnet.stellar.org";

/// Retry behavior for idempotent RPC reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
            jitter_ms: 50,
        }
    }
}

/// RPC endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub rpc_url: String,
    pub request_timeout_ms: u64,
    pub retry_policy: RetryPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            request_timeout_ms: 10_000,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Error model for transport operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("rpc endpoint unavailable: {0}")]
    Unavailable(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed rpc response: {0}")]
    Decode(String),
    #[error("internal transport error: {0}")]
    Internal(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unavailable(_))
    }
}

impl From<JsonRpcError> for TransportError {
    fn from(value: JsonRpcError) -> Self {
        Self::Rpc {
            code: value.code,
            message: value.message,
        }
    }
}

/// Soroban RPC interface. Implementations may talk HTTP or wrap the in-memory ledger.
#[async_trait]
pub trait SorobanRpc: Send + Sync {
    async fn get_network(&self) -> Result<GetNetworkResponse, TransportError>;

    async fn get_ledger_entries(
        &self,
        request: GetLedgerEntriesRequest,
    ) -> Result<GetLedgerEntriesResponse, TransportError>;

    async fn simulate_transaction(
        &self,
        request: SimulateTransactionRequest,
    ) -> Result<SimulateTransactionResponse, TransportError>;

    async fn send_transaction(
        &self,
        request: SendTransactionRequest,
    ) -> Result<SendTransactionResponse, TransportError>;

    async fn get_transaction(
        &self,
        request: GetTransactionRequest,
    ) -> Result<GetTransactionResponse, TransportError>;
}

/// JSON-RPC 2.0 over HTTP POST.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    config: TransportConfig,
    client: Client,
    last_id: Arc<AtomicU64>,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            last_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn url(&self) -> &str {
        &self.config.rpc_url
    }

    async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, TransportError>
    where
        P: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        let request = JsonRpcRequest::new(
            self.last_id.fetch_add(1, Ordering::SeqCst),
            method,
            params,
        );
        let response = self
            .client
            .post(&self.config.rpc_url)
            .timeout(Duration::from_millis(self.config.request_timeout_ms))
            .json(&request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(TransportError::Unavailable(format!("http status {status}")));
        }
        if !status.is_success() {
            return Err(TransportError::Internal(format!("http status {status}")));
        }

        let body: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|err| TransportError::Decode(err.to_string()))?;
        if let Some(error) = body.error {
            return Err(error.into());
        }
        body.result
            .ok_or_else(|| TransportError::Decode(format!("`{method}` response has no result")))
    }

    async fn read<P, R>(&self, method: &str, params: &P) -> Result<R, TransportError>
    where
        P: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        retry_with_backoff(
            &self.config.retry_policy,
            Duration::from_millis(self.config.request_timeout_ms),
            || self.call(method, params),
        )
        .await
    }
}

#[async_trait]
impl SorobanRpc for HttpTransport {
    async fn get_network(&self) -> Result<GetNetworkResponse, TransportError> {
        self.read(METHOD_GET_NETWORK, &serde_json::json!({})).await
    }

    async fn get_ledger_entries(
        &self,
        request: GetLedgerEntriesRequest,
    ) -> Result<GetLedgerEntriesResponse, TransportError> {
        self.read(METHOD_GET_LEDGER_ENTRIES, &request).await
    }

    async fn simulate_transaction(
        &self,
        request: SimulateTransactionRequest,
    ) -> Result<SimulateTransactionResponse, TransportError> {
        self.read(METHOD_SIMULATE_TRANSACTION, &request).await
    }

    async fn send_transaction(
        &self,
        request: SendTransactionRequest,
    ) -> Result<SendTransactionResponse, TransportError> {
        self.call(METHOD_SEND_TRANSACTION, &request).await
    }

    async fn get_transaction(
        &self,
        request: GetTransactionRequest,
    ) -> Result<GetTransactionResponse, TransportError> {
        self.read(METHOD_GET_TRANSACTION, &request).await
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() || err.is_request() {
        TransportError::Unavailable(err.to_string())
    } else {
        TransportError::Internal(err.to_string())
    }
}

/// In-memory transport backed by `MockLedger`, used by tests and the demo mode.
#[derive(Clone)]
pub struct MockTransport {
    ledger: Arc<Mutex<MockLedger>>,
    offline: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn new(ledger: MockLedger) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(ledger)),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// While offline every request fails with `TransportError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn with_ledger<R>(&self, f: impl FnOnce(&mut MockLedger) -> R) -> Result<R, TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("mock ledger offline".to_string()));
        }
        let mut lock = self
            .ledger
            .lock()
            .map_err(|_| TransportError::Unavailable("mutex poisoned".to_string()))?;
        Ok(f(&mut lock))
    }
}

#[async_trait]
impl SorobanRpc for MockTransport {
    async fn get_network(&self) -> Result<GetNetworkResponse, TransportError> {
        self.with_ledger(|ledger| ledger.get_network())
    }

    async fn get_ledger_entries(
        &self,
        request: GetLedgerEntriesRequest,
    ) -> Result<GetLedgerEntriesResponse, TransportError> {
        Ok(self.with_ledger(|ledger| ledger.get_ledger_entries(request))??)
    }

    async fn simulate_transaction(
        &self,
        request: SimulateTransactionRequest,
    ) -> Result<SimulateTransactionResponse, TransportError> {
        Ok(self.with_ledger(|ledger| ledger.simulate_transaction(request))??)
    }

    async fn send_transaction(
        &self,
        request: SendTransactionRequest,
    ) -> Result<SendTransactionResponse, TransportError> {
        Ok(self.with_ledger(|ledger| ledger.send_transaction(request))??)
    }

    async fn get_transaction(
        &self,
        request: GetTransactionRequest,
    ) -> Result<GetTransactionResponse, TransportError> {
        Ok(self.with_ledger(|ledger| ledger.get_transaction(request))??)
    }
}

pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    mut op: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, TransportError>>,
{
    let deadline = Instant::now() + timeout;
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() {
                    return Err(err);
                }
                if attempt >= policy.max_retries {
                    return Err(err);
                }
                let now = Instant::now();
                if now >= deadline {
                    return Err(TransportError::Timeout);
                }

                let delay = backoff_delay_ms(attempt, policy);
                attempt += 1;
                let remaining = deadline.saturating_duration_since(now).as_millis() as u64;
                if delay > remaining {
                    return Err(TransportError::Timeout);
                }
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
    }
}

fn backoff_delay_ms(attempt: u32, policy: &RetryPolicy) -> u64 {
    let exp = policy
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    let capped = exp.min(policy.max_backoff_ms);
    let jitter = if policy.jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=policy.jitter_ms)
    };
    capped.saturating_add(jitter)
}
