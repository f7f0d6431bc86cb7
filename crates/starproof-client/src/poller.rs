//! Submission and bounded confirmation polling.

use std::sync::Arc;
use std::time::Duration;

use starproof_rpc::model::{
    GetTransactionRequest, SendTransactionRequest, SendTransactionStatus, TransactionStatus,
};
use starproof_types::TxHash;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::transport::{SorobanRpc, TransportError};

/// Backoff schedule for `getTransaction` while the ledger still answers `NOT_FOUND`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: u32,
    /// Total time allowed from the first status query.
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(8),
            multiplier: 2,
            deadline: Duration::from_secs(60),
        }
    }
}

impl PollPolicy {
    /// Delay after the `attempt`-th unsuccessful query (0-based).
    pub fn interval(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(attempt);
        self.initial_interval
            .saturating_mul(factor)
            .min(self.max_interval)
    }
}

/// A transaction the RPC accepted into its pending queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionHandle {
    pub hash: TxHash,
    pub latest_ledger: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedTransaction {
    pub hash: TxHash,
    pub ledger: u32,
    /// Ledger close time, unix seconds.
    pub created_at: Option<u64>,
    pub result_xdr: Option<String>,
    pub attempts: u32,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("transaction {hash} rejected at submission with status {status:?}")]
    Rejected {
        hash: String,
        status: SendTransactionStatus,
        error_result_xdr: Option<String>,
    },
    #[error("transaction {hash} failed with status {status:?}")]
    Failed {
        hash: TxHash,
        status: TransactionStatus,
        result_xdr: Option<String>,
    },
    #[error("transaction {hash} still unconfirmed after {attempts} status queries")]
    Timeout { hash: TxHash, attempts: u32 },
    #[error("rpc returned a malformed transaction hash `{0}`")]
    InvalidHash(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Sends signed envelopes and waits for a terminal status.
pub struct ConfirmationPoller<T: SorobanRpc> {
    rpc: Arc<T>,
    policy: PollPolicy,
}

impl<T: SorobanRpc> ConfirmationPoller<T> {
    pub fn new(rpc: Arc<T>, policy: PollPolicy) -> Self {
        Self { rpc, policy }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// `sendTransaction`; anything but `PENDING` is a rejection and is not polled.
    pub async fn submit(&self, signed_envelope_xdr: &str) -> Result<SubmissionHandle, SubmissionError> {
        let response = self
            .rpc
            .send_transaction(SendTransactionRequest {
                transaction: signed_envelope_xdr.to_string(),
            })
            .await?;
        if response.status != SendTransactionStatus::Pending {
            warn!(hash = %response.hash, status = ?response.status, "submission rejected");
            return Err(SubmissionError::Rejected {
                hash: response.hash,
                status: response.status,
                error_result_xdr: response.error_result_xdr,
            });
        }
        let hash = TxHash::from_hex(&response.hash)
            .map_err(|_| SubmissionError::InvalidHash(response.hash.clone()))?;
        info!(%hash, latest_ledger = response.latest_ledger, "transaction submitted");
        Ok(SubmissionHandle {
            hash,
            latest_ledger: response.latest_ledger,
        })
    }

    /// Polls `getTransaction` until `SUCCESS` or `FAILED`, or until the
    /// policy deadline passes. Queries at least once.
    pub async fn confirm(
        &self,
        handle: &SubmissionHandle,
    ) -> Result<ConfirmedTransaction, SubmissionError> {
        let deadline = Instant::now() + self.policy.deadline;
        let mut attempts = 0u32;
        loop {
            let response = self
                .rpc
                .get_transaction(GetTransactionRequest {
                    hash: handle.hash.to_string(),
                })
                .await?;
            attempts += 1;

            match response.status {
                TransactionStatus::Success => {
                    let ledger = response.ledger.unwrap_or(response.latest_ledger);
                    info!(hash = %handle.hash, ledger, attempts, "transaction confirmed");
                    return Ok(ConfirmedTransaction {
                        hash: handle.hash,
                        ledger,
                        created_at: response.created_at,
                        result_xdr: response.result_xdr,
                        attempts,
                    });
                }
                TransactionStatus::Failed => {
                    warn!(hash = %handle.hash, attempts, "transaction failed");
                    return Err(SubmissionError::Failed {
                        hash: handle.hash,
                        status: response.status,
                        result_xdr: response.result_xdr,
                    });
                }
                TransactionStatus::NotFound => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(hash = %handle.hash, attempts, "confirmation deadline exceeded");
                        return Err(SubmissionError::Timeout {
                            hash: handle.hash,
                            attempts,
                        });
                    }
                    let delay = self
                        .policy
                        .interval(attempts - 1)
                        .min(deadline.saturating_duration_since(now));
                    debug!(hash = %handle.hash, attempts, delay_ms = delay.as_millis() as u64, "transaction not found yet");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    pub async fn submit_and_confirm(
        &self,
        signed_envelope_xdr: &str,
    ) -> Result<ConfirmedTransaction, SubmissionError> {
        let handle = self.submit(signed_envelope_xdr).await?;
        self.confirm(&handle).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use starproof_rpc::model::{
        GetLedgerEntriesRequest, GetLedgerEntriesResponse, GetNetworkResponse,
        GetTransactionRequest, GetTransactionResponse, SendTransactionRequest,
        SendTransactionResponse, SendTransactionStatus, SimulateTransactionRequest,
        SimulateTransactionResponse, TransactionStatus,
    };
    use starproof_types::TxHash;

    use super::{ConfirmationPoller, PollPolicy, SubmissionError, SubmissionHandle};
    use crate::transport::{SorobanRpc, TransportError};

    /// Scripted RPC: answers `getTransaction` from a queue, then repeats the last status.
    struct ScriptedRpc {
        send_status: SendTransactionStatus,
        statuses: Mutex<Vec<TransactionStatus>>,
        queries: Mutex<Vec<tokio::time::Instant>>,
    }

    impl ScriptedRpc {
        fn new(send_status: SendTransactionStatus, statuses: Vec<TransactionStatus>) -> Arc<Self> {
            Arc::new(Self {
                send_status,
                statuses: Mutex::new(statuses),
                queries: Mutex::new(Vec::new()),
            })
        }

        fn query_count(&self) -> usize {
            self.queries.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SorobanRpc for ScriptedRpc {
        async fn get_network(&self) -> Result<GetNetworkResponse, TransportError> {
            Err(TransportError::Internal("unused".to_string()))
        }

        async fn get_ledger_entries(
            &self,
            _request: GetLedgerEntriesRequest,
        ) -> Result<GetLedgerEntriesResponse, TransportError> {
            Err(TransportError::Internal("unused".to_string()))
        }

        async fn simulate_transaction(
            &self,
            _request: SimulateTransactionRequest,
        ) -> Result<SimulateTransactionResponse, TransportError> {
            Err(TransportError::Internal("unused".to_string()))
        }

        async fn send_transaction(
            &self,
            _request: SendTransactionRequest,
        ) -> Result<SendTransactionResponse, TransportError> {
            Ok(SendTransactionResponse {
                status: self.send_status,
                hash: hash().to_string(),
                latest_ledger: 10,
                error_result_xdr: (self.send_status == SendTransactionStatus::Error)
                    .then(|| "AAAAAAAAAGT////7AAAAAA==".to_string()),
            })
        }

        async fn get_transaction(
            &self,
            _request: GetTransactionRequest,
        ) -> Result<GetTransactionResponse, TransportError> {
            self.queries.lock().unwrap().push(tokio::time::Instant::now());
            let mut statuses = self.statuses.lock().unwrap();
            let status = if statuses.len() > 1 {
                statuses.remove(0)
            } else {
                statuses[0]
            };
            let mut response = GetTransactionResponse::not_found(11);
            response.status = status;
            if status != TransactionStatus::NotFound {
                response.ledger = Some(11);
                response.created_at = Some(1_700_000_055);
                response.result_xdr = Some("AAAAAAAAAGQAAAAAAAAAAA==".to_string());
            }
            Ok(response)
        }
    }

    fn hash() -> TxHash {
        TxHash::new([0xab; 32])
    }

    fn policy(deadline_secs: u64) -> PollPolicy {
        PollPolicy {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(4),
            multiplier: 2,
            deadline: Duration::from_secs(deadline_secs),
        }
    }

    #[test]
    fn interval_grows_exponentially_and_caps() {
        let policy = policy(60);
        let delays: Vec<u64> = (0..5).map(|n| policy.interval(n).as_secs()).collect();
        assert_eq!(delays, [1, 2, 4, 4, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_polling_through_not_found() {
        use TransactionStatus::{NotFound, Success};
        let rpc = ScriptedRpc::new(
            SendTransactionStatus::Pending,
            vec![NotFound, NotFound, NotFound, Success],
        );
        let poller = ConfirmationPoller::new(rpc.clone(), policy(60));
        let confirmed = poller.submit_and_confirm("signed").await.unwrap();
        assert_eq!(confirmed.hash, hash());
        assert_eq!(confirmed.ledger, 11);
        assert_eq!(confirmed.attempts, 4);
        assert_eq!(rpc.query_count(), 4);

        let queries = rpc.queries.lock().unwrap();
        let gaps: Vec<u64> = queries
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_secs())
            .collect();
        assert_eq!(gaps, [1, 2, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_surfaces_timeout_not_failure() {
        let rpc = ScriptedRpc::new(
            SendTransactionStatus::Pending,
            vec![TransactionStatus::NotFound],
        );
        let poller = ConfirmationPoller::new(rpc.clone(), policy(10));
        let err = poller.submit_and_confirm("signed").await.unwrap_err();
        let SubmissionError::Timeout { hash: timed_out, attempts } = err else {
            panic!("expected timeout, got {err:?}");
        };
        assert_eq!(timed_out, hash());
        // Queries at t = 0, 1, 3, 7, 10 (the last sleep is clipped to the deadline).
        assert_eq!(attempts, 5);
        assert_eq!(rpc.query_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_status_carries_result_payload() {
        let rpc = ScriptedRpc::new(
            SendTransactionStatus::Pending,
            vec![TransactionStatus::NotFound, TransactionStatus::Failed],
        );
        let poller = ConfirmationPoller::new(rpc, policy(60));
        let err = poller.submit_and_confirm("signed").await.unwrap_err();
        assert!(matches!(
            err,
            SubmissionError::Failed {
                status: TransactionStatus::Failed,
                result_xdr: Some(_),
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_submission_is_never_polled() {
        for status in [
            SendTransactionStatus::Error,
            SendTransactionStatus::Duplicate,
            SendTransactionStatus::TryAgainLater,
        ] {
            let rpc = ScriptedRpc::new(status, vec![TransactionStatus::Success]);
            let poller = ConfirmationPoller::new(rpc.clone(), policy(60));
            let err = poller.submit_and_confirm("signed").await.unwrap_err();
            let SubmissionError::Rejected {
                status: rejected,
                error_result_xdr,
                ..
            } = err
            else {
                panic!("expected rejection");
            };
            assert_eq!(rejected, status);
            assert_eq!(
                error_result_xdr.is_some(),
                status == SendTransactionStatus::Error
            );
            assert_eq!(rpc.query_count(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_queries_at_least_once_even_with_zero_deadline() {
        let rpc = ScriptedRpc::new(
            SendTransactionStatus::Pending,
            vec![TransactionStatus::Success],
        );
        let poller = ConfirmationPoller::new(rpc.clone(), policy(0));
        let handle = SubmissionHandle {
            hash: hash(),
            latest_ledger: 10,
        };
        assert!(poller.confirm(&handle).await.is_ok());
        assert_eq!(rpc.query_count(), 1);
    }
}
