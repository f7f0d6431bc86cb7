//! Starproof client library.
//!
//! This crate exposes:
//! - Soroban RPC transports (`HttpTransport`, `MockTransport`) behind `SorobanRpc`,
//! - contract-invocation transaction construction (`TxBuilder`),
//! - the wallet boundary and owned `WalletSession`,
//! - submission and bounded confirmation polling (`ConfirmationPoller`),
//! - the `CertificateService` facade for issue/read/verify/revoke,
//! - the persisted six-step issuance `FlowController`.

pub mod config;
pub mod flow;
pub mod poller;
pub mod service;
pub mod store;
pub mod transport;
pub mod tx_builder;
pub mod wallet;

pub use config::{ConfigError, ContractConfig, StarproofConfig, TESTNET_PASSPHRASE};
pub use flow::{
    CertificateDraft, DeliveredStage, FlowController, FlowError, FlowState, IssuedStage,
    ProcessingStage, ReceivedStage, SignedStage,
};
pub use poller::{
    ConfirmationPoller, ConfirmedTransaction, PollPolicy, SubmissionError, SubmissionHandle,
};
#[allow(deprecated)]
pub use service::create_certificate_args;
pub use service::{
    AcknowledgmentReceipt, CertificateService, CertificateServiceError, ConfirmationMode,
    IssueRequest, IssueStatus, IssuedCertificate, WriteReceipt,
};
pub use store::{FileFlowStore, FlowStore, MemoryFlowStore, StoreError, FLOW_STORAGE_KEY};
pub use transport::{
    HttpTransport, MockTransport, RetryPolicy, SorobanRpc, TransportConfig, TransportError,
    DEFAULT_RPC_URL,
};
pub use tx_builder::{
    assemble_transaction, invoke_contract_operation, AccountSnapshot, BuiltTransaction, TxBuilder,
    TxBuilderError, BASE_FEE,
};
pub use wallet::{KeypairWallet, SigningError, Wallet, WalletSession};
