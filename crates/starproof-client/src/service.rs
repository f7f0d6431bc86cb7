//! CertificateService: issue, read, verify, and revoke certificates on the
//! certification contract.
//!
//! Writes go through the full pipeline (fresh account fetch, build, simulate,
//! sign through the wallet session, submit, optionally confirm). Reads are
//! simulations only: no fee, no signature, nothing lands on the ledger.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use starproof_rpc::convert::{
    account_ledger_key, address_val, certificate_details_val, certificate_id_val,
    contract_instance_ledger_key, decode_base64, encode_base64, metadata_hash_val, val_to_bool,
    val_to_certificate_details, val_to_string_vec,
};
use starproof_rpc::model::{GetLedgerEntriesRequest, SimulateTransactionRequest};
use starproof_rpc::{SimulationError, SimulationOutcome, XdrError};
use starproof_types::{
    AccountAddress, CertificateDetails, CertificateId, ContractAddress, ContractError,
    CryptoError, MetadataHash, TxHash, ValidationError, WasmHash,
};
use stellar_xdr::curr::{ContractExecutable, LedgerEntryData, ScVal};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, StarproofConfig};
use crate::poller::{ConfirmationPoller, ConfirmedTransaction, SubmissionError};
use crate::transport::{SorobanRpc, TransportError};
use crate::tx_builder::{
    assemble_transaction, invoke_contract_operation, AccountSnapshot, BuiltTransaction, TxBuilder,
    TxBuilderError,
};
use crate::wallet::{SigningError, Wallet, WalletSession};

pub const FN_ISSUE_CERTIFICATE: &str = "issue_certificate";
pub const FN_CREATE_CERTIFICATE: &str = "create_certificate";
pub const FN_REVOKE_CERTIFICATE: &str = "revoke_certificate";
pub const FN_GET_CERTIFICATE_DETAILS: &str = "get_certificate_details";
pub const FN_VERIFY_CERTIFICATE: &str = "verify_certificate";
pub const FN_LIST_CERTIFICATES: &str = "list_certificates";

#[derive(Debug, Error)]
pub enum CertificateServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Builder(#[from] TxBuilderError),
    #[error(transparent)]
    Xdr(#[from] XdrError),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("account {0} not found on ledger")]
    AccountNotFound(AccountAddress),
    #[error("contract {0} has no instance entry on ledger")]
    ContractNotDeployed(ContractAddress),
}

impl CertificateServiceError {
    /// Contract error code reported by simulation, if that is what failed.
    pub fn contract_error(&self) -> Option<ContractError> {
        match self {
            Self::Simulation(SimulationError::Contract(code)) => Some(*code),
            _ => None,
        }
    }

    pub fn is_signing_error(&self) -> bool {
        matches!(self, Self::Signing(_))
    }
}

/// Whether a write waits for the ledger to include it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationMode {
    /// Poll until `SUCCESS`, `FAILED`, or the poll deadline.
    #[default]
    AwaitLedger,
    /// Return once the RPC accepts the transaction.
    SubmitOnly,
}

/// Outcome of a write as observed by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IssueStatus {
    /// Submitted; confirmation not checked.
    Pending,
    Confirmed { ledger: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRequest {
    pub id: CertificateId,
    pub owner: AccountAddress,
    pub metadata_hash: MetadataHash,
}

impl IssueRequest {
    /// Parses raw user input. A malformed owner strkey fails here.
    pub fn new(id: &str, owner: &str, metadata_hash: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            id: CertificateId::new(id)?,
            owner: owner.parse()?,
            metadata_hash: MetadataHash::new(metadata_hash)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCertificate {
    pub id: CertificateId,
    pub owner: AccountAddress,
    pub metadata_hash: MetadataHash,
    pub issued_by: AccountAddress,
    /// Unix milliseconds at which the client submitted the issuance.
    pub timestamp: u64,
    pub transaction: TxHash,
    pub status: IssueStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub hash: TxHash,
    pub confirmed: Option<ConfirmedTransaction>,
}

impl WriteReceipt {
    pub fn status(&self) -> IssueStatus {
        match &self.confirmed {
            Some(confirmed) => IssueStatus::Confirmed {
                ledger: confirmed.ledger,
            },
            None => IssueStatus::Pending,
        }
    }
}

/// A recipient's signature over a `verify_certificate` invocation. Never submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcknowledgmentReceipt {
    pub tx_hash: TxHash,
    pub signed_envelope_xdr: String,
    /// Unix seconds.
    pub signed_at: u64,
}

/// Argument list for the older `create_certificate(map)` entry point.
#[deprecated(note = "`issue_certificate` with positional arguments is the canonical call")]
pub fn create_certificate_args(details: &CertificateDetails) -> Result<Vec<ScVal>, XdrError> {
    Ok(vec![certificate_details_val(details)?])
}

pub struct CertificateService<T: SorobanRpc> {
    rpc: Arc<T>,
    config: StarproofConfig,
    poller: ConfirmationPoller<T>,
}

impl<T: SorobanRpc> CertificateService<T> {
    pub fn new(rpc: Arc<T>, config: StarproofConfig) -> Self {
        let poller = ConfirmationPoller::new(rpc.clone(), config.poll.clone());
        Self {
            rpc,
            config,
            poller,
        }
    }

    pub fn config(&self) -> &StarproofConfig {
        &self.config
    }

    pub fn rpc(&self) -> &Arc<T> {
        &self.rpc
    }

    pub async fn issue_certificate<W: Wallet>(
        &self,
        session: &WalletSession<W>,
        request: IssueRequest,
        mode: ConfirmationMode,
    ) -> Result<IssuedCertificate, CertificateServiceError> {
        let contract = self.config.require_contract()?.contract;
        let args = vec![
            certificate_id_val(&request.id)?,
            address_val(&request.owner),
            metadata_hash_val(&request.metadata_hash)?,
        ];
        info!(cert_id = %request.id, owner = %request.owner, issuer = %session.address(), "issuing certificate");

        let receipt = self
            .invoke_write(session, contract, FN_ISSUE_CERTIFICATE, args, mode)
            .await?;
        let status = receipt.status();
        info!(cert_id = %request.id, tx = %receipt.hash, ?status, "certificate issuance submitted");
        Ok(IssuedCertificate {
            id: request.id,
            owner: request.owner,
            metadata_hash: request.metadata_hash,
            issued_by: session.address(),
            timestamp: unix_millis(),
            transaction: receipt.hash,
            status,
        })
    }

    pub async fn revoke_certificate<W: Wallet>(
        &self,
        session: &WalletSession<W>,
        id: &CertificateId,
        mode: ConfirmationMode,
    ) -> Result<WriteReceipt, CertificateServiceError> {
        let contract = self.config.require_contract()?.contract;
        info!(cert_id = %id, "revoking certificate");
        self.invoke_write(
            session,
            contract,
            FN_REVOKE_CERTIFICATE,
            vec![certificate_id_val(id)?],
            mode,
        )
        .await
    }

    /// Unknown ids fail with `ContractError::CertificateNotFound`.
    pub async fn get_certificate_details(
        &self,
        id: &CertificateId,
    ) -> Result<CertificateDetails, CertificateServiceError> {
        let value = self
            .simulate_read(FN_GET_CERTIFICATE_DETAILS, vec![certificate_id_val(id)?])
            .await?;
        Ok(val_to_certificate_details(&value)?)
    }

    /// The contract's answer, as is.
    pub async fn verify_certificate(
        &self,
        id: &CertificateId,
        metadata_hash: &MetadataHash,
    ) -> Result<bool, CertificateServiceError> {
        let value = self
            .simulate_read(
                FN_VERIFY_CERTIFICATE,
                vec![certificate_id_val(id)?, metadata_hash_val(metadata_hash)?],
            )
            .await?;
        let valid = val_to_bool(&value)?;
        debug!(cert_id = %id, valid, "certificate verified");
        Ok(valid)
    }

    pub async fn list_certificates(&self) -> Result<Vec<CertificateId>, CertificateServiceError> {
        let value = self.simulate_read(FN_LIST_CERTIFICATES, Vec::new()).await?;
        Ok(val_to_string_vec(&value)?
            .into_iter()
            .map(CertificateId::from_stored)
            .collect())
    }

    /// Confirms the RPC serves the configured network and that the contract
    /// instance runs the configured wasm.
    pub async fn check_deployment(&self) -> Result<WasmHash, CertificateServiceError> {
        let expected = self.config.require_contract()?;
        let network = self.rpc.get_network().await?;
        if network.passphrase != self.config.network_passphrase {
            return Err(ConfigError::NetworkMismatch {
                expected: self.config.network_passphrase.clone(),
                actual: network.passphrase,
            }
            .into());
        }

        let key = encode_base64(&contract_instance_ledger_key(&expected.contract))?;
        let response = self
            .rpc
            .get_ledger_entries(GetLedgerEntriesRequest { keys: vec![key] })
            .await?;
        let entry = response
            .entries
            .first()
            .ok_or(CertificateServiceError::ContractNotDeployed(expected.contract))?;
        let data: LedgerEntryData = decode_base64(&entry.xdr)?;
        let deployed = match &data {
            LedgerEntryData::ContractData(contract_data) => match &contract_data.val {
                ScVal::ContractInstance(instance) => match &instance.executable {
                    ContractExecutable::Wasm(hash) => Some(WasmHash::new(hash.0)),
                    ContractExecutable::StellarAsset => None,
                },
                _ => None,
            },
            _ => None,
        }
        .ok_or_else(|| XdrError::Unexpected {
            expected: "wasm contract instance",
            found: data.name().to_string(),
        })?;

        if deployed != expected.wasm_hash {
            return Err(ConfigError::WasmHashMismatch {
                expected: expected.wasm_hash,
                actual: deployed,
            }
            .into());
        }
        info!(contract = %expected.contract, wasm = %deployed, "deployment matches configuration");
        Ok(deployed)
    }

    /// The recipient signs a `verify_certificate` invocation as proof of
    /// receipt. The envelope is prepared but not submitted.
    pub async fn sign_acknowledgment<W: Wallet>(
        &self,
        session: &WalletSession<W>,
        id: &CertificateId,
        metadata_hash: &MetadataHash,
    ) -> Result<AcknowledgmentReceipt, CertificateServiceError> {
        let contract = self.config.contract()?;
        let args = vec![certificate_id_val(id)?, metadata_hash_val(metadata_hash)?];
        let prepared = self
            .prepare(session.address(), contract, FN_VERIFY_CERTIFICATE, args)
            .await?;
        let signed_envelope_xdr = session
            .sign(&prepared.to_xdr()?, &self.config.network_passphrase)
            .await?;
        let tx_hash = prepared.hash()?;
        info!(cert_id = %id, signer = %session.address(), tx = %tx_hash, "acknowledgment signed");
        Ok(AcknowledgmentReceipt {
            tx_hash,
            signed_envelope_xdr,
            signed_at: unix_millis() / 1_000,
        })
    }

    async fn invoke_write<W: Wallet>(
        &self,
        session: &WalletSession<W>,
        contract: ContractAddress,
        function: &str,
        args: Vec<ScVal>,
        mode: ConfirmationMode,
    ) -> Result<WriteReceipt, CertificateServiceError> {
        let prepared = self
            .prepare(session.address(), contract, function, args)
            .await?;
        let signed = session
            .sign(&prepared.to_xdr()?, &self.config.network_passphrase)
            .await?;

        match mode {
            ConfirmationMode::SubmitOnly => {
                let handle = self.poller.submit(&signed).await?;
                Ok(WriteReceipt {
                    hash: handle.hash,
                    confirmed: None,
                })
            }
            ConfirmationMode::AwaitLedger => {
                let confirmed = self.poller.submit_and_confirm(&signed).await?;
                Ok(WriteReceipt {
                    hash: confirmed.hash,
                    confirmed: Some(confirmed),
                })
            }
        }
    }

    /// Fresh account fetch, build, simulate, assemble.
    async fn prepare(
        &self,
        source: AccountAddress,
        contract: ContractAddress,
        function: &str,
        args: Vec<ScVal>,
    ) -> Result<BuiltTransaction, CertificateServiceError> {
        let operation = invoke_contract_operation(&contract, function, args)?;
        let account = self.fetch_account(source).await?;
        let built = TxBuilder::new(account, &self.config.network_passphrase)
            .with_fee(self.config.base_fee)
            .with_timeout(self.config.tx_timeout)
            .with_operation(operation)
            .build()?;
        let simulation = self.simulate(&built).await?;
        debug!(function, min_resource_fee = simulation.min_resource_fee, "simulation complete");
        Ok(assemble_transaction(&built, &simulation)?)
    }

    async fn simulate_read(
        &self,
        function: &str,
        args: Vec<ScVal>,
    ) -> Result<ScVal, CertificateServiceError> {
        let contract = self.config.contract()?;
        let operation = invoke_contract_operation(&contract, function, args)?;
        // Reads never reach the ledger, so the source sequence is irrelevant.
        let built = TxBuilder::new(
            AccountSnapshot {
                address: self.config.read_source(),
                sequence: 0,
            },
            &self.config.network_passphrase,
        )
        .with_operation(operation)
        .build()?;
        Ok(self.simulate(&built).await?.return_value)
    }

    async fn simulate(
        &self,
        built: &BuiltTransaction,
    ) -> Result<SimulationOutcome, CertificateServiceError> {
        let response = self
            .rpc
            .simulate_transaction(SimulateTransactionRequest {
                transaction: built.to_xdr()?,
            })
            .await?;
        Ok(SimulationOutcome::try_from(response)?)
    }

    async fn fetch_account(
        &self,
        address: AccountAddress,
    ) -> Result<AccountSnapshot, CertificateServiceError> {
        let key = encode_base64(&account_ledger_key(&address))?;
        let response = self
            .rpc
            .get_ledger_entries(GetLedgerEntriesRequest { keys: vec![key] })
            .await?;
        let entry = response
            .entries
            .first()
            .ok_or(CertificateServiceError::AccountNotFound(address))?;
        match decode_base64::<LedgerEntryData>(&entry.xdr)? {
            LedgerEntryData::Account(account) => Ok(AccountSnapshot {
                address,
                sequence: account.seq_num.0,
            }),
            other => Err(XdrError::Unexpected {
                expected: "account entry",
                found: other.name().to_string(),
            }
            .into()),
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use starproof_ledger_mock::DemoScenario;
    use starproof_rpc::convert::{val_to_account, val_to_bool, val_to_string, val_to_symbol};
    use starproof_types::{
        AccountAddress, CertificateDetails, CertificateId, ContractError, MetadataHash,
        ValidationError,
    };
    use stellar_xdr::curr::ScVal;

    use super::{
        CertificateService, CertificateServiceError, ConfirmationMode, IssueRequest, IssueStatus,
    };
    use crate::config::{ConfigError, StarproofConfig};
    use crate::transport::MockTransport;
    use crate::wallet::{KeypairWallet, WalletSession};

    fn service(scenario: &DemoScenario) -> (Arc<MockTransport>, CertificateService<MockTransport>) {
        let rpc = Arc::new(MockTransport::new(scenario.ledger.clone()));
        let config = StarproofConfig {
            contract_id: Some(scenario.accounts.contract.to_string()),
            wasm_hash: Some(scenario.accounts.wasm_hash.to_string()),
            network_passphrase: starproof_ledger_mock::DEMO_PASSPHRASE.to_string(),
            ..StarproofConfig::default()
        };
        (rpc.clone(), CertificateService::new(rpc, config))
    }

    #[test]
    fn issue_request_rejects_malformed_owner() {
        let err = IssueRequest::new("CERT-001", "GAAAA...VALID", "abc123").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidAddress { kind: "account", .. }));
    }

    #[test]
    #[allow(deprecated)]
    fn create_certificate_encodes_single_struct_argument() {
        let details = CertificateDetails {
            owner: AccountAddress::from_bytes([0x22; 32]),
            metadata_hash: MetadataHash::new("abc123").unwrap(),
            is_valid: true,
        };
        let args = super::create_certificate_args(&details).unwrap();
        let [ScVal::Map(Some(map))] = args.as_slice() else {
            panic!("expected one map argument");
        };
        let entries = &map.0;
        let keys: Vec<String> = entries
            .iter()
            .map(|entry| val_to_symbol(&entry.key).unwrap())
            .collect();
        assert_eq!(keys, ["is_valid", "metadata_hash", "owner"]);
        assert!(val_to_bool(&entries[0].val).unwrap());
        assert_eq!(val_to_string(&entries[1].val).unwrap(), "abc123");
        assert_eq!(val_to_account(&entries[2].val).unwrap(), details.owner);
    }

    #[tokio::test]
    async fn confirmed_issue_then_revoke_invalidates() {
        let scenario = DemoScenario::new();
        let (_, service) = service(&scenario);
        let session = WalletSession::connect(KeypairWallet::new(scenario.admin.clone()))
            .await
            .unwrap();
        let request = IssueRequest {
            id: CertificateId::new("CERT-042").unwrap(),
            owner: scenario.accounts.recipient,
            metadata_hash: MetadataHash::new("0xfeed").unwrap(),
        };

        let issued = service
            .issue_certificate(&session, request.clone(), ConfirmationMode::AwaitLedger)
            .await
            .unwrap();
        assert!(matches!(issued.status, IssueStatus::Confirmed { .. }));
        assert!(service
            .verify_certificate(&request.id, &request.metadata_hash)
            .await
            .unwrap());

        let receipt = service
            .revoke_certificate(&session, &request.id, ConfirmationMode::AwaitLedger)
            .await
            .unwrap();
        assert!(receipt.confirmed.is_some());
        assert!(!service
            .get_certificate_details(&request.id)
            .await
            .unwrap()
            .is_valid);
        assert!(!service
            .verify_certificate(&request.id, &request.metadata_hash)
            .await
            .unwrap());
        assert_eq!(
            service.list_certificates().await.unwrap(),
            vec![request.id]
        );
    }

    #[tokio::test]
    async fn revoking_unknown_certificate_surfaces_contract_error() {
        let scenario = DemoScenario::new();
        let (rpc, service) = service(&scenario);
        let session = WalletSession::connect(KeypairWallet::new(scenario.admin.clone()))
            .await
            .unwrap();
        let err = service
            .revoke_certificate(
                &session,
                &CertificateId::new("NOPE").unwrap(),
                ConfirmationMode::SubmitOnly,
            )
            .await
            .unwrap_err();
        assert_eq!(err.contract_error(), Some(ContractError::CertificateNotFound));
        assert_eq!(rpc.with_ledger(|ledger| ledger.calls().send_transaction).unwrap(), 0);
    }

    #[tokio::test]
    async fn check_deployment_detects_wasm_drift() {
        let scenario = DemoScenario::new();
        let (rpc, service) = service(&scenario);
        assert_eq!(
            service.check_deployment().await.unwrap(),
            scenario.accounts.wasm_hash
        );

        let upgraded = starproof_types::WasmHash::new([0x4b; 32]);
        rpc.with_ledger(|ledger| ledger.set_wasm_hash(upgraded)).unwrap();
        let err = service.check_deployment().await.unwrap_err();
        assert!(matches!(
            err,
            CertificateServiceError::Config(ConfigError::WasmHashMismatch { actual, .. })
                if actual == upgraded
        ));
    }

    #[tokio::test]
    async fn check_deployment_rejects_foreign_network() {
        let scenario = DemoScenario::new();
        let rpc = Arc::new(MockTransport::new(scenario.ledger.clone()));
        let service = CertificateService::new(
            rpc,
            StarproofConfig {
                contract_id: Some(scenario.accounts.contract.to_string()),
                wasm_hash: Some(scenario.accounts.wasm_hash.to_string()),
                network_passphrase: "Public Global Stellar Network ; September 2015".to_string(),
                ..StarproofConfig::default()
            },
        );
        assert!(matches!(
            service.check_deployment().await.unwrap_err(),
            CertificateServiceError::Config(ConfigError::NetworkMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn acknowledgment_is_signed_but_not_submitted() {
        let scenario = DemoScenario::new();
        let (rpc, service) = service(&scenario);
        let admin = WalletSession::connect(KeypairWallet::new(scenario.admin.clone()))
            .await
            .unwrap();
        let request = IssueRequest {
            id: CertificateId::new("CERT-ACK").unwrap(),
            owner: scenario.accounts.recipient,
            metadata_hash: MetadataHash::new("0xbeef").unwrap(),
        };
        service
            .issue_certificate(&admin, request.clone(), ConfirmationMode::AwaitLedger)
            .await
            .unwrap();
        let sends_before = rpc.with_ledger(|ledger| ledger.calls().send_transaction).unwrap();

        let recipient = WalletSession::connect(KeypairWallet::new(scenario.recipient.clone()))
            .await
            .unwrap();
        let receipt = service
            .sign_acknowledgment(&recipient, &request.id, &request.metadata_hash)
            .await
            .unwrap();
        assert!(!receipt.signed_envelope_xdr.is_empty());
        assert_eq!(
            rpc.with_ledger(|ledger| ledger.calls().send_transaction).unwrap(),
            sends_before
        );
    }
}
