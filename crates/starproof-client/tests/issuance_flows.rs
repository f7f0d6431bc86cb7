//! End-to-end issuance, verification, and flow scenarios against the in-memory ledger.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use starproof_ledger_mock::{DemoScenario, MockCallCounts, DEMO_PASSPHRASE, MOCK_RESOURCE_FEE};
use starproof_rpc::convert::{decode_base64, val_to_account, val_to_string, val_to_symbol};
use starproof_rpc::model::GetTransactionRequest;
use starproof_types::{
    AccountAddress, CertificateId, CertificateStatus, ContractError, MetadataHash, ValidationError,
};
use starproof_client::{
    CertificateDraft, CertificateService, CertificateServiceError, ConfigError,
    ConfirmationMode, FileFlowStore, FlowController, FlowError, FlowState, FlowStore, IssueRequest,
    IssueStatus, KeypairWallet, MemoryFlowStore, MockTransport, PollPolicy, SigningError,
    SorobanRpc, StarproofConfig, SubmissionError, TransportError, Wallet, WalletSession, BASE_FEE,
};
use stellar_xdr::curr::{
    HostFunction, InvokeHostFunctionOp, OperationBody, ScVal, TransactionEnvelope,
};

/// Wallet whose user declines every signature request.
struct DecliningWallet {
    address: AccountAddress,
}

#[async_trait]
impl Wallet for DecliningWallet {
    fn name(&self) -> &str {
        "declining"
    }

    async fn connect(&mut self) -> Result<AccountAddress, SigningError> {
        Ok(self.address)
    }

    async fn sign_transaction(
        &self,
        _envelope_xdr: &str,
        _signer: &AccountAddress,
        _network_passphrase: &str,
    ) -> Result<String, SigningError> {
        Err(SigningError::Rejected("user declined".to_string()))
    }
}

fn config(scenario: &DemoScenario) -> StarproofConfig {
    StarproofConfig {
        network_passphrase: DEMO_PASSPHRASE.to_string(),
        contract_id: Some(scenario.accounts.contract.to_string()),
        wasm_hash: Some(scenario.accounts.wasm_hash.to_string()),
        ..StarproofConfig::default()
    }
}

fn setup() -> (
    DemoScenario,
    Arc<MockTransport>,
    CertificateService<MockTransport>,
) {
    let scenario = DemoScenario::new();
    let rpc = Arc::new(MockTransport::new(scenario.ledger.clone()));
    let service = CertificateService::new(rpc.clone(), config(&scenario));
    (scenario, rpc, service)
}

async fn session(signer: &starproof_crypto::KeypairSigner) -> WalletSession<KeypairWallet> {
    WalletSession::connect(KeypairWallet::new(signer.clone()))
        .await
        .unwrap()
}

fn calls(rpc: &MockTransport) -> MockCallCounts {
    rpc.with_ledger(|ledger| ledger.calls()).unwrap()
}

fn draft(scenario: &DemoScenario, id: &str) -> CertificateDraft {
    CertificateDraft {
        certificate_id: id.to_string(),
        certificate_type: "course-completion".to_string(),
        issue_date: "2026-10-15".to_string(),
        issuer_address: scenario.accounts.admin,
        recipient: scenario.accounts.recipient,
        action: "completed the soroban bootcamp".to_string(),
    }
}

#[tokio::test]
async fn issue_returns_pending_record_with_submitted_fields() {
    let (scenario, rpc, service) = setup();
    let admin = session(&scenario.admin).await;
    let request = IssueRequest {
        id: CertificateId::new("CERT-001").unwrap(),
        owner: scenario.accounts.recipient,
        metadata_hash: MetadataHash::new("abc123").unwrap(),
    };

    let issued = service
        .issue_certificate(&admin, request, ConfirmationMode::SubmitOnly)
        .await
        .unwrap();
    assert_eq!(issued.id.as_str(), "CERT-001");
    assert_eq!(issued.owner, scenario.accounts.recipient);
    assert_eq!(issued.metadata_hash.as_str(), "abc123");
    assert_eq!(issued.issued_by, scenario.accounts.admin);
    assert_eq!(issued.status, IssueStatus::Pending);
    assert_eq!(calls(&rpc).get_transaction, 0);

    // The envelope carried exactly one invocation with (id, owner, hash) in order.
    let landed = rpc
        .get_transaction(GetTransactionRequest {
            hash: issued.transaction.to_string(),
        })
        .await
        .unwrap();
    let envelope: TransactionEnvelope = decode_base64(&landed.envelope_xdr.unwrap()).unwrap();
    let TransactionEnvelope::Tx(v1) = envelope else {
        panic!("expected v1 envelope");
    };
    assert_eq!(v1.tx.operations.len(), 1);
    assert_eq!(v1.tx.fee, BASE_FEE + MOCK_RESOURCE_FEE as u32);
    let OperationBody::InvokeHostFunction(InvokeHostFunctionOp {
        host_function: HostFunction::InvokeContract(invocation),
        auth,
    }) = &v1.tx.operations[0].body
    else {
        panic!("expected contract invocation");
    };
    assert_eq!(auth.len(), 1);
    assert_eq!(
        val_to_symbol(&ScVal::Symbol(invocation.function_name.clone())).unwrap(),
        "issue_certificate"
    );
    let args = invocation.args.as_slice();
    assert_eq!(args.len(), 3);
    assert_eq!(val_to_string(&args[0]).unwrap(), "CERT-001");
    assert_eq!(val_to_account(&args[1]).unwrap(), scenario.accounts.recipient);
    assert_eq!(val_to_string(&args[2]).unwrap(), "abc123");
}

#[tokio::test]
async fn issuance_advances_flow_to_step_one() {
    let (scenario, _rpc, service) = setup();
    let admin = session(&scenario.admin).await;
    let mut flow = FlowController::resume(MemoryFlowStore::new()).unwrap();
    let draft = draft(&scenario, "CERT-001");
    let expected_hash = draft.metadata_hash();

    let state = flow
        .start_issuance(&service, &admin, draft, ConfirmationMode::SubmitOnly)
        .await
        .unwrap();
    let FlowState::Issued(stage) = state else {
        panic!("expected issued state, got {state:?}");
    };
    assert_eq!(stage.certificate.metadata_hash, expected_hash);
    assert_eq!(stage.certificate.status, IssueStatus::Pending);
    assert_eq!(flow.step(), 1);
    assert_eq!(flow.state().certificate_status(), Some(CertificateStatus::Pending));
    assert_eq!(flow.store().saves(), 1);
}

#[tokio::test]
async fn unknown_certificate_details_is_an_error() {
    let (_scenario, _rpc, service) = setup();
    let err = service
        .get_certificate_details(&CertificateId::new("NEVER-ISSUED").unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.contract_error(), Some(ContractError::CertificateNotFound));
}

#[tokio::test]
async fn missing_contract_id_fails_before_any_network_call() {
    let scenario = DemoScenario::new();
    let rpc = Arc::new(MockTransport::new(scenario.ledger.clone()));
    let service = CertificateService::new(
        rpc.clone(),
        StarproofConfig {
            contract_id: None,
            ..config(&scenario)
        },
    );
    let admin = session(&scenario.admin).await;
    let request = IssueRequest::new(
        "CERT-001",
        &scenario.accounts.recipient.to_string(),
        "abc123",
    )
    .unwrap();

    let err = service
        .issue_certificate(&admin, request, ConfirmationMode::AwaitLedger)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CertificateServiceError::Config(ConfigError::MissingContractId)
    ));
    assert_eq!(calls(&rpc), MockCallCounts::default());
}

#[tokio::test]
async fn missing_wasm_hash_fails_before_any_network_call() {
    let scenario = DemoScenario::new();
    let rpc = Arc::new(MockTransport::new(scenario.ledger.clone()));
    let service = CertificateService::new(
        rpc.clone(),
        StarproofConfig {
            wasm_hash: None,
            ..config(&scenario)
        },
    );
    let admin = session(&scenario.admin).await;
    let mut flow = FlowController::resume(MemoryFlowStore::new()).unwrap();

    let err = flow
        .start_issuance(
            &service,
            &admin,
            draft(&scenario, "CERT-001"),
            ConfirmationMode::SubmitOnly,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::Service(CertificateServiceError::Config(ConfigError::MissingWasmHash))
    ));
    assert_eq!(calls(&rpc).get_ledger_entries, 0);
    assert_eq!(flow.step(), 0);
}

#[test]
fn malformed_owner_is_rejected_while_parsing() {
    let err = IssueRequest::new("CERT-001", "GAAAA...VALID", "abc123").unwrap_err();
    assert!(matches!(err, ValidationError::InvalidAddress { .. }));
}

#[tokio::test]
async fn declined_signature_leaves_flow_unchanged() {
    let (scenario, rpc, service) = setup();
    let declining = WalletSession::connect(DecliningWallet {
        address: scenario.accounts.admin,
    })
    .await
    .unwrap();
    let mut flow = FlowController::resume(MemoryFlowStore::new()).unwrap();

    let err = flow
        .start_issuance(
            &service,
            &declining,
            draft(&scenario, "CERT-001"),
            ConfirmationMode::AwaitLedger,
        )
        .await
        .unwrap_err();
    let FlowError::Service(err) = err else {
        panic!("expected a service error");
    };
    assert!(err.is_signing_error());
    assert!(!matches!(err, CertificateServiceError::Transport(_)));
    assert_eq!(flow.state(), &FlowState::Draft);
    assert_eq!(flow.store().saves(), 0);
    assert_eq!(calls(&rpc).send_transaction, 0);
}

#[tokio::test]
async fn network_failure_is_distinct_from_signing_failure() {
    let (scenario, rpc, service) = setup();
    let admin = session(&scenario.admin).await;
    rpc.set_offline(true);

    let err = service
        .issue_certificate(
            &admin,
            draft(&scenario, "CERT-001").issue_request().unwrap(),
            ConfirmationMode::AwaitLedger,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CertificateServiceError::Transport(TransportError::Unavailable(_))
    ));
    assert!(!err.is_signing_error());
}

#[tokio::test]
async fn verification_is_stable_without_intervening_writes() {
    let (scenario, _rpc, service) = setup();
    let admin = session(&scenario.admin).await;
    let request = draft(&scenario, "CERT-007").issue_request().unwrap();
    service
        .issue_certificate(&admin, request.clone(), ConfirmationMode::AwaitLedger)
        .await
        .unwrap();

    let wrong = MetadataHash::new("0xdeadbeef").unwrap();
    for _ in 0..3 {
        assert!(service
            .verify_certificate(&request.id, &request.metadata_hash)
            .await
            .unwrap());
        assert!(!service.verify_certificate(&request.id, &wrong).await.unwrap());
    }
}

#[tokio::test]
async fn outsider_issuance_fails_on_chain() {
    let (scenario, rpc, service) = setup();
    let outsider = session(&scenario.outsider).await;
    let mut flow = FlowController::resume(MemoryFlowStore::new()).unwrap();
    let mut draft = draft(&scenario, "CERT-ROGUE");
    draft.issuer_address = scenario.accounts.outsider;

    let err = flow
        .start_issuance(&service, &outsider, draft, ConfirmationMode::AwaitLedger)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::Service(CertificateServiceError::Submission(
            SubmissionError::Failed { .. }
        ))
    ));
    assert_eq!(flow.step(), 0);
    assert!(rpc
        .with_ledger(|ledger| ledger.certificate("CERT-ROGUE").cloned())
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn duplicate_issue_is_reported_by_the_contract() {
    let (scenario, _rpc, service) = setup();
    let admin = session(&scenario.admin).await;
    let request = draft(&scenario, "CERT-DUP").issue_request().unwrap();
    service
        .issue_certificate(&admin, request.clone(), ConfirmationMode::AwaitLedger)
        .await
        .unwrap();

    let err = service
        .issue_certificate(&admin, request, ConfirmationMode::AwaitLedger)
        .await
        .unwrap_err();
    assert_eq!(
        err.contract_error(),
        Some(ContractError::CertificateAlreadyExists)
    );
}

#[tokio::test]
async fn reads_accept_any_record_the_contract_stored() {
    let (scenario, _rpc, service) = setup();
    let admin = session(&scenario.admin).await;
    let long_id = "CERT-".repeat(20);
    service
        .issue_certificate(
            &admin,
            IssueRequest::new(&long_id, &scenario.accounts.recipient.to_string(), "abc123")
                .unwrap(),
            ConfirmationMode::AwaitLedger,
        )
        .await
        .unwrap();
    service
        .issue_certificate(
            &admin,
            IssueRequest {
                id: CertificateId::new("CERT-BLANK").unwrap(),
                owner: scenario.accounts.recipient,
                metadata_hash: MetadataHash::from_stored(""),
            },
            ConfirmationMode::AwaitLedger,
        )
        .await
        .unwrap();
    service
        .issue_certificate(
            &admin,
            draft(&scenario, "CERT-001").issue_request().unwrap(),
            ConfirmationMode::AwaitLedger,
        )
        .await
        .unwrap();

    let ids = service.list_certificates().await.unwrap();
    assert_eq!(ids.len(), 3);
    assert!(ids.iter().any(|id| id.as_str() == long_id));
    assert!(ids.iter().any(|id| id.as_str() == "CERT-001"));

    let blank = service
        .get_certificate_details(&CertificateId::new("CERT-BLANK").unwrap())
        .await
        .unwrap();
    assert_eq!(blank.metadata_hash.as_str(), "");
    let long = service
        .get_certificate_details(&CertificateId::from_stored(long_id.as_str()))
        .await
        .unwrap();
    assert_eq!(long.owner, scenario.accounts.recipient);
}

#[tokio::test(start_paused = true)]
async fn confirmation_deadline_surfaces_timeout() {
    let scenario = DemoScenario::new();
    let rpc = Arc::new(MockTransport::new(scenario.ledger.clone()));
    rpc.with_ledger(|ledger| ledger.set_not_found_polls(u32::MAX))
        .unwrap();
    let service = CertificateService::new(
        rpc.clone(),
        StarproofConfig {
            poll: PollPolicy {
                deadline: Duration::from_secs(5),
                ..PollPolicy::default()
            },
            ..config(&scenario)
        },
    );
    let admin = session(&scenario.admin).await;
    let mut flow = FlowController::resume(MemoryFlowStore::new()).unwrap();

    let err = flow
        .start_issuance(
            &service,
            &admin,
            draft(&scenario, "CERT-SLOW"),
            ConfirmationMode::AwaitLedger,
        )
        .await
        .unwrap_err();
    let FlowError::Service(CertificateServiceError::Submission(SubmissionError::Timeout {
        attempts,
        ..
    })) = err
    else {
        panic!("expected timeout, got {err:?}");
    };
    // t = 0, 1, 3, 5
    assert_eq!(attempts, 4);
    assert_eq!(calls(&rpc).get_transaction, 4);
    assert_eq!(flow.step(), 0);
}

#[tokio::test]
async fn full_flow_survives_restarts() {
    let (scenario, _rpc, service) = setup();
    let dir = tempfile::tempdir().unwrap();
    let admin = session(&scenario.admin).await;
    let recipient = session(&scenario.recipient).await;

    let mut flow = FlowController::resume(FileFlowStore::in_dir(dir.path())).unwrap();
    flow.start_issuance(
        &service,
        &admin,
        draft(&scenario, "CERT-100"),
        ConfirmationMode::AwaitLedger,
    )
    .await
    .unwrap();
    let FlowState::Issued(stage) = flow.state() else {
        panic!("expected issued state");
    };
    assert!(matches!(
        stage.certificate.status,
        IssueStatus::Confirmed { .. }
    ));

    // Restart between every step.
    let mut flow = FlowController::resume(FileFlowStore::in_dir(dir.path())).unwrap();
    assert_eq!(flow.step(), 1);
    flow.mark_processing(&service).await.unwrap();
    let FlowState::Processing(stage) = flow.state() else {
        panic!("expected processing state");
    };
    assert_eq!(stage.status, CertificateStatus::Issued);
    assert_eq!(stage.on_chain.owner, scenario.accounts.recipient);
    assert!(stage.on_chain.is_valid);

    let mut flow = FlowController::resume(FileFlowStore::in_dir(dir.path())).unwrap();
    assert_eq!(flow.step(), 2);
    let err = flow.recipient_sign(&service, &admin).await.unwrap_err();
    assert!(matches!(err, FlowError::NotRecipient { .. }));
    flow.recipient_sign(&service, &recipient).await.unwrap();
    let FlowState::Signed(stage) = flow.state() else {
        panic!("expected signed state");
    };
    assert_eq!(stage.processing.status, CertificateStatus::Verified);
    let ack_hash = stage.acknowledgment.tx_hash;

    let mut flow = FlowController::resume(FileFlowStore::in_dir(dir.path())).unwrap();
    assert_eq!(flow.step(), 3);
    flow.receive().unwrap();

    let mut flow = FlowController::resume(FileFlowStore::in_dir(dir.path())).unwrap();
    assert_eq!(flow.step(), 4);
    flow.deliver().unwrap();

    let flow = FlowController::resume(FileFlowStore::in_dir(dir.path())).unwrap();
    let FlowState::Delivered(stage) = flow.state() else {
        panic!("expected delivered state");
    };
    assert_eq!(stage.received.signed.acknowledgment.tx_hash, ack_hash);
    assert_eq!(flow.state().certificate_id().map(CertificateId::as_str), Some("CERT-100"));
}

#[tokio::test]
async fn steps_never_move_backwards() {
    let (scenario, _rpc, service) = setup();
    let admin = session(&scenario.admin).await;
    let mut flow = FlowController::resume(MemoryFlowStore::new()).unwrap();
    flow.start_issuance(
        &service,
        &admin,
        draft(&scenario, "CERT-200"),
        ConfirmationMode::AwaitLedger,
    )
    .await
    .unwrap();
    flow.mark_processing(&service).await.unwrap();
    let before = flow.state().clone();

    let mut observed = vec![flow.step()];
    let again = flow
        .start_issuance(
            &service,
            &admin,
            draft(&scenario, "CERT-201"),
            ConfirmationMode::AwaitLedger,
        )
        .await;
    assert!(matches!(
        again,
        Err(FlowError::InvalidTransition { step: 2, .. })
    ));
    observed.push(flow.step());
    assert!(matches!(
        flow.mark_processing(&service).await,
        Err(FlowError::InvalidTransition { step: 2, .. })
    ));
    observed.push(flow.step());
    assert!(flow.deliver().is_err());
    observed.push(flow.step());

    assert!(observed.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(flow.state(), &before);
    assert_eq!(flow.store().load().unwrap(), Some(before));

    flow.reset().unwrap();
    assert_eq!(flow.step(), 0);
}

#[tokio::test]
async fn revoked_certificate_is_marked_expired_at_processing() {
    let (scenario, _rpc, service) = setup();
    let admin = session(&scenario.admin).await;
    let mut flow = FlowController::resume(MemoryFlowStore::new()).unwrap();
    flow.start_issuance(
        &service,
        &admin,
        draft(&scenario, "CERT-300"),
        ConfirmationMode::AwaitLedger,
    )
    .await
    .unwrap();
    let id = CertificateId::new("CERT-300").unwrap();
    service
        .revoke_certificate(&admin, &id, ConfirmationMode::AwaitLedger)
        .await
        .unwrap();

    flow.mark_processing(&service).await.unwrap();
    assert_eq!(
        flow.state().certificate_status(),
        Some(CertificateStatus::Expired)
    );
}
