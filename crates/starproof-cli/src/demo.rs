use std::sync::Arc;

use starproof_client::{
    CertificateDraft, CertificateService, ConfirmationMode, FlowController, KeypairWallet,
    MemoryFlowStore, MockTransport, StarproofConfig, WalletSession,
};
use starproof_ledger_mock::{DemoScenario, DEMO_PASSPHRASE};
use tracing::info;

/// Issues, verifies, and hands over one certificate on the in-memory ledger.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let scenario = DemoScenario::new();
    let accounts = scenario.accounts;
    let rpc = Arc::new(MockTransport::new(scenario.ledger.clone()));
    let service = CertificateService::new(
        rpc,
        StarproofConfig {
            network_passphrase: DEMO_PASSPHRASE.to_string(),
            contract_id: Some(accounts.contract.to_string()),
            wasm_hash: Some(accounts.wasm_hash.to_string()),
            ..StarproofConfig::default()
        },
    );
    service.check_deployment().await?;

    let issuer = WalletSession::connect(KeypairWallet::new(scenario.admin.clone())).await?;
    let recipient = WalletSession::connect(
        KeypairWallet::new(scenario.recipient.clone()).with_name("recipient"),
    )
    .await?;
    let mut flow = FlowController::resume(MemoryFlowStore::new())?;

    let draft = CertificateDraft {
        certificate_id: "CERT-001".to_string(),
        certificate_type: "course-completion".to_string(),
        issue_date: "2026-10-15".to_string(),
        issuer_address: issuer.address(),
        recipient: recipient.address(),
        action: "completed the soroban bootcamp".to_string(),
    };
    info!(issuer = %issuer.address(), recipient = %recipient.address(), "issuing demo certificate");
    flow.start_issuance(&service, &issuer, draft, ConfirmationMode::AwaitLedger)
        .await?;
    flow.mark_processing(&service).await?;
    flow.recipient_sign(&service, &recipient).await?;
    flow.receive()?;
    flow.deliver()?;

    let ids = service.list_certificates().await?;
    info!(
        step = flow.step(),
        status = ?flow.state().certificate_status(),
        certificates = ids.len(),
        "demo flow delivered"
    );

    issuer.disconnect().await?;
    recipient.disconnect().await?;
    Ok(())
}
