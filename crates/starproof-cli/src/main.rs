use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use starproof_client::{
    CertificateDraft, CertificateService, ConfirmationMode, FileFlowStore, FlowController,
    HttpTransport, IssueRequest, KeypairWallet, PollPolicy, SorobanRpc, StarproofConfig,
    TransportConfig, WalletSession, DEFAULT_RPC_URL, TESTNET_PASSPHRASE,
};
use starproof_types::{AccountAddress, CertificateId, MetadataHash};
use tracing::info;

mod demo;

#[derive(Parser, Debug)]
#[command(
    name = "starproof",
    about = "Issue and verify certificates on the Starproof Soroban contract"
)]
struct Cli {
    /// Soroban RPC endpoint.
    #[arg(long, env = "STARPROOF_RPC_URL", default_value = DEFAULT_RPC_URL, global = true)]
    rpc_url: String,

    /// Network passphrase the transactions are signed for.
    #[arg(long, env = "STARPROOF_NETWORK_PASSPHRASE", default_value = TESTNET_PASSPHRASE, global = true)]
    network_passphrase: String,

    /// Certification contract id (`C...`).
    #[arg(long, env = "STARPROOF_CONTRACT_ID", global = true)]
    contract_id: Option<String>,

    /// Hex hash of the deployed contract wasm.
    #[arg(long, env = "STARPROOF_WASM_HASH", global = true)]
    wasm_hash: Option<String>,

    /// Secret seed (`S...`) of the signing account.
    #[arg(long, env = "STARPROOF_SECRET_KEY", hide_env_values = true, global = true)]
    secret_key: Option<String>,

    /// Per-request RPC timeout in milliseconds.
    #[arg(long, default_value = "10000", global = true)]
    request_timeout_ms: u64,

    /// Give up waiting for ledger inclusion after this many seconds.
    #[arg(long, default_value = "60", global = true)]
    confirm_deadline_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the RPC network and the deployed wasm match the configuration.
    Status,
    /// Issue a certificate to `owner`.
    Issue {
        #[arg(long)]
        id: String,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        metadata_hash: String,
        #[command(flatten)]
        confirm: ConfirmArgs,
    },
    /// Revoke an issued certificate.
    Revoke {
        #[arg(long)]
        id: String,
        #[command(flatten)]
        confirm: ConfirmArgs,
    },
    /// Print the on-chain record of a certificate.
    Details {
        #[arg(long)]
        id: String,
    },
    /// Ask the contract whether `metadata_hash` matches a valid certificate.
    Verify {
        #[arg(long)]
        id: String,
        #[arg(long)]
        metadata_hash: String,
    },
    /// List every issued certificate id.
    List,
    /// Drive the persisted six-step issuance flow.
    Flow {
        /// Directory holding `starproof-flow.json`.
        #[arg(long, env = "STARPROOF_STATE_DIR", default_value = ".")]
        state_dir: PathBuf,
        #[command(subcommand)]
        step: FlowCommand,
    },
    /// Run the whole flow against an in-memory ledger.
    Demo,
}

#[derive(Subcommand, Debug)]
enum FlowCommand {
    /// Print the current flow state.
    Show,
    /// Step 0 → 1: hash the draft and issue it.
    Start {
        #[arg(long)]
        id: String,
        #[arg(long = "type")]
        certificate_type: String,
        #[arg(long)]
        issue_date: String,
        #[arg(long)]
        recipient: String,
        #[arg(long)]
        action: String,
        #[command(flatten)]
        confirm: ConfirmArgs,
    },
    /// Step 1 → 2: read the certificate back and verify its hash.
    Process,
    /// Step 2 → 3: the recipient signs an acknowledgment.
    Sign,
    /// Step 3 → 4.
    Receive,
    /// Step 4 → 5.
    Deliver,
    /// Discard progress and start over at step 0.
    Reset,
}

#[derive(Args, Debug, Clone, Copy)]
struct ConfirmArgs {
    /// Return as soon as the RPC accepts the transaction.
    #[arg(long)]
    submit_only: bool,
}

impl ConfirmArgs {
    fn mode(self) -> ConfirmationMode {
        if self.submit_only {
            ConfirmationMode::SubmitOnly
        } else {
            ConfirmationMode::AwaitLedger
        }
    }
}

impl Cli {
    fn config(&self) -> StarproofConfig {
        StarproofConfig {
            transport: TransportConfig {
                rpc_url: self.rpc_url.clone(),
                request_timeout_ms: self.request_timeout_ms,
                ..TransportConfig::default()
            },
            network_passphrase: self.network_passphrase.clone(),
            contract_id: self.contract_id.clone(),
            wasm_hash: self.wasm_hash.clone(),
            poll: PollPolicy {
                deadline: Duration::from_secs(self.confirm_deadline_secs),
                ..PollPolicy::default()
            },
            ..StarproofConfig::default()
        }
    }

    async fn session(&self) -> Result<WalletSession<KeypairWallet>, Box<dyn std::error::Error>> {
        let secret = self
            .secret_key
            .as_deref()
            .ok_or("this command signs a transaction: set --secret-key or STARPROOF_SECRET_KEY")?;
        Ok(WalletSession::connect(KeypairWallet::from_secret(secret)?).await?)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    if let Command::Demo = cli.command {
        return demo::run().await;
    }

    let config = cli.config();
    info!(rpc = %config.transport.rpc_url, network = %config.network_passphrase, "starproof starting");
    let rpc = Arc::new(HttpTransport::new(config.transport.clone()));
    let service = CertificateService::new(rpc, config);
    run(&cli, &service).await
}

async fn run<T: SorobanRpc>(
    cli: &Cli,
    service: &CertificateService<T>,
) -> Result<(), Box<dyn std::error::Error>> {
    match &cli.command {
        Command::Status => {
            let wasm = service.check_deployment().await?;
            println!("deployment ok: wasm {wasm}");
        }
        Command::Issue {
            id,
            owner,
            metadata_hash,
            confirm,
        } => {
            let request = IssueRequest::new(id, owner, metadata_hash)?;
            let session = cli.session().await?;
            let issued = service
                .issue_certificate(&session, request, confirm.mode())
                .await?;
            print_json(&issued)?;
            session.disconnect().await?;
        }
        Command::Revoke { id, confirm } => {
            let id = CertificateId::new(id.as_str())?;
            let session = cli.session().await?;
            let receipt = service
                .revoke_certificate(&session, &id, confirm.mode())
                .await?;
            println!("revoked {id} in tx {} ({:?})", receipt.hash, receipt.status());
            session.disconnect().await?;
        }
        Command::Details { id } => {
            let details = service
                .get_certificate_details(&CertificateId::new(id.as_str())?)
                .await?;
            print_json(&details)?;
        }
        Command::Verify { id, metadata_hash } => {
            let valid = service
                .verify_certificate(
                    &CertificateId::new(id.as_str())?,
                    &MetadataHash::new(metadata_hash.as_str())?,
                )
                .await?;
            println!("{}", if valid { "valid" } else { "invalid" });
        }
        Command::List => {
            for id in service.list_certificates().await? {
                println!("{id}");
            }
        }
        Command::Flow { state_dir, step } => {
            let mut flow = FlowController::resume(FileFlowStore::in_dir(state_dir))?;
            match step {
                FlowCommand::Show => {}
                FlowCommand::Start {
                    id,
                    certificate_type,
                    issue_date,
                    recipient,
                    action,
                    confirm,
                } => {
                    let session = cli.session().await?;
                    let draft = CertificateDraft {
                        certificate_id: id.clone(),
                        certificate_type: certificate_type.clone(),
                        issue_date: issue_date.clone(),
                        issuer_address: session.address(),
                        recipient: recipient.parse::<AccountAddress>()?,
                        action: action.clone(),
                    };
                    flow.start_issuance(service, &session, draft, confirm.mode())
                        .await?;
                }
                FlowCommand::Process => {
                    flow.mark_processing(service).await?;
                }
                FlowCommand::Sign => {
                    let session = cli.session().await?;
                    flow.recipient_sign(service, &session).await?;
                }
                FlowCommand::Receive => {
                    flow.receive()?;
                }
                FlowCommand::Deliver => {
                    flow.deliver()?;
                }
                FlowCommand::Reset => {
                    flow.reset()?;
                }
            }
            print_json(flow.state())?;
        }
        Command::Demo => demo::run().await?,
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
