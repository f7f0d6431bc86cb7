//! Signing adapter: the wallet boundary and the owned session that carries wallet identity.

use async_trait::async_trait;
use starproof_crypto::{network_id, KeypairSigner};
use starproof_rpc::convert::{decode_base64, encode_base64};
use starproof_types::{AccountAddress, CryptoError};
use stellar_xdr::curr::TransactionEnvelope;
use thiserror::Error;
use tracing::debug;

/// Wallet-side failures. All are terminal for the signing attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("signature request rejected: {0}")]
    Rejected(String),
    #[error("wallet unavailable: {0}")]
    Unavailable(String),
    #[error("wallet cannot sign for {expected}, it holds {actual}")]
    WrongSigner { expected: String, actual: String },
    #[error("malformed transaction: {0}")]
    Malformed(String),
}

/// External wallet collaborator. Implementations never expose key material:
/// they receive an unsigned envelope and hand back a signed one.
#[async_trait]
pub trait Wallet: Send + Sync {
    fn name(&self) -> &str;

    /// Selects the account and returns its address.
    async fn connect(&mut self) -> Result<AccountAddress, SigningError>;

    async fn sign_transaction(
        &self,
        envelope_xdr: &str,
        signer: &AccountAddress,
        network_passphrase: &str,
    ) -> Result<String, SigningError>;

    async fn disconnect(&mut self) -> Result<(), SigningError> {
        Ok(())
    }
}

/// Wallet backed by a local ed25519 secret.
#[derive(Debug, Clone)]
pub struct KeypairWallet {
    name: String,
    signer: KeypairSigner,
}

impl KeypairWallet {
    pub fn new(signer: KeypairSigner) -> Self {
        Self {
            name: "keypair".to_string(),
            signer,
        }
    }

    pub fn from_secret(secret: &str) -> Result<Self, CryptoError> {
        Ok(Self::new(KeypairSigner::from_secret(secret)?))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn address(&self) -> AccountAddress {
        self.signer.address()
    }
}

#[async_trait]
impl Wallet for KeypairWallet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> Result<AccountAddress, SigningError> {
        Ok(self.signer.address())
    }

    async fn sign_transaction(
        &self,
        envelope_xdr: &str,
        signer: &AccountAddress,
        network_passphrase: &str,
    ) -> Result<String, SigningError> {
        if *signer != self.signer.address() {
            return Err(SigningError::WrongSigner {
                expected: signer.to_string(),
                actual: self.signer.address().to_string(),
            });
        }
        let envelope: TransactionEnvelope = decode_base64(envelope_xdr)
            .map_err(|err| SigningError::Malformed(err.to_string()))?;
        let signed = self
            .signer
            .sign_envelope(envelope, &network_id(network_passphrase))
            .map_err(|err| match err {
                CryptoError::SignerMismatch { expected, actual } => {
                    SigningError::WrongSigner { expected, actual }
                }
                other => SigningError::Malformed(other.to_string()),
            })?;
        encode_base64(&signed).map_err(|err| SigningError::Malformed(err.to_string()))
    }
}

/// An explicitly owned wallet connection. Created by [`WalletSession::connect`],
/// consumed by [`WalletSession::disconnect`]; components needing wallet
/// identity borrow it.
#[derive(Debug)]
pub struct WalletSession<W: Wallet> {
    wallet: W,
    address: AccountAddress,
}

impl<W: Wallet> WalletSession<W> {
    pub async fn connect(mut wallet: W) -> Result<Self, SigningError> {
        let address = wallet.connect().await?;
        debug!(wallet = wallet.name(), %address, "wallet connected");
        Ok(Self { wallet, address })
    }

    pub fn address(&self) -> AccountAddress {
        self.address
    }

    pub fn wallet(&self) -> &W {
        &self.wallet
    }

    /// Asks the wallet to sign `envelope_xdr` as the session account.
    pub async fn sign(
        &self,
        envelope_xdr: &str,
        network_passphrase: &str,
    ) -> Result<String, SigningError> {
        self.wallet
            .sign_transaction(envelope_xdr, &self.address, network_passphrase)
            .await
    }

    /// Ends the session and hands the wallet back.
    pub async fn disconnect(mut self) -> Result<W, SigningError> {
        self.wallet.disconnect().await?;
        debug!(wallet = self.wallet.name(), address = %self.address, "wallet disconnected");
        Ok(self.wallet)
    }
}
