use ed25519_dalek::{Signature, Signer as DalekSigner, SigningKey, Verifier as DalekVerifier, VerifyingKey};
use starproof_types::{AccountAddress, CryptoError, TxHash};
use stellar_xdr::curr::{
    DecoratedSignature, Signature as XdrSignature, SignatureHint, TransactionEnvelope,
};

use crate::hashing::transaction_hash;

/// Local ed25519 keypair holding an account's signing key.
#[derive(Debug, Clone)]
pub struct KeypairSigner {
    signing_key: SigningKey,
}

impl KeypairSigner {
    pub fn new(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::new(SigningKey::from_bytes(&seed))
    }

    /// Parses an `S...` secret seed.
    pub fn from_secret(secret: &str) -> Result<Self, CryptoError> {
        let private_key = stellar_strkey::ed25519::PrivateKey::from_string(secret)
            .map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self::from_seed(private_key.0))
    }

    pub fn address(&self) -> AccountAddress {
        AccountAddress::from_bytes(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign_hash(&self, hash: &TxHash) -> Result<DecoratedSignature, CryptoError> {
        let public_key = self.signing_key.verifying_key().to_bytes();
        let hint: [u8; 4] = public_key[28..]
            .try_into()
            .map_err(|_| CryptoError::Message("public key shorter than hint".to_string()))?;
        let signature = self.signing_key.sign(hash.as_bytes());
        Ok(DecoratedSignature {
            hint: SignatureHint(hint),
            signature: XdrSignature(
                signature
                    .to_bytes()
                    .to_vec()
                    .try_into()
                    .map_err(|_| CryptoError::InvalidSignature)?,
            ),
        })
    }

    /// Appends this key's signature to a v1 envelope. The envelope's source
    /// account must be this key's account.
    pub fn sign_envelope(
        &self,
        envelope: TransactionEnvelope,
        network_id: &[u8; 32],
    ) -> Result<TransactionEnvelope, CryptoError> {
        let TransactionEnvelope::Tx(mut v1) = envelope else {
            return Err(CryptoError::Message(
                "only v1 transaction envelopes can be signed".to_string(),
            ));
        };
        let source = match &v1.tx.source_account {
            stellar_xdr::curr::MuxedAccount::Ed25519(key) => AccountAddress::from_bytes(key.0),
            stellar_xdr::curr::MuxedAccount::MuxedEd25519(muxed) => {
                AccountAddress::from_bytes(muxed.ed25519.0)
            }
        };
        if source != self.address() {
            return Err(CryptoError::SignerMismatch {
                expected: source.to_string(),
                actual: self.address().to_string(),
            });
        }

        let hash = transaction_hash(&v1.tx, network_id)?;
        let decorated = self.sign_hash(&hash)?;
        let mut signatures: Vec<DecoratedSignature> = v1.signatures.into();
        signatures.push(decorated);
        v1.signatures = signatures
            .try_into()
            .map_err(|_| CryptoError::Message("too many signatures".to_string()))?;
        Ok(TransactionEnvelope::Tx(v1))
    }
}

pub fn verify_decorated_signature(
    signer: &AccountAddress,
    hash: &TxHash,
    decorated: &DecoratedSignature,
) -> Result<(), CryptoError> {
    if decorated.hint.0 != signer.as_bytes()[28..] {
        return Err(CryptoError::InvalidSignature);
    }
    let verify_key = VerifyingKey::from_bytes(signer.as_bytes())
        .map_err(|err| CryptoError::Message(format!("invalid pubkey: {err}")))?;
    let signature = Signature::from_slice(decorated.signature.0.as_slice())
        .map_err(|_| CryptoError::InvalidSignature)?;
    verify_key
        .verify(hash.as_bytes(), &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}
