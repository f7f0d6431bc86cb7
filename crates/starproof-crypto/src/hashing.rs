use sha2::{Digest, Sha256};
use starproof_types::{CryptoError, MetadataHash, TxHash};
use stellar_xdr::curr::{
    Hash, Limits, Transaction, TransactionSignaturePayload,
    TransactionSignaturePayloadTaggedTransaction, WriteXdr,
};

const METADATA_HASH_TAG: &[u8] = b"starproof.certificate.metadata.v1";

/// Off-chain certificate fields covered by the metadata fingerprint.
///
/// Encoding rules used by [`compute_metadata_hash`]:
/// 1. A fixed domain tag prefixes the payload.
/// 2. Every field is a UTF-8 string length-prefixed with a big-endian u32.
/// 3. Fields are written in declaration order.
/// 4. The digest is SHA-256, rendered as `0x` + lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataHashInput<'a> {
    pub certificate_id: &'a str,
    pub certificate_type: &'a str,
    pub issue_date: &'a str,
    pub issuer: &'a str,
    pub recipient: &'a str,
    pub action: &'a str,
}

pub fn compute_metadata_hash(input: &MetadataHashInput<'_>) -> MetadataHash {
    let mut enc = Vec::new();
    enc.extend_from_slice(METADATA_HASH_TAG);
    put_string(&mut enc, input.certificate_id);
    put_string(&mut enc, input.certificate_type);
    put_string(&mut enc, input.issue_date);
    put_string(&mut enc, input.issuer);
    put_string(&mut enc, input.recipient);
    put_string(&mut enc, input.action);
    MetadataHash::from_digest(sha256_32(&enc))
}

/// Network identifier: SHA-256 of the network passphrase.
pub fn network_id(passphrase: &str) -> [u8; 32] {
    sha256_32(passphrase.as_bytes())
}

/// Hash that signers commit to: SHA-256 over the XDR signature payload.
pub fn transaction_hash(tx: &Transaction, network_id: &[u8; 32]) -> Result<TxHash, CryptoError> {
    let payload = TransactionSignaturePayload {
        network_id: Hash(*network_id),
        tagged_transaction: TransactionSignaturePayloadTaggedTransaction::Tx(tx.clone()),
    };
    let encoded = payload
        .to_xdr(Limits::none())
        .map_err(|err| CryptoError::Xdr(err.to_string()))?;
    Ok(TxHash::new(sha256_32(&encoded)))
}

fn sha256_32(input: &[u8]) -> [u8; 32] {
    let digest: [u8; 32] = Sha256::digest(input).into();
    digest
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_string(out: &mut Vec<u8>, value: &str) {
    put_u32(out, value.len() as u32);
    out.extend_from_slice(value.as_bytes());
}
