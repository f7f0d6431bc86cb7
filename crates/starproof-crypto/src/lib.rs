//! Crypto helpers: network ids, transaction hashing, metadata fingerprints, ed25519 signing.

pub mod ed25519;
pub mod hashing;

pub use ed25519::{verify_decorated_signature, KeypairSigner};
pub use hashing::{compute_metadata_hash, network_id, transaction_hash, MetadataHashInput};
