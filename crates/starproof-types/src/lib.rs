pub mod certificate;
pub mod error;
pub mod ids;

pub use certificate::{CertificateDetails, CertificateStatus, ContractError};
pub use error::{CryptoError, ValidationError};
pub use ids::{AccountAddress, CertificateId, ContractAddress, MetadataHash, TxHash, WasmHash};
