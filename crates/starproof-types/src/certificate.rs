//! Certificate records returned by the contract and the local status annotation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{AccountAddress, MetadataHash};

/// On-chain certificate record as returned by `get_certificate_details`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateDetails {
    pub owner: AccountAddress,
    pub metadata_hash: MetadataHash,
    pub is_valid: bool,
}

/// Local view of a certificate as it moves through the issuance flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    /// Submitted; on-chain confirmation not yet observed.
    Pending,
    Issued,
    Verified,
    Expired,
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Issued => "issued",
            Self::Verified => "verified",
            Self::Expired => "expired",
        };
        f.write_str(label)
    }
}

/// Error codes raised by the certification contract (`Error(Contract, #n)`).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractError {
    #[error("caller is not the contract admin")]
    Unauthorized,
    #[error("certificate already exists")]
    CertificateAlreadyExists,
    #[error("certificate not found")]
    CertificateNotFound,
    #[error("contract already initialized")]
    AlreadyInitialized,
    #[error("contract error code {0}")]
    Other(u32),
}

impl ContractError {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Unauthorized,
            2 => Self::CertificateAlreadyExists,
            3 => Self::CertificateNotFound,
            4 => Self::AlreadyInitialized,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            Self::Unauthorized => 1,
            Self::CertificateAlreadyExists => 2,
            Self::CertificateNotFound => 3,
            Self::AlreadyInitialized => 4,
            Self::Other(code) => *code,
        }
    }
}
