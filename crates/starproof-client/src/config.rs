use std::time::Duration;

use starproof_types::{AccountAddress, ContractAddress, WasmHash};
use thiserror::Error;

use crate::poller::PollPolicy;
use crate::transport::TransportConfig;
use crate::tx_builder::{BASE_FEE, DEFAULT_TIMEOUT};

pub const TESTNET_PASSPHRASE: &str = "Test SDF Network ; September 2015";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("contract id is not configured")]
    MissingContractId,
    #[error("deployed wasm hash is not configured")]
    MissingWasmHash,
    #[error("invalid contract id `{0}`")]
    InvalidContractId(String),
    #[error("invalid wasm hash `{0}`")]
    InvalidWasmHash(String),
    #[error("deployed wasm hash {actual} does not match configured {expected}")]
    WasmHashMismatch { expected: WasmHash, actual: WasmHash },
    #[error("rpc serves network `{actual}`, configured for `{expected}`")]
    NetworkMismatch { expected: String, actual: String },
}

/// Client configuration. Contract id and wasm hash stay raw until a write
/// needs them so that read-only commands work against partial config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StarproofConfig {
    pub transport: TransportConfig,
    pub network_passphrase: String,
    pub contract_id: Option<String>,
    pub wasm_hash: Option<String>,
    /// Inclusion fee per operation, in stroops.
    pub base_fee: u32,
    pub tx_timeout: Duration,
    pub poll: PollPolicy,
    /// Source account for simulated reads. Falls back to the all-zero key.
    pub simulation_source: Option<AccountAddress>,
}

impl Default for StarproofConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            network_passphrase: TESTNET_PASSPHRASE.to_string(),
            contract_id: None,
            wasm_hash: None,
            base_fee: BASE_FEE,
            tx_timeout: DEFAULT_TIMEOUT,
            poll: PollPolicy::default(),
            simulation_source: None,
        }
    }
}

/// Contract coordinates required before any write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractConfig {
    pub contract: ContractAddress,
    pub wasm_hash: WasmHash,
}

impl StarproofConfig {
    pub fn contract(&self) -> Result<ContractAddress, ConfigError> {
        let raw = non_empty(&self.contract_id).ok_or(ConfigError::MissingContractId)?;
        ContractAddress::from_strkey(raw).map_err(|_| ConfigError::InvalidContractId(raw.to_string()))
    }

    pub fn wasm_hash(&self) -> Result<WasmHash, ConfigError> {
        let raw = non_empty(&self.wasm_hash).ok_or(ConfigError::MissingWasmHash)?;
        WasmHash::from_hex(raw).map_err(|_| ConfigError::InvalidWasmHash(raw.to_string()))
    }

    /// Both contract id and wasm hash, validated.
    pub fn require_contract(&self) -> Result<ContractConfig, ConfigError> {
        Ok(ContractConfig {
            contract: self.contract()?,
            wasm_hash: self.wasm_hash()?,
        })
    }

    pub fn read_source(&self) -> AccountAddress {
        self.simulation_source
            .unwrap_or_else(|| AccountAddress::from_bytes([0; 32]))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
