//! Decoding of `simulateTransaction` results into XDR values.

use starproof_types::ContractError;
use stellar_xdr::curr::{ScVal, SorobanAuthorizationEntry, SorobanTransactionData};
use thiserror::Error;

use crate::convert::{decode_base64, parse_contract_error, XdrError};
use crate::model::SimulateTransactionResponse;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimulationError {
    #[error("contract rejected invocation: {0}")]
    Contract(ContractError),
    #[error("simulation failed: {0}")]
    Failed(String),
    #[error("simulation returned no invocation result")]
    MissingResult,
    #[error(transparent)]
    Xdr(#[from] XdrError),
}

/// Everything a prepared transaction needs from a successful simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOutcome {
    pub transaction_data: SorobanTransactionData,
    pub min_resource_fee: u64,
    pub auth: Vec<SorobanAuthorizationEntry>,
    pub return_value: ScVal,
    pub latest_ledger: u32,
}

impl TryFrom<SimulateTransactionResponse> for SimulationOutcome {
    type Error = SimulationError;

    fn try_from(value: SimulateTransactionResponse) -> Result<Self, Self::Error> {
        if let Some(diagnostic) = value.error {
            return Err(match parse_contract_error(&diagnostic) {
                Some(code) => SimulationError::Contract(code),
                None => SimulationError::Failed(diagnostic),
            });
        }

        let result = value
            .results
            .into_iter()
            .next()
            .ok_or(SimulationError::MissingResult)?;
        let auth = result
            .auth
            .iter()
            .map(|entry| decode_base64::<SorobanAuthorizationEntry>(entry))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            transaction_data: decode_base64(&value.transaction_data)?,
            min_resource_fee: value.min_resource_fee,
            auth,
            return_value: decode_base64(&result.xdr)?,
            latest_ledger: value.latest_ledger,
        })
    }
}
