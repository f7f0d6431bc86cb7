//! TxBuilder: assemble Soroban contract-invocation transactions and fold simulation results in.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use starproof_crypto::{network_id, transaction_hash};
use starproof_rpc::convert::{contract_sc_address, encode_base64, muxed_account, symbol};
use starproof_rpc::{SimulationOutcome, XdrError};
use starproof_types::{AccountAddress, ContractAddress, CryptoError, TxHash};
use stellar_xdr::curr::{
    HostFunction, InvokeContractArgs, InvokeHostFunctionOp, Memo, Operation, OperationBody,
    Preconditions, ScVal, SequenceNumber, TimeBounds, TimePoint, Transaction, TransactionEnvelope,
    TransactionExt, TransactionV1Envelope,
};
use thiserror::Error;

/// Minimum inclusion fee per operation, in stroops.
pub const BASE_FEE: u32 = 100;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transaction builder errors. Encoding failures are surfaced, never swallowed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TxBuilderError {
    #[error("transaction has no operations")]
    NoOperations,
    #[error("transaction has {0} operations, more than a transaction can carry")]
    TooManyOperations(usize),
    #[error("prepared transaction must carry exactly one contract invocation")]
    NotAnInvocation,
    #[error("fee overflow: inclusion fee {inclusion} + resource fee {resource}")]
    FeeOverflow { inclusion: u32, resource: u64 },
    #[error("sequence number overflow")]
    SequenceOverflow,
    #[error("system clock is before the unix epoch")]
    Clock,
    #[error(transparent)]
    Xdr(#[from] XdrError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Account reference as fetched from the ledger right before a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub address: AccountAddress,
    pub sequence: i64,
}

/// An unsigned transaction bound to the network it was built for.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltTransaction {
    pub tx: Transaction,
    pub network_id: [u8; 32],
}

impl BuiltTransaction {
    pub fn envelope(&self) -> TransactionEnvelope {
        TransactionEnvelope::Tx(TransactionV1Envelope {
            tx: self.tx.clone(),
            signatures: Default::default(),
        })
    }

    /// Base64 XDR of the unsigned envelope.
    pub fn to_xdr(&self) -> Result<String, XdrError> {
        encode_base64(&self.envelope())
    }

    pub fn hash(&self) -> Result<TxHash, CryptoError> {
        transaction_hash(&self.tx, &self.network_id)
    }

    /// The contract call carried by a single-operation transaction.
    pub fn invocation(&self) -> Option<&InvokeContractArgs> {
        let [operation] = self.tx.operations.as_slice() else {
            return None;
        };
        match &operation.body {
            OperationBody::InvokeHostFunction(InvokeHostFunctionOp {
                host_function: HostFunction::InvokeContract(args),
                ..
            }) => Some(args),
            _ => None,
        }
    }
}

/// Fluent builder for contract-invocation transactions.
#[derive(Debug, Clone)]
pub struct TxBuilder {
    source: AccountSnapshot,
    network_id: [u8; 32],
    fee: u32,
    timeout: Duration,
    operations: Vec<Operation>,
    now_unix_secs: Option<u64>,
}

impl TxBuilder {
    pub fn new(source: AccountSnapshot, network_passphrase: &str) -> Self {
        Self {
            source,
            network_id: network_id(network_passphrase),
            fee: BASE_FEE,
            timeout: DEFAULT_TIMEOUT,
            operations: Vec::new(),
            now_unix_secs: None,
        }
    }

    /// Inclusion fee per operation.
    pub fn with_fee(mut self, fee: u32) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    /// Pins the clock used for the upper time bound.
    pub fn at_time(mut self, unix_secs: u64) -> Self {
        self.now_unix_secs = Some(unix_secs);
        self
    }

    pub fn build(self) -> Result<BuiltTransaction, TxBuilderError> {
        if self.operations.is_empty() {
            return Err(TxBuilderError::NoOperations);
        }
        let count = self.operations.len();
        let fee = u32::try_from(count)
            .ok()
            .and_then(|count| self.fee.checked_mul(count))
            .ok_or(TxBuilderError::TooManyOperations(count))?;
        let sequence = self
            .source
            .sequence
            .checked_add(1)
            .ok_or(TxBuilderError::SequenceOverflow)?;
        let now = match self.now_unix_secs {
            Some(now) => now,
            None => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|_| TxBuilderError::Clock)?
                .as_secs(),
        };

        let tx = Transaction {
            source_account: muxed_account(&self.source.address),
            fee,
            seq_num: SequenceNumber(sequence),
            cond: Preconditions::Time(TimeBounds {
                min_time: TimePoint(0),
                max_time: TimePoint(now.saturating_add(self.timeout.as_secs())),
            }),
            memo: Memo::None,
            operations: self
                .operations
                .try_into()
                .map_err(|_| TxBuilderError::TooManyOperations(count))?,
            ext: TransactionExt::V0,
        };
        Ok(BuiltTransaction {
            tx,
            network_id: self.network_id,
        })
    }
}

/// One `InvokeHostFunction` operation calling `function` on `contract`.
/// Authorization entries are left empty until simulation fills them.
pub fn invoke_contract_operation(
    contract: &ContractAddress,
    function: &str,
    args: Vec<ScVal>,
) -> Result<Operation, TxBuilderError> {
    let args = args
        .try_into()
        .map_err(|err: stellar_xdr::curr::Error| XdrError::Encode(err.to_string()))?;
    Ok(Operation {
        source_account: None,
        body: OperationBody::InvokeHostFunction(InvokeHostFunctionOp {
            host_function: HostFunction::InvokeContract(InvokeContractArgs {
                contract_address: contract_sc_address(contract),
                function_name: symbol(function)?,
                args,
            }),
            auth: Default::default(),
        }),
    })
}

/// Folds a simulation into the transaction: soroban resources, recorded
/// authorizations, and `fee = inclusion fee + minimum resource fee`.
pub fn assemble_transaction(
    built: &BuiltTransaction,
    simulation: &SimulationOutcome,
) -> Result<BuiltTransaction, TxBuilderError> {
    let mut tx = built.tx.clone();
    let mut operations: Vec<Operation> = tx.operations.clone().into();
    let [operation] = operations.as_mut_slice() else {
        return Err(TxBuilderError::NotAnInvocation);
    };
    let OperationBody::InvokeHostFunction(op) = &mut operation.body else {
        return Err(TxBuilderError::NotAnInvocation);
    };
    if op.auth.is_empty() {
        op.auth = simulation
            .auth
            .clone()
            .try_into()
            .map_err(|err: stellar_xdr::curr::Error| XdrError::Encode(err.to_string()))?;
    }
    tx.operations = operations
        .try_into()
        .map_err(|err: stellar_xdr::curr::Error| XdrError::Encode(err.to_string()))?;

    let overflow = TxBuilderError::FeeOverflow {
        inclusion: tx.fee,
        resource: simulation.min_resource_fee,
    };
    let resource = u32::try_from(simulation.min_resource_fee).map_err(|_| overflow.clone())?;
    tx.fee = tx.fee.checked_add(resource).ok_or(overflow)?;
    tx.ext = TransactionExt::V1(simulation.transaction_data.clone());

    Ok(BuiltTransaction {
        tx,
        network_id: built.network_id,
    })
}
