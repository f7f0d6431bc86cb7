//! MockLedger: in-memory Soroban RPC node hosting one certification contract.

use std::collections::{BTreeMap, HashMap};

use starproof_crypto::{network_id, transaction_hash, verify_decorated_signature};
use starproof_rpc::convert::{
    certificate_details_val, contract_instance_ledger_key, contract_sc_address, decode_base64,
    encode_base64, muxed_to_account, string_vec_val, val_to_account, val_to_string,
};
use starproof_rpc::model::{
    GetLedgerEntriesRequest, GetLedgerEntriesResponse, GetNetworkResponse, GetTransactionRequest,
    GetTransactionResponse, JsonRpcError, LedgerEntryResult, SendTransactionRequest,
    SendTransactionResponse, SendTransactionStatus, SimulateHostFunctionResult,
    SimulateTransactionRequest, SimulateTransactionResponse, TransactionStatus,
};
use starproof_types::{
    AccountAddress, CertificateDetails, ContractAddress, ContractError, MetadataHash, TxHash,
    WasmHash,
};
use stellar_xdr::curr::{
    AccountEntry, AccountEntryExt, ContractDataDurability, ContractDataEntry, ContractExecutable,
    ExtensionPoint, Hash, HostFunction, InvokeContractArgs, InvokeHostFunctionResult,
    LedgerEntryData, LedgerFootprint, LedgerKey, OperationBody, OperationResult,
    OperationResultTr, ScContractInstance, ScVal, SequenceNumber, SorobanAuthorizationEntry,
    SorobanAuthorizedFunction, SorobanAuthorizedInvocation, SorobanCredentials, SorobanResources,
    SorobanTransactionData, Thresholds, Transaction, TransactionEnvelope, TransactionExt,
    TransactionResult, TransactionResultExt, TransactionResultResult,
};

/// Resource fee quoted by every successful simulation.
pub const MOCK_RESOURCE_FEE: u64 = 5_000;
pub const MOCK_PROTOCOL_VERSION: u32 = 22;

const START_LEDGER: u32 = 1_000;
const START_CLOSE_TIME: u64 = 1_700_000_000;
const LEDGER_CLOSE_SECS: u64 = 5;

/// Per-method request counters, for asserting which RPC calls a flow made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCallCounts {
    pub get_network: usize,
    pub get_ledger_entries: usize,
    pub simulate_transaction: usize,
    pub send_transaction: usize,
    pub get_transaction: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostFault {
    Contract(ContractError),
    Host(&'static str),
}

impl HostFault {
    fn diagnostic(&self) -> String {
        match self {
            Self::Contract(err) => format!("HostError: Error(Contract, #{})", err.code()),
            Self::Host(detail) => format!("HostError: {detail}"),
        }
    }
}

impl From<ContractError> for HostFault {
    fn from(value: ContractError) -> Self {
        Self::Contract(value)
    }
}

#[derive(Debug, Clone)]
struct TrackedTransaction {
    envelope_xdr: String,
    remaining_not_found: u32,
    status: TransactionStatus,
    result_xdr: String,
    ledger: u32,
    created_at: u64,
}

#[derive(Debug, Clone)]
pub struct MockLedger {
    passphrase: String,
    network_id: [u8; 32],
    contract: ContractAddress,
    wasm_hash: WasmHash,
    admin: Option<AccountAddress>,
    pub accounts: HashMap<AccountAddress, i64>,
    pub certificates: BTreeMap<String, CertificateDetails>,
    transactions: HashMap<TxHash, TrackedTransaction>,
    latest_ledger: u32,
    close_time: u64,
    not_found_polls: u32,
    forced_send_status: Option<SendTransactionStatus>,
    calls: MockCallCounts,
}

impl MockLedger {
    pub fn new(passphrase: impl Into<String>, contract: ContractAddress, wasm_hash: WasmHash) -> Self {
        let passphrase = passphrase.into();
        Self {
            network_id: network_id(&passphrase),
            passphrase,
            contract,
            wasm_hash,
            admin: None,
            accounts: HashMap::new(),
            certificates: BTreeMap::new(),
            transactions: HashMap::new(),
            latest_ledger: START_LEDGER,
            close_time: START_CLOSE_TIME,
            not_found_polls: 0,
            forced_send_status: None,
            calls: MockCallCounts::default(),
        }
    }

    /// A ledger whose contract is already initialized with `admin`.
    pub fn initialized(
        passphrase: impl Into<String>,
        contract: ContractAddress,
        wasm_hash: WasmHash,
        admin: AccountAddress,
    ) -> Self {
        let mut ledger = Self::new(passphrase, contract, wasm_hash);
        ledger.admin = Some(admin);
        ledger
    }

    pub fn initialize(&mut self, admin: AccountAddress) -> Result<(), ContractError> {
        if self.admin.is_some() {
            return Err(ContractError::AlreadyInitialized);
        }
        self.admin = Some(admin);
        Ok(())
    }

    pub fn fund_account(&mut self, address: AccountAddress, sequence: i64) {
        self.accounts.insert(address, sequence);
    }

    pub fn sequence(&self, address: &AccountAddress) -> Option<i64> {
        self.accounts.get(address).copied()
    }

    /// Number of `NOT_FOUND` answers each newly submitted transaction yields
    /// before its terminal status becomes visible.
    pub fn set_not_found_polls(&mut self, polls: u32) {
        self.not_found_polls = polls;
    }

    /// Makes every following `sendTransaction` answer with `status`.
    pub fn force_send_status(&mut self, status: Option<SendTransactionStatus>) {
        self.forced_send_status = status;
    }

    pub fn set_wasm_hash(&mut self, wasm_hash: WasmHash) {
        self.wasm_hash = wasm_hash;
    }

    pub fn contract(&self) -> ContractAddress {
        self.contract
    }

    pub fn calls(&self) -> MockCallCounts {
        self.calls
    }

    pub fn certificate(&self, id: &str) -> Option<&CertificateDetails> {
        self.certificates.get(id)
    }

    pub fn get_network(&mut self) -> GetNetworkResponse {
        self.calls.get_network += 1;
        GetNetworkResponse {
            passphrase: self.passphrase.clone(),
            protocol_version: MOCK_PROTOCOL_VERSION,
            friendbot_url: None,
        }
    }

    pub fn get_ledger_entries(
        &mut self,
        req: GetLedgerEntriesRequest,
    ) -> Result<GetLedgerEntriesResponse, JsonRpcError> {
        self.calls.get_ledger_entries += 1;
        let mut entries = Vec::new();
        for raw_key in req.keys {
            let key: LedgerKey = decode_base64(&raw_key)
                .map_err(|err| JsonRpcError::invalid_params(err.to_string()))?;
            if let Some(data) = self.lookup_entry(&key) {
                entries.push(LedgerEntryResult {
                    key: raw_key,
                    xdr: encode_base64(&data).map_err(internal)?,
                    last_modified_ledger_seq: self.latest_ledger,
                    live_until_ledger_seq: None,
                });
            }
        }
        Ok(GetLedgerEntriesResponse {
            entries,
            latest_ledger: self.latest_ledger,
        })
    }

    pub fn simulate_transaction(
        &mut self,
        req: SimulateTransactionRequest,
    ) -> Result<SimulateTransactionResponse, JsonRpcError> {
        self.calls.simulate_transaction += 1;
        let envelope: TransactionEnvelope = decode_base64(&req.transaction)
            .map_err(|err| JsonRpcError::invalid_params(err.to_string()))?;
        let tx = envelope_tx(&envelope)?;
        let invocation = single_invocation(tx)?;
        let source = muxed_to_account(&tx.source_account);
        let function = symbol_name(&invocation)?;

        let mut shadow = self.clone();
        match shadow.invoke(&source, &function, invocation.args.as_slice(), false) {
            Ok(value) => {
                let auth = if requires_admin(&function) {
                    vec![encode_base64(&source_account_auth(&invocation)).map_err(internal)?]
                } else {
                    Vec::new()
                };
                Ok(SimulateTransactionResponse {
                    transaction_data: encode_base64(&self.resource_data(&function))
                        .map_err(internal)?,
                    min_resource_fee: MOCK_RESOURCE_FEE,
                    results: vec![SimulateHostFunctionResult {
                        auth,
                        xdr: encode_base64(&value).map_err(internal)?,
                    }],
                    error: None,
                    latest_ledger: self.latest_ledger,
                })
            }
            Err(fault) => Ok(SimulateTransactionResponse {
                transaction_data: String::new(),
                min_resource_fee: 0,
                results: Vec::new(),
                error: Some(fault.diagnostic()),
                latest_ledger: self.latest_ledger,
            }),
        }
    }

    pub fn send_transaction(
        &mut self,
        req: SendTransactionRequest,
    ) -> Result<SendTransactionResponse, JsonRpcError> {
        self.calls.send_transaction += 1;
        let envelope: TransactionEnvelope = decode_base64(&req.transaction)
            .map_err(|err| JsonRpcError::invalid_params(err.to_string()))?;
        let TransactionEnvelope::Tx(v1) = &envelope else {
            return Err(JsonRpcError::invalid_params("expected a v1 transaction envelope"));
        };
        let tx = &v1.tx;
        let hash = transaction_hash(tx, &self.network_id).map_err(internal)?;

        if let Some(status) = self.forced_send_status {
            return Ok(self.send_response(status, hash, None));
        }
        if self.transactions.contains_key(&hash) {
            return Ok(self.send_response(SendTransactionStatus::Duplicate, hash, None));
        }

        let source = muxed_to_account(&tx.source_account);
        let Some(current) = self.accounts.get(&source).copied() else {
            return self.reject_send(hash, TransactionResultResult::TxNoAccount);
        };
        if tx.seq_num.0 != current + 1 {
            return self.reject_send(hash, TransactionResultResult::TxBadSeq);
        }
        let signed = v1
            .signatures
            .iter()
            .any(|sig| verify_decorated_signature(&source, &hash, sig).is_ok());
        if !signed {
            return self.reject_send(hash, TransactionResultResult::TxBadAuth);
        }
        let TransactionExt::V1(_) = &tx.ext else {
            return self.reject_send(hash, TransactionResultResult::TxSorobanInvalid);
        };
        let invocation = single_invocation(tx)?;
        let function = symbol_name(&invocation)?;

        self.accounts.insert(source, current + 1);
        self.latest_ledger += 1;
        self.close_time += LEDGER_CLOSE_SECS;

        let auth_attached = match &tx.operations[0].body {
            OperationBody::InvokeHostFunction(op) => !op.auth.is_empty(),
            _ => false,
        };
        let outcome = if requires_admin(&function) && !auth_attached {
            Err(HostFault::Host("Error(Auth, InvalidAction)"))
        } else {
            self.invoke(&source, &function, invocation.args.as_slice(), true)
        };
        let (status, result) = match outcome {
            Ok(_) => (
                TransactionStatus::Success,
                TransactionResultResult::TxSuccess(
                    vec![OperationResult::OpInner(OperationResultTr::InvokeHostFunction(
                        InvokeHostFunctionResult::Success(Hash(*hash.as_bytes())),
                    ))]
                    .try_into()
                    .map_err(internal)?,
                ),
            ),
            Err(_) => (
                TransactionStatus::Failed,
                TransactionResultResult::TxFailed(
                    vec![OperationResult::OpInner(OperationResultTr::InvokeHostFunction(
                        InvokeHostFunctionResult::Trapped,
                    ))]
                    .try_into()
                    .map_err(internal)?,
                ),
            ),
        };

        self.transactions.insert(
            hash,
            TrackedTransaction {
                envelope_xdr: req.transaction,
                remaining_not_found: self.not_found_polls,
                status,
                result_xdr: encode_base64(&transaction_result(tx.fee, result)).map_err(internal)?,
                ledger: self.latest_ledger,
                created_at: self.close_time,
            },
        );
        Ok(self.send_response(SendTransactionStatus::Pending, hash, None))
    }

    pub fn get_transaction(
        &mut self,
        req: GetTransactionRequest,
    ) -> Result<GetTransactionResponse, JsonRpcError> {
        self.calls.get_transaction += 1;
        let hash = TxHash::from_hex(&req.hash)
            .map_err(|err| JsonRpcError::invalid_params(err.to_string()))?;
        let latest_ledger = self.latest_ledger;
        let Some(tracked) = self.transactions.get_mut(&hash) else {
            return Ok(GetTransactionResponse::not_found(latest_ledger));
        };
        if tracked.remaining_not_found > 0 {
            tracked.remaining_not_found -= 1;
            return Ok(GetTransactionResponse::not_found(latest_ledger));
        }
        Ok(GetTransactionResponse {
            status: tracked.status,
            latest_ledger,
            ledger: Some(tracked.ledger),
            created_at: Some(tracked.created_at),
            result_xdr: Some(tracked.result_xdr.clone()),
            envelope_xdr: Some(tracked.envelope_xdr.clone()),
            result_meta_xdr: None,
        })
    }

    fn lookup_entry(&self, key: &LedgerKey) -> Option<LedgerEntryData> {
        match key {
            LedgerKey::Account(account) => {
                let address = match &account.account_id.0 {
                    stellar_xdr::curr::PublicKey::PublicKeyTypeEd25519(key) => {
                        AccountAddress::from_bytes(key.0)
                    }
                };
                let sequence = self.accounts.get(&address)?;
                Some(LedgerEntryData::Account(AccountEntry {
                    account_id: account.account_id.clone(),
                    balance: 10_000_000_000,
                    seq_num: SequenceNumber(*sequence),
                    num_sub_entries: 0,
                    inflation_dest: None,
                    flags: 0,
                    home_domain: Default::default(),
                    thresholds: Thresholds([1, 0, 0, 0]),
                    signers: Default::default(),
                    ext: AccountEntryExt::V0,
                }))
            }
            LedgerKey::ContractData(data)
                if data.contract == contract_sc_address(&self.contract)
                    && data.key == ScVal::LedgerKeyContractInstance =>
            {
                Some(LedgerEntryData::ContractData(ContractDataEntry {
                    ext: ExtensionPoint::V0,
                    contract: data.contract.clone(),
                    key: ScVal::LedgerKeyContractInstance,
                    durability: ContractDataDurability::Persistent,
                    val: ScVal::ContractInstance(ScContractInstance {
                        executable: ContractExecutable::Wasm(Hash(*self.wasm_hash.as_bytes())),
                        storage: None,
                    }),
                }))
            }
            _ => None,
        }
    }

    fn invoke(
        &mut self,
        source: &AccountAddress,
        function: &str,
        args: &[ScVal],
        enforce_auth: bool,
    ) -> Result<ScVal, HostFault> {
        match (function, args) {
            ("initialize", [admin]) => {
                let admin = val_to_account(admin).map_err(|_| bad_arg())?;
                self.initialize(admin)?;
                Ok(ScVal::Void)
            }
            ("issue_certificate", [id, owner, hash]) => {
                self.require_admin(source, enforce_auth)?;
                let id = val_to_string(id).map_err(|_| bad_arg())?;
                let owner = val_to_account(owner).map_err(|_| bad_arg())?;
                let metadata_hash = val_to_string(hash)
                    .map(MetadataHash::from_stored)
                    .map_err(|_| bad_arg())?;
                if self.certificates.contains_key(&id) {
                    return Err(ContractError::CertificateAlreadyExists.into());
                }
                self.certificates.insert(
                    id,
                    CertificateDetails {
                        owner,
                        metadata_hash,
                        is_valid: true,
                    },
                );
                Ok(ScVal::Void)
            }
            ("revoke_certificate", [id]) => {
                self.require_admin(source, enforce_auth)?;
                let id = val_to_string(id).map_err(|_| bad_arg())?;
                let details = self
                    .certificates
                    .get_mut(&id)
                    .ok_or(ContractError::CertificateNotFound)?;
                details.is_valid = false;
                Ok(ScVal::Void)
            }
            ("get_certificate_details", [id]) => {
                let details = self.details(id)?;
                certificate_details_val(details).map_err(|_| bad_arg())
            }
            ("verify_certificate", [id, hash]) => {
                let details = self.details(id)?;
                let hash = val_to_string(hash).map_err(|_| bad_arg())?;
                Ok(ScVal::Bool(
                    details.is_valid && details.metadata_hash.as_str() == hash,
                ))
            }
            ("list_certificates", []) => {
                self.require_admin(source, enforce_auth)?;
                let ids: Vec<String> = self.certificates.keys().cloned().collect();
                string_vec_val(&ids).map_err(|_| bad_arg())
            }
            _ => Err(HostFault::Host("Error(WasmVm, MissingValue)")),
        }
    }

    fn details(&self, id: &ScVal) -> Result<&CertificateDetails, HostFault> {
        let id = val_to_string(id).map_err(|_| bad_arg())?;
        self.certificates
            .get(&id)
            .ok_or(HostFault::Contract(ContractError::CertificateNotFound))
    }

    // Recording-mode simulation accepts any caller; only applied transactions
    // must come from the admin.
    fn require_admin(&self, source: &AccountAddress, enforce: bool) -> Result<(), HostFault> {
        let admin = self.admin.ok_or(HostFault::Host("Error(Storage, MissingValue)"))?;
        if enforce && admin != *source {
            return Err(ContractError::Unauthorized.into());
        }
        Ok(())
    }

    fn resource_data(&self, function: &str) -> SorobanTransactionData {
        let instance = contract_instance_ledger_key(&self.contract);
        let (read_only, read_write) = if is_write(function) {
            (Vec::new(), vec![instance])
        } else {
            (vec![instance], Vec::new())
        };
        SorobanTransactionData {
            ext: ExtensionPoint::V0,
            resources: SorobanResources {
                footprint: LedgerFootprint {
                    read_only: read_only.try_into().unwrap_or_default(),
                    read_write: read_write.try_into().unwrap_or_default(),
                },
                instructions: 2_000_000,
                read_bytes: 2_048,
                write_bytes: if is_write(function) { 512 } else { 0 },
            },
            resource_fee: MOCK_RESOURCE_FEE as i64,
        }
    }

    fn send_response(
        &self,
        status: SendTransactionStatus,
        hash: TxHash,
        error_result_xdr: Option<String>,
    ) -> SendTransactionResponse {
        SendTransactionResponse {
            status,
            hash: hash.to_string(),
            latest_ledger: self.latest_ledger,
            error_result_xdr,
        }
    }

    fn reject_send(
        &self,
        hash: TxHash,
        result: TransactionResultResult,
    ) -> Result<SendTransactionResponse, JsonRpcError> {
        let xdr = encode_base64(&transaction_result(100, result)).map_err(internal)?;
        Ok(self.send_response(SendTransactionStatus::Error, hash, Some(xdr)))
    }
}

fn requires_admin(function: &str) -> bool {
    matches!(
        function,
        "issue_certificate" | "revoke_certificate" | "list_certificates"
    )
}

fn is_write(function: &str) -> bool {
    matches!(
        function,
        "initialize" | "issue_certificate" | "revoke_certificate"
    )
}

fn envelope_tx(envelope: &TransactionEnvelope) -> Result<&Transaction, JsonRpcError> {
    match envelope {
        TransactionEnvelope::Tx(v1) => Ok(&v1.tx),
        _ => Err(JsonRpcError::invalid_params(
            "expected a v1 transaction envelope",
        )),
    }
}

fn single_invocation(tx: &Transaction) -> Result<InvokeContractArgs, JsonRpcError> {
    let [operation] = tx.operations.as_slice() else {
        return Err(JsonRpcError::invalid_params(
            "soroban transactions carry exactly one operation",
        ));
    };
    match &operation.body {
        OperationBody::InvokeHostFunction(op) => match &op.host_function {
            HostFunction::InvokeContract(args) => Ok(args.clone()),
            _ => Err(JsonRpcError::invalid_params("unsupported host function")),
        },
        _ => Err(JsonRpcError::invalid_params(
            "operation is not a host function invocation",
        )),
    }
}

fn symbol_name(invocation: &InvokeContractArgs) -> Result<String, JsonRpcError> {
    String::from_utf8(invocation.function_name.0.to_vec())
        .map_err(|err| JsonRpcError::invalid_params(err.to_string()))
}

fn source_account_auth(invocation: &InvokeContractArgs) -> SorobanAuthorizationEntry {
    SorobanAuthorizationEntry {
        credentials: SorobanCredentials::SourceAccount,
        root_invocation: SorobanAuthorizedInvocation {
            function: SorobanAuthorizedFunction::ContractFn(invocation.clone()),
            sub_invocations: Default::default(),
        },
    }
}

fn transaction_result(fee: u32, result: TransactionResultResult) -> TransactionResult {
    TransactionResult {
        fee_charged: i64::from(fee),
        result,
        ext: TransactionResultExt::V0,
    }
}

fn bad_arg() -> HostFault {
    HostFault::Host("Error(Value, UnexpectedType)")
}

fn internal(err: impl std::fmt::Display) -> JsonRpcError {
    JsonRpcError {
        code: starproof_rpc::model::CODE_INTERNAL_ERROR,
        message: err.to_string(),
        data: None,
    }
}
