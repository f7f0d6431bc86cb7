use starproof_types::{
    AccountAddress, CertificateDetails, CertificateId, ContractAddress, ContractError,
    MetadataHash, ValidationError,
};
use stellar_xdr::curr::{
    AccountId, ContractDataDurability, Hash, LedgerKey, LedgerKeyAccount, LedgerKeyContractData,
    Limits, MuxedAccount, PublicKey, ReadXdr, ScAddress, ScMap, ScMapEntry, ScString, ScSymbol,
    ScVal, ScVec, Uint256, WriteXdr,
};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum XdrError {
    #[error("xdr encode failed: {0}")]
    Encode(String),
    #[error("xdr decode failed: {0}")]
    Decode(String),
    #[error("unexpected value: expected {expected}, found {found}")]
    Unexpected {
        expected: &'static str,
        found: String,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

pub fn encode_base64<T: WriteXdr>(value: &T) -> Result<String, XdrError> {
    value
        .to_xdr_base64(Limits::none())
        .map_err(|err| XdrError::Encode(err.to_string()))
}

pub fn decode_base64<T: ReadXdr>(value: &str) -> Result<T, XdrError> {
    T::from_xdr_base64(value, Limits::none()).map_err(|err| XdrError::Decode(err.to_string()))
}

pub fn account_id(address: &AccountAddress) -> AccountId {
    AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(*address.as_bytes())))
}

pub fn muxed_account(address: &AccountAddress) -> MuxedAccount {
    MuxedAccount::Ed25519(Uint256(*address.as_bytes()))
}

pub fn muxed_to_account(account: &MuxedAccount) -> AccountAddress {
    match account {
        MuxedAccount::Ed25519(key) => AccountAddress::from_bytes(key.0),
        MuxedAccount::MuxedEd25519(muxed) => AccountAddress::from_bytes(muxed.ed25519.0),
    }
}

pub fn account_sc_address(address: &AccountAddress) -> ScAddress {
    ScAddress::Account(account_id(address))
}

pub fn contract_sc_address(contract: &ContractAddress) -> ScAddress {
    ScAddress::Contract(Hash(*contract.as_bytes()))
}

pub fn sc_address_to_account(address: &ScAddress) -> Result<AccountAddress, XdrError> {
    match address {
        ScAddress::Account(AccountId(PublicKey::PublicKeyTypeEd25519(key))) => {
            Ok(AccountAddress::from_bytes(key.0))
        }
        ScAddress::Contract(hash) => Err(XdrError::Unexpected {
            expected: "account address",
            found: ContractAddress::from_bytes(hash.0).to_string(),
        }),
    }
}

pub fn symbol(value: &str) -> Result<ScSymbol, XdrError> {
    let inner = value
        .try_into()
        .map_err(|_| XdrError::Encode(format!("symbol `{value}` exceeds 32 bytes")))?;
    Ok(ScSymbol(inner))
}

pub fn symbol_val(value: &str) -> Result<ScVal, XdrError> {
    Ok(ScVal::Symbol(symbol(value)?))
}

pub fn string_val(value: &str) -> Result<ScVal, XdrError> {
    let inner = value
        .try_into()
        .map_err(|err: stellar_xdr::curr::Error| XdrError::Encode(err.to_string()))?;
    Ok(ScVal::String(ScString(inner)))
}

pub fn address_val(address: &AccountAddress) -> ScVal {
    ScVal::Address(account_sc_address(address))
}

pub fn certificate_id_val(id: &CertificateId) -> Result<ScVal, XdrError> {
    string_val(id.as_str())
}

pub fn metadata_hash_val(hash: &MetadataHash) -> Result<ScVal, XdrError> {
    string_val(hash.as_str())
}

pub fn val_to_bool(value: &ScVal) -> Result<bool, XdrError> {
    match value {
        ScVal::Bool(flag) => Ok(*flag),
        other => Err(unexpected("bool", other)),
    }
}

pub fn val_to_string(value: &ScVal) -> Result<String, XdrError> {
    match value {
        ScVal::String(ScString(inner)) => utf8(inner.to_vec()),
        other => Err(unexpected("string", other)),
    }
}

pub fn val_to_symbol(value: &ScVal) -> Result<String, XdrError> {
    match value {
        ScVal::Symbol(ScSymbol(inner)) => utf8(inner.to_vec()),
        other => Err(unexpected("symbol", other)),
    }
}

pub fn val_to_account(value: &ScVal) -> Result<AccountAddress, XdrError> {
    match value {
        ScVal::Address(address) => sc_address_to_account(address),
        other => Err(unexpected("address", other)),
    }
}

pub fn val_to_string_vec(value: &ScVal) -> Result<Vec<String>, XdrError> {
    match value {
        ScVal::Vec(Some(ScVec(items))) => items.iter().map(val_to_string).collect(),
        ScVal::Vec(None) | ScVal::Void => Ok(Vec::new()),
        other => Err(unexpected("vec", other)),
    }
}

pub fn string_vec_val(items: &[String]) -> Result<ScVal, XdrError> {
    let values = items
        .iter()
        .map(|item| string_val(item))
        .collect::<Result<Vec<_>, _>>()?;
    let vec = values
        .try_into()
        .map_err(|err: stellar_xdr::curr::Error| XdrError::Encode(err.to_string()))?;
    Ok(ScVal::Vec(Some(ScVec(vec))))
}

/// Builds a contract struct value: a map keyed by field symbols, sorted.
pub fn struct_val(mut fields: Vec<(&str, ScVal)>) -> Result<ScVal, XdrError> {
    fields.sort_by(|a, b| a.0.cmp(b.0));
    let entries = fields
        .into_iter()
        .map(|(name, val)| {
            Ok(ScMapEntry {
                key: symbol_val(name)?,
                val,
            })
        })
        .collect::<Result<Vec<_>, XdrError>>()?;
    let map = entries
        .try_into()
        .map_err(|err: stellar_xdr::curr::Error| XdrError::Encode(err.to_string()))?;
    Ok(ScVal::Map(Some(ScMap(map))))
}

pub fn certificate_details_val(details: &CertificateDetails) -> Result<ScVal, XdrError> {
    struct_val(vec![
        ("owner", address_val(&details.owner)),
        ("metadata_hash", metadata_hash_val(&details.metadata_hash)?),
        ("is_valid", ScVal::Bool(details.is_valid)),
    ])
}

pub fn val_to_certificate_details(value: &ScVal) -> Result<CertificateDetails, XdrError> {
    let ScVal::Map(Some(ScMap(entries))) = value else {
        return Err(unexpected("certificate details map", value));
    };

    let mut owner = None;
    let mut metadata_hash = None;
    let mut is_valid = None;
    for entry in entries.iter() {
        match val_to_symbol(&entry.key)?.as_str() {
            "owner" => owner = Some(val_to_account(&entry.val)?),
            "metadata_hash" => {
                metadata_hash = Some(MetadataHash::from_stored(val_to_string(&entry.val)?))
            }
            "is_valid" => is_valid = Some(val_to_bool(&entry.val)?),
            _ => {}
        }
    }

    Ok(CertificateDetails {
        owner: owner.ok_or(ValidationError::MissingField("owner"))?,
        metadata_hash: metadata_hash.ok_or(ValidationError::MissingField("metadata_hash"))?,
        is_valid: is_valid.ok_or(ValidationError::MissingField("is_valid"))?,
    })
}

pub fn account_ledger_key(address: &AccountAddress) -> LedgerKey {
    LedgerKey::Account(LedgerKeyAccount {
        account_id: account_id(address),
    })
}

pub fn contract_instance_ledger_key(contract: &ContractAddress) -> LedgerKey {
    LedgerKey::ContractData(LedgerKeyContractData {
        contract: contract_sc_address(contract),
        key: ScVal::LedgerKeyContractInstance,
        durability: ContractDataDurability::Persistent,
    })
}

/// Extracts the contract error code from a host diagnostic such as
/// `HostError: Error(Contract, #3)`.
pub fn parse_contract_error(diagnostic: &str) -> Option<ContractError> {
    const MARKER: &str = "Error(Contract, #";
    let start = diagnostic.find(MARKER)? + MARKER.len();
    let digits: String = diagnostic[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok().map(ContractError::from_code)
}

fn utf8(bytes: Vec<u8>) -> Result<String, XdrError> {
    String::from_utf8(bytes).map_err(|err| XdrError::Decode(err.to_string()))
}

fn unexpected(expected: &'static str, found: &ScVal) -> XdrError {
    XdrError::Unexpected {
        expected,
        found: found.name().to_string(),
    }
}
