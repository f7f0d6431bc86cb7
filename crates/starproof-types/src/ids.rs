use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

macro_rules! impl_string_serde {
    ($name:ident) => {
        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

macro_rules! impl_hex_hash {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; 32]);

        impl $name {
            pub const LEN: usize = 32;

            pub const fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn from_slice(bytes: &[u8]) -> Result<Self, ValidationError> {
                let out: [u8; 32] =
                    bytes
                        .try_into()
                        .map_err(|_| ValidationError::InvalidLength {
                            kind: stringify!($name),
                            expected: Self::LEN,
                            actual: bytes.len(),
                        })?;
                Ok(Self(out))
            }

            pub fn from_hex(value: &str) -> Result<Self, ValidationError> {
                let trimmed = value.strip_prefix("0x").unwrap_or(value);
                let bytes = hex::decode(trimmed)
                    .map_err(|err| ValidationError::InvalidHex(err.to_string()))?;
                Self::from_slice(&bytes)
            }

            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub const fn into_inner(self) -> [u8; 32] {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(value: [u8; 32]) -> Self {
                Self::new(value)
            }
        }

        impl_string_serde!($name);
    };
}

macro_rules! impl_strkey_address {
    ($name:ident, $kind:literal, $parse:expr, $render:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; 32]);

        impl $name {
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn from_strkey(value: &str) -> Result<Self, ValidationError> {
                let parse: fn(&str) -> Option<[u8; 32]> = $parse;
                parse(value)
                    .map(Self)
                    .ok_or_else(|| ValidationError::InvalidAddress {
                        kind: $kind,
                        value: value.to_string(),
                    })
            }

            pub fn to_strkey(&self) -> String {
                let render: fn([u8; 32]) -> String = $render;
                render(self.0)
            }

            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_strkey())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_strkey(s)
            }
        }

        impl_string_serde!($name);
    };
}

impl_hex_hash!(TxHash);
impl_hex_hash!(WasmHash);

impl_strkey_address!(
    AccountAddress,
    "account",
    |value| stellar_strkey::ed25519::PublicKey::from_string(value)
        .ok()
        .map(|key| key.0),
    |bytes| stellar_strkey::ed25519::PublicKey(bytes).to_string()
);

impl_strkey_address!(
    ContractAddress,
    "contract",
    |value| stellar_strkey::Contract::from_string(value)
        .ok()
        .map(|contract| contract.0),
    |bytes| stellar_strkey::Contract(bytes).to_string()
);

/// Certificate identifier as stored in the contract's certificate map.
///
/// `new` rejects blank input built locally. The contract itself stores any
/// string, so values read back from the ledger or from disk go through
/// `from_stored` and are kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertificateId(String);

impl CertificateId {
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ValidationError::MissingField("certificate_id"));
        }
        Ok(Self(value))
    }

    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Content fingerprint of the off-chain certificate fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataHash(String);

impl MetadataHash {
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ValidationError::MissingField("metadata_hash"));
        }
        Ok(Self(value))
    }

    /// Hash as recorded on-chain; may be empty.
    pub fn from_stored(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Renders a 32-byte digest as `0x`-prefixed lowercase hex.
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(format!("0x{}", hex::encode(digest)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! impl_string_newtype {
    ($name:ident) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

impl_string_newtype!(CertificateId);
impl_string_newtype!(MetadataHash);
