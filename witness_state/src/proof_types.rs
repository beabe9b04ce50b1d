//! Account and storage proofs in the JSON shape of `eth_getProof`, as they are
//! kept in prepared snapshots.
//!
//! Numbers are kept as raw quantities until they are used, so a proof that
//! claims a balance wider than 256 bits is caught as
//! [`StateError::IntegerOverflow`] instead of failing the whole document.

use std::fmt::{self, Display};

use ethereum_types::{Address, H256, U256};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::{account::Account, StateError, StateResult};

/// A byte string encoded as `0x`-prefixed hex.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct HexBytes(#[serde(with = "crate::hex")] pub Vec<u8>);

impl AsRef<[u8]> for HexBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for HexBytes {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

/// An unsigned JSON-RPC quantity of any width, as big-endian bytes without
/// leading zeroes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Quantity(Vec<u8>);

impl Quantity {
    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        Self(bytes[start..].to_vec())
    }

    /// Returns `None` if the value needs more than 256 bits.
    pub fn to_u256(&self) -> Option<U256> {
        (self.0.len() <= 32).then(|| U256::from_big_endian(&self.0))
    }

    /// Returns `None` if the value needs more than 64 bits.
    pub fn to_u64(&self) -> Option<u64> {
        (self.0.len() <= 8).then(|| {
            self.0
                .iter()
                .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
        })
    }

    /// The value as a 32-byte word, `None` if it needs more than 256 bits.
    pub fn to_word(&self) -> Option<H256> {
        (self.0.len() <= 32).then(|| {
            let mut word = H256::zero();
            word.as_bytes_mut()[32 - self.0.len()..].copy_from_slice(&self.0);
            word
        })
    }
}

impl From<u64> for Quantity {
    fn from(v: u64) -> Self {
        Self::from_be_bytes(&v.to_be_bytes())
    }
}

impl From<U256> for Quantity {
    fn from(v: U256) -> Self {
        let mut bytes = [0; 32];
        v.to_big_endian(&mut bytes);
        Self::from_be_bytes(&bytes)
    }
}

impl Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = hex::encode(&self.0);
        match digits.trim_start_matches('0') {
            "" => write!(f, "0x0"),
            trimmed => write!(f, "0x{}", trimmed),
        }
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode_hex_digits(&s)
            .map(|bytes| Self::from_be_bytes(&bytes))
            .map_err(D::Error::custom)
    }
}

/// Decodes hex with an optional `0x` prefix and any number of digits.
fn decode_hex_digits(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.len() % 2 == 1 {
        hex::decode(format!("0{digits}"))
    } else {
        hex::decode(digits)
    }
}

/// Deserializes a word that may be sent as an unpadded quantity, such as
/// storage keys in `eth_getProof` responses.
fn deserialize_padded_word<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<H256, D::Error> {
    let s = String::deserialize(deserializer)?;
    let bytes = decode_hex_digits(&s).map_err(D::Error::custom)?;
    Quantity::from_be_bytes(&bytes)
        .to_word()
        .ok_or_else(|| D::Error::custom(format!("{s} is wider than 32 bytes")))
}

/// The proof of one storage slot.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StorageProof {
    /// The slot, left-padded to 32 bytes.
    #[serde(deserialize_with = "deserialize_padded_word")]
    pub key: H256,
    pub value: Quantity,
    pub proof: Vec<HexBytes>,
}

impl StorageProof {
    pub fn value_word(&self) -> Option<H256> {
        self.value.to_word()
    }
}

/// An account together with its proof and the proofs of some of its slots.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProof {
    pub address: Address,
    pub account_proof: Vec<HexBytes>,
    pub balance: Quantity,
    pub code_hash: H256,
    pub nonce: Quantity,
    pub storage_hash: H256,
    #[serde(default)]
    pub storage_proof: Vec<StorageProof>,
}

impl AccountProof {
    /// The account fields claimed by the response.
    pub fn account(&self) -> StateResult<Account> {
        let overflow = |field| StateError::IntegerOverflow {
            address: self.address,
            field,
        };

        Ok(Account {
            nonce: self.nonce.to_u64().ok_or_else(|| overflow("nonce"))?,
            balance: self.balance.to_u256().ok_or_else(|| overflow("balance"))?,
            storage_root: self.storage_hash,
            code_hash: self.code_hash,
        })
    }

    /// The slots this response carries proofs for.
    pub fn slots(&self) -> Vec<H256> {
        self.storage_proof.iter().map(|p| p.key).collect()
    }
}
