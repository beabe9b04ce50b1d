//! The account record stored in the world-state trie.

use ethereum_types::{H256, U256};
use keccak_hash::keccak;
use rlp_derive::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};
use witness_common::{is_empty_root, EMPTY_CODE_HASH, EMPTY_TRIE_HASH};

/// An account as RLP-encoded in the leaves of the world-state trie.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, RlpDecodable, RlpEncodable, Serialize,
)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: H256,
    pub code_hash: H256,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::zero(),
            storage_root: EMPTY_TRIE_HASH,
            code_hash: EMPTY_CODE_HASH,
        }
    }
}

impl Account {
    /// Creates an account without code or storage.
    pub fn new(nonce: u64, balance: U256) -> Self {
        Self {
            nonce,
            balance,
            ..Default::default()
        }
    }

    /// Sets the code hash from the code itself.
    pub fn with_code(self, code: &[u8]) -> Self {
        Self {
            code_hash: keccak(code),
            ..self
        }
    }

    pub fn with_storage_root(self, storage_root: H256) -> Self {
        Self {
            storage_root,
            ..self
        }
    }

    /// An account is empty when it has no nonce, no balance, no code and no
    /// storage. Remote nodes answer with such a record for accounts that do
    /// not exist, using either the zero hash or the proper empty hashes.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0
            && self.balance.is_zero()
            && (self.code_hash.is_zero() || self.code_hash == EMPTY_CODE_HASH)
            && is_empty_root(self.storage_root)
    }

    pub fn rlp_bytes(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    pub fn from_rlp(bytes: &[u8]) -> Result<Self, rlp::DecoderError> {
        rlp::decode(bytes)
    }
}

/// Encodes a storage word the way storage tries hold it: the RLP of the
/// value with leading zeroes removed.
pub fn encode_storage_value(value: H256) -> Vec<u8> {
    rlp::encode(&U256::from_big_endian(value.as_bytes())).to_vec()
}

/// Decodes a storage trie value back into a full word.
pub fn decode_storage_value(bytes: &[u8]) -> Result<H256, rlp::DecoderError> {
    let value: U256 = rlp::decode(bytes)?;
    let mut word = H256::zero();
    value.to_big_endian(word.as_bytes_mut());
    Ok(word)
}

#[cfg(test)]
mod tests {
    use ethereum_types::{H256, U256};
    use witness_common::{eth_to_wei, EMPTY_CODE_HASH, EMPTY_TRIE_HASH};

    use super::{decode_storage_value, encode_storage_value, Account};

    #[test]
    fn default_account_is_empty_and_uses_the_empty_hashes() {
        let account = Account::default();

        assert!(account.is_empty());
        assert_eq!(account.storage_root, EMPTY_TRIE_HASH);
        assert_eq!(account.code_hash, EMPTY_CODE_HASH);
    }

    #[test]
    fn zero_hashes_also_count_as_empty() {
        let account = Account {
            code_hash: H256::zero(),
            storage_root: H256::zero(),
            ..Default::default()
        };
        assert!(account.is_empty());

        assert!(!Account::new(1, U256::zero()).is_empty());
        assert!(!Account::default().with_code(&[0x60, 0x00]).is_empty());
    }

    #[test]
    fn account_rlp_is_a_four_item_list() {
        let account = Account::new(1, eth_to_wei(U256::one()));
        let bytes = account.rlp_bytes();

        let rlp = rlp::Rlp::new(&bytes);
        assert_eq!(rlp.item_count().unwrap(), 4);
        assert_eq!(rlp.val_at::<u64>(0).unwrap(), 1);
        assert_eq!(Account::from_rlp(&bytes).unwrap(), account);
    }

    #[test]
    fn storage_values_drop_leading_zeroes() {
        let ten = H256::from_low_u64_be(10);

        assert_eq!(encode_storage_value(ten), vec![0x0a]);
        assert_eq!(decode_storage_value(&[0x0a]).unwrap(), ten);
        assert_eq!(encode_storage_value(H256::zero()), vec![0x80]);
    }
}
