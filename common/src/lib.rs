//! Constants and helpers shared by the witness crates.

use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;

/// The hash value of an account empty EVM code.
/// 0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470
pub const EMPTY_CODE_HASH: H256 = H256([
    197, 210, 70, 1, 134, 247, 35, 60, 146, 126, 125, 178, 220, 199, 3, 192, 229, 0, 182, 83, 202,
    130, 39, 59, 123, 250, 216, 4, 93, 133, 164, 112,
]);

/// The hash of an empty Merkle Patricia trie.
/// 0x56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421
pub const EMPTY_TRIE_HASH: H256 = H256([
    86, 232, 31, 23, 27, 204, 85, 166, 255, 131, 69, 230, 146, 192, 248, 110, 91, 72, 224, 27, 153,
    108, 173, 192, 1, 98, 47, 181, 227, 99, 180, 33,
]);

/// Returns `true` for both spellings of "no trie": the zero hash some nodes
/// report for missing accounts, and the hash of the empty trie.
pub fn is_empty_root(root: H256) -> bool {
    root.is_zero() || root == EMPTY_TRIE_HASH
}

/// Trie key of an account in the world-state trie.
pub fn hashed_address(address: Address) -> H256 {
    keccak(address)
}

/// Trie key of a storage slot in an account's storage trie.
pub fn hashed_slot(slot: H256) -> H256 {
    keccak(slot)
}

/// Converts an amount in `ETH` to `wei` units.
pub fn eth_to_wei(eth: U256) -> U256 {
    // 1 ether = 10^18 wei.
    eth * U256::from(10).pow(18.into())
}

#[test]
fn test_eth_conversion() {
    assert_eq!(eth_to_wei(U256::zero()), U256::zero());
    assert_eq!(
        eth_to_wei(U256::one()),
        U256::from_dec_str("1000000000000000000").unwrap()
    );
}

#[test]
fn test_empty_code_hash() {
    assert_eq!(EMPTY_CODE_HASH, keccak([]));
}

#[test]
fn test_empty_trie_hash() {
    assert_eq!(
        EMPTY_TRIE_HASH,
        keccak(bytes::Bytes::from_static(&rlp::NULL_RLP))
    );
}

#[test]
fn test_empty_root_spellings() {
    assert!(is_empty_root(H256::zero()));
    assert!(is_empty_root(EMPTY_TRIE_HASH));
    assert!(!is_empty_root(EMPTY_CODE_HASH));
}
