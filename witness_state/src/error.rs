use ethereum_types::{Address, H256};
use thiserror::Error;
use witness_trie::{
    builder::BuildError,
    node_set::{NodeSetError, TrieOwner},
    store::StoreError,
    trie_ops::TrieOpError,
};

use crate::reader::snapshot::SnapshotError;

pub type StateResult<T> = Result<T, StateError>;

/// Errors raised while reading or preparing world state.
///
/// An account or slot that does not exist is never an error: readers answer
/// `None` or the zero word for those.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state root {0:x} is not mapped to any marked block")]
    BlockNotMapped(H256),

    #[error("no block has been marked yet")]
    NoBlockMarked,

    #[error("remote node request failed: {0:#}")]
    RemoteUnavailable(#[source] anyhow::Error),

    #[error("{field} of account {address:x} does not fit in its type")]
    IntegerOverflow {
        address: Address,
        field: &'static str,
    },

    #[error("the {owner} needs trie node {hash:x}, which is not available locally")]
    MissingTrieNode { owner: TrieOwner, hash: H256 },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("failed to decode a state value: {0}")]
    Decode(#[from] rlp::DecoderError),

    #[error("code of {address:x} hashes to {actual:x}, expected {expected:x}")]
    CodeHashMismatch {
        address: Address,
        expected: H256,
        actual: H256,
    },

    #[error("every state reader failed: {}", join_errors(.0))]
    AllReadersFailed(Vec<StateError>),

    #[error(transparent)]
    NodeSet(#[from] NodeSetError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Trie(TrieOpError),
}

impl StateError {
    /// Converts a partial-trie failure of `owner`'s trie, turning an access
    /// to a hashed-out node into [`StateError::MissingTrieNode`].
    pub fn from_trie_op(owner: TrieOwner, err: TrieOpError) -> Self {
        match err {
            TrieOpError::HashNodeGetError(hash)
            | TrieOpError::HashNodeInsertError(hash)
            | TrieOpError::HashNodeDeleteError(hash) => Self::MissingTrieNode { owner, hash },
            err => Self::Trie(err),
        }
    }
}

fn join_errors(errors: &[StateError]) -> String {
    errors
        .iter()
        .enumerate()
        .map(|(i, e)| format!("[{i}] {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}
