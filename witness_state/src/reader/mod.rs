//! Readers over the world state at one fixed root.
//!
//! Execution only ever needs accounts and storage words, so every source of
//! state sits behind [`StateReader`]:
//! - [`TrieReader`] reads proof-derived partial tries from a node store.
//! - [`SnapshotReader`] reads a flat key-value snapshot.
//! - [`RemoteReader`] asks a remote node.
//! - [`MultiReader`] tries several of the above in order.

use std::fmt::Debug;

use ethereum_types::{Address, H256};

use crate::{account::Account, StateResult};

pub mod multi;
pub mod remote;
pub mod snapshot;
pub mod trie;

pub use multi::MultiReader;
pub use remote::RemoteReader;
pub use snapshot::{MemorySnapshot, Snapshot, SnapshotReader};
pub use trie::TrieReader;

/// Read access to the state at one root.
pub trait StateReader: Debug {
    /// The account at `address`, `None` if it does not exist.
    fn account(&self, address: Address) -> StateResult<Option<Account>>;

    /// The value of a storage slot, zero if the slot or the account does not
    /// exist.
    fn storage(&mut self, address: Address, slot: H256) -> StateResult<H256>;

    /// An independent reader over the same state.
    fn copy(&self) -> Box<dyn StateReader>;
}
