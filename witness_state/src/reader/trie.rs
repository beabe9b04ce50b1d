use std::{collections::HashMap, fmt::Debug, sync::Arc};

use ethereum_types::{Address, H256};
use tracing::trace;
use witness_common::{hashed_address, hashed_slot, is_empty_root};
use witness_trie::{
    builder::PartialTrieBuilder,
    node_set::TrieOwner,
    partial_trie::{HashedPartialTrie, PartialTrie},
    store::NodeSource,
};

use super::StateReader;
use crate::{
    account::{decode_storage_value, Account},
    StateError, StateResult,
};

/// Reads the partial tries held by a node store.
///
/// The account trie is rebuilt when the reader is created. Storage tries are
/// rebuilt the first time one of their slots is read and cached per address.
#[derive(Debug)]
pub struct TrieReader<S> {
    nodes: Arc<S>,
    root: H256,
    accounts: HashedPartialTrie,
    storage_tries: HashMap<Address, HashedPartialTrie>,
}

impl<S: NodeSource> TrieReader<S> {
    pub fn new(nodes: Arc<S>, root: H256) -> StateResult<Self> {
        let accounts = PartialTrieBuilder::new(root, &*nodes).build()?;

        Ok(Self {
            nodes,
            root,
            accounts,
            storage_tries: HashMap::new(),
        })
    }

    pub fn root(&self) -> H256 {
        self.root
    }

    fn storage_trie(
        &mut self,
        address: Address,
        storage_root: H256,
    ) -> StateResult<&HashedPartialTrie> {
        if !self.storage_tries.contains_key(&address) {
            trace!("Rebuilding storage trie {:x} of {:x}", storage_root, address);
            let trie = PartialTrieBuilder::new(storage_root, &*self.nodes).build()?;
            self.storage_tries.insert(address, trie);
        }

        Ok(&self.storage_tries[&address])
    }
}

impl<S: NodeSource + Debug + 'static> StateReader for TrieReader<S> {
    fn account(&self, address: Address) -> StateResult<Option<Account>> {
        self.accounts
            .get_proven(hashed_address(address))
            .map_err(|e| StateError::from_trie_op(TrieOwner::Account, e))?
            .map(Account::from_rlp)
            .transpose()
            .map_err(StateError::from)
    }

    fn storage(&mut self, address: Address, slot: H256) -> StateResult<H256> {
        let Some(account) = self.account(address)? else {
            return Ok(H256::zero());
        };
        if is_empty_root(account.storage_root) {
            return Ok(H256::zero());
        }

        let trie = self.storage_trie(address, account.storage_root)?;
        match trie
            .get_proven(hashed_slot(slot))
            .map_err(|e| StateError::from_trie_op(TrieOwner::storage(address), e))?
        {
            Some(bytes) => Ok(decode_storage_value(bytes)?),
            None => Ok(H256::zero()),
        }
    }

    fn copy(&self) -> Box<dyn StateReader> {
        Box::new(self.clone())
    }
}

/// Clones share the node store but not the storage tries rebuilt so far.
impl<S> Clone for TrieReader<S> {
    fn clone(&self) -> Self {
        Self {
            nodes: Arc::clone(&self.nodes),
            root: self.root,
            accounts: self.accounts.clone(),
            storage_tries: self.storage_tries.clone(),
        }
    }
}
