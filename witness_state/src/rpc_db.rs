//! The state database used while a block is executed against a live node.
//!
//! Reads go to the remote node at the block a state root was marked for.
//! Tries are opened from the local node store when it has them, and fall back
//! to a [`NoopTrie`] otherwise, since the preflight pass only needs their
//! reads from the remote side.

use std::{collections::HashMap, fmt::Debug, sync::Arc};

use ethereum_types::{Address, H256};
use keccak_hash::keccak;
use tracing::{debug, info, warn};
use witness_common::{hashed_address, hashed_slot, EMPTY_CODE_HASH};
use witness_trie::{
    builder::PartialTrieBuilder,
    node_set::TrieOwner,
    partial_trie::{HashedPartialTrie, PartialTrie},
    store::NodeSource,
    trie_ops::TrieOpError,
};

use crate::{
    account::{decode_storage_value, encode_storage_value, Account},
    reader::RemoteReader,
    remote::{BlockHeader, RemoteNode},
    StateError, StateResult,
};

/// A mutable state trie, either the world-state trie or the storage trie of
/// one account.
pub trait StateTrie: Debug {
    fn get_account(&self, address: Address) -> StateResult<Option<Account>>;

    fn update_account(&mut self, address: Address, account: &Account) -> StateResult<()>;

    fn delete_account(&mut self, address: Address) -> StateResult<()>;

    fn get_storage(&self, slot: H256) -> StateResult<H256>;

    /// Writing the zero word deletes the slot.
    fn update_storage(&mut self, slot: H256, value: H256) -> StateResult<()>;

    fn hash(&self) -> H256;
}

/// A [`StateTrie`] over a partial trie rebuilt from the local node store.
#[derive(Clone, Debug)]
pub struct LocalTrie {
    owner: TrieOwner,
    trie: HashedPartialTrie,
}

impl LocalTrie {
    pub fn open<S: NodeSource + ?Sized>(
        owner: TrieOwner,
        root: H256,
        nodes: &S,
    ) -> StateResult<Self> {
        Ok(Self {
            owner,
            trie: PartialTrieBuilder::new(root, nodes).build()?,
        })
    }

    pub fn owner(&self) -> TrieOwner {
        self.owner
    }

    fn fail(&self) -> impl Fn(TrieOpError) -> StateError {
        let owner = self.owner;
        move |e| StateError::from_trie_op(owner, e)
    }
}

impl StateTrie for LocalTrie {
    fn get_account(&self, address: Address) -> StateResult<Option<Account>> {
        match self
            .trie
            .get_proven(hashed_address(address))
            .map_err(self.fail())?
        {
            Some(bytes) => Ok(Some(Account::from_rlp(bytes)?)),
            None => Ok(None),
        }
    }

    fn update_account(&mut self, address: Address, account: &Account) -> StateResult<()> {
        let fail = self.fail();
        self.trie
            .insert(hashed_address(address), account.rlp_bytes())
            .map_err(fail)
    }

    fn delete_account(&mut self, address: Address) -> StateResult<()> {
        let fail = self.fail();
        self.trie
            .delete(hashed_address(address))
            .map(drop)
            .map_err(fail)
    }

    fn get_storage(&self, slot: H256) -> StateResult<H256> {
        match self
            .trie
            .get_proven(hashed_slot(slot))
            .map_err(self.fail())?
        {
            Some(bytes) => Ok(decode_storage_value(bytes)?),
            None => Ok(H256::zero()),
        }
    }

    fn update_storage(&mut self, slot: H256, value: H256) -> StateResult<()> {
        let fail = self.fail();
        if value.is_zero() {
            self.trie.delete(hashed_slot(slot)).map(drop).map_err(fail)
        } else {
            self.trie
                .insert(hashed_slot(slot), encode_storage_value(value))
                .map_err(fail)
        }
    }

    fn hash(&self) -> H256 {
        self.trie.hash()
    }
}

/// A [`StateTrie`] that reads as empty and discards writes.
#[derive(Clone, Copy, Debug)]
pub struct NoopTrie {
    root: H256,
}

impl NoopTrie {
    pub fn new(root: H256) -> Self {
        Self { root }
    }
}

impl StateTrie for NoopTrie {
    fn get_account(&self, _address: Address) -> StateResult<Option<Account>> {
        Ok(None)
    }

    fn update_account(&mut self, _address: Address, _account: &Account) -> StateResult<()> {
        Ok(())
    }

    fn delete_account(&mut self, _address: Address) -> StateResult<()> {
        Ok(())
    }

    fn get_storage(&self, _slot: H256) -> StateResult<H256> {
        Ok(H256::zero())
    }

    fn update_storage(&mut self, _slot: H256, _value: H256) -> StateResult<()> {
        Ok(())
    }

    /// The root the trie was opened at, since nothing is ever written.
    fn hash(&self) -> H256 {
        self.root
    }
}

/// State database backed by a remote node and a local node store.
pub struct RpcDatabase<S> {
    remote: Arc<dyn RemoteNode>,
    nodes: Arc<S>,
    blocks: HashMap<H256, u64>,
    current: Option<BlockHeader>,
}

impl<S: Debug> Debug for RpcDatabase<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcDatabase")
            .field("nodes", &self.nodes)
            .field("blocks", &self.blocks)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl<S: NodeSource> RpcDatabase<S> {
    pub fn new(remote: Arc<dyn RemoteNode>, nodes: Arc<S>) -> Self {
        Self {
            remote,
            nodes,
            blocks: HashMap::new(),
            current: None,
        }
    }

    /// Maps the header's state root to its number and makes it the block code
    /// is read at.
    pub fn mark_block(&mut self, header: &BlockHeader) {
        info!(
            "Marking block {} with state root {:x}",
            header.number, header.state_root
        );
        self.blocks.insert(header.state_root, header.number);
        self.current = Some(header.clone());
    }

    pub fn current_block(&self) -> Option<&BlockHeader> {
        self.current.as_ref()
    }

    /// A reader over the state with the given root, which must belong to a
    /// marked block.
    pub fn reader(&self, root: H256) -> StateResult<RemoteReader> {
        let block = *self
            .blocks
            .get(&root)
            .ok_or(StateError::BlockNotMapped(root))?;

        Ok(RemoteReader::new(self.remote.clone(), block, root))
    }

    pub fn open_trie(&self, root: H256) -> Box<dyn StateTrie> {
        self.open_local(TrieOwner::Account, root)
    }

    /// The state root only identifies the state the storage trie belongs to.
    pub fn open_storage_trie(
        &self,
        state_root: H256,
        address: Address,
        root: H256,
    ) -> Box<dyn StateTrie> {
        debug!(
            "Opening storage trie {:x} of {:x} in state {:x}",
            root, address, state_root
        );
        self.open_local(TrieOwner::storage(address), root)
    }

    fn open_local(&self, owner: TrieOwner, root: H256) -> Box<dyn StateTrie> {
        match LocalTrie::open(owner, root, &*self.nodes) {
            Ok(trie) => Box::new(trie),
            Err(e) => {
                warn!("Using a no-op {} at {:x}: {}", owner, root, e);
                Box::new(NoopTrie::new(root))
            }
        }
    }

    /// The code of `address` at the current block, checked against
    /// `code_hash`.
    pub fn contract_code(&self, address: Address, code_hash: H256) -> StateResult<Vec<u8>> {
        let block = self.current.as_ref().ok_or(StateError::NoBlockMarked)?;
        let code = self
            .remote
            .code_at(address, block.number)
            .map_err(StateError::RemoteUnavailable)?;

        let actual = keccak(&code);
        let expected = if code_hash.is_zero() {
            EMPTY_CODE_HASH
        } else {
            code_hash
        };
        if actual != expected {
            return Err(StateError::CodeHashMismatch {
                address,
                expected,
                actual,
            });
        }

        Ok(code)
    }

    pub fn contract_code_size(&self, address: Address, code_hash: H256) -> StateResult<usize> {
        self.contract_code(address, code_hash).map(|code| code.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ethereum_types::{Address, H256, U256};
    use keccak_hash::keccak;
    use mockall::predicate::eq;
    use witness_common::EMPTY_TRIE_HASH;
    use witness_trie::{node_set::TrieOwner, store::MemoryNodeStore};

    use super::{LocalTrie, RpcDatabase, StateTrie};
    use crate::{
        account::Account,
        reader::StateReader,
        remote::{BlockHeader, MockRemoteNode},
        StateError,
    };

    fn header(number: u64, state_root: H256) -> BlockHeader {
        BlockHeader {
            number,
            hash: H256::from_low_u64_be(number),
            parent_hash: H256::from_low_u64_be(number.saturating_sub(1)),
            state_root,
        }
    }

    fn db(remote: MockRemoteNode) -> RpcDatabase<MemoryNodeStore> {
        RpcDatabase::new(Arc::new(remote), Arc::new(MemoryNodeStore::new()))
    }

    #[test]
    fn readers_need_a_marked_root() {
        let mut db = db(MockRemoteNode::new());
        let root = H256::repeat_byte(9);

        assert!(matches!(
            db.reader(root),
            Err(StateError::BlockNotMapped(r)) if r == root
        ));

        db.mark_block(&header(12, root));
        let reader = db.reader(root).unwrap();
        assert_eq!(reader.block(), 12);
        assert_eq!(db.current_block().map(|h| h.number), Some(12));
    }

    #[test]
    fn unknown_tries_fall_back_to_noop() {
        let db = db(MockRemoteNode::new());
        let root = H256::repeat_byte(3);

        let mut trie = db.open_trie(root);
        trie.update_account(Address::zero(), &Account::new(1, U256::one()))
            .unwrap();

        assert_eq!(trie.get_account(Address::zero()).unwrap(), None);
        assert_eq!(trie.hash(), root);
    }

    #[test]
    fn empty_storage_tries_open_locally() {
        let db = db(MockRemoteNode::new());
        let mut trie = db.open_storage_trie(H256::zero(), Address::zero(), EMPTY_TRIE_HASH);

        trie.update_storage(H256::zero(), H256::from_low_u64_be(10))
            .unwrap();
        assert_eq!(
            trie.get_storage(H256::zero()).unwrap(),
            H256::from_low_u64_be(10)
        );

        trie.update_storage(H256::zero(), H256::zero()).unwrap();
        assert_eq!(trie.hash(), EMPTY_TRIE_HASH);
    }

    #[test]
    fn local_tries_report_their_owner() {
        let owner = TrieOwner::storage(Address::zero());
        let trie = LocalTrie::open(owner, EMPTY_TRIE_HASH, &MemoryNodeStore::new()).unwrap();

        assert_eq!(trie.owner(), owner);
    }

    #[test]
    fn contract_code_is_checked_against_its_hash() {
        let code = vec![0x60, 0x01, 0x60, 0x00, 0x55];
        let address = Address::repeat_byte(0xc0);
        let mut remote = MockRemoteNode::new();
        let returned = code.clone();
        remote
            .expect_code_at()
            .with(eq(address), eq(5))
            .returning(move |_, _| Ok(returned.clone()));

        let mut db = db(remote);
        assert!(matches!(
            db.contract_code(address, keccak(&code)),
            Err(StateError::NoBlockMarked)
        ));

        db.mark_block(&header(5, H256::repeat_byte(1)));
        assert_eq!(db.contract_code(address, keccak(&code)).unwrap(), code);
        assert_eq!(db.contract_code_size(address, keccak(&code)).unwrap(), 5);
        assert!(matches!(
            db.contract_code(address, H256::repeat_byte(2)),
            Err(StateError::CodeHashMismatch { .. })
        ));
    }

    #[test]
    fn remote_reads_go_through_the_marked_block() {
        let mut remote = MockRemoteNode::new();
        remote
            .expect_storage_at()
            .with(eq(Address::zero()), eq(H256::zero()), eq(8))
            .returning(|_, _, _| Ok(H256::from_low_u64_be(1)));

        let mut db = db(remote);
        let root = H256::repeat_byte(8);
        db.mark_block(&header(8, root));

        let mut reader = db.reader(root).unwrap();
        assert_eq!(
            reader.storage(Address::zero(), H256::zero()).unwrap(),
            H256::from_low_u64_be(1)
        );
    }
}
