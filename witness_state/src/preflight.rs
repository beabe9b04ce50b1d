//! Preparing the state snapshot of one block.
//!
//! A preflight execution against a [`RemoteReader`](crate::reader::RemoteReader)
//! wrapped in a [`RecordingReader`] yields the [`AccessList`] of the block.
//! [`prepare`] then proves every entry of that list before and after the
//! block, and [`PreparedSnapshot::write_nodes`] turns the proofs into trie
//! nodes in a node store.

use std::{
    collections::{btree_map::Entry, BTreeMap, BTreeSet},
    sync::Arc,
};

use anyhow::{ensure, Context as _};
use ethereum_types::{Address, H256};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};
use witness_trie::{node_set::MergedNodeSet, store::NodeStore};

use crate::{
    account::Account,
    proof_types::AccountProof,
    reader::StateReader,
    remote::{BlockHeader, RemoteNode},
    state_proofs::node_set_from_state_transition_proofs,
    StateResult,
};

/// The accounts a block touches, each with the storage slots it touches.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AccessList(BTreeMap<Address, BTreeSet<H256>>);

impl AccessList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the account was not in the list yet.
    pub fn insert_account(&mut self, address: Address) -> bool {
        match self.0.entry(address) {
            Entry::Vacant(e) => {
                e.insert(BTreeSet::new());
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Also records the account. Returns `true` if the slot was not in the
    /// list yet.
    pub fn insert_slot(&mut self, address: Address, slot: H256) -> bool {
        self.0.entry(address).or_default().insert(slot)
    }

    pub fn contains_account(&self, address: &Address) -> bool {
        self.0.contains_key(address)
    }

    pub fn slots(&self, address: &Address) -> impl Iterator<Item = &H256> {
        self.0.get(address).into_iter().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &BTreeSet<H256>)> {
        self.0.iter()
    }

    /// Number of accounts.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn slot_count(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    /// Adds everything in `other`.
    pub fn extend(&mut self, other: &AccessList) {
        for (address, slots) in other.iter() {
            self.0
                .entry(*address)
                .or_default()
                .extend(slots.iter().copied());
        }
    }
}

impl FromIterator<(Address, Vec<H256>)> for AccessList {
    fn from_iter<I: IntoIterator<Item = (Address, Vec<H256>)>>(iter: I) -> Self {
        let mut list = Self::new();
        for (address, slots) in iter {
            list.insert_account(address);
            for slot in slots {
                list.insert_slot(address, slot);
            }
        }
        list
    }
}

/// A [`StateReader`] that records every account and slot read through it.
///
/// Copies share the recording, so the access list of a whole execution ends
/// up in one place.
#[derive(Debug)]
pub struct RecordingReader {
    inner: Box<dyn StateReader>,
    accessed: Arc<Mutex<AccessList>>,
}

impl RecordingReader {
    pub fn new(inner: Box<dyn StateReader>) -> Self {
        Self {
            inner,
            accessed: Arc::default(),
        }
    }

    pub fn access_list(&self) -> AccessList {
        self.accessed.lock().clone()
    }
}

impl StateReader for RecordingReader {
    fn account(&self, address: Address) -> StateResult<Option<Account>> {
        self.accessed.lock().insert_account(address);
        self.inner.account(address)
    }

    fn storage(&mut self, address: Address, slot: H256) -> StateResult<H256> {
        self.accessed.lock().insert_slot(address, slot);
        self.inner.storage(address, slot)
    }

    fn copy(&self) -> Box<dyn StateReader> {
        Box::new(Self {
            inner: self.inner.copy(),
            accessed: self.accessed.clone(),
        })
    }
}

/// Everything fetched to re-execute one block offline.
///
/// The raw proofs are kept so the snapshot can be audited, and rebuilt into
/// trie nodes, without going back to the node.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedSnapshot {
    pub chain_id: u64,
    pub block: BlockHeader,
    pub parent: BlockHeader,
    /// Proofs against the state before the block, the parent's state root.
    pub pre_proofs: Vec<AccountProof>,
    /// Proofs against the state after the block.
    pub post_proofs: Vec<AccountProof>,
}

impl PreparedSnapshot {
    pub fn pre_state_root(&self) -> H256 {
        self.parent.state_root
    }

    pub fn post_state_root(&self) -> H256 {
        self.block.state_root
    }

    /// Verifies every proof and collects the pre-state nodes along with the
    /// orphan nodes of the transition.
    pub fn node_set(&self) -> StateResult<MergedNodeSet> {
        node_set_from_state_transition_proofs(
            self.pre_state_root(),
            self.post_state_root(),
            &self.pre_proofs,
            &self.post_proofs,
        )
    }

    /// Writes the snapshot's nodes into `store` in one batch and returns how
    /// many distinct nodes were written. Nothing is written if any proof
    /// fails to verify.
    pub fn write_nodes<S: NodeStore + ?Sized>(&self, store: &mut S) -> anyhow::Result<usize> {
        let _span = info_span!("write_nodes", block = self.block.number).entered();

        let set = self
            .node_set()
            .with_context(|| format!("building the node set of block {}", self.block.number))?;
        let written = set
            .flush(store)
            .context("flushing the snapshot node set")?;

        info!("Wrote {} trie nodes", written);
        Ok(written)
    }
}

/// Fetches headers and proofs for re-executing `block` with the given access
/// list.
///
/// Pre-state proofs are taken at the parent block and post-state proofs at
/// `block`. Any failure aborts the whole preparation.
pub fn prepare(
    remote: &dyn RemoteNode,
    block: u64,
    access_list: &AccessList,
) -> anyhow::Result<PreparedSnapshot> {
    let _span = info_span!("prepare", block).entered();
    ensure!(block > 0, "the genesis block has no parent state to prove");

    let chain_id = remote.chain_id().context("fetching the chain id")?;
    let header = fetch_header(remote, block)?;
    let parent = fetch_header(remote, block - 1)?;
    ensure!(
        header.parent_hash == parent.hash,
        "block {} does not build on block {} ({:x} != {:x})",
        block,
        parent.number,
        header.parent_hash,
        parent.hash
    );

    info!(
        "Proving {} accounts and {} slots for block {}",
        access_list.len(),
        access_list.slot_count(),
        block
    );
    let pre_proofs = fetch_proofs(remote, access_list, parent.number)?;
    let post_proofs = fetch_proofs(remote, access_list, header.number)?;

    Ok(PreparedSnapshot {
        chain_id,
        block: header,
        parent,
        pre_proofs,
        post_proofs,
    })
}

fn fetch_header(remote: &dyn RemoteNode, number: u64) -> anyhow::Result<BlockHeader> {
    remote
        .block_by_number(number)
        .with_context(|| format!("fetching header {number}"))?
        .with_context(|| format!("block {number} does not exist"))
}

fn fetch_proofs(
    remote: &dyn RemoteNode,
    access_list: &AccessList,
    block: u64,
) -> anyhow::Result<Vec<AccountProof>> {
    access_list
        .iter()
        .map(|(address, slots)| {
            let slots: Vec<_> = slots.iter().copied().collect();
            debug!(
                "Fetching proof of {:x} with {} slots at block {}",
                address,
                slots.len(),
                block
            );
            remote
                .get_proof(*address, &slots, block)
                .with_context(|| format!("fetching the proof of {address:x} at block {block}"))
        })
        .collect()
}
