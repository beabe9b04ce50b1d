//! Node sets built from whole-state proofs.
//!
//! A snapshot for one block is the union of the pre-state proofs of every
//! account and slot the block touches, plus the orphan nodes the post-state
//! proofs reveal. Everything here works on [`AccountProof`]s as returned by
//! `eth_getProof`.

use std::collections::HashMap;

use ethereum_types::{Address, H256};
use tracing::debug;
use witness_common::is_empty_root;
use witness_trie::{
    node_set::{MergedNodeSet, NodeSet, TrieOwner},
    store::ProofNodes,
};

use crate::{proof_types::AccountProof, StateResult};

/// Builds the node set proving every account and slot of `proofs` against
/// `state_root`.
pub fn node_set_from_state_proofs(
    state_root: H256,
    proofs: &[AccountProof],
) -> StateResult<MergedNodeSet> {
    let account_set = account_node_set(state_root, proofs)?;
    let storage_sets = storage_node_sets(proofs)?;

    merge_sets(account_set, storage_sets.into_values())
}

/// Builds the node set for re-executing a block that moves the state from
/// `pre_root` to `post_root`.
///
/// The pre-state proofs give the nodes the block reads. The post-state
/// proofs, which must cover the same accounts and slots, give the orphan
/// nodes needed to delete accounts and slots from the partial tries.
pub fn node_set_from_state_transition_proofs(
    pre_root: H256,
    post_root: H256,
    pre: &[AccountProof],
    post: &[AccountProof],
) -> StateResult<MergedNodeSet> {
    let mut account_set = account_node_set(pre_root, pre)?;
    let mut storage_sets = storage_node_sets(pre)?;

    let post_db = account_proof_db(post);
    let post_addresses: Vec<_> = post.iter().map(|p| p.address).collect();
    let orphans = account_set.add_account_orphan_nodes(post_root, &post_db, &post_addresses)?;
    debug!("{} account orphan candidates for {:x}", orphans, post_root);

    for proof in post {
        let Some(set) = storage_sets.get_mut(&proof.address) else {
            continue;
        };

        let post_db: ProofNodes = proof.storage_proof.iter().flat_map(|p| &p.proof).collect();
        set.add_storage_orphan_nodes(proof.storage_hash, &post_db, &proof.slots())?;
    }

    merge_sets(account_set, storage_sets.into_values())
}

fn account_proof_db(proofs: &[AccountProof]) -> ProofNodes {
    proofs.iter().flat_map(|p| &p.account_proof).collect()
}

fn account_node_set(state_root: H256, proofs: &[AccountProof]) -> StateResult<NodeSet> {
    let db = account_proof_db(proofs);
    let addresses: Vec<_> = proofs.iter().map(|p| p.address).collect();

    let mut set = NodeSet::new(TrieOwner::Account);
    set.add_account_nodes(state_root, &db, &addresses)?;
    Ok(set)
}

/// One set per account with a non-empty storage trie. Several proofs of one
/// account all land in its set.
fn storage_node_sets(proofs: &[AccountProof]) -> StateResult<HashMap<Address, NodeSet>> {
    let mut sets = HashMap::new();
    for proof in proofs.iter().filter(|p| !is_empty_root(p.storage_hash)) {
        let db: ProofNodes = proof.storage_proof.iter().flat_map(|p| &p.proof).collect();

        sets.entry(proof.address)
            .or_insert_with(|| NodeSet::new(TrieOwner::storage(proof.address)))
            .add_storage_nodes(proof.storage_hash, &db, &proof.slots())?;
    }

    Ok(sets)
}

fn merge_sets(
    account_set: NodeSet,
    storage_sets: impl IntoIterator<Item = NodeSet>,
) -> StateResult<MergedNodeSet> {
    let mut merged = MergedNodeSet::new();
    merged.merge(account_set)?;
    for set in storage_sets {
        merged.merge(set)?;
    }

    Ok(merged)
}
