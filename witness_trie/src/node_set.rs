//! Sets of proven trie nodes, staged per trie before they are written to a
//! [`NodeStore`].
//!
//! A [`NodeSet`] only ever receives nodes that were checked against a root by
//! [`verify_proof`], plus orphan candidates derived from such nodes. Nodes are
//! tracked by their path inside the trie, which is what catches two proofs
//! disagreeing about the same trie.

use std::{
    collections::{btree_map::Entry, BTreeMap, HashMap},
    fmt::{self, Display},
};

use ethereum_types::{Address, H256};
use keccak_hash::keccak;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use witness_common::{hashed_address, hashed_slot};

use crate::{
    nibbles::Nibbles,
    orphan::reduce_short_node,
    partial_trie::{HashedPartialTrie, Node},
    proof::{verify_proof, ProofError, ProofVisitor},
    store::{NodeBatch, NodeSource, NodeStore, StoreError},
    trie_hashing::encode_node,
};

/// The trie a node belongs to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum TrieOwner {
    /// The world-state (account) trie.
    Account,
    /// The storage trie of the account with this hashed address.
    Storage(H256),
}

impl TrieOwner {
    /// The owner of an account's storage trie.
    pub fn storage(address: Address) -> Self {
        Self::Storage(hashed_address(address))
    }
}

impl Display for TrieOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrieOwner::Account => write!(f, "account trie"),
            TrieOwner::Storage(owner) => write!(f, "storage trie {:x}", owner),
        }
    }
}

/// A trie node together with the hash it is stored under.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProvedNode {
    /// Keccak hash of `blob`.
    pub hash: H256,
    /// The node's RLP encoding.
    #[serde(with = "hex_bytes")]
    pub blob: Vec<u8>,
}

impl ProvedNode {
    /// Encodes a node and hashes the encoding, whatever its length.
    pub fn from_node(node: &Node<HashedPartialTrie>) -> Self {
        let blob = encode_node(node).map(|b| b.to_vec()).unwrap_or_default();
        Self {
            hash: keccak(&blob),
            blob,
        }
    }
}

/// Errors encountered while building node sets.
#[derive(Clone, Debug, Error)]
pub enum NodeSetError {
    /// The proof of a key did not verify.
    #[error("proof of key {key:x} does not verify against root {root:x}: {source}")]
    Proof {
        /// The trie key whose proof failed.
        key: H256,
        /// The root the proof was checked against.
        root: H256,
        /// Why verification failed.
        #[source]
        source: ProofError,
    },

    /// Two sources disagree about the node at a path.
    #[error("conflicting nodes in the {owner} at path {path}: {existing:x} and {incoming:x}")]
    MergeConflict {
        /// Trie of the conflicting nodes.
        owner: TrieOwner,
        /// Path of the conflicting nodes.
        path: Nibbles,
        /// Hash already in the set.
        existing: H256,
        /// Hash that was being added.
        incoming: H256,
    },

    /// Two sources disagree about the value stored under a key.
    #[error("conflicting values in the {owner} for key {path}")]
    LeafConflict {
        /// Trie of the conflicting values.
        owner: TrieOwner,
        /// Full key of the conflicting values.
        path: Nibbles,
    },
}

/// Records the hashed nodes and the value a proof walks through.
#[derive(Default)]
struct PathRecorder {
    nodes: Vec<(Nibbles, ProvedNode)>,
    leaf: Option<(Nibbles, Vec<u8>)>,
}

impl ProofVisitor for PathRecorder {
    fn on_node(&mut self, path: &Nibbles, hash: H256, blob: &[u8]) {
        self.nodes.push((
            *path,
            ProvedNode {
                hash,
                blob: blob.to_vec(),
            },
        ));
    }

    fn on_leaf(&mut self, path: &Nibbles, value: &[u8]) {
        self.leaf = Some((*path, value.to_vec()));
    }
}

/// The proven nodes of a single trie.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NodeSet {
    owner: TrieOwner,
    nodes: BTreeMap<Nibbles, ProvedNode>,
    #[serde(with = "hex_leaves")]
    leaves: BTreeMap<Nibbles, Vec<u8>>,
}

impl NodeSet {
    /// Creates an empty set for the given trie.
    pub fn new(owner: TrieOwner) -> Self {
        Self {
            owner,
            nodes: BTreeMap::new(),
            leaves: BTreeMap::new(),
        }
    }

    /// The trie this set belongs to.
    pub fn owner(&self) -> TrieOwner {
        self.owner
    }

    /// Proven nodes by path.
    pub fn nodes(&self) -> &BTreeMap<Nibbles, ProvedNode> {
        &self.nodes
    }

    /// Proven values by full key.
    pub fn leaves(&self) -> &BTreeMap<Nibbles, Vec<u8>> {
        &self.leaves
    }

    /// The node at a path, if any.
    pub fn get(&self, path: &Nibbles) -> Option<&ProvedNode> {
        self.nodes.get(path)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the set holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Verifies the proof of every key against `root` and adds the nodes on
    /// each path, plus the value when the key is present.
    ///
    /// Nothing is added unless every proof verifies and agrees with the set.
    /// Adding the same proof twice changes nothing.
    pub fn add_nodes<S, I>(&mut self, root: H256, proof_db: &S, keys: I) -> Result<(), NodeSetError>
    where
        S: NodeSource + ?Sized,
        I: IntoIterator<Item = H256>,
    {
        let mut staged = NodeSet::new(self.owner);
        for key in keys {
            let mut recorder = PathRecorder::default();
            verify_proof(root, key.into(), proof_db, &mut recorder)
                .map_err(|source| NodeSetError::Proof { key, root, source })?;

            trace!(
                "Proof of {:x} in the {} covers {} nodes",
                key,
                self.owner,
                recorder.nodes.len()
            );
            for (path, node) in recorder.nodes {
                staged.insert_node(path, node)?;
            }
            if let Some((path, value)) = recorder.leaf {
                staged.insert_leaf(path, value)?;
            }
        }

        self.merge(staged)
    }

    /// Adds the orphan candidates derived from the post-state proofs of keys
    /// that a block deletes. Returns how many candidates were added.
    ///
    /// Keys still present after the block, and exclusion proofs ending in a
    /// branch (or in the empty trie), need no orphans. Candidates never
    /// replace a node already in the set, and a failing proof adds nothing.
    pub fn add_orphan_nodes<S, I>(
        &mut self,
        post_root: H256,
        post_proof_db: &S,
        keys: I,
    ) -> Result<usize, NodeSetError>
    where
        S: NodeSource + ?Sized,
        I: IntoIterator<Item = H256>,
    {
        let mut candidates = Vec::new();
        for key in keys {
            let path = verify_proof(post_root, key.into(), post_proof_db, &mut ()).map_err(
                |source| NodeSetError::Proof {
                    key,
                    root: post_root,
                    source,
                },
            )?;

            if path.is_inclusion() || !path.last_node.is_short() {
                continue;
            }

            candidates.extend(
                reduce_short_node(&path.last_node)
                    .into_iter()
                    .map(|(stripped, node)| (path.matched_prefix.merge_nibbles(&stripped), node)),
            );
        }

        let mut added = 0;
        for (candidate_path, node) in candidates {
            if let Entry::Vacant(slot) = self.nodes.entry(candidate_path) {
                slot.insert(node);
                added += 1;
            }
        }

        if added > 0 {
            debug!("Added {} orphan candidates to the {}", added, self.owner);
        }

        Ok(added)
    }

    /// [`Self::add_nodes`] for accounts, keyed by `keccak(address)`.
    pub fn add_account_nodes<S: NodeSource + ?Sized>(
        &mut self,
        root: H256,
        proof_db: &S,
        addresses: &[Address],
    ) -> Result<(), NodeSetError> {
        self.add_nodes(root, proof_db, addresses.iter().copied().map(hashed_address))
    }

    /// [`Self::add_orphan_nodes`] for accounts, keyed by `keccak(address)`.
    pub fn add_account_orphan_nodes<S: NodeSource + ?Sized>(
        &mut self,
        post_root: H256,
        post_proof_db: &S,
        addresses: &[Address],
    ) -> Result<usize, NodeSetError> {
        self.add_orphan_nodes(
            post_root,
            post_proof_db,
            addresses.iter().copied().map(hashed_address),
        )
    }

    /// [`Self::add_nodes`] for storage slots, keyed by `keccak(slot)`.
    pub fn add_storage_nodes<S: NodeSource + ?Sized>(
        &mut self,
        root: H256,
        proof_db: &S,
        slots: &[H256],
    ) -> Result<(), NodeSetError> {
        self.add_nodes(root, proof_db, slots.iter().copied().map(hashed_slot))
    }

    /// [`Self::add_orphan_nodes`] for storage slots, keyed by `keccak(slot)`.
    pub fn add_storage_orphan_nodes<S: NodeSource + ?Sized>(
        &mut self,
        post_root: H256,
        post_proof_db: &S,
        slots: &[H256],
    ) -> Result<usize, NodeSetError> {
        self.add_orphan_nodes(
            post_root,
            post_proof_db,
            slots.iter().copied().map(hashed_slot),
        )
    }

    /// Folds another set of the same trie into this one. On a conflict the set
    /// is left as it was.
    pub fn merge(&mut self, other: NodeSet) -> Result<(), NodeSetError> {
        self.check_agrees_with(&other)?;
        self.nodes.extend(other.nodes);
        self.leaves.extend(other.leaves);

        Ok(())
    }

    fn check_agrees_with(&self, other: &NodeSet) -> Result<(), NodeSetError> {
        for (path, node) in &other.nodes {
            match self.nodes.get(path) {
                Some(existing) if existing.hash != node.hash => {
                    return Err(NodeSetError::MergeConflict {
                        owner: self.owner,
                        path: *path,
                        existing: existing.hash,
                        incoming: node.hash,
                    })
                }
                _ => {}
            }
        }

        match other
            .leaves
            .iter()
            .find(|(path, value)| self.leaves.get(*path).is_some_and(|v| v != *value))
        {
            Some((path, _)) => Err(NodeSetError::LeafConflict {
                owner: self.owner,
                path: *path,
            }),
            None => Ok(()),
        }
    }

    fn insert_node(&mut self, path: Nibbles, node: ProvedNode) -> Result<(), NodeSetError> {
        match self.nodes.entry(path) {
            Entry::Vacant(slot) => {
                slot.insert(node);
                Ok(())
            }
            Entry::Occupied(slot) if slot.get().hash == node.hash => Ok(()),
            Entry::Occupied(slot) => Err(NodeSetError::MergeConflict {
                owner: self.owner,
                path,
                existing: slot.get().hash,
                incoming: node.hash,
            }),
        }
    }

    fn insert_leaf(&mut self, path: Nibbles, value: Vec<u8>) -> Result<(), NodeSetError> {
        match self.leaves.entry(path) {
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
            Entry::Occupied(slot) if *slot.get() == value => Ok(()),
            Entry::Occupied(_) => Err(NodeSetError::LeafConflict {
                owner: self.owner,
                path,
            }),
        }
    }
}

/// Node sets of several tries, flushed together.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MergedNodeSet {
    sets: BTreeMap<TrieOwner, NodeSet>,
}

impl MergedNodeSet {
    /// Creates an empty merged set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a set, merging it into the set of the same trie if there is one.
    pub fn merge(&mut self, set: NodeSet) -> Result<(), NodeSetError> {
        match self.sets.entry(set.owner) {
            Entry::Vacant(slot) => {
                slot.insert(set);
                Ok(())
            }
            Entry::Occupied(mut slot) => slot.get_mut().merge(set),
        }
    }

    /// The set of a trie, if any.
    pub fn get(&self, owner: &TrieOwner) -> Option<&NodeSet> {
        self.sets.get(owner)
    }

    /// All sets, world state first.
    pub fn sets(&self) -> impl Iterator<Item = &NodeSet> {
        self.sets.values()
    }

    /// Total number of nodes over all sets.
    pub fn node_count(&self) -> usize {
        self.sets.values().map(NodeSet::len).sum()
    }

    /// Writes every node of every set to `store` in a single batch, and returns
    /// the number of distinct nodes written.
    pub fn flush<S: NodeStore + ?Sized>(self, store: &mut S) -> Result<usize, StoreError> {
        let unique: HashMap<H256, Vec<u8>> = self
            .sets
            .into_values()
            .flat_map(|set| set.nodes.into_values())
            .map(|node| (node.hash, node.blob))
            .collect();

        let mut batch = NodeBatch::default();
        for (hash, blob) in unique {
            batch.put(hash, blob);
        }

        let written = batch.len();
        store.write_batch(batch)?;
        debug!("Flushed {} trie nodes", written);

        Ok(written)
    }
}

mod hex_bytes {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(D::Error::custom)
    }
}

mod hex_leaves {
    use std::collections::BTreeMap;

    use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

    use crate::nibbles::Nibbles;

    pub(super) fn serialize<S: Serializer>(
        leaves: &BTreeMap<Nibbles, Vec<u8>>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        leaves
            .iter()
            .map(|(k, v)| (*k, format!("0x{}", hex::encode(v))))
            .collect::<BTreeMap<_, _>>()
            .serialize(s)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<BTreeMap<Nibbles, Vec<u8>>, D::Error> {
        BTreeMap::<Nibbles, String>::deserialize(d)?
            .into_iter()
            .map(|(k, v)| {
                hex::decode(v.strip_prefix("0x").unwrap_or(&v))
                    .map(|v| (k, v))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}
