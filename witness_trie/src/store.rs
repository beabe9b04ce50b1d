//! Content-addressed trie node storage.
//!
//! Everything above this module looks nodes up by the keccak hash of their
//! encoding, so a proof (a bag of node encodings) and a persistent node store
//! are interchangeable as a [`NodeSource`].

use std::{collections::HashMap, sync::Arc};

use ethereum_types::H256;
use keccak_hash::keccak;
use log::debug;
use thiserror::Error;

/// Read access to trie nodes by hash.
pub trait NodeSource {
    /// Returns the encoding of the node with the given hash, if known.
    fn node(&self, hash: &H256) -> Option<Vec<u8>>;
}

impl<S: NodeSource + ?Sized> NodeSource for &S {
    fn node(&self, hash: &H256) -> Option<Vec<u8>> {
        (**self).node(hash)
    }
}

impl<S: NodeSource + ?Sized> NodeSource for Arc<S> {
    fn node(&self, hash: &H256) -> Option<Vec<u8>> {
        (**self).node(hash)
    }
}

impl NodeSource for HashMap<H256, Vec<u8>> {
    fn node(&self, hash: &H256) -> Option<Vec<u8>> {
        self.get(hash).cloned()
    }
}

/// Errors raised by a [`NodeStore`].
#[derive(Clone, Debug, Error)]
pub enum StoreError {
    /// A node was offered under a hash that is not the hash of its encoding.
    #[error("node stored under {claimed:x} hashes to {actual:x}")]
    HashMismatch {
        /// The hash the node was written under.
        claimed: H256,
        /// The keccak hash of the node's encoding.
        actual: H256,
    },

    /// The backing storage failed.
    #[error("node store backend failure: {0}")]
    Backend(String),
}

/// A set of node writes applied together.
#[derive(Clone, Debug, Default)]
pub struct NodeBatch {
    writes: Vec<(H256, Vec<u8>)>,
}

impl NodeBatch {
    /// Queues a node for writing.
    pub fn put(&mut self, hash: H256, blob: Vec<u8>) {
        self.writes.push((hash, blob));
    }

    /// Number of queued writes.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// The queued writes, in insertion order.
    pub fn writes(&self) -> impl Iterator<Item = (&H256, &[u8])> {
        self.writes.iter().map(|(h, b)| (h, b.as_slice()))
    }
}

/// Write access to trie nodes.
pub trait NodeStore: NodeSource {
    /// Writes every node of the batch, or none of them.
    fn write_batch(&mut self, batch: NodeBatch) -> Result<(), StoreError>;
}

/// A [`NodeStore`] that lives in memory.
///
/// Writes are checked against the hash of the encoding before anything is
/// applied.
#[derive(Clone, Debug, Default)]
pub struct MemoryNodeStore {
    nodes: HashMap<H256, Vec<u8>>,
}

impl MemoryNodeStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if no node is stored.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns `true` if a node with this hash is stored.
    pub fn contains(&self, hash: &H256) -> bool {
        self.nodes.contains_key(hash)
    }
}

impl NodeSource for MemoryNodeStore {
    fn node(&self, hash: &H256) -> Option<Vec<u8>> {
        self.nodes.get(hash).cloned()
    }
}

impl NodeStore for MemoryNodeStore {
    fn write_batch(&mut self, batch: NodeBatch) -> Result<(), StoreError> {
        for (claimed, blob) in batch.writes() {
            let actual = keccak(blob);
            if actual != *claimed {
                return Err(StoreError::HashMismatch {
                    claimed: *claimed,
                    actual,
                });
            }
        }

        debug!("Writing {} trie nodes to the memory store", batch.len());
        self.nodes.extend(batch.writes);
        Ok(())
    }
}

/// The nodes of one or more proofs, keyed by hash.
///
/// Used as the proof database handed to [`crate::proof::verify_proof`].
#[derive(Clone, Debug, Default)]
pub struct ProofNodes {
    nodes: HashMap<H256, Vec<u8>>,
}

impl ProofNodes {
    /// Creates an empty proof database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the nodes of a proof.
    pub fn insert_proof<I, B>(&mut self, proof: I)
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        for node in proof {
            let node = node.as_ref();
            self.nodes.insert(keccak(node), node.to_vec());
        }
    }

    /// Number of distinct nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if there are no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<B: AsRef<[u8]>> FromIterator<B> for ProofNodes {
    fn from_iter<I: IntoIterator<Item = B>>(iter: I) -> Self {
        let mut nodes = Self::new();
        nodes.insert_proof(iter);
        nodes
    }
}

impl NodeSource for ProofNodes {
    fn node(&self, hash: &H256) -> Option<Vec<u8>> {
        self.nodes.get(hash).cloned()
    }
}
