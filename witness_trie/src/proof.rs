//! Verification of Merkle-Patricia inclusion and exclusion proofs, and proof
//! generation from a partial trie.
//!
//! A proof is the list of node encodings on the path from the root towards a
//! key. Verification walks that path through a [`NodeSource`] holding the
//! proof nodes and either reaches the key's value (inclusion) or the node at
//! which the path provably diverges from the key (exclusion).

use ethereum_types::H256;
use log::trace;
use thiserror::Error;
use witness_common::is_empty_root;

use crate::{
    codec::{decode_node, DecodeNodeError},
    nibbles::{Nibbles, MAX_NIBBLES},
    partial_trie::{HashedPartialTrie, Node, PartialTrie},
    store::NodeSource,
    trie_hashing::encode_node,
    trie_ops::{TrieOpError, TrieOpResult},
};

/// Errors encountered while verifying a proof.
#[derive(Clone, Debug, Error)]
pub enum ProofError {
    /// A node on the path is not part of the proof.
    #[error("proof is missing trie node {hash:x} at path {path}")]
    MissingNode {
        /// Hash of the missing node.
        hash: H256,
        /// Path of the missing node from the root.
        path: Nibbles,
    },

    /// A node on the path could not be decoded.
    #[error("trie node {hash:x} at path {path} is malformed: {source}")]
    Malformed {
        /// Hash of the malformed node.
        hash: H256,
        /// Path of the malformed node from the root.
        path: Nibbles,
        /// The decoding failure.
        #[source]
        source: DecodeNodeError,
    },
}

/// Result of a proof verification.
pub type ProofResult<T> = Result<T, ProofError>;

/// Receives the nodes a verification walks through.
pub trait ProofVisitor {
    /// Called for every node looked up by hash, with its path from the root.
    fn on_node(&mut self, _path: &Nibbles, _hash: H256, _blob: &[u8]) {}

    /// Called once with the full key and value when the proof is an inclusion
    /// proof.
    fn on_leaf(&mut self, _path: &Nibbles, _value: &[u8]) {}
}

/// Verification without any reporting.
impl ProofVisitor for () {}

/// Outcome of a successful verification.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VerifiedPath {
    /// The value stored under the key, `None` for an exclusion proof.
    pub value: Option<Vec<u8>>,
    /// The key nibbles consumed before reaching `last_node`.
    pub matched_prefix: Nibbles,
    /// The last node the walk reached, with hashed children left as `Hash`
    /// nodes.
    pub last_node: Node<HashedPartialTrie>,
}

impl VerifiedPath {
    /// Returns `true` if the proof shows the key is present.
    pub fn is_inclusion(&self) -> bool {
        self.value.is_some()
    }

    fn exclusion(matched_prefix: Nibbles, last_node: Node<HashedPartialTrie>) -> Self {
        Self {
            value: None,
            matched_prefix,
            last_node,
        }
    }
}

/// Verifies the proof of `key` against `root` using the nodes in `proof_db`.
///
/// Every node looked up by hash is reported to `visitor` before the walk moves
/// on, and the value is reported when the key is found. Nodes embedded in
/// their parent are walked without a lookup and are not reported on their
/// own.
pub fn verify_proof<S, V>(
    root: H256,
    key: Nibbles,
    proof_db: &S,
    visitor: &mut V,
) -> ProofResult<VerifiedPath>
where
    S: NodeSource + ?Sized,
    V: ProofVisitor + ?Sized,
{
    if is_empty_root(root) {
        return Ok(VerifiedPath::exclusion(Nibbles::default(), Node::Empty));
    }

    let mut hash = root;
    let mut remaining = key;
    let mut matched = Nibbles::default();

    loop {
        let blob = proof_db.node(&hash).ok_or(ProofError::MissingNode {
            hash,
            path: matched,
        })?;
        visitor.on_node(&matched, hash, &blob);

        let mut node: Node<HashedPartialTrie> =
            decode_node(&blob).map_err(|source| ProofError::Malformed {
                hash,
                path: matched,
                source,
            })?;

        hash = loop {
            if let Node::Extension { nibbles, .. } | Node::Leaf { nibbles, .. } = &node {
                let end = matched.len() + nibbles.len();
                if end > MAX_NIBBLES {
                    return Err(ProofError::Malformed {
                        hash,
                        path: matched,
                        source: DecodeNodeError::PathTooLong(end),
                    });
                }
            }

            node = match node {
                Node::Empty => return Ok(VerifiedPath::exclusion(matched, Node::Empty)),
                Node::Hash(next) => break next,
                Node::Branch { children, value } => {
                    if remaining.is_empty() {
                        let node = Node::Branch { children, value };
                        return Ok(match node.branch_value() {
                            Some(value) => {
                                visitor.on_leaf(&matched, &value);
                                VerifiedPath {
                                    value: Some(value),
                                    matched_prefix: matched,
                                    last_node: node,
                                }
                            }
                            None => VerifiedPath::exclusion(matched, node),
                        });
                    }

                    let nibble = remaining.get_nibble(0);
                    let child: &Node<HashedPartialTrie> = &children[nibble as usize];
                    if matches!(child, Node::Empty) {
                        trace!("Proof ends in an empty branch slot at {}", matched);
                        return Ok(VerifiedPath::exclusion(
                            matched,
                            Node::Branch { children, value },
                        ));
                    }

                    remaining.pop_next_nibble_front();
                    matched.push_nibble_back(nibble);
                    child.clone()
                }
                Node::Extension { nibbles, child } => {
                    if !remaining.starts_with(&nibbles) {
                        return Ok(VerifiedPath::exclusion(
                            matched,
                            Node::Extension { nibbles, child },
                        ));
                    }

                    remaining.truncate_n_nibbles_front_mut(nibbles.len());
                    matched = matched.merge_nibbles(&nibbles);
                    Node::clone(&child)
                }
                Node::Leaf { nibbles, value } => {
                    if nibbles != remaining {
                        return Ok(VerifiedPath::exclusion(
                            matched,
                            Node::Leaf { nibbles, value },
                        ));
                    }

                    let full_key = matched.merge_nibbles(&nibbles);
                    visitor.on_leaf(&full_key, &value);
                    return Ok(VerifiedPath {
                        value: Some(value.clone()),
                        matched_prefix: matched,
                        last_node: Node::Leaf { nibbles, value },
                    });
                }
            }
        };
    }
}

impl Node<HashedPartialTrie> {
    fn branch_value(&self) -> Option<Vec<u8>> {
        match self {
            Node::Branch { value, .. } if !value.is_empty() => Some(value.clone()),
            _ => None,
        }
    }
}

/// Collects the proof of `key` from a trie: the encoding of every node on the
/// path that is referenced by hash, starting with the root.
///
/// The result verifies with [`verify_proof`] both when the key is present and
/// when it is absent. Fails if the path runs into a `Hash` node, since the
/// nodes behind it are unknown.
pub fn generate_proof<N: PartialTrie>(trie: &Node<N>, key: Nibbles) -> TrieOpResult<Vec<Vec<u8>>> {
    let mut proof = Vec::new();
    let mut node = trie;
    let mut remaining = key;
    let mut is_root = true;

    loop {
        if let Node::Hash(h) = node {
            return Err(TrieOpError::HashNodeGetError(*h));
        }

        if let Some(enc) = encode_node(node) {
            if is_root || enc.len() >= 32 {
                proof.push(enc.to_vec());
            }
        }
        is_root = false;

        node = match node {
            Node::Branch { children, .. } if !remaining.is_empty() => {
                let next: &Node<N> = &children[remaining.pop_next_nibble_front() as usize];
                next
            }
            Node::Extension { nibbles, child } if remaining.starts_with(nibbles) => {
                remaining.truncate_n_nibbles_front_mut(nibbles.len());
                let next: &Node<N> = child;
                next
            }
            _ => break,
        };
    }

    Ok(proof)
}
