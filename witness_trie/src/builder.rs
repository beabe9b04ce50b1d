//! A builder for constructing a partial trie from a node source.

use std::marker::PhantomData;

use ethereum_types::H256;
use log::trace;
use thiserror::Error;
use witness_common::is_empty_root;

use crate::{
    codec::{decode_node, DecodeNodeError},
    partial_trie::{Node, PartialTrie},
    store::NodeSource,
};

/// Errors encountered while rebuilding a partial trie.
#[derive(Clone, Debug, Error)]
pub enum BuildError {
    /// The root node itself is not available.
    #[error("root node {0:x} is not in the node source")]
    MissingRoot(H256),

    /// A node in the source could not be decoded.
    #[error("failed to decode trie node {hash:x}: {source}")]
    Decode {
        /// Hash the node was stored under.
        hash: H256,
        /// The decoding failure.
        #[source]
        source: DecodeNodeError,
    },
}

#[derive(Debug)]
/// A builder for constructing a partial trie from a root and the nodes a
/// [`NodeSource`] knows about.
///
/// Every node reachable from the root that the source has is expanded; every
/// node it lacks stays a [`Node::Hash`], so the rebuilt trie hashes to the
/// root it was built from.
pub struct PartialTrieBuilder<'a, S: ?Sized, T> {
    root: H256,
    nodes: &'a S,
    _marker: PhantomData<T>,
}

impl<'a, S: NodeSource + ?Sized, T: PartialTrie> PartialTrieBuilder<'a, S, T> {
    /// Creates a new `PartialTrieBuilder` with the given root and nodes.
    pub fn new(root: H256, nodes: &'a S) -> Self {
        PartialTrieBuilder {
            root,
            nodes,
            _marker: PhantomData,
        }
    }

    /// Builds the partial trie from the nodes and root.
    ///
    /// An empty root (zero or the empty trie hash) gives an empty trie without
    /// touching the source.
    pub fn build(self) -> Result<T, BuildError> {
        if is_empty_root(self.root) {
            return Ok(T::default());
        }

        let root = self
            .nodes
            .node(&self.root)
            .ok_or(BuildError::MissingRoot(self.root))?;
        let node = decode_stored(self.root, &root)?;

        Ok(T::new(resolve_node(node, self.nodes)?))
    }
}

fn decode_stored<T: PartialTrie>(hash: H256, bytes: &[u8]) -> Result<Node<T>, BuildError> {
    decode_node(bytes).map_err(|source| BuildError::Decode { hash, source })
}

/// Replaces every `Hash` node below `node` that the source can resolve.
fn resolve_node<T: PartialTrie, S: NodeSource + ?Sized>(
    node: Node<T>,
    nodes: &S,
) -> Result<Node<T>, BuildError> {
    Ok(match node {
        Node::Hash(hash) => match nodes.node(&hash) {
            Some(bytes) => resolve_node(decode_stored(hash, &bytes)?, nodes)?,
            None => {
                trace!("Node {:x} is not available, keeping it hashed out", hash);
                Node::Hash(hash)
            }
        },
        Node::Branch { children, value } => {
            let mut resolved = children.clone();
            for (slot, child) in resolved.iter_mut().zip(children.iter()) {
                *slot = resolve_node(Node::clone(child), nodes)?.into();
            }

            Node::Branch {
                children: resolved,
                value,
            }
        }
        Node::Extension { nibbles, child } => Node::Extension {
            nibbles,
            child: resolve_node(Node::clone(&child), nodes)?.into(),
        },
        node @ (Node::Empty | Node::Leaf { .. }) => node,
    })
}
