//! Merkle-Patricia proofs and the partial tries built from them.
//!
//! A stateless block witness only carries the parts of the state tries that a
//! block touches. This crate turns `eth_getProof`-style proofs into such
//! partial tries:
//! - [`proof`] verifies inclusion and exclusion proofs against a root.
//! - [`node_set`] collects the verified nodes of every trie, and [`orphan`]
//!   adds the extra nodes a partial trie needs to handle deletions.
//! - [`store`] holds the collected nodes by hash, and [`builder`] rebuilds a
//!   [`HashedPartialTrie`][partial_trie::HashedPartialTrie] from them.
//!
//! Nodes that are not part of a [`PartialTrie`][partial_trie::PartialTrie] are
//! replaced with [`Hash`][partial_trie::Node::Hash] nodes, which contain the
//! merkle hash of the node they replace, so the partial trie hashes to the
//! same root as the full one.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]
#![deny(missing_docs)]

pub mod builder;
pub mod codec;
pub mod nibbles;
pub mod node_set;
pub mod orphan;
pub mod partial_trie;
pub mod proof;
pub mod store;
mod trie_hashing;
pub mod trie_ops;
pub mod utils;

pub use trie_hashing::encode_node;

#[cfg(test)]
pub(crate) mod testing_utils;
