//! Synthesis of the "orphan" nodes a proof-derived partial trie needs to stay
//! deletable.
//!
//! Deleting a key can collapse a branch into its only remaining child, and if
//! that child is a leaf or an extension its key fragment is merged into the
//! node above. When the child only appears as a hash in the pre-state proofs,
//! the partial trie cannot do that merge. The post-state proof of the deleted
//! key ends in exactly the merged node, so every shorter suffix of its key
//! fragment is a candidate for the hidden child. One of them is the real node,
//! the rest are never referenced and cost nothing but space.

use log::trace;

use crate::{
    nibbles::Nibbles,
    node_set::ProvedNode,
    partial_trie::{HashedPartialTrie, Node},
};

/// Returns every shortened variant of a leaf or extension node.
///
/// For a fragment `k` of length `n` and every split `i` in `1..n`, the variant
/// with fragment `k[i..]` (same value or child) is returned, keyed by the
/// stripped prefix `k[..i]`. Variants are hashed whatever their size, since
/// only a hash lookup can find them. Branches and the other node kinds give
/// nothing.
pub fn reduce_short_node(node: &Node<HashedPartialTrie>) -> Vec<(Nibbles, ProvedNode)> {
    let fragment = match node {
        Node::Extension { nibbles, .. } | Node::Leaf { nibbles, .. } => *nibbles,
        _ => return Vec::new(),
    };

    (1..fragment.len())
        .map(|i| {
            let (stripped, rest) = fragment.split_at_idx(i);
            let variant = match node {
                Node::Extension { child, .. } => Node::Extension {
                    nibbles: rest,
                    child: child.clone(),
                },
                Node::Leaf { value, .. } => Node::Leaf {
                    nibbles: rest,
                    value: value.clone(),
                },
                _ => unreachable!("only short nodes have a fragment"),
            };

            trace!("Orphan candidate {} -> {:?}", stripped, variant);
            (stripped, ProvedNode::from_node(&variant))
        })
        .collect()
}
