//! Insertion, lookup and deletion over a [`Node`] tree.
//!
//! Deletion follows the usual Ethereum client rules for collapsing a branch
//! that is left with a single child, which is what allows a partial trie to
//! reproduce the root hash of the full trie after a deletion.

use std::{fmt::Display, sync::Arc};

use enum_as_inner::EnumAsInner;
use ethereum_types::{H256, U256};
use log::trace;
use thiserror::Error;

use crate::{
    nibbles::{Nibble, Nibbles},
    partial_trie::{Node, PartialTrie, WrappedNode},
    utils::TrieNodeType,
};

/// Stores the result of trie operations. Returns a [`TrieOpError`] upon
/// failure.
pub type TrieOpResult<T> = Result<T, TrieOpError>;

/// An error type for trie operation.
#[derive(Clone, Debug, Error)]
pub enum TrieOpError {
    /// An error that occurs when a hash node is found during an insert
    /// operation.
    #[error("Found a `Hash` node during an insert in a `PartialTrie`! These should not be able to be traversed during an insert! (hash: {0:x})")]
    HashNodeInsertError(H256),

    /// An error that occurs when a hash node is found during a delete
    /// operation.
    #[error("Attempted to delete a value that ended up inside a hash node! (hash: {0:x})")]
    HashNodeDeleteError(H256),

    /// An error that occurs when a lookup has to go through a hash node, so
    /// the trie cannot tell whether the key is present.
    #[error("Attempted to read a value whose path goes through a hash node! (hash: {0:x})")]
    HashNodeGetError(H256),

    /// An error that occurs when an extension node is left without a child it
    /// can be merged with.
    #[error("Extension managed to get a child node type that is impossible! (child: {0})")]
    HashNodeExtError(TrieNodeType),

    /// An error that occurs when we attempted to insert a hash node where a
    /// value already lives.
    #[error("Attempted to place a hash node on an existing node! (hash: {0:x})")]
    ExistingHashNodeError(H256),
}

/// A value that can be inserted into a trie: either a leaf payload or the hash
/// of a sub-trie that is not present.
#[derive(Clone, Debug, EnumAsInner, Eq, Hash, PartialEq)]
pub enum ValOrHash {
    /// A leaf payload.
    Val(Vec<u8>),

    /// A hash node.
    Hash(H256),
}

impl From<Vec<u8>> for ValOrHash {
    fn from(v: Vec<u8>) -> Self {
        Self::Val(v)
    }
}

impl From<&[u8]> for ValOrHash {
    fn from(v: &[u8]) -> Self {
        Self::Val(v.to_vec())
    }
}

impl From<H256> for ValOrHash {
    fn from(v: H256) -> Self {
        Self::Hash(v)
    }
}

impl From<U256> for ValOrHash {
    fn from(v: U256) -> Self {
        Self::Val(rlp::encode(&v).to_vec())
    }
}

impl Display for ValOrHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValOrHash::Val(v) => write!(f, "Val(0x{})", hex::encode(v)),
            ValOrHash::Hash(h) => write!(f, "Hash({:x})", h),
        }
    }
}

#[derive(Debug)]
struct InsertEntry {
    nibbles: Nibbles,
    v: ValOrHash,
}

/// What ends up in a freshly created branch in place of a node we had to
/// split.
enum Displaced<N: PartialTrie> {
    Value(Vec<u8>),
    Child(Nibble, WrappedNode<N>),
}

impl<T: PartialTrie> Node<T> {
    pub(crate) fn trie_insert<K, V>(&mut self, k: K, v: V) -> TrieOpResult<()>
    where
        K: Into<Nibbles>,
        V: Into<ValOrHash>,
    {
        let entry = InsertEntry {
            nibbles: k.into(),
            v: v.into(),
        };
        trace!("Inserting new node {:?}...", entry);

        *self = insert_into_trie_rec(self, entry)?;
        Ok(())
    }

    pub(crate) fn trie_extend<K, V, I>(&mut self, nodes: I) -> TrieOpResult<()>
    where
        K: Into<Nibbles>,
        V: Into<ValOrHash>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (k, v) in nodes {
            self.trie_insert(k, v)?;
        }

        Ok(())
    }

    pub(crate) fn trie_get<K>(&self, k: K) -> Option<&[u8]>
    where
        K: Into<Nibbles>,
    {
        get_intern(self, k.into()).ok().flatten()
    }

    pub(crate) fn trie_get_proven<K>(&self, k: K) -> TrieOpResult<Option<&[u8]>>
    where
        K: Into<Nibbles>,
    {
        get_intern(self, k.into()).map_err(TrieOpError::HashNodeGetError)
    }

    pub(crate) fn trie_delete<K>(&mut self, k: K) -> TrieOpResult<Option<Vec<u8>>>
    where
        K: Into<Nibbles>,
    {
        let k = k.into();
        trace!("Deleting a leaf node with key {} if it exists", k);

        match delete_intern(self, k)? {
            Some((updated_root, deleted_val)) => {
                *self = try_collapse_if_extension(updated_root)?;
                Ok(Some(deleted_val))
            }
            None => Ok(None),
        }
    }
}

fn insert_into_trie_rec<N: PartialTrie>(
    node: &Node<N>,
    mut new_node: InsertEntry,
) -> TrieOpResult<Node<N>> {
    match node {
        Node::Empty => {
            trace!("Insert traversed Empty");
            Ok(create_node_from_insert_val(new_node.nibbles, new_node.v))
        }
        Node::Hash(h) => {
            trace!("Insert traversed {:?}", node);
            Err(TrieOpError::HashNodeInsertError(*h))
        }
        Node::Branch { children, value } => {
            if new_node.nibbles.is_empty() {
                trace!("Insert traversed branch and placed its value in node.");
                return match new_node.v {
                    ValOrHash::Val(value) => Ok(branch(children.clone(), value)),
                    ValOrHash::Hash(h) => Err(TrieOpError::ExistingHashNodeError(h)),
                };
            }

            let nibble = new_node.nibbles.pop_next_nibble_front();
            trace!("Insert traversed Branch (nibble: {:x})", nibble);

            let updated_child = insert_into_trie_rec(&children[nibble as usize], new_node)?;
            let mut updated_children = children.clone();
            updated_children[nibble as usize] = updated_child.into();

            Ok(branch(updated_children, value.clone()))
        }
        Node::Extension { nibbles, child } => {
            trace!("Insert traversed Extension (nibbles: {:?})", nibbles);

            if new_node.nibbles.starts_with(nibbles) {
                new_node.nibbles.truncate_n_nibbles_front_mut(nibbles.len());
                let updated_child = insert_into_trie_rec(child, new_node)?;
                return Ok(extension(*nibbles, updated_child.into()));
            }

            // Split the extension at the first nibble it disagrees with the key.
            let idx = Nibbles::find_nibble_idx_that_differs_between_nibbles_different_lengths(
                nibbles,
                &new_node.nibbles,
            );
            let (common, mut ext_rest) = nibbles.split_at_idx(idx);
            let ext_nibble = ext_rest.pop_next_nibble_front();
            let ext_child = match ext_rest.is_empty() {
                true => child.clone(),
                false => extension(ext_rest, child.clone()).into(),
            };

            new_node.nibbles.truncate_n_nibbles_front_mut(idx);
            place_branch_and_potentially_ext_prefix(
                common,
                Displaced::Child(ext_nibble, ext_child),
                new_node,
            )
        }
        Node::Leaf {
            nibbles,
            value: existing_value,
        } => {
            trace!("Insert traversed Leaf (nibbles: {:?})", nibbles);

            if *nibbles == new_node.nibbles {
                return match new_node.v {
                    ValOrHash::Val(value) => Ok(leaf(*nibbles, value)),
                    ValOrHash::Hash(h) => Err(TrieOpError::ExistingHashNodeError(h)),
                };
            }

            let idx = Nibbles::find_nibble_idx_that_differs_between_nibbles_different_lengths(
                nibbles,
                &new_node.nibbles,
            );
            let (common, mut leaf_rest) = nibbles.split_at_idx(idx);
            let existing = match leaf_rest.is_empty() {
                true => Displaced::Value(existing_value.clone()),
                false => {
                    let leaf_nibble = leaf_rest.pop_next_nibble_front();
                    Displaced::Child(
                        leaf_nibble,
                        leaf(leaf_rest, existing_value.clone()).into(),
                    )
                }
            };

            new_node.nibbles.truncate_n_nibbles_front_mut(idx);
            place_branch_and_potentially_ext_prefix(common, existing, new_node)
        }
    }
}

/// Builds the branch that holds both a split node and the new entry, and puts
/// an extension with the shared prefix in front of it if there is one.
fn place_branch_and_potentially_ext_prefix<N: PartialTrie>(
    common: Nibbles,
    existing: Displaced<N>,
    mut new_node: InsertEntry,
) -> TrieOpResult<Node<N>> {
    let mut children = new_branch_child_arr();
    let mut value = Vec::new();

    match existing {
        Displaced::Value(v) => value = v,
        Displaced::Child(nibble, child) => children[nibble as usize] = child,
    }

    match new_node.nibbles.is_empty() {
        true => {
            value = match new_node.v {
                ValOrHash::Val(v) => v,
                ValOrHash::Hash(h) => return Err(TrieOpError::ExistingHashNodeError(h)),
            }
        }
        false => {
            let nibble = new_node.nibbles.pop_next_nibble_front();
            children[nibble as usize] =
                create_node_from_insert_val(new_node.nibbles, new_node.v).into();
        }
    }

    let branch = branch(children, value);
    Ok(match common.is_empty() {
        true => branch,
        false => extension(common, branch.into()),
    })
}

/// Walks towards `curr_k`. `Err` carries the hash node the walk ran into.
fn get_intern<N: PartialTrie>(node: &Node<N>, mut curr_k: Nibbles) -> Result<Option<&[u8]>, H256> {
    match node {
        Node::Empty => Ok(None),
        Node::Hash(h) => {
            trace!("Attempted to get a value through a hash node {:x}", h);
            Err(*h)
        }
        Node::Branch { children, value } => {
            if curr_k.is_empty() {
                return Ok((!value.is_empty()).then_some(value.as_slice()));
            }

            let nibble = curr_k.pop_next_nibble_front();
            get_intern(&children[nibble as usize], curr_k)
        }
        Node::Extension { nibbles, child } => match curr_k.starts_with(nibbles) {
            true => get_intern(child, curr_k.truncate_n_nibbles_front(nibbles.len())),
            false => Ok(None),
        },
        Node::Leaf { nibbles, value } => Ok((*nibbles == curr_k).then_some(value.as_slice())),
    }
}

/// If a branch collapses into an extension, the returned extension still has
/// to be merged with whatever is above or below it by the caller.
fn delete_intern<N: PartialTrie>(
    node: &Node<N>,
    mut curr_k: Nibbles,
) -> TrieOpResult<Option<(Node<N>, Vec<u8>)>> {
    match node {
        Node::Empty => {
            trace!("Delete traversed Empty");
            Ok(None)
        }
        Node::Hash(h) => Err(TrieOpError::HashNodeDeleteError(*h)),
        Node::Branch { children, value } => {
            if curr_k.is_empty() {
                if value.is_empty() {
                    return Ok(None);
                }

                let remaining: Vec<_> = children
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| !node_is_empty(c))
                    .collect();
                let updated_node = match remaining.as_slice() {
                    [(other_nibble, other_child)] => extension(
                        Nibbles::from_nibble(*other_nibble as Nibble),
                        Arc::clone(other_child),
                    ),
                    _ => branch(children.clone(), Vec::new()),
                };

                return Ok(Some((updated_node, value.clone())));
            }

            let nibble = curr_k.pop_next_nibble_front() as usize;
            trace!("Delete traversed Branch (nibble: {:x})", nibble);

            let Some((updated_child, deleted_val)) = delete_intern(&children[nibble], curr_k)?
            else {
                return Ok(None);
            };

            let remaining: Vec<_> = children
                .iter()
                .enumerate()
                .filter(|(i, c)| *i != nibble && !node_is_empty(c))
                .collect();

            let updated_node = match (
                node_is_empty(&updated_child),
                remaining.as_slice(),
                value.is_empty(),
            ) {
                (true, [], true) => Node::Empty,
                (true, [], false) => leaf(Nibbles::default(), value.clone()),
                (true, [(other_nibble, other_child)], true) => {
                    trace!(
                        "Branch collapsed into an extension towards its {} child",
                        TrieNodeType::from(*other_child)
                    );
                    extension(
                        Nibbles::from_nibble(*other_nibble as Nibble),
                        Arc::clone(other_child),
                    )
                }
                _ => {
                    let mut updated_children = children.clone();
                    updated_children[nibble] = try_collapse_if_extension(updated_child)?.into();
                    branch(updated_children, value.clone())
                }
            };

            Ok(Some((updated_node, deleted_val)))
        }
        Node::Extension { nibbles, child } => {
            trace!("Delete traversed Extension (nibbles: {:?})", nibbles);

            if !curr_k.starts_with(nibbles) {
                return Ok(None);
            }

            curr_k.truncate_n_nibbles_front_mut(nibbles.len());
            delete_intern(child, curr_k)?
                .map(|(updated_child, deleted_val)| {
                    collapse_ext_node_if_needed(nibbles, &updated_child).map(|n| (n, deleted_val))
                })
                .transpose()
        }
        Node::Leaf { nibbles, value } => {
            trace!("Delete traversed Leaf (nibbles: {:?})", nibbles);
            Ok((*nibbles == curr_k).then(|| (Node::Empty, value.clone())))
        }
    }
}

fn try_collapse_if_extension<N: PartialTrie>(node: Node<N>) -> TrieOpResult<Node<N>> {
    if let Node::Extension { nibbles, child } = &node {
        return collapse_ext_node_if_needed(nibbles, child);
    }

    Ok(node)
}

/// Merges an extension with its child if the child is not a branch.
///
/// A `Hash` child cannot be inspected, so it is kept behind the extension as
/// if it were a branch.
fn collapse_ext_node_if_needed<N: PartialTrie>(
    ext_nibbles: &Nibbles,
    child: &Node<N>,
) -> TrieOpResult<Node<N>> {
    trace!(
        "Collapsing extension node ({:?}) with child {}...",
        ext_nibbles,
        TrieNodeType::from(child)
    );

    match child {
        Node::Branch { .. } | Node::Hash(_) => {
            Ok(extension(*ext_nibbles, child.clone().into()))
        }
        Node::Extension {
            nibbles: other_ext_nibbles,
            child: other_ext_child,
        } => collapse_ext_node_if_needed(
            &ext_nibbles.merge_nibbles(other_ext_nibbles),
            other_ext_child,
        ),
        Node::Leaf {
            nibbles: leaf_nibbles,
            value,
        } => Ok(leaf(ext_nibbles.merge_nibbles(leaf_nibbles), value.clone())),
        Node::Empty => Err(TrieOpError::HashNodeExtError(TrieNodeType::from(child))),
    }
}

fn create_node_from_insert_val<N: PartialTrie>(nibbles: Nibbles, v: ValOrHash) -> Node<N> {
    match v {
        ValOrHash::Val(value) => leaf(nibbles, value),
        ValOrHash::Hash(h) if nibbles.is_empty() => Node::Hash(h),
        ValOrHash::Hash(h) => extension(nibbles, Node::Hash(h).into()),
    }
}

pub(crate) fn new_branch_child_arr<N: PartialTrie>() -> [WrappedNode<N>; 16] {
    std::array::from_fn(|_| Node::Empty.into())
}

fn node_is_empty<N: PartialTrie>(node: &Node<N>) -> bool {
    matches!(node, Node::Empty)
}

pub(crate) fn branch<N: PartialTrie>(
    children: [WrappedNode<N>; 16],
    value: Vec<u8>,
) -> Node<N> {
    Node::Branch { children, value }
}

pub(crate) fn extension<N: PartialTrie>(nibbles: Nibbles, child: WrappedNode<N>) -> Node<N> {
    Node::Extension { nibbles, child }
}

pub(crate) fn leaf<N: PartialTrie>(nibbles: Nibbles, value: Vec<u8>) -> Node<N> {
    Node::Leaf { nibbles, value }
}
