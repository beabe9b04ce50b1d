//! The [`Node`] enum that partial tries are made of, the [`PartialTrie`]
//! operations on them, and [`HashedPartialTrie`], which memoizes node hashes.

use std::{
    fmt::Debug,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use ethereum_types::H256;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    nibbles::Nibbles,
    trie_hashing::root_hash,
    trie_ops::{TrieOpResult, ValOrHash},
    utils::TryFromIterator,
};

/// How a branch or extension holds on to a child.
///
/// Children are shared between clones of a trie and replaced rather than
/// mutated, so cloning a trie is cheap.
pub type WrappedNode<N> = Arc<Box<N>>;

impl<N: PartialTrie> AsRef<Node<N>> for WrappedNode<N> {
    fn as_ref(&self) -> &Node<N> {
        self
    }
}

impl<N: PartialTrie> From<Node<N>> for WrappedNode<N> {
    fn from(node: Node<N>) -> Self {
        Arc::new(Box::new(N::new(node)))
    }
}

/// A Merkle-Patricia trie in which some subtries may only be known by hash.
///
/// Keys are nibble paths and values are stored as given, so account and
/// storage values have to be RLP encoded by the caller.
pub trait PartialTrie: Clone + Debug + Default + DerefMut<Target = Node<Self>> + Eq {
    /// Wraps a node as the root of a trie.
    fn new(n: Node<Self>) -> Self;

    /// Sets the value under `k`.
    ///
    /// A [`ValOrHash::Hash`] places a `Hash` node at `k` instead, standing in
    /// for a subtrie that is not known.
    fn insert<K, V>(&mut self, k: K, v: V) -> TrieOpResult<()>
    where
        K: Into<Nibbles>,
        V: Into<ValOrHash>;

    /// Inserts every pair, stopping at the first failure.
    fn extend<K, V, I>(&mut self, nodes: I) -> TrieOpResult<()>
    where
        K: Into<Nibbles>,
        V: Into<ValOrHash>,
        I: IntoIterator<Item = (K, V)>;

    /// Looks up the value under `k`.
    ///
    /// A lookup that runs into a `Hash` node also returns `None`; use
    /// [`PartialTrie::get_proven`] when that needs to be told apart from a
    /// genuinely absent key.
    fn get<K>(&self, k: K) -> Option<&[u8]>
    where
        K: Into<Nibbles>;

    /// Get a value, failing if the lookup has to cross a `Hash` node.
    ///
    /// `Ok(None)` is only returned when the trie proves the key is absent.
    fn get_proven<K>(&self, k: K) -> TrieOpResult<Option<&[u8]>>
    where
        K: Into<Nibbles>;

    /// Removes the value under `k`, returning it if there was one.
    ///
    /// Deleting a leaf collapses any branch left with a single child into an
    /// extension (and merges it further up), exactly like an Ethereum client
    /// does, so the resulting hash matches the full trie's. A remaining sibling
    /// that is a `Hash` node is assumed to be a branch. When it is really a
    /// hashed-out leaf or extension the collapse cannot be done correctly, which
    /// is why proof-derived tries need the orphan nodes of
    /// [`crate::orphan`].
    ///
    /// Fails if the key path itself runs into a `Hash` node.
    fn delete<K>(&mut self, k: K) -> TrieOpResult<Option<Vec<u8>>>
    where
        K: Into<Nibbles>;

    /// The Merkle root of the trie.
    fn hash(&self) -> H256;

    /// A previously computed hash of this (sub)trie, if the type keeps one.
    fn cached_hash(&self) -> Option<H256> {
        None
    }

    /// Called by the hasher once the hash of a node is known. Only hashes of
    /// nodes whose encoding is at least 32 bytes are passed in.
    fn cache_hash(&self, _hash: H256) {}
}

/// A node of a partial trie.
///
/// Besides the four node kinds of an Ethereum trie there is [`Node::Hash`],
/// a subtrie whose contents were never proven.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Node<T>
where
    T: Clone + Debug,
{
    /// No node at all.
    #[default]
    Empty,
    /// The hash of a subtrie that is not held.
    ///
    /// Only a subtrie whose RLP encoding is at least 32 bytes may be replaced
    /// this way. Smaller nodes are embedded in their parent, so a `Hash` in
    /// their place changes the parent's hash.
    Hash(H256),
    /// Sixteen children, one per nibble, and the value of the key ending here.
    Branch {
        /// Children indexed by the next nibble of the key.
        children: [WrappedNode<T>; 16],
        /// Empty if no key ends at this branch.
        value: Vec<u8>,
    },
    /// A shared run of nibbles in front of a single child.
    Extension {
        /// The shared path.
        nibbles: Nibbles,
        /// Always a branch or a `Hash` of one.
        child: WrappedNode<T>,
    },
    /// The rest of a key and its value.
    Leaf {
        /// The remaining nibbles of the key.
        nibbles: Nibbles,
        /// The stored value.
        value: Vec<u8>,
    },
}

impl<N: PartialTrie> Node<N> {
    /// Returns `true` for the two "short" node kinds, extensions and leaves.
    pub const fn is_short(&self) -> bool {
        matches!(self, Node::Extension { .. } | Node::Leaf { .. })
    }
}

/// A partial trie that remembers the hash of every node it has hashed.
///
/// Any mutation clears the remembered root hash. Clones start with a copy of
/// the cache instead of sharing it.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct HashedPartialTrie {
    pub(crate) node: Node<HashedPartialTrie>,
    #[serde(skip)]
    hash_cache: RwLock<Option<H256>>,
}

impl HashedPartialTrie {
    fn invalidate(&mut self) {
        *self.hash_cache.get_mut() = None;
    }
}

impl Clone for HashedPartialTrie {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            hash_cache: RwLock::new(self.cached_hash()),
        }
    }
}

impl From<Node<HashedPartialTrie>> for HashedPartialTrie {
    fn from(node: Node<HashedPartialTrie>) -> Self {
        Self::new(node)
    }
}

impl PartialTrie for HashedPartialTrie {
    fn new(node: Node<Self>) -> Self {
        Self {
            node,
            hash_cache: RwLock::new(None),
        }
    }

    fn insert<K, V>(&mut self, k: K, v: V) -> TrieOpResult<()>
    where
        K: Into<Nibbles>,
        V: Into<ValOrHash>,
    {
        self.invalidate();
        self.node.trie_insert(k, v)
    }

    fn extend<K, V, I>(&mut self, nodes: I) -> TrieOpResult<()>
    where
        K: Into<Nibbles>,
        V: Into<ValOrHash>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.invalidate();
        self.node.trie_extend(nodes)
    }

    fn get<K>(&self, k: K) -> Option<&[u8]>
    where
        K: Into<Nibbles>,
    {
        self.node.trie_get(k)
    }

    fn get_proven<K>(&self, k: K) -> TrieOpResult<Option<&[u8]>>
    where
        K: Into<Nibbles>,
    {
        self.node.trie_get_proven(k)
    }

    fn delete<K>(&mut self, k: K) -> TrieOpResult<Option<Vec<u8>>>
    where
        K: Into<Nibbles>,
    {
        self.invalidate();
        self.node.trie_delete(k)
    }

    fn hash(&self) -> H256 {
        root_hash(self)
    }

    fn cached_hash(&self) -> Option<H256> {
        *self.hash_cache.read()
    }

    fn cache_hash(&self, hash: H256) {
        *self.hash_cache.write() = Some(hash);
    }
}

impl Deref for HashedPartialTrie {
    type Target = Node<HashedPartialTrie>;

    fn deref(&self) -> &Self::Target {
        &self.node
    }
}

impl DerefMut for HashedPartialTrie {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.invalidate();
        &mut self.node
    }
}

impl Eq for HashedPartialTrie {}

impl PartialEq for HashedPartialTrie {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl<K, V> TryFromIterator<(K, V)> for HashedPartialTrie
where
    K: Into<Nibbles>,
    V: Into<ValOrHash>,
{
    fn try_from_iter<T: IntoIterator<Item = (K, V)>>(nodes: T) -> TrieOpResult<Self> {
        let mut trie = Self::default();
        trie.extend(nodes)?;
        Ok(trie)
    }
}
