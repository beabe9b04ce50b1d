//! Node encoding and Merkle hashing.

use bytes::Bytes;
use ethereum_types::H256;
use keccak_hash::keccak;
use rlp::RlpStream;

use crate::partial_trie::{Node, PartialTrie};

/// What a parent node holds for a child: the child's encoding when it is
/// shorter than a hash, otherwise the hash of that encoding.
enum ChildRef {
    Inline(Bytes),
    Digest(H256),
}

impl ChildRef {
    fn append_to(&self, stream: &mut RlpStream) {
        match self {
            ChildRef::Inline(enc) => stream.append_raw(enc, 1),
            ChildRef::Digest(h) => stream.append(&h.as_bytes()),
        };
    }
}

/// Hashes a trie, filling in the hash caches of the nodes it visits.
pub(crate) fn root_hash<N: PartialTrie>(trie: &N) -> H256 {
    match child_ref(trie) {
        ChildRef::Inline(enc) => keccak(enc),
        ChildRef::Digest(h) => h,
    }
}

fn child_ref<N: PartialTrie>(trie: &N) -> ChildRef {
    if let Some(h) = trie.cached_hash() {
        return ChildRef::Digest(h);
    }

    match encode_or_hash(&**trie) {
        Err(h) => ChildRef::Digest(h),
        Ok(enc) if enc.len() < 32 => ChildRef::Inline(enc),
        Ok(enc) => {
            let h = keccak(&enc);
            trie.cache_hash(h);
            ChildRef::Digest(h)
        }
    }
}

/// Returns the full RLP encoding of a node, the bytes an Ethereum client
/// stores under the node's hash.
///
/// Children whose own encoding is at least 32 bytes are referenced by hash,
/// smaller ones are embedded. Returns `None` for a `Hash` node, whose
/// encoding is not known.
pub fn encode_node<N: PartialTrie>(node: &Node<N>) -> Option<Bytes> {
    encode_or_hash(node).ok()
}

/// The encoding of `node`, or its hash if that is all there is.
fn encode_or_hash<N: PartialTrie>(node: &Node<N>) -> Result<Bytes, H256> {
    let mut stream;
    match node {
        Node::Empty => return Ok(Bytes::from_static(&rlp::NULL_RLP)),
        Node::Hash(h) => return Err(*h),
        Node::Branch { children, value } => {
            stream = RlpStream::new_list(17);
            for child in children.iter() {
                child_ref(&***child).append_to(&mut stream);
            }
            stream.append(value);
        }
        Node::Extension { nibbles, child } => {
            stream = RlpStream::new_list(2);
            stream.append(&nibbles.to_hex_prefix_encoding(false));
            child_ref(&***child).append_to(&mut stream);
        }
        Node::Leaf { nibbles, value } => {
            stream = RlpStream::new_list(2);
            stream.append(&nibbles.to_hex_prefix_encoding(true));
            stream.append(value);
        }
    }

    Ok(stream.out().freeze())
}
