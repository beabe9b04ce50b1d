//! Decoding of raw trie node encodings, as returned by `eth_getProof` or read
//! out of a node store.
//!
//! Decoding is stateless. Children embedded in their parent (encodings shorter
//! than 32 bytes) are decoded recursively, children referenced by hash become
//! [`Node::Hash`] and are left for the caller to resolve.

use ethereum_types::H256;
use rlp::Rlp;
use thiserror::Error;

use crate::{
    nibbles::{FromHexPrefixError, Nibbles},
    partial_trie::{Node, PartialTrie, WrappedNode},
    trie_ops::new_branch_child_arr,
};

/// Errors encountered when decoding a raw trie node.
#[derive(Clone, Debug, Error)]
pub enum DecodeNodeError {
    /// The bytes are not valid RLP.
    #[error("invalid rlp: {0}")]
    Rlp(#[from] rlp::DecoderError),

    /// The key of a short node has a bad hex prefix encoding.
    #[error("invalid short node key: {0}")]
    HexPrefix(#[from] FromHexPrefixError),

    /// Nodes are lists of 2 or 17 items.
    #[error("expected a list of 2 or 17 items, found {0}")]
    UnexpectedItemCount(usize),

    /// A node encoding must be an RLP list.
    #[error("expected an rlp list")]
    NotAList,

    /// A child reference that is neither empty, a 32 byte hash, nor an
    /// embedded node.
    #[error("child reference of {0} bytes is neither a hash nor empty")]
    InvalidReference(usize),

    /// An extension that does not point at anything.
    #[error("extension node with an empty child")]
    EmptyExtensionChild,

    /// Extra bytes after the node's RLP list.
    #[error("{0} trailing bytes after the node encoding")]
    TrailingBytes(usize),

    /// A short node whose fragment would take its path past a full key.
    #[error("node path of {0} nibbles is longer than any key")]
    PathTooLong(usize),
}

/// Decodes a single raw node encoding.
pub fn decode_node<N: PartialTrie>(bytes: &[u8]) -> Result<Node<N>, DecodeNodeError> {
    let rlp = Rlp::new(bytes);
    let total = rlp.payload_info()?.total();
    if total > bytes.len() {
        return Err(rlp::DecoderError::RlpIsTooShort.into());
    }
    if total < bytes.len() {
        return Err(DecodeNodeError::TrailingBytes(bytes.len() - total));
    }

    decode_list(&rlp)
}

fn decode_list<N: PartialTrie>(rlp: &Rlp) -> Result<Node<N>, DecodeNodeError> {
    if !rlp.is_list() {
        return Err(DecodeNodeError::NotAList);
    }

    match rlp.item_count()? {
        17 => decode_branch(rlp),
        2 => decode_short(rlp),
        n => Err(DecodeNodeError::UnexpectedItemCount(n)),
    }
}

fn decode_branch<N: PartialTrie>(rlp: &Rlp) -> Result<Node<N>, DecodeNodeError> {
    let mut children = new_branch_child_arr();
    for (i, child) in children.iter_mut().enumerate() {
        *child = decode_child(&rlp.at(i)?)?;
    }

    Ok(Node::Branch {
        children,
        value: rlp.at(16)?.data()?.to_vec(),
    })
}

fn decode_short<N: PartialTrie>(rlp: &Rlp) -> Result<Node<N>, DecodeNodeError> {
    let (nibbles, is_leaf) = Nibbles::from_hex_prefix_encoding(rlp.at(0)?.data()?)?;
    let second = rlp.at(1)?;

    if is_leaf {
        return Ok(Node::Leaf {
            nibbles,
            value: second.data()?.to_vec(),
        });
    }

    let child = decode_child::<N>(&second)?;
    if matches!(***child, Node::Empty) {
        return Err(DecodeNodeError::EmptyExtensionChild);
    }

    Ok(Node::Extension { nibbles, child })
}

fn decode_child<N: PartialTrie>(rlp: &Rlp) -> Result<WrappedNode<N>, DecodeNodeError> {
    if rlp.is_list() {
        return decode_list(rlp).map(Into::into);
    }

    let data = rlp.data()?;
    let node = match data.len() {
        0 => Node::Empty,
        32 => Node::Hash(H256::from_slice(data)),
        len => return Err(DecodeNodeError::InvalidReference(len)),
    };

    Ok(node.into())
}

#[cfg(test)]
mod tests {
    use ethereum_types::H256;

    use super::{decode_node, DecodeNodeError};
    use crate::{
        partial_trie::{HashedPartialTrie, Node, PartialTrie},
        testing_utils::{
            common_setup, entry, generate_n_random_fixed_trie_value_entries, large_entry,
        },
        trie_hashing::encode_node,
        trie_ops::TrieOpResult,
        utils::TryFromIterator,
    };

    type TestNode = Node<HashedPartialTrie>;

    /// Replaces every child with an encoding of at least 32 bytes by a `Hash`
    /// node, which is what decoding the stored encoding yields.
    fn collapse_children(node: &TestNode) -> TestNode {
        fn collapse(child: &TestNode) -> TestNode {
            match encode_node(child) {
                Some(enc) if enc.len() >= 32 => Node::Hash(keccak_hash::keccak(&enc)),
                _ => collapse_children(child),
            }
        }

        match node {
            Node::Branch { children, value } => {
                let mut collapsed = children.clone();
                for (slot, child) in collapsed.iter_mut().zip(children.iter()) {
                    *slot = collapse(child).into();
                }
                Node::Branch {
                    children: collapsed,
                    value: value.clone(),
                }
            }
            Node::Extension { nibbles, child } => Node::Extension {
                nibbles: *nibbles,
                child: collapse(child).into(),
            },
            other => other.clone(),
        }
    }

    #[test]
    fn decoding_a_stored_encoding_gives_the_node_with_hashed_children() -> TrieOpResult<()> {
        common_setup();
        let trie =
            HashedPartialTrie::try_from_iter(generate_n_random_fixed_trie_value_entries(100, 1))?;

        let encoded = encode_node(&*trie).unwrap();
        let decoded: TestNode = decode_node(&encoded).unwrap();

        assert_eq!(decoded, collapse_children(&trie));
        assert_eq!(HashedPartialTrie::new(decoded).hash(), trie.hash());

        Ok(())
    }

    #[test]
    fn embedded_children_are_decoded_inline() -> TrieOpResult<()> {
        common_setup();
        let trie = HashedPartialTrie::try_from_iter([entry(0x1), entry(0x2), large_entry(0x3)])?;

        let decoded: TestNode = decode_node(&encode_node(&*trie).unwrap()).unwrap();

        match decoded {
            Node::Branch { children, .. } => {
                assert!(matches!(&***children[1], Node::Leaf { .. }));
                assert!(matches!(&***children[2], Node::Leaf { .. }));
                assert!(matches!(&***children[3], Node::Hash(_)));
                assert!(matches!(&***children[4], Node::Empty));
            }
            other => panic!("expected a branch, got {:?}", other),
        }

        Ok(())
    }

    #[test]
    fn short_nodes_keep_their_key_and_kind() {
        common_setup();
        let ext: TestNode = Node::Extension {
            nibbles: "0xab1".parse().unwrap(),
            child: Node::Hash(H256::repeat_byte(0x11)).into(),
        };
        let leaf: TestNode = Node::Leaf {
            nibbles: "0xab12".parse().unwrap(),
            value: vec![0x0a],
        };

        for node in [ext, leaf] {
            let decoded: TestNode = decode_node(&encode_node(&node).unwrap()).unwrap();
            assert_eq!(decoded, node);
        }
    }

    #[test]
    fn malformed_encodings_are_rejected() {
        common_setup();
        let decode = |bytes: &[u8]| decode_node::<HashedPartialTrie>(bytes);

        assert!(matches!(decode(&[0x80]), Err(DecodeNodeError::NotAList)));
        assert!(matches!(
            decode(&rlp::encode_list::<Vec<u8>, _>(&[vec![1], vec![2], vec![3]])),
            Err(DecodeNodeError::UnexpectedItemCount(3))
        ));
        assert!(matches!(
            decode(&rlp::encode_list::<Vec<u8>, _>(&[vec![0x00], vec![0xaa; 5]])),
            Err(DecodeNodeError::InvalidReference(5))
        ));
        assert!(matches!(
            decode(&rlp::encode_list::<Vec<u8>, _>(&[vec![0x00], vec![]])),
            Err(DecodeNodeError::EmptyExtensionChild)
        ));
        assert!(matches!(
            decode(&rlp::encode_list::<Vec<u8>, _>(&[vec![0x40], vec![1]])),
            Err(DecodeNodeError::HexPrefix(_))
        ));
        assert!(decode(&[0xc2, 0x80]).is_err());

        let mut trailing = rlp::encode_list::<Vec<u8>, _>(&[vec![0x20], vec![1]]).to_vec();
        trailing.push(0);
        assert!(matches!(decode(&trailing), Err(DecodeNodeError::TrailingBytes(1))));
    }
}
