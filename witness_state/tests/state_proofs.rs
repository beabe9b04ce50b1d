mod common;

use std::sync::Arc;

use common::{address, word, World};
use ethereum_types::{Address, H256, U256};
use witness_common::{eth_to_wei, hashed_address, hashed_slot, EMPTY_CODE_HASH};
use witness_state::{
    account::{encode_storage_value, Account},
    proof_types::{AccountProof, HexBytes, StorageProof},
    reader::{StateReader, TrieReader},
    rpc_db::{LocalTrie, StateTrie},
    state_proofs::{node_set_from_state_proofs, node_set_from_state_transition_proofs},
    StateError,
};
use witness_trie::{
    nibbles::Nibbles,
    node_set::{NodeSetError, TrieOwner},
    partial_trie::{HashedPartialTrie, Node, PartialTrie, WrappedNode},
    proof::generate_proof,
    store::MemoryNodeStore,
};

type TrieNode = Node<HashedPartialTrie>;

fn branch(children: impl IntoIterator<Item = (u8, TrieNode)>) -> TrieNode {
    let mut slots: [WrappedNode<HashedPartialTrie>; 16] =
        std::array::from_fn(|_| TrieNode::Empty.into());
    for (nibble, child) in children {
        slots[nibble as usize] = child.into();
    }

    Node::Branch {
        children: slots,
        value: vec![],
    }
}

fn hex_proof(proof: Vec<Vec<u8>>) -> Vec<HexBytes> {
    proof.into_iter().map(HexBytes::from).collect()
}

/// An account behind an extension and a branch in the world-state trie, with
/// one slot right below the root branch of its storage trie.
fn case_a() -> (H256, AccountProof) {
    let address: Address = "0x4aa30c1c2e7b9e1fe7d9da6e5f5b0a4a6bd8c0ec".parse().unwrap();
    let slot = H256::zero();

    let slot_key = Nibbles::from(hashed_slot(slot));
    let first = slot_key.get_nibble(0);
    let storage = HashedPartialTrie::new(branch([
        (
            first,
            Node::Leaf {
                nibbles: slot_key.truncate_n_nibbles_front(1),
                value: encode_storage_value(word(10)),
            },
        ),
        ((first + 1) % 16, Node::Hash(H256::repeat_byte(0x5a))),
    ]));

    let account = Account {
        nonce: 1,
        balance: eth_to_wei(U256::one()),
        storage_root: storage.hash(),
        code_hash: EMPTY_CODE_HASH,
    };

    let key = Nibbles::from(hashed_address(address));
    let (prefix, rest) = key.split_at_idx(2);
    let slot_nibble = rest.get_nibble(0);
    let world = HashedPartialTrie::new(Node::Extension {
        nibbles: prefix,
        child: branch([
            (
                slot_nibble,
                Node::Leaf {
                    nibbles: rest.truncate_n_nibbles_front(1),
                    value: account.rlp_bytes(),
                },
            ),
            ((slot_nibble + 7) % 16, Node::Hash(H256::repeat_byte(0x77))),
        ])
        .into(),
    });

    let account_proof = generate_proof(&world, key).unwrap();
    let storage_proof = generate_proof(&storage, slot_key).unwrap();
    assert_eq!(account_proof.len(), 3);
    assert_eq!(storage_proof.len(), 2);

    let proof = AccountProof {
        address,
        account_proof: hex_proof(account_proof),
        balance: account.balance.into(),
        code_hash: account.code_hash,
        nonce: account.nonce.into(),
        storage_hash: account.storage_root,
        storage_proof: vec![StorageProof {
            key: slot,
            value: 10u64.into(),
            proof: hex_proof(storage_proof),
        }],
    };

    (world.hash(), proof)
}

#[test]
fn case_a_verifies_to_the_claimed_account_and_slot() {
    let (root, proof) = case_a();
    // Through the wire format, as a node would send it.
    let proof: AccountProof =
        serde_json::from_str(&serde_json::to_string(&proof).unwrap()).unwrap();

    let set = node_set_from_state_proofs(root, &[proof.clone()]).unwrap();

    let accounts = set.get(&TrieOwner::Account).unwrap();
    assert_eq!(accounts.len(), 3);
    let leaf = accounts.leaves().values().next().unwrap();
    assert_eq!(Account::from_rlp(leaf).unwrap(), proof.account().unwrap());

    let storage = set.get(&TrieOwner::storage(proof.address)).unwrap();
    assert_eq!(storage.len(), 2);

    let mut store = MemoryNodeStore::new();
    assert_eq!(set.flush(&mut store).unwrap(), 5);

    let mut reader = TrieReader::new(Arc::new(store), root).unwrap();
    let account = reader.account(proof.address).unwrap().unwrap();
    assert_eq!(account.balance, eth_to_wei(U256::one()));
    assert_eq!(account.nonce, 1);
    assert_eq!(account.code_hash, proof.code_hash);
    assert_eq!(account.storage_root, proof.storage_hash);
    assert_eq!(reader.storage(proof.address, H256::zero()).unwrap(), word(10));
}

#[test]
fn a_tampered_proof_is_rejected() {
    let (root, mut proof) = case_a();
    let leaf = proof.account_proof.last_mut().unwrap();
    let last = leaf.0.len() - 1;
    leaf.0[last] ^= 1;

    assert!(matches!(
        node_set_from_state_proofs(root, &[proof]),
        Err(StateError::NodeSet(NodeSetError::Proof { .. }))
    ));
}

#[test]
fn a_proof_against_another_root_is_rejected() {
    let (_, proof) = case_a();

    assert!(node_set_from_state_proofs(H256::repeat_byte(1), &[proof]).is_err());
}

/// Accounts `1..=8`. Account 3 holds two slots.
fn pre_world() -> World {
    let mut world = World::default();
    for i in 1..=8 {
        world.set_account(address(i), i, U256::from(1000 * i));
    }
    world
        .set_storage(address(3), word(1), word(0x11))
        .set_storage(address(3), word(2), word(0x22));
    world
}

#[test]
fn separate_proofs_of_one_account_keep_all_their_slots() {
    let state = pre_world().seal();
    let proofs = [
        state.proof(address(3), &[word(1)]),
        state.proof(address(3), &[word(2)]),
    ];

    let set = node_set_from_state_proofs(state.root(), &proofs).unwrap();
    let storage = set.get(&TrieOwner::storage(address(3))).unwrap();
    assert_eq!(storage.leaves().len(), 2);

    let mut store = MemoryNodeStore::new();
    set.flush(&mut store).unwrap();

    let mut reader = TrieReader::new(Arc::new(store), state.root()).unwrap();
    assert_eq!(reader.storage(address(3), word(1)).unwrap(), word(0x11));
    assert_eq!(reader.storage(address(3), word(2)).unwrap(), word(0x22));
}

#[test]
fn transition_proofs_replay_deletions_to_the_post_root() {
    let pre_world = pre_world();
    let mut post_world = pre_world.clone();
    post_world
        .remove_account(address(1))
        .set_account(address(2), 3, U256::from(1))
        .set_storage(address(3), word(1), H256::zero());

    let pre = pre_world.seal();
    let post = post_world.seal();

    // Account 3's second slot and all other accounts are never touched.
    let touched = [
        (address(1), vec![]),
        (address(2), vec![]),
        (address(3), vec![word(1)]),
    ];
    let pre_proofs: Vec<_> = touched.iter().map(|(a, s)| pre.proof(*a, s)).collect();
    let post_proofs: Vec<_> = touched.iter().map(|(a, s)| post.proof(*a, s)).collect();

    let set =
        node_set_from_state_transition_proofs(pre.root(), post.root(), &pre_proofs, &post_proofs)
            .unwrap();
    let mut store = MemoryNodeStore::new();
    set.flush(&mut store).unwrap();

    let mut storage =
        LocalTrie::open(TrieOwner::storage(address(3)), pre.storage_root(address(3)), &store)
            .unwrap();
    storage.update_storage(word(1), H256::zero()).unwrap();
    assert_eq!(storage.hash(), post.storage_root(address(3)));

    let mut accounts = LocalTrie::open(TrieOwner::Account, pre.root(), &store).unwrap();
    accounts
        .update_account(address(2), &post.account(address(2)).unwrap())
        .unwrap();
    accounts
        .update_account(address(3), &post.account(address(3)).unwrap())
        .unwrap();
    accounts.delete_account(address(1)).unwrap();

    assert_eq!(accounts.hash(), post.root());
}

#[test]
fn without_post_proofs_a_hashed_out_sibling_cannot_collapse() {
    let pre_world = pre_world();
    let mut post_world = pre_world.clone();
    post_world.set_storage(address(3), word(1), H256::zero());

    let pre = pre_world.seal();
    let post = post_world.seal();

    let set = node_set_from_state_proofs(pre.root(), &[pre.proof(address(3), &[word(1)])]).unwrap();
    let mut store = MemoryNodeStore::new();
    set.flush(&mut store).unwrap();

    let mut storage =
        LocalTrie::open(TrieOwner::storage(address(3)), pre.storage_root(address(3)), &store)
            .unwrap();
    storage.update_storage(word(1), H256::zero()).unwrap();

    assert_ne!(storage.hash(), post.storage_root(address(3)));
}
