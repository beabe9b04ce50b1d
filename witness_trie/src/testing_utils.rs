use std::iter::{once, repeat};

use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};

use crate::{
    nibbles::{Nibble, Nibbles},
    partial_trie::{HashedPartialTrie, Node, PartialTrie, WrappedNode},
};

/// Some tests check that all values inserted are retrievable, and if we end up
/// generating multiple inserts for the same key, then these tests will fail.
/// Making the min key nibbles sufficiently high will significantly decrease the
/// chances of these collisions occurring.
const MIN_BYTES_FOR_VAR_KEY: usize = 5;

pub(crate) type TestInsertValEntry = (Nibbles, Vec<u8>);

// Don't want these exposed publicly, but they are useful for testing. Keys are
// read as hex digits without leading zeros, so `0x1234` is four nibbles.
impl From<u64> for Nibbles {
    fn from(k: u64) -> Self {
        let digits = format!("{:x}", k);
        match k {
            0 => Nibbles::default(),
            _ => Nibbles::from_nibble_slice(
                &digits
                    .chars()
                    .map(|c| c.to_digit(16).unwrap() as Nibble)
                    .collect::<Vec<_>>(),
            ),
        }
    }
}

impl From<i32> for Nibbles {
    fn from(k: i32) -> Self {
        u64::try_from(k).unwrap().into()
    }
}

pub(crate) fn common_setup() {
    // Try init since multiple tests calling `init` will cause an error.
    let _ = pretty_env_logger::try_init();
}

pub(crate) fn entry<K>(k: K) -> TestInsertValEntry
where
    K: Into<Nibbles>,
{
    (k.into(), vec![2])
}

/// Needed when replacing nodes with `Hash` nodes to ensure they are >= 32
/// bytes when RLP encoded.
pub(crate) fn large_entry<K>(k: K) -> TestInsertValEntry
where
    K: Into<Nibbles>,
{
    (k.into(), once(2).chain(repeat(255).take(32)).collect())
}

pub(crate) fn entry_with_value<K>(k: K, v: u8) -> TestInsertValEntry
where
    K: Into<Nibbles>,
{
    (k.into(), vec![v])
}

/// A full 64 nibble key that starts with the given hex digits and is padded
/// with `fill`.
pub(crate) fn padded_key(prefix: &str, fill: char) -> Nibbles {
    let padded: String = prefix.chars().chain(repeat(fill)).take(64).collect();
    padded.parse().unwrap()
}

/// A branch with a single child in slot `nibble`.
pub(crate) fn branch_at(nibble: Nibble, child: Node<HashedPartialTrie>) -> Node<HashedPartialTrie> {
    let mut children: [WrappedNode<HashedPartialTrie>; 16] =
        std::array::from_fn(|_| Node::Empty.into());
    children[nibble as usize] = child.into();

    Node::Branch {
        children,
        value: vec![],
    }
}

/// Two branches on the path `0x12` ending in a leaf whose fragment is a full
/// key, so the leaf sits two nibbles deeper than any key can reach. Every node
/// is referenced by hash.
pub(crate) fn overlong_leaf_trie() -> HashedPartialTrie {
    let leaf = Node::Leaf {
        nibbles: padded_key("", 'e'),
        value: large_entry(0).1,
    };

    HashedPartialTrie::new(branch_at(1, branch_at(2, leaf)))
}

pub(crate) fn generate_n_random_fixed_trie_value_entries(
    n: usize,
    seed: u64,
) -> impl Iterator<Item = TestInsertValEntry> {
    gen_n_random_trie_value_entries_common(n, seed, gen_fixed_nibbles)
}

pub(crate) fn generate_n_random_variable_trie_value_entries(
    n: usize,
    seed: u64,
) -> impl Iterator<Item = TestInsertValEntry> {
    gen_n_random_trie_value_entries_common(n, seed, gen_variable_nibbles)
}

pub(crate) fn generate_n_random_fixed_even_nibble_padded_trie_value_entries(
    n: usize,
    seed: u64,
) -> impl Iterator<Item = TestInsertValEntry> {
    gen_n_random_trie_value_entries_common(n, seed, gen_variable_nibbles_even_padded_nibbles)
}

fn gen_n_random_trie_value_entries_common<K: Fn(&mut StdRng) -> Nibbles>(
    n: usize,
    seed: u64,
    key_gen_f: K,
) -> impl Iterator<Item = TestInsertValEntry> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(move |_| (key_gen_f(&mut rng), gen_rand_u256_bytes(&mut rng)))
}

fn gen_fixed_nibbles(rng: &mut StdRng) -> Nibbles {
    let mut k_bytes = [0; 32];
    rng.fill_bytes(&mut k_bytes);

    Nibbles::from_bytes_be(&k_bytes).unwrap()
}

fn gen_variable_nibbles_even_padded_nibbles(rng: &mut StdRng) -> Nibbles {
    let n_bytes = rng.gen_range(MIN_BYTES_FOR_VAR_KEY..=32);
    let mut bytes = vec![0; n_bytes];
    rng.fill_bytes(&mut bytes);

    Nibbles::from_bytes_be(&bytes).unwrap()
}

fn gen_variable_nibbles(rng: &mut StdRng) -> Nibbles {
    let mut n = gen_variable_nibbles_even_padded_nibbles(rng);
    if rng.gen::<bool>() {
        n.truncate_n_nibbles_back_mut(1);
    }

    n
}

fn gen_rand_u256_bytes(rng: &mut StdRng) -> Vec<u8> {
    let num_bytes = 256 / 8;

    let mut buf = vec![0; num_bytes];
    rng.fill_bytes(&mut buf);

    buf
}
