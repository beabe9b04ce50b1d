//! Define [`Nibbles`] and how to convert bytes, hex prefix encodings and
//! strings into nibbles.

use std::{
    cmp::Ordering,
    fmt::{self, Debug, Display, LowerHex},
    ops::Range,
    str::FromStr,
};

use bytes::{Bytes, BytesMut};
use ethereum_types::H256;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

// Use a whole byte for a Nibble just for convenience
/// A Nibble has 4 bits and is stored as `u8`.
pub type Nibble = u8;

/// The longest key any Ethereum trie uses (a 32 byte hash).
pub const MAX_NIBBLES: usize = 64;

const MULTIPLE_NIBBLES_APPEND_ASSERT_ERR_MSG: &str =
    "Attempted to create a nibbles sequence longer than 64!";
const SINGLE_NIBBLE_APPEND_ASSERT_ERR_MSG: &str =
    "Attempted to append a single nibble that was greater than 15!";

#[derive(Clone, Debug, Eq, Error, PartialEq, Hash)]
/// Errors encountered when converting from `Bytes` to `Nibbles`.
pub enum BytesToNibblesError {
    #[error("Tried constructing `Nibbles` from a zero byte slice")]
    /// The size is zero.
    ZeroSizedKey,

    #[error("Tried constructing `Nibbles` from a byte slice with more than 32 bytes (len: {0})")]
    /// The slice is too large.
    TooManyBytes(usize),
}

#[derive(Clone, Debug, Eq, Error, PartialEq, Hash)]
/// Errors encountered when converting to hex prefix encoding to nibbles.
pub enum FromHexPrefixError {
    #[error("Tried to convert an empty hex prefix byte string into `Nibbles`")]
    /// There is not even a flag byte.
    Empty,

    #[error("Tried to convert a hex prefix byte string into `Nibbles` with invalid flags at the start: {0:#04b}")]
    /// The hex prefix encoding flag is invalid.
    InvalidFlags(Nibble),

    #[error("Tried to convert a hex prefix byte string into `Nibbles` that was longer than 33 bytes: (length: {1}, bytes: {0})")]
    /// The hex prefix encoding is too large.
    TooLong(String, usize),
}

#[derive(Clone, Debug, Eq, Error, PartialEq, Hash)]
/// Errors encountered when parsing `Nibbles` from a hex string.
pub enum StrToNibblesError {
    #[error("Invalid hex character {0:?} in nibble string")]
    /// A character that is not a hex digit.
    InvalidChar(char),

    #[error("Nibble string is longer than 64 nibbles (len: {0})")]
    /// Too many characters.
    TooLong(usize),
}

/// A sequence of nibbles, the key type of every trie operation.
///
/// Nibbles past `count` are always zero, so the derived equality and hashing
/// only look at the meaningful prefix. Ordering is lexicographic over the
/// nibbles, which keeps trie paths in `BTreeMap`s in depth-first order.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Nibbles {
    count: usize,
    nibs: [Nibble; MAX_NIBBLES],
}

impl Default for Nibbles {
    fn default() -> Self {
        Self {
            count: 0,
            nibs: [0; MAX_NIBBLES],
        }
    }
}

impl Ord for Nibbles {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_slice().cmp(other.as_slice())
    }
}

impl PartialOrd for Nibbles {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for Nibbles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as LowerHex>::fmt(self, f)
    }
}

impl Debug for Nibbles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nibbles")
            .field("count", &self.count)
            .field("nibbles", &format!("{self:x}"))
            .finish()
    }
}

impl LowerHex for Nibbles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("0x")?;
        for nib in self.as_slice() {
            write!(f, "{nib:x}")?;
        }

        Ok(())
    }
}

impl FromStr for Nibbles {
    type Err = StrToNibblesError;

    /// Parses a hex string with or without a preceding "0x". Every character
    /// becomes one nibble, so leading zeros are kept.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped_str = s.strip_prefix("0x").unwrap_or(s);
        if stripped_str.len() > MAX_NIBBLES {
            return Err(StrToNibblesError::TooLong(stripped_str.len()));
        }

        let mut nibbles = Nibbles::default();
        for c in stripped_str.chars() {
            let nib = c.to_digit(16).ok_or(StrToNibblesError::InvalidChar(c))?;
            nibbles.push_nibble_back(nib as Nibble);
        }

        Ok(nibbles)
    }
}

impl From<H256> for Nibbles {
    fn from(v: H256) -> Self {
        Self::from_h256_be(v)
    }
}

impl Serialize for Nibbles {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Nibbles {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Nibbles::from_str(&s).map_err(D::Error::custom)
    }
}

impl Nibbles {
    /// Creates `Nibbles` from big endian bytes.
    ///
    /// Returns an error if the byte slice is empty or is longer than `32`
    /// bytes.
    pub fn from_bytes_be(bytes: &[u8]) -> Result<Self, BytesToNibblesError> {
        match bytes.len() {
            0 => Err(BytesToNibblesError::ZeroSizedKey),
            len if len > MAX_NIBBLES / 2 => Err(BytesToNibblesError::TooManyBytes(len)),
            _ => Ok(Self::from_bytes_unchecked(bytes)),
        }
    }

    /// Creates `Nibbles` from a big endian `H256`.
    pub fn from_h256_be(v: H256) -> Self {
        Self::from_bytes_unchecked(v.as_bytes())
    }

    /// Creates a single nibble `Nibbles`.
    pub fn from_nibble(n: Nibble) -> Self {
        let mut nibbles = Self::default();
        nibbles.push_nibble_back(n);
        nibbles
    }

    /// Creates `Nibbles` from a slice where every element is one nibble.
    ///
    /// # Panics
    /// Panics if any element is greater than `15` or if there are more than
    /// `64` elements.
    pub fn from_nibble_slice(nibs: &[Nibble]) -> Self {
        let mut nibbles = Self::default();
        for &nib in nibs {
            nibbles.push_nibble_back(nib);
        }

        nibbles
    }

    fn from_bytes_unchecked(bytes: &[u8]) -> Self {
        let mut nibbles = Self::default();
        for b in bytes {
            nibbles.nibs[nibbles.count] = b >> 4;
            nibbles.nibs[nibbles.count + 1] = b & 0xf;
            nibbles.count += 2;
        }

        nibbles
    }

    /// The number of nibbles in this sequence.
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Returns whether or not this `Nibbles` contains actual nibbles.
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The nibbles as a slice, one nibble per element.
    pub fn as_slice(&self) -> &[Nibble] {
        &self.nibs[..self.count]
    }

    /// Iterates over the nibbles from front to back.
    pub fn iter(&self) -> impl Iterator<Item = Nibble> + '_ {
        self.as_slice().iter().copied()
    }

    /// Gets the nibble at the given index.
    ///
    /// # Panics
    /// Panics if the index is out of range.
    pub fn get_nibble(&self, idx: usize) -> Nibble {
        assert!(
            idx < self.count,
            "Tried getting nibble {idx} of a nibble sequence of length {}",
            self.count
        );
        self.nibs[idx]
    }

    /// Removes and returns the first nibble.
    ///
    /// # Panics
    /// Panics if the `Nibbles` is empty.
    pub fn pop_next_nibble_front(&mut self) -> Nibble {
        let nib = self.get_nibble(0);
        self.truncate_n_nibbles_front_mut(1);
        nib
    }

    /// Pushes a nibble to the back.
    ///
    /// # Panics
    /// Panics if the nibble is greater than `15` or the sequence is full.
    pub fn push_nibble_back(&mut self, n: Nibble) {
        self.nibble_append_safety_asserts(n);
        self.nibs[self.count] = n;
        self.count += 1;
    }

    /// Gets the nibbles in the given range.
    ///
    /// # Panics
    /// Panics if the range is out of bounds.
    pub fn get_nibble_range(&self, range: Range<usize>) -> Nibbles {
        Self::from_nibble_slice(&self.as_slice()[range])
    }

    /// Drops the first `n` nibbles, returning the rest.
    pub fn truncate_n_nibbles_front(&self, n: usize) -> Nibbles {
        let mut nibbles = *self;
        nibbles.truncate_n_nibbles_front_mut(n);
        nibbles
    }

    /// In-place version of [`Self::truncate_n_nibbles_front`].
    pub fn truncate_n_nibbles_front_mut(&mut self, n: usize) {
        let n = n.min(self.count);
        self.nibs.copy_within(n..self.count, 0);
        self.nibs[self.count - n..self.count].fill(0);
        self.count -= n;
    }

    /// Drops the last `n` nibbles in place.
    pub fn truncate_n_nibbles_back_mut(&mut self, n: usize) {
        let n = n.min(self.count);
        self.nibs[self.count - n..self.count].fill(0);
        self.count -= n;
    }

    /// Returns `true` if `prefix` is a prefix of (or equal to) `self`.
    pub fn starts_with(&self, prefix: &Nibbles) -> bool {
        prefix.count <= self.count && self.nibs[..prefix.count] == prefix.nibs[..prefix.count]
    }

    /// Splits the `Nibbles` at the given index, returning two `Nibbles`.
    /// Specifically, if `0x1234` is split at `1`, we get `0x1` and `0x234`.
    ///
    /// # Panics
    /// Panics if the `idx` is out of range.
    pub fn split_at_idx(&self, idx: usize) -> (Nibbles, Nibbles) {
        (self.split_at_idx_prefix(idx), self.split_at_idx_postfix(idx))
    }

    /// Split the `Nibbles` at the given index but only return the prefix.
    ///
    /// # Panics
    /// Panics if the `idx` is out of range.
    pub fn split_at_idx_prefix(&self, idx: usize) -> Nibbles {
        self.get_nibble_range(0..idx)
    }

    /// Split the `Nibbles` at the given index but only return the postfix.
    ///
    /// # Panics
    /// Panics if the `idx` is out of range.
    pub fn split_at_idx_postfix(&self, idx: usize) -> Nibbles {
        self.get_nibble_range(idx..self.count)
    }

    /// Merge two `Nibbles` together. `self` will be the prefix.
    ///
    /// # Panics
    /// Panics if merging the `Nibbles` causes an overflow (total nibbles > 64).
    pub fn merge_nibbles(&self, post: &Nibbles) -> Nibbles {
        let new_count = self.count + post.count;
        assert!(new_count <= MAX_NIBBLES, "{}", MULTIPLE_NIBBLES_APPEND_ASSERT_ERR_MSG);

        let mut nibbles = *self;
        nibbles.nibs[self.count..new_count].copy_from_slice(post.as_slice());
        nibbles.count = new_count;
        nibbles
    }

    /// Finds the nibble idx that differs between two nibbles. If there is no
    /// difference up to the shorter length, returns that length.
    pub fn find_nibble_idx_that_differs_between_nibbles_different_lengths(
        n1: &Nibbles,
        n2: &Nibbles,
    ) -> usize {
        n1.iter()
            .zip(n2.iter())
            .position(|(a, b)| a != b)
            .unwrap_or_else(|| n1.count.min(n2.count))
    }

    /// Converts [`Nibbles`] to hex-prefix encoding (AKA "compact").
    /// The first nibble of the result encodes whether the node is a leaf
    /// (terminator) and whether the number of nibbles is odd.
    pub fn to_hex_prefix_encoding(&self, is_leaf: bool) -> Bytes {
        let odd = self.count % 2 == 1;
        let flags: u8 = (u8::from(odd) | (u8::from(is_leaf) << 1)) << 4;

        let mut bytes = BytesMut::with_capacity(self.count / 2 + 1);
        let rest = match odd {
            true => {
                bytes.extend_from_slice(&[flags | self.nibs[0]]);
                &self.as_slice()[1..]
            }
            false => {
                bytes.extend_from_slice(&[flags]);
                self.as_slice()
            }
        };

        for pair in rest.chunks(2) {
            bytes.extend_from_slice(&[(pair[0] << 4) | pair[1]]);
        }

        bytes.freeze()
    }

    /// Converts a hex prefix byte string ("AKA "compact") into `Nibbles`,
    /// also returning whether the terminator (leaf) flag was set.
    pub fn from_hex_prefix_encoding(
        hex_prefix_bytes: &[u8],
    ) -> Result<(Self, bool), FromHexPrefixError> {
        let (flag_byte, rest) = hex_prefix_bytes
            .split_first()
            .ok_or(FromHexPrefixError::Empty)?;

        if hex_prefix_bytes.len() > MAX_NIBBLES / 2 + 1 {
            return Err(FromHexPrefixError::TooLong(
                hex::encode(hex_prefix_bytes),
                hex_prefix_bytes.len(),
            ));
        }

        // is_odd --> 0b01
        // is_leaf --> 0b10
        let flag_bits = flag_byte >> 4;
        let (is_leaf, is_odd) = match flag_bits {
            0b00 => (false, false),
            0b01 => (false, true),
            0b10 => (true, false),
            0b11 => (true, true),
            _ => return Err(FromHexPrefixError::InvalidFlags(flag_bits)),
        };

        // An even encoding must pad the flag nibble with zero.
        if !is_odd && flag_byte & 0xf != 0 {
            return Err(FromHexPrefixError::InvalidFlags(flag_bits));
        }

        // 32 full bytes plus an odd nibble would not fit in a key.
        if is_odd && rest.len() == MAX_NIBBLES / 2 {
            return Err(FromHexPrefixError::TooLong(
                hex::encode(hex_prefix_bytes),
                hex_prefix_bytes.len(),
            ));
        }

        let mut nibbles = Nibbles::default();
        if is_odd {
            nibbles.push_nibble_back(flag_byte & 0xf);
        }
        for b in rest {
            nibbles.push_nibble_back(b >> 4);
            nibbles.push_nibble_back(b & 0xf);
        }

        Ok((nibbles, is_leaf))
    }

    /// Returns the minimum number of bytes needed to represent these `Nibbles`.
    pub const fn min_bytes(&self) -> usize {
        (self.count + 1) / 2
    }

    /// Returns the nibbles bytes in big-endian format. An odd count is padded
    /// with a zero nibble at the front.
    pub fn bytes_be(&self) -> Vec<u8> {
        let mut padded = Vec::with_capacity(self.count + 1);
        if self.count % 2 == 1 {
            padded.push(0);
        }
        padded.extend_from_slice(self.as_slice());

        padded.chunks(2).map(|p| (p[0] << 4) | p[1]).collect()
    }

    /// Converts a full 64 nibble key back into a `H256`.
    pub fn try_into_h256(&self) -> Option<H256> {
        (self.count == MAX_NIBBLES).then(|| H256::from_slice(&self.bytes_be()))
    }

    fn nibble_append_safety_asserts(&self, n: Nibble) {
        assert!(
            self.count < MAX_NIBBLES,
            "{}",
            MULTIPLE_NIBBLES_APPEND_ASSERT_ERR_MSG
        );
        assert!(n < 16, "{}", SINGLE_NIBBLE_APPEND_ASSERT_ERR_MSG);
    }
}
