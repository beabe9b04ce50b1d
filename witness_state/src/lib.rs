//! World state access for stateless block execution.
//!
//! The same execution logic has to run against a live node while a block is
//! being prepared and against a proof-derived partial state afterwards. This
//! crate provides both sides:
//! - [`state_proofs`] turns `eth_getProof` responses into the node sets that
//!   make up a snapshot, including the orphan nodes deletions need.
//! - [`reader`] is the [`StateReader`] hierarchy over local tries, flat
//!   snapshots and remote nodes.
//! - [`rpc_db`] is the state database handed to the executor during the
//!   preflight pass.
//! - [`preflight`] fetches everything one block needs and flushes it into a
//!   node store.

pub mod account;
pub mod env;
pub mod error;
pub mod preflight;
pub mod proof_types;
pub mod reader;
pub mod remote;
pub mod rpc_db;
pub mod state_proofs;
pub mod tracing;

pub use account::Account;
pub use error::{StateError, StateResult};
pub use reader::StateReader;

/// Like `#[serde(with = "::hex")]`, but tolerates and emits leading `0x`
/// prefixes
mod hex {
    use serde::{de::Error as _, Deserialize as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer, T>(data: T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: hex::ToHex,
    {
        let s = data.encode_hex::<String>();
        serializer.serialize_str(&format!("0x{}", s))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, T>(deserializer: D) -> Result<T, D::Error>
    where
        T: hex::FromHex,
        T::Error: std::fmt::Display,
    {
        let s = String::deserialize(deserializer)?;
        match s.strip_prefix("0x") {
            Some(rest) => T::from_hex(rest),
            None => T::from_hex(&*s),
        }
        .map_err(D::Error::custom)
    }
}
