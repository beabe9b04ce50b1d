use std::{
    collections::BTreeMap,
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use ethereum_types::{Address, H256};
use thiserror::Error;
use witness_common::{hashed_address, hashed_slot};

use super::StateReader;
use crate::{
    account::{decode_storage_value, encode_storage_value, Account},
    StateResult,
};

/// Why a snapshot cannot answer.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SnapshotError {
    #[error("snapshot is stale")]
    Stale,

    /// The key lies beyond the point the snapshot has been generated up to.
    #[error("snapshot is not generated up to {key}")]
    NotGenerated { key: String },
}

/// A flat view of the state, keyed by hashed address and hashed slot, holding
/// the values exactly as the tries do.
pub trait Snapshot: Debug + Send + Sync {
    fn account(&self, hashed_address: H256) -> Result<Option<Vec<u8>>, SnapshotError>;

    fn storage(
        &self,
        hashed_address: H256,
        hashed_slot: H256,
    ) -> Result<Option<Vec<u8>>, SnapshotError>;
}

/// A [`Snapshot`] held in memory.
///
/// Generation proceeds in key order; while it runs, the marker holds the last
/// generated key (the hashed address, followed by the hashed slot for storage)
/// and anything after it cannot be answered yet.
#[derive(Debug, Default)]
pub struct MemorySnapshot {
    accounts: BTreeMap<H256, Vec<u8>>,
    storage: BTreeMap<(H256, H256), Vec<u8>>,
    generated_up_to: Option<Vec<u8>>,
    stale: AtomicBool,
}

impl MemorySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_account(&mut self, address: Address, account: &Account) {
        self.accounts
            .insert(hashed_address(address), account.rlp_bytes());
    }

    /// Zero words are not stored, like in a storage trie.
    pub fn insert_storage(&mut self, address: Address, slot: H256, value: H256) {
        let key = (hashed_address(address), hashed_slot(slot));
        if value.is_zero() {
            self.storage.remove(&key);
        } else {
            self.storage.insert(key, encode_storage_value(value));
        }
    }

    /// Marks generation as in progress up to `key`, or complete with `None`.
    pub fn set_generation_marker(&mut self, key: Option<Vec<u8>>) {
        self.generated_up_to = key;
    }

    /// Marks the snapshot as no longer matching the state; every later read
    /// fails.
    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    fn check_readable(&self, key: &[u8]) -> Result<(), SnapshotError> {
        if self.is_stale() {
            return Err(SnapshotError::Stale);
        }

        match &self.generated_up_to {
            Some(marker) if key > marker.as_slice() => Err(SnapshotError::NotGenerated {
                key: hex::encode(key),
            }),
            _ => Ok(()),
        }
    }
}

impl Snapshot for MemorySnapshot {
    fn account(&self, hashed_address: H256) -> Result<Option<Vec<u8>>, SnapshotError> {
        self.check_readable(hashed_address.as_bytes())?;
        Ok(self.accounts.get(&hashed_address).cloned())
    }

    fn storage(
        &self,
        hashed_address: H256,
        hashed_slot: H256,
    ) -> Result<Option<Vec<u8>>, SnapshotError> {
        let key = [hashed_address.as_bytes(), hashed_slot.as_bytes()].concat();
        self.check_readable(&key)?;
        Ok(self.storage.get(&(hashed_address, hashed_slot)).cloned())
    }
}

/// Reads a flat [`Snapshot`].
///
/// Snapshot errors are returned as they are, so a [`super::MultiReader`] can
/// move on to the next reader.
#[derive(Clone, Debug)]
pub struct SnapshotReader {
    snapshot: Arc<dyn Snapshot>,
}

impl SnapshotReader {
    pub fn new(snapshot: Arc<dyn Snapshot>) -> Self {
        Self { snapshot }
    }
}

impl StateReader for SnapshotReader {
    fn account(&self, address: Address) -> StateResult<Option<Account>> {
        match self.snapshot.account(hashed_address(address))? {
            Some(bytes) => Ok(Some(Account::from_rlp(&bytes)?)),
            None => Ok(None),
        }
    }

    fn storage(&mut self, address: Address, slot: H256) -> StateResult<H256> {
        match self
            .snapshot
            .storage(hashed_address(address), hashed_slot(slot))?
        {
            Some(bytes) => Ok(decode_storage_value(&bytes)?),
            None => Ok(H256::zero()),
        }
    }

    fn copy(&self) -> Box<dyn StateReader> {
        Box::new(self.clone())
    }
}
