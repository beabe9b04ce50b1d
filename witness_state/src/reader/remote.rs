use std::sync::Arc;

use ethereum_types::{Address, H256};
use tracing::trace;

use super::StateReader;
use crate::{account::Account, remote::RemoteNode, StateError, StateResult};

/// Reads the state of one block from a remote node.
///
/// The block must be final: nothing here notices a reorg.
#[derive(Clone)]
pub struct RemoteReader {
    remote: Arc<dyn RemoteNode>,
    block: u64,
    root: H256,
}

impl std::fmt::Debug for RemoteReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteReader")
            .field("block", &self.block)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl RemoteReader {
    pub fn new(remote: Arc<dyn RemoteNode>, block: u64, root: H256) -> Self {
        Self {
            remote,
            block,
            root,
        }
    }

    pub fn block(&self) -> u64 {
        self.block
    }

    pub fn root(&self) -> H256 {
        self.root
    }
}

impl StateReader for RemoteReader {
    fn account(&self, address: Address) -> StateResult<Option<Account>> {
        trace!("Fetching account {:x} at block {}", address, self.block);
        let proof = self
            .remote
            .get_proof(address, &[], self.block)
            .map_err(StateError::RemoteUnavailable)?;

        let account = proof.account()?;
        Ok((!account.is_empty()).then_some(account))
    }

    fn storage(&mut self, address: Address, slot: H256) -> StateResult<H256> {
        self.remote
            .storage_at(address, slot, self.block)
            .map_err(StateError::RemoteUnavailable)
    }

    fn copy(&self) -> Box<dyn StateReader> {
        Box::new(self.clone())
    }
}
