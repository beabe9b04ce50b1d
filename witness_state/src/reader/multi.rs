use ethereum_types::{Address, H256};
use tracing::debug;

use super::StateReader;
use crate::{account::Account, StateError, StateResult};

/// Asks a list of readers in order and returns the first answer that is not
/// an error.
///
/// An absent account or a zero slot is an answer like any other: readers
/// further down the list are only asked when the ones before them fail.
#[derive(Debug)]
pub struct MultiReader {
    readers: Vec<Box<dyn StateReader>>,
}

impl MultiReader {
    pub fn new(readers: Vec<Box<dyn StateReader>>) -> Self {
        Self { readers }
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}

impl StateReader for MultiReader {
    fn account(&self, address: Address) -> StateResult<Option<Account>> {
        let mut errors = Vec::new();
        for (i, reader) in self.readers.iter().enumerate() {
            match reader.account(address) {
                Ok(account) => return Ok(account),
                Err(e) => {
                    debug!("Reader {} could not read account {:x}: {}", i, address, e);
                    errors.push(e);
                }
            }
        }

        Err(StateError::AllReadersFailed(errors))
    }

    fn storage(&mut self, address: Address, slot: H256) -> StateResult<H256> {
        let mut errors = Vec::new();
        for (i, reader) in self.readers.iter_mut().enumerate() {
            match reader.storage(address, slot) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!(
                        "Reader {} could not read slot {:x} of {:x}: {}",
                        i, slot, address, e
                    );
                    errors.push(e);
                }
            }
        }

        Err(StateError::AllReadersFailed(errors))
    }

    fn copy(&self) -> Box<dyn StateReader> {
        Box::new(Self {
            readers: self.readers.iter().map(|r| r.copy()).collect(),
        })
    }
}
