//! A fake chain that answers RPC requests from full in-memory tries.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};

use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;
use witness_common::{hashed_address, hashed_slot};
use witness_state::{
    account::{encode_storage_value, Account},
    proof_types::{AccountProof, HexBytes, StorageProof},
    remote::{BlockHeader, RemoteNode},
};
use witness_trie::{
    partial_trie::{HashedPartialTrie, PartialTrie},
    proof::generate_proof,
};

#[derive(Clone, Debug, Default)]
pub struct WorldAccount {
    pub nonce: u64,
    pub balance: U256,
    pub code: Vec<u8>,
    pub storage: BTreeMap<H256, H256>,
}

/// The plain state of one block.
#[derive(Clone, Debug, Default)]
pub struct World {
    pub accounts: BTreeMap<Address, WorldAccount>,
}

impl World {
    pub fn set_account(&mut self, address: Address, nonce: u64, balance: U256) -> &mut Self {
        let account = self.accounts.entry(address).or_default();
        account.nonce = nonce;
        account.balance = balance;
        self
    }

    pub fn set_code(&mut self, address: Address, code: Vec<u8>) -> &mut Self {
        self.accounts.entry(address).or_default().code = code;
        self
    }

    pub fn set_storage(&mut self, address: Address, slot: H256, value: H256) -> &mut Self {
        let storage = &mut self.accounts.entry(address).or_default().storage;
        if value.is_zero() {
            storage.remove(&slot);
        } else {
            storage.insert(slot, value);
        }
        self
    }

    pub fn remove_account(&mut self, address: Address) -> &mut Self {
        self.accounts.remove(&address);
        self
    }

    pub fn seal(&self) -> SealedWorld {
        let mut accounts = HashedPartialTrie::default();
        let mut storage = HashMap::new();
        let mut code = HashMap::new();

        for (address, world_account) in &self.accounts {
            let mut storage_trie = HashedPartialTrie::default();
            for (slot, value) in &world_account.storage {
                storage_trie
                    .insert(hashed_slot(*slot), encode_storage_value(*value))
                    .unwrap();
            }

            let account = Account::new(world_account.nonce, world_account.balance)
                .with_code(&world_account.code)
                .with_storage_root(storage_trie.hash());
            accounts
                .insert(hashed_address(*address), account.rlp_bytes())
                .unwrap();

            storage.insert(*address, storage_trie);
            code.insert(*address, world_account.code.clone());
        }

        SealedWorld {
            world: self.clone(),
            accounts,
            storage,
            code,
        }
    }
}

/// A [`World`] with its tries built.
#[derive(Clone, Debug)]
pub struct SealedWorld {
    pub world: World,
    pub accounts: HashedPartialTrie,
    pub storage: HashMap<Address, HashedPartialTrie>,
    pub code: HashMap<Address, Vec<u8>>,
}

impl SealedWorld {
    pub fn root(&self) -> H256 {
        self.accounts.hash()
    }

    pub fn account(&self, address: Address) -> Option<Account> {
        self.accounts
            .get(hashed_address(address))
            .map(|bytes| Account::from_rlp(bytes).unwrap())
    }

    pub fn storage_root(&self, address: Address) -> H256 {
        self.storage[&address].hash()
    }

    /// What `eth_getProof` answers for this state.
    pub fn proof(&self, address: Address, slots: &[H256]) -> AccountProof {
        let account_proof = to_hex(generate_proof(&self.accounts, hashed_address(address).into()));

        let Some(account) = self.account(address) else {
            return AccountProof {
                address,
                account_proof,
                balance: 0u64.into(),
                code_hash: H256::zero(),
                nonce: 0u64.into(),
                storage_hash: H256::zero(),
                storage_proof: slots
                    .iter()
                    .map(|slot| StorageProof {
                        key: *slot,
                        value: 0u64.into(),
                        proof: vec![],
                    })
                    .collect(),
            };
        };

        let storage_trie = &self.storage[&address];
        let storage_proof = slots
            .iter()
            .map(|slot| {
                let value = self.world.accounts[&address]
                    .storage
                    .get(slot)
                    .copied()
                    .unwrap_or_default();

                StorageProof {
                    key: *slot,
                    value: U256::from_big_endian(value.as_bytes()).into(),
                    proof: to_hex(generate_proof(storage_trie, hashed_slot(*slot).into())),
                }
            })
            .collect();

        AccountProof {
            address,
            account_proof,
            balance: account.balance.into(),
            code_hash: account.code_hash,
            nonce: account.nonce.into(),
            storage_hash: account.storage_root,
            storage_proof,
        }
    }
}

fn to_hex(proof: witness_trie::trie_ops::TrieOpResult<Vec<Vec<u8>>>) -> Vec<HexBytes> {
    proof.unwrap().into_iter().map(HexBytes::from).collect()
}

/// A chain whose block `i` has the state `states[i]`.
#[derive(Debug)]
pub struct LocalNode {
    pub chain_id: u64,
    pub blocks: Vec<(BlockHeader, SealedWorld)>,
}

impl LocalNode {
    pub fn new(chain_id: u64, states: &[World]) -> Self {
        let mut blocks: Vec<(BlockHeader, SealedWorld)> = Vec::new();
        for (number, world) in states.iter().enumerate() {
            let sealed = world.seal();
            let parent_hash = blocks.last().map(|(h, _)| h.hash).unwrap_or_default();
            let header = BlockHeader {
                number: number as u64,
                hash: keccak([parent_hash.as_bytes(), sealed.root().as_bytes()].concat()),
                parent_hash,
                state_root: sealed.root(),
            };
            blocks.push((header, sealed));
        }

        Self { chain_id, blocks }
    }

    pub fn header(&self, number: u64) -> &BlockHeader {
        &self.blocks[number as usize].0
    }

    pub fn state(&self, number: u64) -> &SealedWorld {
        &self.blocks[number as usize].1
    }

    fn sealed(&self, block: u64) -> anyhow::Result<&SealedWorld> {
        self.blocks
            .get(block as usize)
            .map(|(_, s)| s)
            .ok_or_else(|| anyhow::anyhow!("unknown block {block}"))
    }
}

impl RemoteNode for LocalNode {
    fn chain_id(&self) -> anyhow::Result<u64> {
        Ok(self.chain_id)
    }

    fn block_by_number(&self, number: u64) -> anyhow::Result<Option<BlockHeader>> {
        Ok(self.blocks.get(number as usize).map(|(h, _)| h.clone()))
    }

    fn get_proof(
        &self,
        address: Address,
        slots: &[H256],
        block: u64,
    ) -> anyhow::Result<AccountProof> {
        Ok(self.sealed(block)?.proof(address, slots))
    }

    fn code_at(&self, address: Address, block: u64) -> anyhow::Result<Vec<u8>> {
        Ok(self
            .sealed(block)?
            .code
            .get(&address)
            .cloned()
            .unwrap_or_default())
    }

    fn storage_at(&self, address: Address, slot: H256, block: u64) -> anyhow::Result<H256> {
        Ok(self
            .sealed(block)?
            .world
            .accounts
            .get(&address)
            .and_then(|a| a.storage.get(&slot).copied())
            .unwrap_or_default())
    }
}

pub fn address(i: u64) -> Address {
    Address::from_low_u64_be(i)
}

pub fn word(v: u64) -> H256 {
    H256::from_low_u64_be(v)
}
