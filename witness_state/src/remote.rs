//! The boundary to a remote execution-layer node.

use std::{future::IntoFuture, marker::PhantomData, time::Duration};

use alloy::{
    primitives::B256,
    providers::{Provider, RootProvider},
    rpc::types::{
        eth::{BlockTransactionsKind, EIP1186AccountProofResponse, Header},
        BlockNumberOrTag,
    },
    transports::{http::ReqwestTransport, Transport, TransportResult},
};
use alloy_compat::Compat as _;
use anyhow::{anyhow, ensure, Context as _};
use ethereum_types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, warn};
use url::Url;

use crate::proof_types::{AccountProof, HexBytes, StorageProof};

/// The fields of a block header the snapshot pipeline needs.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub number: u64,
    pub hash: H256,
    pub parent_hash: H256,
    pub state_root: H256,
}

impl From<&Header> for BlockHeader {
    fn from(header: &Header) -> Self {
        Self {
            number: header.number,
            hash: header.hash.compat(),
            parent_hash: header.parent_hash.compat(),
            state_root: header.state_root.compat(),
        }
    }
}

/// Synchronous access to the few RPC methods state reads need.
///
/// Calls block the current thread. Every block is addressed by number and is
/// assumed to be final, so answers never change.
#[cfg_attr(test, mockall::automock)]
pub trait RemoteNode: Send + Sync {
    fn chain_id(&self) -> anyhow::Result<u64>;

    fn block_by_number(&self, number: u64) -> anyhow::Result<Option<BlockHeader>>;

    /// `eth_getProof` for an account and some of its slots.
    fn get_proof(&self, address: Address, slots: &[H256], block: u64)
        -> anyhow::Result<AccountProof>;

    fn code_at(&self, address: Address, block: u64) -> anyhow::Result<Vec<u8>>;

    fn storage_at(&self, address: Address, slot: H256, block: u64) -> anyhow::Result<H256>;
}

/// Settings for talking to a remote node.
#[derive(Clone, Debug)]
pub struct RemoteConfig {
    pub rpc_url: Url,
    /// Upper bound for a single request.
    pub timeout: Duration,
}

/// A [`RemoteNode`] backed by an alloy [`Provider`].
///
/// Requests run on the given tokio runtime and block until they complete or
/// time out, so this must not be used from within an async context; run it
/// under `spawn_blocking` instead.
pub struct ProviderNode<ProviderT, TransportT> {
    provider: ProviderT,
    runtime: Handle,
    timeout: Duration,
    _phantom: PhantomData<TransportT>,
}

impl ProviderNode<RootProvider<ReqwestTransport>, ReqwestTransport> {
    /// Connects to an HTTP endpoint.
    pub fn connect(config: &RemoteConfig, runtime: Handle) -> Self {
        debug!("Using remote node at {}", config.rpc_url);
        Self::new(
            RootProvider::new_http(config.rpc_url.clone()),
            runtime,
            config.timeout,
        )
    }
}

impl<ProviderT, TransportT> ProviderNode<ProviderT, TransportT>
where
    ProviderT: Provider<TransportT>,
    TransportT: Transport + Clone,
{
    pub fn new(provider: ProviderT, runtime: Handle, timeout: Duration) -> Self {
        Self {
            provider,
            runtime,
            timeout,
            _phantom: PhantomData,
        }
    }

    fn block_on<F, R>(&self, method: &str, request: F) -> anyhow::Result<R>
    where
        F: IntoFuture<Output = TransportResult<R>>,
    {
        let request = request.into_future();
        self.runtime
            .block_on(async { tokio::time::timeout(self.timeout, request).await })
            .map_err(|_| {
                warn!("{} timed out after {:?}", method, self.timeout);
                anyhow!("{method} timed out after {:?}", self.timeout)
            })?
            .with_context(|| format!("{method} request failed"))
    }
}

impl<ProviderT, TransportT> RemoteNode for ProviderNode<ProviderT, TransportT>
where
    ProviderT: Provider<TransportT>,
    TransportT: Transport + Clone,
{
    fn chain_id(&self) -> anyhow::Result<u64> {
        self.block_on("eth_chainId", self.provider.get_chain_id())
    }

    fn block_by_number(&self, number: u64) -> anyhow::Result<Option<BlockHeader>> {
        let block = self.block_on(
            "eth_getBlockByNumber",
            self.provider.get_block(
                BlockNumberOrTag::Number(number).into(),
                BlockTransactionsKind::Hashes,
            ),
        )?;

        Ok(block.map(|block| BlockHeader::from(&block.header)))
    }

    fn get_proof(
        &self,
        address: Address,
        slots: &[H256],
        block: u64,
    ) -> anyhow::Result<AccountProof> {
        let keys = slots.iter().map(|slot| B256::from(slot.0)).collect();
        let response = self
            .block_on(
                "eth_getProof",
                self.provider
                    .get_proof(address.compat(), keys)
                    .block_id(block.into()),
            )
            .with_context(|| format!("no proof for {address:x} at block {block}"))?;

        account_proof_from_response(response, slots)
    }

    fn code_at(&self, address: Address, block: u64) -> anyhow::Result<Vec<u8>> {
        let code = self.block_on(
            "eth_getCode",
            self.provider
                .get_code_at(address.compat())
                .block_id(block.into()),
        )?;

        Ok(code.to_vec())
    }

    fn storage_at(&self, address: Address, slot: H256, block: u64) -> anyhow::Result<H256> {
        let value = self.block_on(
            "eth_getStorageAt",
            self.provider
                .get_storage_at(address.compat(), alloy::primitives::U256::from_be_bytes(slot.0))
                .block_id(block.into()),
        )?;

        Ok(H256(value.to_be_bytes::<32>()))
    }
}

/// Converts an `eth_getProof` response for `slots`, which the node answers in
/// request order.
fn account_proof_from_response(
    response: EIP1186AccountProofResponse,
    slots: &[H256],
) -> anyhow::Result<AccountProof> {
    ensure!(
        response.storage_proof.len() == slots.len(),
        "asked for {} storage proofs of {:x}, got {}",
        slots.len(),
        response.address,
        response.storage_proof.len()
    );

    let hex_proof = |nodes: Vec<alloy::primitives::Bytes>| -> Vec<HexBytes> {
        nodes.into_iter().map(|node| HexBytes(node.to_vec())).collect()
    };
    let balance: U256 = response.balance.compat();
    let storage_proof = slots
        .iter()
        .zip(response.storage_proof)
        .map(|(slot, proof)| {
            let value: U256 = proof.value.compat();
            StorageProof {
                key: *slot,
                value: value.into(),
                proof: hex_proof(proof.proof),
            }
        })
        .collect();

    Ok(AccountProof {
        address: response.address.compat(),
        account_proof: hex_proof(response.account_proof),
        balance: balance.into(),
        code_hash: response.code_hash.compat(),
        nonce: response.nonce.into(),
        storage_hash: response.storage_hash.compat(),
        storage_proof,
    })
}
