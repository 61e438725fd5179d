//! Chain access used by the signer, watchers and analyzer.
//!
//! Everything above this module talks to `dyn ChainProvider`, so tests can
//! drive block arrival and receipts deterministically while production runs
//! on an alloy HTTP provider.

use std::{pin::Pin, sync::Arc, time::Duration};

use alloy::network::ReceiptResponse;
use alloy::rpc::types::TransactionRequest;
use alloy_eips::{eip1898::BlockId, BlockNumberOrTag};
use alloy_primitives::{Address, Bytes, B256};
use alloy_provider::Provider;
use async_trait::async_trait;
use futures::{stream, Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;

/// Strictly increasing sequence of new block numbers.
pub type BlockStream = Pin<Box<dyn Stream<Item = u64> + Send>>;

/// The parts of a block header and body the watchers care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSummary {
    pub number: u64,
    pub timestamp: u64,
    pub base_fee_per_gas: Option<u64>,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub transactions: Vec<B256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptSummary {
    pub transaction_hash: B256,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub success: bool,
}

#[async_trait]
pub trait ChainProvider: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    async fn block_number(&self) -> Result<u64>;

    /// Confirmed transaction count of `account` at the latest block.
    async fn transaction_count(&self, account: Address) -> Result<u64>;

    async fn block(&self, number: u64) -> Result<Option<BlockSummary>>;

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptSummary>>;

    async fn raw_transaction(&self, hash: B256) -> Result<Option<Bytes>>;

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64>;

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256>;

    /// New block numbers as they are observed. Dropping the stream ends the
    /// subscription.
    fn subscribe_blocks(&self) -> BlockStream;
}

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// [`ChainProvider`] backed by an alloy provider. Block arrival is detected
/// by polling `eth_blockNumber`.
#[derive(Clone)]
pub struct RpcChain<P>
where
    P: Provider + Clone + 'static,
{
    provider: Arc<P>,
    poll_interval: Duration,
}

impl<P> RpcChain<P>
where
    P: Provider + Clone + 'static,
{
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[async_trait]
impl<P> ChainProvider for RpcChain<P>
where
    P: Provider + Clone + 'static,
{
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.provider.get_chain_id().await?)
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn transaction_count(&self, account: Address) -> Result<u64> {
        Ok(self
            .provider
            .get_transaction_count(account)
            .block_id(BlockId::latest())
            .await?)
    }

    async fn block(&self, number: u64) -> Result<Option<BlockSummary>> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await?;
        Ok(block.map(|block| BlockSummary {
            number: block.header.number,
            timestamp: block.header.timestamp,
            base_fee_per_gas: block.header.base_fee_per_gas,
            gas_used: block.header.gas_used,
            gas_limit: block.header.gas_limit,
            transactions: block.transactions.hashes().collect(),
        }))
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptSummary>> {
        let receipt = self.provider.get_transaction_receipt(hash).await?;
        Ok(receipt.map(|r| ReceiptSummary {
            transaction_hash: r.transaction_hash(),
            block_number: r.block_number(),
            gas_used: r.gas_used(),
            success: r.status(),
        }))
    }

    async fn raw_transaction(&self, hash: B256) -> Result<Option<Bytes>> {
        Ok(self.provider.get_raw_transaction_by_hash(hash).await?)
    }

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64> {
        Ok(self.provider.estimate_gas(request.clone()).await?)
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256> {
        let pending = self.provider.send_raw_transaction(raw).await?;
        Ok(*pending.tx_hash())
    }

    fn subscribe_blocks(&self) -> BlockStream {
        let provider = self.provider.clone();
        let interval = self.poll_interval;

        // First poll yields the current head; later polls fill any gap so
        // consumers never skip a block number.
        let numbers = stream::unfold(None::<u64>, move |last| {
            let provider = provider.clone();
            async move {
                loop {
                    match provider.get_block_number().await {
                        Ok(head) => match last {
                            None => return Some((vec![head], Some(head))),
                            Some(prev) if head > prev => {
                                debug!("new block(s) {}..={}", prev + 1, head);
                                return Some(((prev + 1..=head).collect::<Vec<_>>(), Some(head)));
                            }
                            Some(_) => {}
                        },
                        Err(e) => warn!("⚠️ block poll failed, retrying: {}", e),
                    }
                    tokio::time::sleep(interval).await;
                }
            }
        })
        .flat_map(stream::iter);

        Box::pin(numbers)
    }
}

/// HTTP JSON-RPC chain access polled every `poll_interval`.
pub fn connect_http(rpc_url: url::Url, poll_interval: Duration) -> Arc<dyn ChainProvider> {
    let provider = alloy::providers::ProviderBuilder::new().connect_http(rpc_url);
    Arc::new(RpcChain::new(Arc::new(provider)).with_poll_interval(poll_interval))
}
