//! Single-endpoint relay client.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use super::transport::AuthTransport;
use super::types::*;
use crate::broadcaster::BundleRelay;
use crate::bundle::{Bundle, BundleLeg, BundleSigner, BundleTransaction, SignedTransaction};
use crate::chain::{ChainProvider, ReceiptSummary};
use crate::conflict::BundleSimulator;
use crate::error::{BundleError, RelayResult, Result};
use crate::inclusion::{BundleResolution, InclusionWatcher, TransactionResolution};

/// Private transactions are watched this many blocks past submission unless
/// the caller sets `max_block_number`.
pub const DEFAULT_PRIVATE_TX_BLOCKS: u64 = 25;

#[derive(Debug, Clone, Default)]
pub struct PrivateTransactionOptions {
    pub max_block_number: Option<u64>,
    pub simulation_timestamp: Option<u64>,
}

#[derive(Clone)]
pub struct RelayClient {
    transport: Arc<AuthTransport>,
    chain: Arc<dyn ChainProvider>,
    signer: BundleSigner,
    watcher: InclusionWatcher,
}

impl RelayClient {
    pub fn new(
        transport: AuthTransport,
        chain: Arc<dyn ChainProvider>,
        watcher: InclusionWatcher,
    ) -> Self {
        Self {
            transport: Arc::new(transport),
            signer: BundleSigner::new(chain.clone()),
            chain,
            watcher,
        }
    }

    pub fn url(&self) -> &Url {
        self.transport.url()
    }

    pub fn auth_address(&self) -> Address {
        self.transport.auth_address()
    }

    /// `eth_callBundle`. The state block defaults to `latest`.
    pub async fn simulate(
        &self,
        signed: &[Bytes],
        block: BlockTag,
        state_block: Option<BlockTag>,
        timestamp: Option<u64>,
        coinbase: Option<Address>,
    ) -> Result<RelayResult<SimulationResult>> {
        let block_number = match block {
            BlockTag::Number(n) => n,
            BlockTag::Latest => self.chain.block_number().await?,
        };
        let params = CallBundleParams {
            txs: signed.to_vec(),
            block_number: hex_quantity(block_number),
            state_block_number: state_block.unwrap_or(BlockTag::Latest),
            timestamp,
            coinbase,
        };
        let result: RelayResult<SimulationResult> =
            self.transport.request("eth_callBundle", [params]).await?;
        Ok(result.map(SimulationResult::recompute_total_gas))
    }

    /// `eth_sendBundle` for already signed transactions.
    pub async fn send_raw_bundle(
        &self,
        signed: &[Bytes],
        target_block: u64,
        options: BundleOptions,
    ) -> Result<RelayResult<PendingBundle>> {
        let bundle = Bundle::from_raw(signed)?;
        let min_timestamp = options.min_timestamp;
        let params = SendBundleParams {
            txs: bundle.raw(),
            block_number: hex_quantity(target_block),
            options,
        };

        let response: RelayResult<Option<SendBundleResponse>> =
            self.transport.request("eth_sendBundle", [params]).await?;
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!("❌ {} rejected bundle for block {}: {}", self.url(), target_block, e);
                return Ok(Err(e));
            }
        };

        let bundle_hash = response
            .and_then(|r| r.bundle_hash)
            .unwrap_or_else(|| bundle.hash());
        info!("📦 {} accepted bundle {} for block {}", self.url(), bundle_hash, target_block);

        Ok(Ok(PendingBundle {
            submission: BundleSubmission {
                bundle_hash,
                transactions: bundle.bundle_transactions(),
                target_block,
            },
            client: self.clone(),
            min_timestamp,
        }))
    }

    /// Signs, simulates against `target_block`, and submits only if no
    /// transaction errors or reverts.
    pub async fn send_bundle(
        &self,
        legs: &[BundleLeg],
        target_block: u64,
        options: BundleOptions,
    ) -> Result<RelayResult<PendingBundle>> {
        let signed = self.signer.sign_bundle_for_block(legs, target_block).await?;

        let simulation = self
            .simulate(&signed, BlockTag::Number(target_block), None, options.min_timestamp, None)
            .await?
            .map_err(|e| BundleError::SimulationFailed(e.to_string()))?;
        if let Some(revert) = simulation.first_revert() {
            return Err(BundleError::SimulationFailed(format!(
                "tx {} reverts: {:?}",
                revert.tx_hash, revert.outcome
            )));
        }

        self.send_raw_bundle(&signed, target_block, options).await
    }

    /// `eth_cancelBundle`; returns the hashes of the cancelled bundles.
    pub async fn cancel_bundle(&self, replacement_uuid: Uuid) -> Result<RelayResult<Vec<B256>>> {
        let result: RelayResult<Option<Vec<B256>>> = self
            .transport
            .request("eth_cancelBundle", [CancelBundleParams { replacement_uuid }])
            .await?;
        Ok(result.map(Option::unwrap_or_default))
    }

    pub async fn send_private_transaction(
        &self,
        leg: &BundleLeg,
        options: PrivateTransactionOptions,
    ) -> Result<RelayResult<PendingPrivateTransaction>> {
        let start_block = self.chain.block_number().await?;
        let raw = self.signer.sign_leg(leg).await?;
        let tx = SignedTransaction::decode(raw.clone())?;

        let params = SendPrivateTransactionParams {
            tx: raw,
            max_block_number: options.max_block_number.map(hex_quantity),
        };
        let response: RelayResult<Value> = self
            .transport
            .request("eth_sendPrivateTransaction", [params])
            .await?;
        if let Err(e) = response {
            return Ok(Err(e));
        }

        info!("🔒 {} accepted private tx {}", self.url(), tx.hash());
        Ok(Ok(PendingPrivateTransaction {
            transaction: BundleTransaction::from(&tx),
            start_block,
            max_block: options
                .max_block_number
                .unwrap_or(start_block.saturating_add(DEFAULT_PRIVATE_TX_BLOCKS)),
            simulation_timestamp: options.simulation_timestamp,
            client: self.clone(),
        }))
    }

    pub async fn cancel_private_transaction(&self, tx_hash: B256) -> Result<RelayResult<bool>> {
        let result: RelayResult<Value> = self
            .transport
            .request(
                "eth_cancelPrivateTransaction",
                [CancelPrivateTransactionParams { tx_hash }],
            )
            .await?;
        Ok(result.map(|_| true))
    }

    pub async fn get_user_stats(&self) -> Result<RelayResult<UserStats>> {
        let block = self.chain.block_number().await?;
        self.transport
            .request("flashbots_getUserStats", [hex_quantity(block)])
            .await
    }

    pub async fn get_user_stats_v2(&self) -> Result<RelayResult<UserStatsV2>> {
        let block = self.chain.block_number().await?;
        self.transport
            .request(
                "flashbots_getUserStatsV2",
                [UserStatsV2Params {
                    block_number: hex_quantity(block),
                }],
            )
            .await
    }

    pub async fn get_bundle_stats(
        &self,
        bundle_hash: B256,
        block_number: u64,
    ) -> Result<RelayResult<BundleStats>> {
        self.transport
            .request(
                "flashbots_getBundleStats",
                [BundleStatsParams {
                    bundle_hash,
                    block_number: hex_quantity(block_number),
                }],
            )
            .await
    }

    pub async fn get_bundle_stats_v2(
        &self,
        bundle_hash: B256,
        block_number: u64,
    ) -> Result<RelayResult<BundleStatsV2>> {
        self.transport
            .request(
                "flashbots_getBundleStatsV2",
                [BundleStatsParams {
                    bundle_hash,
                    block_number: hex_quantity(block_number),
                }],
            )
            .await
    }

    async fn receipts(&self, hashes: impl Iterator<Item = B256>) -> Result<Vec<Option<ReceiptSummary>>> {
        try_join_all(hashes.map(|hash| self.chain.transaction_receipt(hash))).await
    }
}

#[async_trait]
impl BundleRelay for RelayClient {
    fn endpoint(&self) -> String {
        self.url().to_string()
    }

    async fn submit_bundle(
        &self,
        signed: Vec<Bytes>,
        target_block: u64,
        options: BundleOptions,
    ) -> Result<RelayResult<BundleSubmission>> {
        Ok(self
            .send_raw_bundle(&signed, target_block, options)
            .await?
            .map(|pending| pending.submission))
    }
}

#[async_trait]
impl BundleSimulator for RelayClient {
    async fn simulate_at(
        &self,
        signed: &[Bytes],
        block: u64,
        state_block: u64,
    ) -> Result<RelayResult<SimulationResult>> {
        self.simulate(
            signed,
            BlockTag::Number(block),
            Some(BlockTag::Number(state_block)),
            None,
            None,
        )
        .await
    }
}

/// A bundle a relay accepted. Nothing is watched until [`PendingBundle::wait`].
pub struct PendingBundle {
    pub submission: BundleSubmission,
    client: RelayClient,
    min_timestamp: Option<u64>,
}

impl PendingBundle {
    pub async fn wait(&self) -> Result<BundleResolution> {
        self.client
            .watcher
            .wait_for_bundle(&self.submission.transactions, self.submission.target_block)
            .await
    }

    pub async fn simulate(&self) -> Result<RelayResult<SimulationResult>> {
        let signed: Vec<Bytes> = self
            .submission
            .transactions
            .iter()
            .map(|tx| tx.signed_transaction.clone())
            .collect();
        self.client
            .simulate(
                &signed,
                BlockTag::Number(self.submission.target_block),
                None,
                self.min_timestamp,
                None,
            )
            .await
    }

    pub async fn receipts(&self) -> Result<Vec<Option<ReceiptSummary>>> {
        self.client
            .receipts(self.submission.transactions.iter().map(|tx| tx.hash))
            .await
    }
}

pub struct PendingPrivateTransaction {
    pub transaction: BundleTransaction,
    pub start_block: u64,
    pub max_block: u64,
    simulation_timestamp: Option<u64>,
    client: RelayClient,
}

impl PendingPrivateTransaction {
    pub async fn wait(&self) -> Result<TransactionResolution> {
        self.client
            .watcher
            .wait_for_transaction(self.transaction.hash, self.max_block)
            .await
    }

    pub async fn simulate(&self) -> Result<RelayResult<SimulationResult>> {
        self.client
            .simulate(
                &[self.transaction.signed_transaction.clone()],
                BlockTag::Number(self.start_block),
                None,
                self.simulation_timestamp,
                None,
            )
            .await
    }

    pub async fn receipts(&self) -> Result<Vec<Option<ReceiptSummary>>> {
        self.client
            .receipts(std::iter::once(self.transaction.hash))
            .await
    }
}
