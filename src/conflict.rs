//! Explains why a bundle missed its block by replaying the bundles that did
//! land there in front of it.

use std::{sync::Arc, time::Duration};

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::chain::ChainProvider;
use crate::error::{BundleError, RelayResult, Result};
use crate::pricing::{calculate_bundle_pricing, GasPricing, MinerPayment};
use crate::relay::types::lenient;
use crate::relay::{SimulationResult, TransactionSimulation};

pub const DEFAULT_BLOCKS_API_URL: &str = "https://blocks.flashbots.net/v1/blocks";

#[async_trait]
pub trait BundleSimulator: Send + Sync {
    /// Simulates `signed` as if mined in `block`, on top of the state after
    /// `state_block`.
    async fn simulate_at(
        &self,
        signed: &[Bytes],
        block: u64,
        state_block: u64,
    ) -> Result<RelayResult<SimulationResult>>;
}

/// Read-only view of historical blocks and the bundles they contained.
#[async_trait]
pub trait BlocksIndex: Send + Sync {
    async fn fetch_block(&self, number: u64) -> Result<BlocksApiResponse>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlocksApiResponse {
    pub latest_block_number: u64,
    #[serde(default)]
    pub blocks: Vec<BlocksApiBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlocksApiBlock {
    pub block_number: u64,
    #[serde(default)]
    pub miner: Option<Address>,
    #[serde(default, deserialize_with = "lenient::u256")]
    pub miner_reward: U256,
    #[serde(default, deserialize_with = "lenient::u256")]
    pub coinbase_transfers: U256,
    #[serde(default)]
    pub gas_used: u64,
    #[serde(default)]
    pub transactions: Vec<BlocksApiTransaction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocksApiTransaction {
    pub transaction_hash: B256,
    #[serde(default)]
    pub tx_index: u64,
    #[serde(default)]
    pub bundle_type: Option<String>,
    pub bundle_index: u64,
    #[serde(default)]
    pub block_number: u64,
    #[serde(default)]
    pub eoa_address: Option<Address>,
    #[serde(default)]
    pub to_address: Option<Address>,
    #[serde(default)]
    pub gas_used: u64,
    #[serde(default, deserialize_with = "lenient::u256")]
    pub gas_price: U256,
    #[serde(default, deserialize_with = "lenient::u256")]
    pub coinbase_transfer: U256,
    #[serde(default, deserialize_with = "lenient::u256")]
    pub total_miner_reward: U256,
}

impl MinerPayment for BlocksApiTransaction {
    fn gas_used(&self) -> u64 {
        self.gas_used
    }

    fn total_miner_reward(&self) -> U256 {
        self.total_miner_reward
    }

    fn eth_sent_to_coinbase(&self) -> U256 {
        self.coinbase_transfer
    }
}

/// HTTP client for the blocks API (`GET <base>?block_number=N`).
#[derive(Debug, Clone)]
pub struct BlocksApiClient {
    client: reqwest::Client,
    base_url: Url,
}

impl BlocksApiClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl BlocksIndex for BlocksApiClient {
    async fn fetch_block(&self, number: u64) -> Result<BlocksApiResponse> {
        let response = self
            .client
            .get(self.base_url.clone())
            .query(&[("block_number", number)])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConflictType {
    NoConflict,
    NonceCollision,
    Error,
    CoinbasePayment,
    GasUsed,
    NoBundlesInBlock,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDetails {
    pub conflict_type: ConflictType,
    pub initial_simulation: SimulationResult,
    pub conflicting_bundle: Vec<BlocksApiTransaction>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    #[serde(flatten)]
    pub details: ConflictDetails,
    pub target_bundle_gas_pricing: GasPricing,
    pub conflicting_bundle_gas_pricing: Option<GasPricing>,
}

pub struct ConflictAnalyzer {
    simulator: Arc<dyn BundleSimulator>,
    index: Arc<dyn BlocksIndex>,
    chain: Arc<dyn ChainProvider>,
}

impl ConflictAnalyzer {
    pub fn new(
        simulator: Arc<dyn BundleSimulator>,
        index: Arc<dyn BlocksIndex>,
        chain: Arc<dyn ChainProvider>,
    ) -> Self {
        Self {
            simulator,
            index,
            chain,
        }
    }

    /// Finds the conflict and prices both bundles at the target block's base fee.
    pub async fn conflicting_bundle(&self, signed: &[Bytes], target_block: u64) -> Result<ConflictReport> {
        let base_fee = self
            .chain
            .block(target_block)
            .await?
            .and_then(|b| b.base_fee_per_gas)
            .map(U256::from)
            .unwrap_or_default();

        let details = self.find_conflict(signed, target_block).await?;
        let target_bundle_gas_pricing =
            calculate_bundle_pricing(&details.initial_simulation.results, base_fee);
        let conflicting_bundle_gas_pricing = (!details.conflicting_bundle.is_empty())
            .then(|| calculate_bundle_pricing(&details.conflicting_bundle, base_fee));

        Ok(ConflictReport {
            details,
            target_bundle_gas_pricing,
            conflicting_bundle_gas_pricing,
        })
    }

    pub async fn find_conflict(&self, signed: &[Bytes], target_block: u64) -> Result<ConflictDetails> {
        if signed.is_empty() {
            return Err(BundleError::EmptyBundle);
        }
        let state_block = target_block.saturating_sub(1);

        let (initial, index) = tokio::try_join!(
            self.simulator.simulate_at(signed, target_block, state_block),
            self.index.fetch_block(target_block),
        )?;

        if index.latest_block_number <= target_block {
            return Err(BundleError::BlocksIndexBehind {
                target: target_block,
                latest: index.latest_block_number,
            });
        }
        let initial = match initial {
            Ok(simulation) if simulation.first_revert().is_none() => simulation,
            _ => return Err(BundleError::TargetBundleReverts(target_block)),
        };

        let Some(block) = index
            .blocks
            .into_iter()
            .find(|b| b.block_number == target_block && !b.transactions.is_empty())
        else {
            info!("block {} carried no bundles", target_block);
            return Ok(ConflictDetails {
                conflict_type: ConflictType::NoBundlesInBlock,
                initial_simulation: initial,
                conflicting_bundle: Vec::new(),
            });
        };

        let last_bundle = block
            .transactions
            .iter()
            .map(|tx| tx.bundle_index)
            .max()
            .unwrap_or_default();
        let mut prefix: Vec<Bytes> = Vec::new();

        for bundle_index in 0..=last_bundle {
            let competing: Vec<BlocksApiTransaction> = block
                .transactions
                .iter()
                .filter(|tx| tx.bundle_index == bundle_index)
                .cloned()
                .collect();
            let raws = try_join_all(competing.iter().map(|tx| self.raw_transaction(tx.transaction_hash))).await?;
            prefix.extend(raws);

            let mut replay = prefix.clone();
            replay.extend_from_slice(signed);
            debug!("replaying {} competing tx(s) ahead of the bundle (bundle #{})", prefix.len(), bundle_index);

            let simulation = match self.simulator.simulate_at(&replay, target_block, state_block).await? {
                Ok(simulation) => simulation,
                Err(e) if e.message.contains("nonce too low") => {
                    return Ok(ConflictDetails {
                        conflict_type: ConflictType::NonceCollision,
                        initial_simulation: initial,
                        conflicting_bundle: competing,
                    });
                }
                Err(e) => return Err(BundleError::SimulationFailed(e.to_string())),
            };

            let tail = &simulation.results[simulation.results.len().saturating_sub(signed.len())..];
            if let Some(conflict_type) = classify_divergence(&initial.results, tail) {
                info!("bundle #{} in block {} conflicts: {:?}", bundle_index, target_block, conflict_type);
                return Ok(ConflictDetails {
                    conflict_type,
                    initial_simulation: initial,
                    conflicting_bundle: competing,
                });
            }
        }

        Ok(ConflictDetails {
            conflict_type: ConflictType::NoConflict,
            initial_simulation: initial,
            conflicting_bundle: Vec::new(),
        })
    }

    async fn raw_transaction(&self, hash: B256) -> Result<Bytes> {
        self.chain
            .raw_transaction(hash)
            .await?
            .ok_or_else(|| BundleError::Provider(format!("raw transaction {hash} unavailable")))
    }
}

/// First way the replayed target transactions differ from the baseline run.
fn classify_divergence(
    baseline: &[TransactionSimulation],
    replayed: &[TransactionSimulation],
) -> Option<ConflictType> {
    for (replay, base) in replayed.iter().zip(baseline) {
        if replay.has_error() || base.has_error() {
            if replay.has_error() != base.has_error() {
                return Some(ConflictType::Error);
            }
            continue;
        }
        if replay.eth_sent_to_coinbase != base.eth_sent_to_coinbase {
            return Some(ConflictType::CoinbasePayment);
        }
        if replay.gas_used != base.gas_used {
            return Some(ConflictType::GasUsed);
        }
    }
    None
}
