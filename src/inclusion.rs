//! Block-driven inclusion tracking for bundles and private transactions.
//!
//! Each watch owns its own block subscription, processes notifications one at
//! a time, and drops the subscription as soon as it resolves or times out.

use std::{collections::BTreeMap, future::Future, sync::Arc, time::Duration};

use alloy_primitives::{Address, B256};
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info};

use crate::bundle::BundleTransaction;
use crate::chain::ChainProvider;
use crate::error::{BundleError, Result};

pub const DEFAULT_INCLUSION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "resolution", rename_all = "camelCase")]
pub enum BundleResolution {
    Included { block: u64 },
    NotIncludedByDeadline { block: u64 },
    AccountNonceInvalidated { block: u64, account: Address },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "resolution", rename_all = "camelCase")]
pub enum TransactionResolution {
    Included { block: u64 },
    Dropped { block: u64 },
}

#[derive(Clone)]
pub struct InclusionWatcher {
    chain: Arc<dyn ChainProvider>,
    timeout: Duration,
}

impl InclusionWatcher {
    pub fn new(chain: Arc<dyn ChainProvider>) -> Self {
        Self {
            chain,
            timeout: DEFAULT_INCLUSION_TIMEOUT,
        }
    }

    /// A zero timeout disables the deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn with_deadline<T>(&self, watch: impl Future<Output = Result<T>>) -> Result<T> {
        if self.timeout.is_zero() {
            return watch.await;
        }
        tokio::time::timeout(self.timeout, watch)
            .await
            .map_err(|_| BundleError::Timeout(self.timeout))?
    }

    /// Resolves once the bundle either lands in `target_block`, misses it, or
    /// one of its accounts consumes a nonce the bundle depends on.
    pub async fn wait_for_bundle(
        &self,
        transactions: &[BundleTransaction],
        target_block: u64,
    ) -> Result<BundleResolution> {
        let mut min_nonces: BTreeMap<Address, u64> = BTreeMap::new();
        for tx in transactions {
            if let Some(account) = tx.account {
                min_nonces
                    .entry(account)
                    .and_modify(|n| *n = (*n).min(tx.nonce))
                    .or_insert(tx.nonce);
            }
        }
        let hashes: Vec<B256> = transactions.iter().map(|tx| tx.hash).collect();

        let resolution = self
            .with_deadline(self.watch_bundle(&min_nonces, &hashes, target_block))
            .await?;
        info!("🔎 bundle for block {} resolved: {:?}", target_block, resolution);
        Ok(resolution)
    }

    async fn watch_bundle(
        &self,
        min_nonces: &BTreeMap<Address, u64>,
        hashes: &[B256],
        target_block: u64,
    ) -> Result<BundleResolution> {
        let mut blocks = self.chain.subscribe_blocks();

        while let Some(block) = blocks.next().await {
            debug!("bundle watch: block {} (target {})", block, target_block);

            if block < target_block {
                for (account, nonce) in min_nonces {
                    let count = self.chain.transaction_count(*account).await?;
                    if count > *nonce {
                        return Ok(BundleResolution::AccountNonceInvalidated {
                            block,
                            account: *account,
                        });
                    }
                }
                continue;
            }

            let Some(target) = self.chain.block(target_block).await? else {
                debug!("target block {} not available yet", target_block);
                continue;
            };
            let included = hashes.iter().all(|h| target.transactions.contains(h));
            return Ok(if included {
                BundleResolution::Included {
                    block: target_block,
                }
            } else {
                BundleResolution::NotIncludedByDeadline { block }
            });
        }

        Err(BundleError::SubscriptionClosed)
    }

    /// Resolves once `hash` is mined or the chain passes `max_block`.
    pub async fn wait_for_transaction(
        &self,
        hash: B256,
        max_block: u64,
    ) -> Result<TransactionResolution> {
        let resolution = self
            .with_deadline(async {
                let mut blocks = self.chain.subscribe_blocks();
                while let Some(block) = blocks.next().await {
                    if block > max_block {
                        return Ok(TransactionResolution::Dropped { block });
                    }
                    let receipt = self.chain.transaction_receipt(hash).await?;
                    if let Some(mined) = receipt.and_then(|r| r.block_number) {
                        return Ok(TransactionResolution::Included { block: mined });
                    }
                    debug!("tx {} not mined at block {} (max {})", hash, block, max_block);
                }
                Err(BundleError::SubscriptionClosed)
            })
            .await?;
        info!("🔎 private tx {} resolved: {:?}", hash, resolution);
        Ok(resolution)
    }

    /// Resolves with the first observed block number `>= number`.
    pub async fn wait_for_block(&self, number: u64) -> Result<u64> {
        self.with_deadline(async {
            let mut blocks = self.chain.subscribe_blocks();
            while let Some(block) = blocks.next().await {
                if block >= number {
                    return Ok(block);
                }
            }
            Err(BundleError::SubscriptionClosed)
        })
        .await
    }
}
