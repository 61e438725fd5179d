//! Fan a bundle out to several relays and follow it until it lands.
//!
//! Each attempt signs the legs, submits to every relay concurrently, takes
//! the first acceptance, and watches the target block. A miss moves the
//! target forward and starts over, up to `max_attempts`.

use std::sync::Arc;

use alloy_primitives::{Bytes, B256};
use async_trait::async_trait;
use futures::{future::try_join_all, stream::FuturesUnordered, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::bundle::{BundleLeg, BundleSigner};
use crate::chain::{ChainProvider, ReceiptSummary};
use crate::error::{BundleError, RelayResult, Result};
use crate::inclusion::{BundleResolution, InclusionWatcher};
use crate::relay::{BundleOptions, BundleSubmission};

/// One relay endpoint as seen by the broadcaster.
#[async_trait]
pub trait BundleRelay: Send + Sync {
    fn endpoint(&self) -> String;

    async fn submit_bundle(
        &self,
        signed: Vec<Bytes>,
        target_block: u64,
        options: BundleOptions,
    ) -> Result<RelayResult<BundleSubmission>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastConfig {
    pub max_attempts: u32,
    pub retry_block_advance: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_block_advance: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastOutcome {
    pub relay: String,
    pub bundle_hash: B256,
    pub target_block: u64,
    pub attempts: u32,
    pub resolution: BundleResolution,
    pub receipts: Vec<Option<ReceiptSummary>>,
}

pub struct MultiRelayBroadcaster {
    relays: Vec<Arc<dyn BundleRelay>>,
    signer: BundleSigner,
    watcher: InclusionWatcher,
    chain: Arc<dyn ChainProvider>,
    config: BroadcastConfig,
}

impl MultiRelayBroadcaster {
    pub fn new(
        relays: Vec<Arc<dyn BundleRelay>>,
        chain: Arc<dyn ChainProvider>,
        watcher: InclusionWatcher,
        config: BroadcastConfig,
    ) -> Self {
        Self {
            relays,
            signer: BundleSigner::new(chain.clone()),
            watcher,
            chain,
            config,
        }
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.relays.iter().map(|r| r.endpoint()).collect()
    }

    pub fn config(&self) -> BroadcastConfig {
        self.config
    }

    pub async fn broadcast(
        &self,
        legs: &[BundleLeg],
        target_block: u64,
        options: BundleOptions,
    ) -> Result<BroadcastOutcome> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut target = target_block;

        for attempt in 1..=max_attempts {
            let signed = self.signer.sign_bundle_for_block(legs, target).await?;
            let (relay, submission) = self.fan_out(signed, target, &options).await?;
            let resolution = self
                .watcher
                .wait_for_bundle(&submission.transactions, target)
                .await?;

            let landed = match resolution {
                BundleResolution::Included { .. } => true,
                _ => self.watch_target_mined(&submission).await?,
            };

            if landed {
                let receipts = try_join_all(
                    submission
                        .transactions
                        .iter()
                        .map(|tx| self.chain.transaction_receipt(tx.hash)),
                )
                .await?;
                info!(
                    "✅ bundle {} landed via {} after {} attempt(s)",
                    submission.bundle_hash, relay, attempt
                );
                return Ok(BroadcastOutcome {
                    relay,
                    bundle_hash: submission.bundle_hash,
                    target_block: target,
                    attempts: attempt,
                    resolution,
                    receipts,
                });
            }

            if attempt < max_attempts {
                let next = target.saturating_add(self.config.retry_block_advance);
                warn!(
                    "🔁 bundle {} not included at block {} ({:?}), retrying for block {}",
                    submission.bundle_hash, target, resolution, next
                );
                target = next;
            }
        }

        Err(BundleError::MaxRetriesExceeded {
            attempts: max_attempts,
            last_target_block: target,
        })
    }

    /// Submits to every relay at once. The first acceptance wins; the other
    /// submissions keep running in their own tasks.
    async fn fan_out(
        &self,
        signed: Vec<Bytes>,
        target_block: u64,
        options: &BundleOptions,
    ) -> Result<(String, BundleSubmission)> {
        let mut pending: FuturesUnordered<_> = self
            .relays
            .iter()
            .cloned()
            .map(|relay| {
                let signed = signed.clone();
                let options = options.clone();
                tokio::spawn(async move {
                    let endpoint = relay.endpoint();
                    let result = relay.submit_bundle(signed, target_block, options).await;
                    (endpoint, result)
                })
            })
            .collect();

        while let Some(joined) = pending.next().await {
            match joined {
                Ok((endpoint, Ok(Ok(submission)))) => {
                    info!("📨 {} accepted bundle for block {}", endpoint, target_block);
                    return Ok((endpoint, submission));
                }
                Ok((endpoint, Ok(Err(e)))) => warn!("⚠️ {} rejected bundle: {}", endpoint, e),
                Ok((endpoint, Err(e))) => warn!("⚠️ {} submission failed: {}", endpoint, e),
                Err(e) => warn!("⚠️ relay task failed: {}", e),
            }
        }

        Err(BundleError::NoRelayAccepted)
    }

    async fn watch_target_mined(&self, submission: &BundleSubmission) -> Result<bool> {
        let Some(last) = submission.transactions.last() else {
            return Ok(false);
        };
        let receipt = self.chain.transaction_receipt(last.hash).await?;
        Ok(receipt.is_some_and(|r| r.block_number.is_some()))
    }
}
