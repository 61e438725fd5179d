//! Transaction sinks: broadcast to the network, or capture for bundling.
//!
//! Code that produces transactions (a swap protocol, a deposit flow) writes to
//! a [`TransactionSink`]. Swapping [`NetworkSink`] for [`CapturingSink`]
//! turns every "send" into an ordered list of signed legs instead.

use std::sync::Arc;

use alloy::rpc::types::TransactionRequest;
use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bundle::{signer::is_legacy, BundleLeg, LegSigner, SignedTransaction};
use crate::chain::{ChainProvider, ReceiptSummary};
use crate::error::{BundleError, Result};

#[async_trait]
pub trait TransactionSink: Send + Sync {
    async fn broadcast(&self, raw: Bytes) -> Result<PendingHandle>;

    async fn next_nonce(&self, address: Address) -> Result<u64>;

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64>;
}

/// Handle for a broadcast transaction.
pub struct PendingHandle {
    pub hash: B256,
    chain: Option<Arc<dyn ChainProvider>>,
}

impl PendingHandle {
    /// Waits for the receipt. Captured transactions resolve immediately with
    /// `None` since they were never sent.
    pub async fn wait(&self) -> Result<Option<ReceiptSummary>> {
        let Some(chain) = &self.chain else {
            return Ok(None);
        };
        let mut blocks = chain.subscribe_blocks();
        while blocks.next().await.is_some() {
            if let Some(receipt) = chain.transaction_receipt(self.hash).await? {
                if receipt.block_number.is_some() {
                    return Ok(Some(receipt));
                }
            }
        }
        Err(BundleError::SubscriptionClosed)
    }
}

/// Forwards everything to the chain.
pub struct NetworkSink {
    chain: Arc<dyn ChainProvider>,
}

impl NetworkSink {
    pub fn new(chain: Arc<dyn ChainProvider>) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl TransactionSink for NetworkSink {
    async fn broadcast(&self, raw: Bytes) -> Result<PendingHandle> {
        let hash = self.chain.send_raw_transaction(&raw).await?;
        Ok(PendingHandle {
            hash,
            chain: Some(self.chain.clone()),
        })
    }

    async fn next_nonce(&self, address: Address) -> Result<u64> {
        self.chain.transaction_count(address).await
    }

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64> {
        self.chain.estimate_gas(request).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureKind {
    /// Contract creation.
    Trade,
    /// Plain value transfer with empty calldata.
    Gas,
    Deposit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedTransaction {
    pub kind: CaptureKind,
    /// Sender for trades, destination otherwise.
    pub shared_address: Address,
    pub hash: B256,
    pub raw: Bytes,
}

impl CapturedTransaction {
    pub fn classify(raw: Bytes) -> Result<Self> {
        let tx = SignedTransaction::decode(raw)?;
        let (kind, shared_address) = match tx.to() {
            None => {
                let sender = tx.sender().ok_or_else(|| {
                    BundleError::CouldNotDecodeSignedTransaction("sender does not recover".into())
                })?;
                (CaptureKind::Trade, sender)
            }
            Some(to) if tx.input().is_empty() => (CaptureKind::Gas, to),
            Some(to) => (CaptureKind::Deposit, to),
        };
        Ok(Self {
            kind,
            shared_address,
            hash: tx.hash(),
            raw: tx.raw().clone(),
        })
    }
}

/// Records broadcasts instead of sending them, handing out sequential nonces
/// for the operator so several captured transactions can share one bundle.
pub struct CapturingSink {
    operator: Address,
    inner: Arc<dyn TransactionSink>,
    captured: Mutex<Vec<CapturedTransaction>>,
    operator_nonce: Mutex<Option<u64>>,
}

impl CapturingSink {
    pub fn new(operator: Address, inner: Arc<dyn TransactionSink>) -> Self {
        Self {
            operator,
            inner,
            captured: Mutex::new(Vec::new()),
            operator_nonce: Mutex::new(None),
        }
    }

    pub async fn captured(&self) -> Vec<CapturedTransaction> {
        self.captured.lock().await.clone()
    }

    /// Captured transactions as signed bundle legs, in capture order.
    pub async fn legs(&self) -> Vec<BundleLeg> {
        self.captured
            .lock()
            .await
            .iter()
            .map(|c| BundleLeg::Signed(c.raw.clone()))
            .collect()
    }

    /// Drains the capture buffer.
    pub async fn take(&self) -> Vec<CapturedTransaction> {
        std::mem::take(&mut *self.captured.lock().await)
    }
}

#[async_trait]
impl TransactionSink for CapturingSink {
    async fn broadcast(&self, raw: Bytes) -> Result<PendingHandle> {
        let captured = CapturedTransaction::classify(raw)?;
        info!(
            "📥 captured {:?} tx {} (shared address {})",
            captured.kind, captured.hash, captured.shared_address
        );
        let hash = captured.hash;
        self.captured.lock().await.push(captured);
        Ok(PendingHandle { hash, chain: None })
    }

    async fn next_nonce(&self, address: Address) -> Result<u64> {
        if address != self.operator {
            return self.inner.next_nonce(address).await;
        }
        let mut next = self.operator_nonce.lock().await;
        let nonce = match *next {
            Some(n) => n,
            None => self.inner.next_nonce(address).await?,
        };
        *next = Some(nonce.checked_add(1).ok_or_else(|| {
            BundleError::Provider(format!("operator {} has exhausted its nonces", address))
        })?);
        debug!("operator nonce {}", nonce);
        Ok(nonce)
    }

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64> {
        self.inner.estimate_gas(request).await
    }
}

/// Fills nonce and gas from `sink`, signs with `signer`, and broadcasts
/// through `sink`.
pub async fn submit_through(
    sink: &dyn TransactionSink,
    signer: &dyn LegSigner,
    mut request: TransactionRequest,
) -> Result<PendingHandle> {
    request.from = Some(signer.address());
    if request.nonce.is_none() {
        request.nonce = Some(sink.next_nonce(signer.address()).await?);
    }
    if is_legacy(&request) && request.gas_price.is_none() {
        request.gas_price = Some(0);
    }
    if request.gas.is_none() {
        request.gas = Some(sink.estimate_gas(&request).await?);
    }
    let raw = signer.sign_transaction(request).await?;
    sink.broadcast(raw).await
}
