use std::{collections::HashMap, slice, sync::Arc};

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy_primitives::{Address, Bytes, TxKind, U256};
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{BundleLeg, SignedTransaction, UnsignedLeg};
use crate::chain::ChainProvider;
use crate::error::{BundleError, Result};
use crate::pricing::{base_fee_in_next_block, max_base_fee_in_future_block};

/// An account able to sign the requests it is handed.
#[async_trait]
pub trait LegSigner: Send + Sync {
    fn address(&self) -> Address;

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64>;

    /// Signs a fully populated request and returns EIP-2718 bytes.
    async fn sign_transaction(&self, request: TransactionRequest) -> Result<Bytes>;
}

/// Local private key bound to a chain.
pub struct WalletSigner {
    address: Address,
    wallet: EthereumWallet,
    chain: Arc<dyn ChainProvider>,
    chain_id: OnceCell<u64>,
}

impl WalletSigner {
    pub fn new(signer: PrivateKeySigner, chain: Arc<dyn ChainProvider>) -> Self {
        Self {
            address: signer.address(),
            wallet: EthereumWallet::from(signer),
            chain,
            chain_id: OnceCell::new(),
        }
    }

    async fn chain_id(&self) -> Result<u64> {
        self.chain_id
            .get_or_try_init(|| self.chain.chain_id())
            .await
            .copied()
    }
}

#[async_trait]
impl LegSigner for WalletSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn estimate_gas(&self, request: &TransactionRequest) -> Result<u64> {
        self.chain.estimate_gas(request).await
    }

    async fn sign_transaction(&self, mut request: TransactionRequest) -> Result<Bytes> {
        request.from = Some(self.address);
        request.to.get_or_insert(TxKind::Create);
        if request.chain_id.is_none() {
            request.chain_id = Some(self.chain_id().await?);
        }
        let envelope = request
            .build(&self.wallet)
            .await
            .map_err(|e| BundleError::Signing(e.to_string()))?;
        Ok(envelope.encoded_2718().into())
    }
}

/// Turns bundle legs into raw signed transactions, sequencing nonces per
/// account. Nonce state lives only for the duration of one call.
#[derive(Clone)]
pub struct BundleSigner {
    chain: Arc<dyn ChainProvider>,
}

/// Fee cap projection stops growing past this many blocks ahead.
pub const MAX_PROJECTED_BLOCKS: u32 = 64;

impl BundleSigner {
    pub fn new(chain: Arc<dyn ChainProvider>) -> Self {
        Self { chain }
    }

    pub async fn sign_bundle(&self, legs: &[BundleLeg]) -> Result<Vec<Bytes>> {
        self.sign(legs, None).await
    }

    /// Like [`sign_bundle`](Self::sign_bundle), and EIP-1559 legs without a
    /// `maxFeePerGas` get one that covers the worst-case base fee at
    /// `target_block` plus their priority fee.
    pub async fn sign_bundle_for_block(&self, legs: &[BundleLeg], target_block: u64) -> Result<Vec<Bytes>> {
        self.sign(legs, Some(target_block)).await
    }

    /// Signs a single leg with a fresh nonce view.
    pub async fn sign_leg(&self, leg: &BundleLeg) -> Result<Bytes> {
        self.sign_bundle(slice::from_ref(leg))
            .await?
            .pop()
            .ok_or(BundleError::EmptyBundle)
    }

    async fn sign(&self, legs: &[BundleLeg], target_block: Option<u64>) -> Result<Vec<Bytes>> {
        if legs.is_empty() {
            return Err(BundleError::EmptyBundle);
        }

        let mut next_nonces: HashMap<Address, u64> = HashMap::new();
        let mut base_fee_cap: Option<u128> = None;
        let mut signed = Vec::with_capacity(legs.len());

        for (index, leg) in legs.iter().enumerate() {
            match leg {
                BundleLeg::Signed(raw) => {
                    let tx = SignedTransaction::decode(raw.clone())?;
                    if let Some(sender) = tx.sender() {
                        next_nonces.insert(sender, next_nonce(index, tx.nonce())?);
                    }
                    signed.push(raw.clone());
                }
                BundleLeg::Unsigned(leg) => {
                    let mut request = leg.request.clone();
                    if let Some(target) = target_block {
                        if is_dynamic_fee(&request) && request.max_fee_per_gas.is_none() {
                            let cap = match base_fee_cap {
                                Some(cap) => cap,
                                None => *base_fee_cap.insert(self.base_fee_cap(target).await?),
                            };
                            let priority = request.max_priority_fee_per_gas.unwrap_or_default();
                            request.max_priority_fee_per_gas = Some(priority);
                            request.max_fee_per_gas = Some(cap.saturating_add(priority));
                        }
                    }
                    signed.push(self.sign_unsigned(index, leg, request, &mut next_nonces).await?);
                }
            }
        }

        Ok(signed)
    }

    /// Highest base fee `target_block` can have, given the latest block.
    async fn base_fee_cap(&self, target_block: u64) -> Result<u128> {
        let head = self.chain.block_number().await?;
        let Some(latest) = self.chain.block(head).await? else {
            return Ok(0);
        };
        let base_fee = U256::from(latest.base_fee_per_gas.unwrap_or_default());
        let blocks_ahead = u32::try_from(target_block.saturating_sub(head))
            .unwrap_or(u32::MAX)
            .min(MAX_PROJECTED_BLOCKS);
        let cap = match blocks_ahead {
            0 => base_fee,
            n => {
                let next = base_fee_in_next_block(base_fee, latest.gas_used, latest.gas_limit);
                max_base_fee_in_future_block(next, n - 1)
            }
        };
        debug!("base fee {} at block {}, cap {} for block {}", base_fee, head, cap, target_block);
        Ok(u128::try_from(cap).unwrap_or(u128::MAX))
    }

    async fn sign_unsigned(
        &self,
        index: usize,
        leg: &UnsignedLeg,
        mut request: TransactionRequest,
        next_nonces: &mut HashMap<Address, u64>,
    ) -> Result<Bytes> {
        let sender = leg.signer.address();
        request.from = Some(sender);

        let nonce = match request.nonce {
            Some(explicit) => explicit,
            None => match next_nonces.get(&sender) {
                Some(next) => *next,
                None => self.chain.transaction_count(sender).await?,
            },
        };
        request.nonce = Some(nonce);
        next_nonces.insert(sender, next_nonce(index, nonce)?);

        if is_legacy(&request) && request.gas_price.is_none() {
            request.gas_price = Some(0);
        }
        if request.gas.is_none() {
            request.gas = Some(leg.signer.estimate_gas(&request).await?);
        }

        debug!("signing leg {} for {} with nonce {}", index, sender, nonce);
        leg.signer.sign_transaction(request).await
    }
}

fn next_nonce(index: usize, nonce: u64) -> Result<u64> {
    nonce.checked_add(1).ok_or_else(|| BundleError::InvalidLeg {
        index,
        reason: format!("nonce {nonce} leaves no room for a following transaction"),
    })
}

/// Type 0, or untyped with no EIP-1559 fee fields.
pub(crate) fn is_legacy(request: &TransactionRequest) -> bool {
    match request.transaction_type {
        Some(0) => true,
        Some(_) => false,
        None => request.max_fee_per_gas.is_none() && request.max_priority_fee_per_gas.is_none(),
    }
}

/// Priced with `maxFeePerGas` / `maxPriorityFeePerGas` rather than `gasPrice`.
fn is_dynamic_fee(request: &TransactionRequest) -> bool {
    !is_legacy(request) && request.transaction_type != Some(1)
}
