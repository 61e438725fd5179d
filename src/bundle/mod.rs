//! Bundle legs, decoded signed transactions and bundle hashing.

pub mod signer;

use std::{fmt, sync::Arc};

use alloy::consensus::{transaction::SignerRecoverable, Transaction as _, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::rpc::types::TransactionRequest;
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BundleError, Result};

pub use signer::{BundleSigner, LegSigner, WalletSigner};

/// One entry of a bundle before signing.
#[derive(Debug, Clone)]
pub enum BundleLeg {
    /// Already signed EIP-2718 bytes. Never re-nonced.
    Signed(Bytes),
    Unsigned(UnsignedLeg),
}

impl BundleLeg {
    pub fn signed(raw: impl Into<Bytes>) -> Self {
        BundleLeg::Signed(raw.into())
    }

    pub fn unsigned(request: TransactionRequest, signer: Arc<dyn LegSigner>) -> Self {
        BundleLeg::Unsigned(UnsignedLeg { request, signer })
    }
}

/// A transaction request paired with the account that will sign it.
#[derive(Clone)]
pub struct UnsignedLeg {
    pub request: TransactionRequest,
    pub signer: Arc<dyn LegSigner>,
}

impl fmt::Debug for UnsignedLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsignedLeg")
            .field("request", &self.request)
            .field("signer", &self.signer.address())
            .finish()
    }
}

impl UnsignedLeg {
    /// Parses a JSON transaction request for leg `index`.
    ///
    /// The nonce must be a JSON number when present; a string nonce is
    /// rejected with [`BundleError::InvalidNonceFormat`].
    pub fn from_json(index: usize, mut value: Value, signer: Arc<dyn LegSigner>) -> Result<Self> {
        let obj = value.as_object_mut().ok_or_else(|| BundleError::InvalidLeg {
            index,
            reason: "expected a JSON object".to_string(),
        })?;

        let nonce = match obj.remove("nonce") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => Some(n.as_u64().ok_or_else(|| BundleError::InvalidLeg {
                index,
                reason: format!("nonce {n} is not a non-negative integer"),
            })?),
            Some(_) => return Err(BundleError::InvalidNonceFormat { index }),
        };

        let mut request: TransactionRequest =
            serde_json::from_value(value).map_err(|e| BundleError::InvalidLeg {
                index,
                reason: e.to_string(),
            })?;
        request.nonce = nonce;

        Ok(Self { request, signer })
    }
}

/// An immutable signed transaction with the fields derived from its bytes.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    raw: Bytes,
    hash: B256,
    sender: Option<Address>,
    envelope: TxEnvelope,
}

impl SignedTransaction {
    pub fn decode(raw: Bytes) -> Result<Self> {
        let mut buf = raw.as_ref();
        let envelope = TxEnvelope::decode_2718(&mut buf)
            .map_err(|e| BundleError::CouldNotDecodeSignedTransaction(e.to_string()))?;
        let sender = envelope.recover_signer().ok();
        let hash = keccak256(&raw);
        Ok(Self {
            raw,
            hash,
            sender,
            envelope,
        })
    }

    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn hash(&self) -> B256 {
        self.hash
    }

    /// Recovered signer, `None` when the signature does not recover.
    pub fn sender(&self) -> Option<Address> {
        self.sender
    }

    pub fn nonce(&self) -> u64 {
        self.envelope.nonce()
    }

    /// Destination, `None` for contract creation.
    pub fn to(&self) -> Option<Address> {
        self.envelope.to()
    }

    pub fn input(&self) -> &Bytes {
        self.envelope.input()
    }

    pub fn value(&self) -> U256 {
        self.envelope.value()
    }

    pub fn envelope(&self) -> &TxEnvelope {
        &self.envelope
    }
}

/// What a submission reports for each of its transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleTransaction {
    pub signed_transaction: Bytes,
    pub hash: B256,
    pub account: Option<Address>,
    pub nonce: u64,
}

impl From<&SignedTransaction> for BundleTransaction {
    fn from(tx: &SignedTransaction) -> Self {
        Self {
            signed_transaction: tx.raw.clone(),
            hash: tx.hash,
            account: tx.sender,
            nonce: tx.nonce(),
        }
    }
}

/// Ordered, signed bundle. The order is fixed once built.
#[derive(Debug, Clone)]
pub struct Bundle {
    transactions: Vec<SignedTransaction>,
}

impl Bundle {
    pub fn from_raw(raw: &[Bytes]) -> Result<Self> {
        if raw.is_empty() {
            return Err(BundleError::EmptyBundle);
        }
        let transactions = raw
            .iter()
            .cloned()
            .map(SignedTransaction::decode)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { transactions })
    }

    pub fn transactions(&self) -> &[SignedTransaction] {
        &self.transactions
    }

    pub fn raw(&self) -> Vec<Bytes> {
        self.transactions.iter().map(|tx| tx.raw.clone()).collect()
    }

    pub fn hashes(&self) -> Vec<B256> {
        self.transactions.iter().map(|tx| tx.hash).collect()
    }

    pub fn hash(&self) -> B256 {
        bundle_hash(self.transactions.iter().map(|tx| &tx.hash))
    }

    /// The last transaction: once it is mined the whole bundle landed.
    pub fn watch_target(&self) -> &SignedTransaction {
        // from_raw rejects empty bundles
        &self.transactions[self.transactions.len() - 1]
    }

    pub fn bundle_transactions(&self) -> Vec<BundleTransaction> {
        self.transactions.iter().map(BundleTransaction::from).collect()
    }
}

/// keccak256 over the concatenated 32-byte transaction hashes.
pub fn bundle_hash<'a>(hashes: impl IntoIterator<Item = &'a B256>) -> B256 {
    let mut buf = Vec::new();
    for hash in hashes {
        buf.extend_from_slice(hash.as_slice());
    }
    keccak256(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{presign, test_signer, FakeChain};
    use serde_json::json;

    #[test]
    fn test_bundle_hash_depends_on_order() {
        let a = B256::repeat_byte(0x01);
        let b = B256::repeat_byte(0x02);
        assert_eq!(bundle_hash([&a, &b]), bundle_hash([&a, &b]));
        assert_ne!(bundle_hash([&a, &b]), bundle_hash([&b, &a]));
    }

    #[test]
    fn test_bundle_hash_is_keccak_of_concatenation() {
        let a = B256::repeat_byte(0x01);
        let b = B256::repeat_byte(0x02);
        let mut joined = a.to_vec();
        joined.extend_from_slice(b.as_slice());
        assert_eq!(bundle_hash([&a, &b]), keccak256(joined));
    }

    #[test]
    fn test_decode_presigned() {
        let signer = test_signer(7);
        let raw = presign(&signer, 5);
        let tx = SignedTransaction::decode(raw.clone()).unwrap();
        assert_eq!(tx.sender(), Some(signer.address()));
        assert_eq!(tx.nonce(), 5);
        assert_eq!(tx.hash(), keccak256(&raw));
        assert_eq!(tx.value(), U256::from(1));
        assert!(tx.input().is_empty());
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = SignedTransaction::decode(Bytes::from_static(&[0xde, 0xad])).unwrap_err();
        assert!(matches!(err, BundleError::CouldNotDecodeSignedTransaction(_)));
    }

    #[test]
    fn test_bundle_preserves_order_and_watches_last() {
        let signer = test_signer(7);
        let raws = vec![presign(&signer, 0), presign(&signer, 1), presign(&signer, 2)];
        let bundle = Bundle::from_raw(&raws).unwrap();
        assert_eq!(bundle.raw(), raws);
        assert_eq!(bundle.watch_target().nonce(), 2);
        let txs = bundle.bundle_transactions();
        assert_eq!(txs.iter().map(|t| t.nonce).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(txs.iter().all(|t| t.account == Some(signer.address())));
    }

    #[test]
    fn test_empty_bundle_rejected() {
        assert!(matches!(Bundle::from_raw(&[]), Err(BundleError::EmptyBundle)));
    }

    #[test]
    fn test_from_json_rejects_string_nonce() {
        let chain = Arc::new(FakeChain::new());
        let wallet = Arc::new(WalletSigner::new(test_signer(1), chain));
        let err = UnsignedLeg::from_json(
            2,
            json!({"to": "0x00000000000000000000000000000000000000bb", "nonce": "7"}),
            wallet,
        )
        .unwrap_err();
        assert!(matches!(err, BundleError::InvalidNonceFormat { index: 2 }));
    }

    #[test]
    fn test_from_json_numeric_nonce() {
        let chain = Arc::new(FakeChain::new());
        let wallet = Arc::new(WalletSigner::new(test_signer(1), chain));
        let leg = UnsignedLeg::from_json(
            0,
            json!({"to": "0x00000000000000000000000000000000000000bb", "nonce": 7, "value": "0x1"}),
            wallet,
        )
        .unwrap();
        assert_eq!(leg.request.nonce, Some(7));
        assert_eq!(leg.request.value, Some(U256::from(1)));
    }
}
