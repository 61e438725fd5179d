//! Relay request parameters and response shapes.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::bundle::BundleTransaction;

/// `0x`-prefixed hex quantity, as relays expect block numbers.
pub fn hex_quantity(n: u64) -> String {
    format!("{:#x}", n)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Number(u64),
    Latest,
}

impl Serialize for BlockTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BlockTag::Number(n) => serializer.serialize_str(&hex_quantity(*n)),
            BlockTag::Latest => serializer.serialize_str("latest"),
        }
    }
}

impl From<u64> for BlockTag {
    fn from(n: u64) -> Self {
        BlockTag::Number(n)
    }
}

/// Optional `eth_sendBundle` fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reverting_tx_hashes: Vec<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_uuid: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBundleParams {
    pub txs: Vec<Bytes>,
    pub block_number: String,
    #[serde(flatten)]
    pub options: BundleOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallBundleParams {
    pub txs: Vec<Bytes>,
    pub block_number: String,
    pub state_block_number: BlockTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coinbase: Option<Address>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPrivateTransactionParams {
    pub tx: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_block_number: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBundleParams {
    pub replacement_uuid: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelPrivateTransactionParams {
    pub tx_hash: B256,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleStatsParams {
    pub bundle_hash: B256,
    pub block_number: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatsV2Params {
    pub block_number: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBundleResponse {
    #[serde(default)]
    pub bundle_hash: Option<B256>,
}

/// What a relay accepted: the bundle hash, the per-leg details and the
/// block it is aimed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleSubmission {
    pub bundle_hash: B256,
    pub transactions: Vec<BundleTransaction>,
    pub target_block: u64,
}

// ───────────────────────── simulation ─────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SimulationOutcome {
    Success {
        value: Bytes,
    },
    #[serde(rename_all = "camelCase")]
    Revert {
        error: Option<String>,
        revert_reason: Option<String>,
    },
}

/// Per-transaction `eth_callBundle` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawTransactionSimulation", rename_all = "camelCase")]
pub struct TransactionSimulation {
    pub tx_hash: B256,
    pub from_address: Option<Address>,
    pub to_address: Option<Address>,
    pub gas_used: u64,
    pub gas_price: U256,
    pub gas_fees: U256,
    /// Total reward the block's fee recipient received from this transaction.
    pub coinbase_diff: U256,
    pub eth_sent_to_coinbase: U256,
    pub outcome: SimulationOutcome,
}

impl TransactionSimulation {
    pub fn is_revert(&self) -> bool {
        matches!(self.outcome, SimulationOutcome::Revert { .. })
    }

    /// True when the relay reported an `error` member for this transaction.
    pub fn has_error(&self) -> bool {
        matches!(self.outcome, SimulationOutcome::Revert { error: Some(_), .. })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransactionSimulation {
    #[serde(default)]
    tx_hash: B256,
    #[serde(default)]
    from_address: Option<String>,
    #[serde(default)]
    to_address: Option<String>,
    #[serde(default, deserialize_with = "lenient::u64")]
    gas_used: u64,
    #[serde(default, deserialize_with = "lenient::u256")]
    gas_price: U256,
    #[serde(default, deserialize_with = "lenient::u256")]
    gas_fees: U256,
    #[serde(default, deserialize_with = "lenient::u256")]
    coinbase_diff: U256,
    #[serde(default, deserialize_with = "lenient::u256")]
    eth_sent_to_coinbase: U256,
    #[serde(default)]
    value: Option<Bytes>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    revert: Option<String>,
}

impl From<RawTransactionSimulation> for TransactionSimulation {
    fn from(raw: RawTransactionSimulation) -> Self {
        let outcome = if raw.error.is_some() || raw.revert.is_some() {
            SimulationOutcome::Revert {
                error: raw.error,
                revert_reason: raw.revert,
            }
        } else {
            SimulationOutcome::Success {
                value: raw.value.unwrap_or_default(),
            }
        };
        Self {
            tx_hash: raw.tx_hash,
            from_address: raw.from_address.and_then(|a| a.parse().ok()),
            to_address: raw.to_address.and_then(|a| a.parse().ok()),
            gas_used: raw.gas_used,
            gas_price: raw.gas_price,
            gas_fees: raw.gas_fees,
            coinbase_diff: raw.coinbase_diff,
            eth_sent_to_coinbase: raw.eth_sent_to_coinbase,
            outcome,
        }
    }
}

/// Aggregate `eth_callBundle` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    #[serde(default, deserialize_with = "lenient::u256")]
    pub bundle_gas_price: U256,
    #[serde(default)]
    pub bundle_hash: B256,
    #[serde(default, deserialize_with = "lenient::u256")]
    pub coinbase_diff: U256,
    #[serde(default, deserialize_with = "lenient::u256")]
    pub eth_sent_to_coinbase: U256,
    #[serde(default, deserialize_with = "lenient::u256")]
    pub gas_fees: U256,
    #[serde(default)]
    pub results: Vec<TransactionSimulation>,
    #[serde(default, deserialize_with = "lenient::u64")]
    pub state_block_number: u64,
    #[serde(default, deserialize_with = "lenient::u64")]
    pub total_gas_used: u64,
}

impl SimulationResult {
    /// First transaction that errored or reverted.
    pub fn first_revert(&self) -> Option<&TransactionSimulation> {
        self.results.iter().find(|r| r.is_revert())
    }

    /// Replaces the relay-reported total with the sum over `results`.
    pub(crate) fn recompute_total_gas(mut self) -> Self {
        self.total_gas_used = self.results.iter().map(|r| r.gas_used).sum();
        self
    }
}

// ───────────────────────── stats ─────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub is_high_priority: bool,
    #[serde(deserialize_with = "lenient::u256")]
    pub all_time_miner_payments: U256,
    #[serde(deserialize_with = "lenient::u256")]
    pub all_time_gas_simulated: U256,
    #[serde(deserialize_with = "lenient::u256")]
    pub last_7d_miner_payments: U256,
    #[serde(deserialize_with = "lenient::u256")]
    pub last_7d_gas_simulated: U256,
    #[serde(deserialize_with = "lenient::u256")]
    pub last_1d_miner_payments: U256,
    #[serde(deserialize_with = "lenient::u256")]
    pub last_1d_gas_simulated: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatsV2 {
    pub is_high_priority: bool,
    #[serde(deserialize_with = "lenient::u256")]
    pub all_time_validator_payments: U256,
    #[serde(deserialize_with = "lenient::u256")]
    pub all_time_gas_simulated: U256,
    #[serde(rename = "last7dValidatorPayments", deserialize_with = "lenient::u256")]
    pub last_7d_validator_payments: U256,
    #[serde(rename = "last7dGasSimulated", deserialize_with = "lenient::u256")]
    pub last_7d_gas_simulated: U256,
    #[serde(rename = "last1dValidatorPayments", deserialize_with = "lenient::u256")]
    pub last_1d_validator_payments: U256,
    #[serde(rename = "last1dGasSimulated", deserialize_with = "lenient::u256")]
    pub last_1d_gas_simulated: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubkeyTimestamp {
    pub pubkey: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleStats {
    pub is_simulated: bool,
    #[serde(default)]
    pub is_sent_to_miners: bool,
    pub is_high_priority: bool,
    #[serde(default)]
    pub simulated_at: Option<String>,
    #[serde(default)]
    pub submitted_at: Option<String>,
    #[serde(default)]
    pub sent_to_miners_at: Option<String>,
    #[serde(default)]
    pub considered_by_builders_at: Vec<PubkeyTimestamp>,
    #[serde(default)]
    pub sealed_by_builders_at: Vec<PubkeyTimestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleStatsV2 {
    pub is_simulated: bool,
    pub is_high_priority: bool,
    #[serde(default)]
    pub simulated_at: Option<String>,
    #[serde(default)]
    pub received_at: Option<String>,
    #[serde(default)]
    pub considered_by_builders_at: Vec<PubkeyTimestamp>,
    #[serde(default)]
    pub sealed_by_builders_at: Vec<PubkeyTimestamp>,
}

/// Relays and the blocks index disagree on whether amounts are decimal
/// strings, hex strings or bare numbers; accept all three.
pub(crate) mod lenient {
    use super::*;
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberLike {
        Num(u64),
        Str(String),
    }

    fn parse_u256<E: Error>(s: &str) -> Result<U256, E> {
        let parsed = match s.strip_prefix("0x") {
            Some("") => Ok(U256::ZERO),
            Some(hex) => U256::from_str_radix(hex, 16),
            None if s.is_empty() => Ok(U256::ZERO),
            None => U256::from_str_radix(s, 10),
        };
        parsed.map_err(|e| E::custom(format!("invalid quantity {s:?}: {e}")))
    }

    pub fn u256<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        match NumberLike::deserialize(deserializer)? {
            NumberLike::Num(n) => Ok(U256::from(n)),
            NumberLike::Str(s) => parse_u256(&s),
        }
    }

    pub fn u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match NumberLike::deserialize(deserializer)? {
            NumberLike::Num(n) => Ok(n),
            NumberLike::Str(s) => {
                let value = parse_u256::<D::Error>(&s)?;
                u64::try_from(value).map_err(|_| D::Error::custom(format!("{s:?} overflows u64")))
            }
        }
    }
}
