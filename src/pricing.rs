//! Effective gas pricing of a bundle and EIP-1559 base fee projection.

use alloy_primitives::{I256, U256};
use serde::Serialize;

use crate::relay::TransactionSimulation;

pub const BASE_FEE_MAX_CHANGE_DENOMINATOR: u64 = 8;

/// What a transaction paid the block's fee recipient.
pub trait MinerPayment {
    fn gas_used(&self) -> u64;

    /// Everything the fee recipient gained from the transaction: priority
    /// fees plus direct coinbase transfers.
    fn total_miner_reward(&self) -> U256;

    fn eth_sent_to_coinbase(&self) -> U256;
}

impl MinerPayment for TransactionSimulation {
    fn gas_used(&self) -> u64 {
        self.gas_used
    }

    fn total_miner_reward(&self) -> U256 {
        self.coinbase_diff
    }

    fn eth_sent_to_coinbase(&self) -> U256 {
        self.eth_sent_to_coinbase
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GasPricing {
    pub tx_count: usize,
    pub gas_used: u64,
    pub gas_fees_paid_by_searcher: I256,
    /// Negative when a transaction's coinbase transfer exceeds the fee
    /// recipient's balance change.
    pub priority_fees_received_by_miner: I256,
    pub eth_sent_to_coinbase: U256,
    pub effective_gas_price_to_searcher: I256,
    pub effective_priority_fee_to_miner: I256,
}

pub fn calculate_bundle_pricing<T: MinerPayment>(transactions: &[T], base_fee: U256) -> GasPricing {
    let mut pricing = GasPricing {
        tx_count: transactions.len(),
        ..Default::default()
    };

    for tx in transactions {
        let gas_used = tx.gas_used();
        let sent = tx.eth_sent_to_coinbase();
        let priority_fee = signed(tx.total_miner_reward()) - signed(sent);

        pricing.gas_used += gas_used;
        pricing.gas_fees_paid_by_searcher += signed(base_fee * U256::from(gas_used)) + priority_fee;
        pricing.priority_fees_received_by_miner += priority_fee;
        pricing.eth_sent_to_coinbase += sent;
    }

    if pricing.gas_used > 0 {
        let gas = signed(U256::from(pricing.gas_used));
        let sent = signed(pricing.eth_sent_to_coinbase);
        pricing.effective_gas_price_to_searcher = (sent + pricing.gas_fees_paid_by_searcher) / gas;
        pricing.effective_priority_fee_to_miner = (sent + pricing.priority_fees_received_by_miner) / gas;
    }

    pricing
}

fn signed(value: U256) -> I256 {
    I256::try_from(value).unwrap_or(I256::MAX)
}

/// Upper bound on the base fee `blocks_in_future` blocks ahead, assuming
/// every block in between is full.
pub fn max_base_fee_in_future_block(base_fee: U256, blocks_in_future: u32) -> U256 {
    (0..blocks_in_future).fold(base_fee, |fee, _| {
        fee * U256::from(1125) / U256::from(1000) + U256::from(1)
    })
}

pub fn base_fee_in_next_block(base_fee: U256, gas_used: u64, gas_limit: u64) -> U256 {
    let gas_target = gas_limit / 2;
    if gas_target == 0 || gas_used == gas_target {
        return base_fee;
    }

    let denominator = U256::from(BASE_FEE_MAX_CHANGE_DENOMINATOR);
    if gas_used > gas_target {
        let delta = base_fee * U256::from(gas_used - gas_target) / U256::from(gas_target) / denominator;
        base_fee + delta
    } else {
        let delta = base_fee * U256::from(gas_target - gas_used) / U256::from(gas_target) / denominator;
        base_fee - delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(value: i128) -> I256 {
        I256::try_from(value).unwrap()
    }

    struct Payment {
        gas_used: u64,
        reward: u64,
        sent: u64,
    }

    impl MinerPayment for Payment {
        fn gas_used(&self) -> u64 {
            self.gas_used
        }
        fn total_miner_reward(&self) -> U256 {
            U256::from(self.reward)
        }
        fn eth_sent_to_coinbase(&self) -> U256 {
            U256::from(self.sent)
        }
    }

    #[test]
    fn test_pricing_single_transaction() {
        let txs = [Payment {
            gas_used: 21_000,
            reward: 43_000,
            sent: 1_000,
        }];
        let pricing = calculate_bundle_pricing(&txs, U256::from(100));
        assert_eq!(pricing.tx_count, 1);
        assert_eq!(pricing.priority_fees_received_by_miner, int(42_000));
        assert_eq!(pricing.gas_fees_paid_by_searcher, int(2_142_000));
        assert_eq!(pricing.effective_gas_price_to_searcher, int(102));
        assert_eq!(pricing.effective_priority_fee_to_miner, int(2));
    }

    #[test]
    fn test_pricing_zero_gas_is_zero() {
        let txs = [Payment {
            gas_used: 0,
            reward: 500,
            sent: 500,
        }];
        let pricing = calculate_bundle_pricing(&txs, U256::from(100));
        assert_eq!(pricing.effective_gas_price_to_searcher, I256::ZERO);
        assert_eq!(pricing.effective_priority_fee_to_miner, I256::ZERO);

        let empty: [Payment; 0] = [];
        assert_eq!(calculate_bundle_pricing(&empty, U256::from(1)).tx_count, 0);
    }

    #[test]
    fn test_priority_fee_goes_negative() {
        let txs = [
            Payment {
                gas_used: 10,
                reward: 5,
                sent: 50,
            },
            Payment {
                gas_used: 10,
                reward: 100,
                sent: 0,
            },
        ];
        let pricing = calculate_bundle_pricing(&txs, U256::from(2));
        assert_eq!(pricing.priority_fees_received_by_miner, int(55));
        assert_eq!(pricing.gas_fees_paid_by_searcher, int(95));
        assert_eq!(pricing.eth_sent_to_coinbase, U256::from(50));
        assert_eq!(pricing.effective_gas_price_to_searcher, int(7));
        assert_eq!(pricing.effective_priority_fee_to_miner, int(5));

        let alone = calculate_bundle_pricing(&txs[..1], U256::ZERO);
        assert_eq!(alone.priority_fees_received_by_miner, int(-45));
        assert_eq!(alone.gas_fees_paid_by_searcher, int(-45));
        assert_eq!(alone.effective_priority_fee_to_miner, I256::ZERO);
    }

    #[test]
    fn test_base_fee_projection() {
        let base = U256::from(1000);
        assert_eq!(base_fee_in_next_block(base, 30_000_000, 30_000_000), U256::from(1125));
        assert_eq!(base_fee_in_next_block(base, 0, 30_000_000), U256::from(875));
        assert_eq!(base_fee_in_next_block(base, 15_000_000, 30_000_000), base);
        assert_eq!(base_fee_in_next_block(base, 10, 0), base);
    }

    #[test]
    fn test_max_base_fee_in_future_block() {
        let base = U256::from(1000);
        assert_eq!(max_base_fee_in_future_block(base, 0), base);
        assert_eq!(max_base_fee_in_future_block(base, 1), U256::from(1126));
        assert_eq!(max_base_fee_in_future_block(base, 2), U256::from(1267));
    }
}
