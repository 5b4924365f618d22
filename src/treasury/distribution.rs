//! Bucket split for treasury distributions.

use serde::{Deserialize, Serialize};

use crate::core::config::TreasuryConfig;
use crate::error::Result;
use crate::utils::math::{apply_bps, safe_sub};

/// Amounts sent to each bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionSplit {
    /// Operations share
    pub ops: u128,
    /// Liquidity share
    pub liquidity: u128,
    /// Reserve share plus rounding dust
    pub reserve: u128,
}

impl DistributionSplit {
    /// Split `amount` by the configured bps; the reserve absorbs the remainder
    pub fn compute(amount: u128, config: &TreasuryConfig) -> Result<Self> {
        let ops = apply_bps(amount, config.ops_bps)?;
        let liquidity = apply_bps(amount, config.liquidity_bps)?;
        let reserve = safe_sub(safe_sub(amount, ops)?, liquidity)?;
        Ok(Self {
            ops,
            liquidity,
            reserve,
        })
    }

    /// Sum of all buckets
    pub fn total(&self) -> u128 {
        self.ops + self.liquidity + self.reserve
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::Address;

    fn config(ops: u64, liquidity: u64, reserve: u64) -> TreasuryConfig {
        TreasuryConfig {
            ops_address: Address::from_label("ops"),
            liquidity_address: Address::from_label("lp"),
            reserve_address: Address::from_label("reserve"),
            ops_bps: ops,
            liquidity_bps: liquidity,
            reserve_bps: reserve,
        }
    }

    #[test]
    fn test_split_exact() {
        let split = DistributionSplit::compute(100, &config(4_000, 4_000, 2_000)).unwrap();
        assert_eq!(split, DistributionSplit { ops: 40, liquidity: 40, reserve: 20 });
    }

    #[test]
    fn test_dust_goes_to_reserve() {
        let split = DistributionSplit::compute(7, &config(3_333, 3_333, 3_334)).unwrap();
        assert_eq!(split.ops, 2);
        assert_eq!(split.liquidity, 2);
        assert_eq!(split.reserve, 3);
        assert_eq!(split.total(), 7);
    }
}
