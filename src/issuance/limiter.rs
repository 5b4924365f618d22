//! Per-block mint rate limiter.
//!
//! Counters are keyed by block number, so the limit rolls over with the
//! block without any reset call. Counters older than the retention window
//! are dropped lazily on write.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::utils::constants::MINT_HISTORY_BLOCKS;
use crate::utils::math::safe_add;

/// Rolling per-block mint cap
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintLimiter {
    limit: u128,
    minted: BTreeMap<u64, u128>,
}

impl MintLimiter {
    /// Create a limiter with the given per-block cap
    pub fn new(limit: u128) -> Self {
        Self {
            limit,
            minted: BTreeMap::new(),
        }
    }

    /// Per-block cap
    pub fn limit(&self) -> u128 {
        self.limit
    }

    /// Change the per-block cap
    pub fn set_limit(&mut self, limit: u128) {
        self.limit = limit;
    }

    /// Amount minted in `block`
    pub fn minted_in(&self, block: u64) -> u128 {
        self.minted.get(&block).copied().unwrap_or(0)
    }

    /// Number of retained counters
    pub fn tracked_blocks(&self) -> usize {
        self.minted.len()
    }

    /// Fail if minting `amount` in `block` would exceed the cap
    pub fn check(&self, block: u64, amount: u128) -> Result<()> {
        let minted = self.minted_in(block);
        let total = safe_add(minted, amount)?;
        if total > self.limit {
            return Err(Error::MintRateLimited {
                block,
                minted,
                requested: amount,
                limit: self.limit,
            });
        }
        Ok(())
    }

    /// Record a mint that already passed [`MintLimiter::check`]
    pub fn record(&mut self, block: u64, amount: u128) {
        let entry = self.minted.entry(block).or_default();
        *entry = entry.saturating_add(amount);
        let horizon = block.saturating_sub(MINT_HISTORY_BLOCKS);
        self.minted = self.minted.split_off(&horizon);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_limit_per_block() {
        let mut limiter = MintLimiter::new(100);
        limiter.check(1, 60).unwrap();
        limiter.record(1, 60);
        let err = limiter.check(1, 41).unwrap_err();
        assert_eq!(err.shortfall(), Some(1));
        assert!(limiter.check(1, 40).is_ok());
        assert!(limiter.check(2, 100).is_ok());
    }

    #[test]
    fn test_old_counters_pruned() {
        let mut limiter = MintLimiter::new(100);
        limiter.record(1, 10);
        limiter.record(2, 10);
        limiter.record(1 + MINT_HISTORY_BLOCKS + 1, 10);
        assert_eq!(limiter.minted_in(1), 0);
        assert_eq!(limiter.minted_in(2), 10);
        assert_eq!(limiter.tracked_blocks(), 2);
    }

    proptest! {
        #[test]
        fn prop_minted_never_exceeds_limit(
            limit in 1u128..1_000_000,
            requests in proptest::collection::vec((0u64..5, 1u128..500_000), 1..50),
        ) {
            let mut limiter = MintLimiter::new(limit);
            for (block, amount) in requests {
                if limiter.check(block, amount).is_ok() {
                    limiter.record(block, amount);
                }
                prop_assert!(limiter.minted_in(block) <= limit);
            }
        }
    }
}
