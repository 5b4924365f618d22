//! In-memory price feed.
//!
//! Holds the latest reported price per token plus the one before it, so
//! operators can see how far a price moved on its last update. Prices are
//! pushed by whatever relays the external feed; the engine only reads.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::core::address::Address;
use crate::error::{Error, Result};
use crate::oracle::PriceOracle;
use crate::utils::math::deviation_bps;

// ═══════════════════════════════════════════════════════════════════════════════
// PRICE DATA
// ═══════════════════════════════════════════════════════════════════════════════

/// A single price observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceData {
    /// Price of one whole token in USD (E18)
    pub price: u128,
    /// Unix timestamp of the observation
    pub updated_at: u64,
}

impl PriceData {
    /// Create a new observation
    pub fn new(price: u128, updated_at: u64) -> Self {
        Self { price, updated_at }
    }

    /// Age in seconds at `now`
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.updated_at)
    }
}

#[derive(Debug, Clone, Copy)]
struct FeedEntry {
    current: PriceData,
    previous: Option<PriceData>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRICE FEED
// ═══════════════════════════════════════════════════════════════════════════════

/// Settable oracle backed by a map
#[derive(Debug, Default)]
pub struct PriceFeed {
    entries: RwLock<HashMap<Address, FeedEntry>>,
}

impl PriceFeed {
    /// Create an empty feed
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new observation for `token`
    pub fn set_price(&self, token: Address, price: u128, updated_at: u64) -> Result<()> {
        if price == 0 {
            return Err(Error::ZeroAmount);
        }
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::Poisoned("price feed".into()))?;
        let data = PriceData::new(price, updated_at);
        let previous = entries.get(&token).map(|e| e.current);
        if let Some(prev) = previous {
            if updated_at < prev.updated_at {
                return Err(Error::InvalidParameter {
                    name: "updated_at".into(),
                    reason: format!("{} older than current {}", updated_at, prev.updated_at),
                });
            }
        }
        entries.insert(
            token,
            FeedEntry {
                current: data,
                previous,
            },
        );
        tracing::debug!(token = %token.short(), price, updated_at, "price updated");
        Ok(())
    }

    /// Move of the last update in bps, if there was a previous price
    pub fn price_change_bps(&self, token: &Address) -> Result<Option<i128>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| Error::Poisoned("price feed".into()))?;
        match entries.get(token).and_then(|e| e.previous.map(|p| (e.current, p))) {
            Some((current, previous)) => Ok(Some(deviation_bps(current.price, previous.price)?)),
            None => Ok(None),
        }
    }

    /// Tokens with a recorded price
    pub fn tokens(&self) -> Vec<Address> {
        self.entries
            .read()
            .map(|e| e.keys().copied().collect())
            .unwrap_or_default()
    }
}

impl PriceOracle for PriceFeed {
    fn get_price(&self, token: &Address) -> Result<PriceData> {
        let entries = self
            .entries
            .read()
            .map_err(|_| Error::Poisoned("price feed".into()))?;
        entries
            .get(token)
            .map(|e| e.current)
            .ok_or_else(|| Error::PriceUnavailable(token.to_hex()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::WAD;

    #[test]
    fn test_set_and_get() {
        let feed = PriceFeed::new();
        let token = Address::from_label("weth");
        feed.set_price(token, 2_000 * WAD, 100).unwrap();

        let data = feed.get_price(&token).unwrap();
        assert_eq!(data.price, 2_000 * WAD);
        assert_eq!(data.age(160), 60);
        assert_eq!(feed.tokens(), vec![token]);
    }

    #[test]
    fn test_rejects_zero_and_out_of_order() {
        let feed = PriceFeed::new();
        let token = Address::from_label("weth");
        assert!(feed.set_price(token, 0, 100).is_err());
        feed.set_price(token, WAD, 100).unwrap();
        assert!(feed.set_price(token, WAD, 99).is_err());
    }

    #[test]
    fn test_price_change() {
        let feed = PriceFeed::new();
        let token = Address::from_label("weth");
        feed.set_price(token, 100 * WAD, 1).unwrap();
        assert_eq!(feed.price_change_bps(&token).unwrap(), None);
        feed.set_price(token, 95 * WAD, 2).unwrap();
        assert_eq!(feed.price_change_bps(&token).unwrap(), Some(-500));
    }
}
