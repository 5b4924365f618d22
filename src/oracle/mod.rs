//! Oracle module for collateral prices.
//!
//! The engine never trusts a price it has not checked. Every consumer goes
//! through [`validated_price`], which applies the configured bounds and the
//! staleness threshold to whatever the injected [`PriceOracle`] returns.

pub mod price_feed;

pub use price_feed::*;

use crate::core::address::Address;
use crate::core::config::CollateralConfig;
use crate::error::{Error, Result};

/// Source of `(priceE18, updatedAt)` for a token
pub trait PriceOracle: Send + Sync + std::fmt::Debug {
    /// Latest price for `token`
    fn get_price(&self, token: &Address) -> Result<PriceData>;
}

/// Check a price against collateral bounds and staleness
pub fn check_price(
    data: &PriceData,
    config: &CollateralConfig,
    staleness_threshold_secs: u64,
    now: u64,
) -> Result<u128> {
    if data.price < config.min_oracle_price || data.price > config.max_oracle_price {
        return Err(Error::PriceOutOfBounds {
            price: data.price,
            min: config.min_oracle_price,
            max: config.max_oracle_price,
        });
    }
    if data.updated_at.saturating_add(staleness_threshold_secs) < now {
        return Err(Error::StalePrice {
            updated_at: data.updated_at,
            now,
            max_age: staleness_threshold_secs,
        });
    }
    Ok(data.price)
}

/// Fetch and check a price in one step
pub fn validated_price(
    oracle: &dyn PriceOracle,
    token: &Address,
    config: &CollateralConfig,
    staleness_threshold_secs: u64,
    now: u64,
) -> Result<u128> {
    let data = oracle.get_price(token)?;
    check_price(&data, config, staleness_threshold_secs, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::WAD;

    fn config() -> CollateralConfig {
        CollateralConfig::enabled(6, WAD * 95 / 100, WAD * 105 / 100)
    }

    #[test]
    fn test_price_at_min_bound_accepted() {
        let data = PriceData::new(WAD * 95 / 100, 1_000);
        assert_eq!(check_price(&data, &config(), 3_600, 1_000).unwrap(), WAD * 95 / 100);
    }

    #[test]
    fn test_price_below_min_bound_rejected() {
        let data = PriceData::new(WAD * 95 / 100 - 1, 1_000);
        assert!(matches!(
            check_price(&data, &config(), 3_600, 1_000),
            Err(Error::PriceOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_staleness_boundary() {
        let data = PriceData::new(WAD, 1_000);
        assert!(check_price(&data, &config(), 3_600, 4_600).is_ok());
        let err = check_price(&data, &config(), 3_600, 4_601).unwrap_err();
        assert_eq!(err.shortfall(), Some(1));
    }

    #[test]
    fn test_missing_price() {
        let feed = PriceFeed::new();
        let token = Address::from_label("usdc");
        assert!(matches!(
            validated_price(&feed, &token, &config(), 3_600, 0),
            Err(Error::PriceUnavailable(_))
        ));
    }
}
