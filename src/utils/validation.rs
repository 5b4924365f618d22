//! Input validation utilities.
//!
//! Validation functions shared by every component so that bounds are
//! checked the same way and reported with the same error variants.

use crate::core::address::Address;
use crate::error::{Error, Result};
use crate::utils::constants::BPS_DIVISOR;

// ═══════════════════════════════════════════════════════════════════════════════
// AMOUNT VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate that an amount is non-zero
pub fn validate_non_zero(amount: u128) -> Result<()> {
    if amount == 0 {
        return Err(Error::ZeroAmount);
    }
    Ok(())
}

/// Validate a realized output against the caller's minimum
pub fn validate_min_out(actual: u128, minimum: u128) -> Result<()> {
    if actual < minimum {
        return Err(Error::SlippageExceeded { actual, minimum });
    }
    Ok(())
}

/// Validate a required input against the caller's maximum
pub fn validate_max_in(required: u128, maximum: u128) -> Result<()> {
    if required > maximum {
        return Err(Error::ExcessiveInput { required, maximum });
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// ADDRESS VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate that an address is set
pub fn validate_address(address: &Address, name: &str) -> Result<()> {
    if address.is_zero() {
        return Err(Error::ZeroAddress(name.into()));
    }
    Ok(())
}

/// Validate that the caller is the expected governance identity
pub fn validate_owner(caller: &Address, owner: &Address, action: &str) -> Result<()> {
    if caller != owner {
        return Err(Error::Unauthorized(format!(
            "{} requires governance, caller {}",
            action, caller
        )));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// TIME VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate that `now` has not passed `deadline`
pub fn validate_deadline(deadline: u64, now: u64) -> Result<()> {
    if now > deadline {
        return Err(Error::Expired { deadline, now });
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// BASIS POINT VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate a bps value is at most `max`
pub fn validate_bps(value: u64, max: u64, name: &str) -> Result<()> {
    if value > max {
        return Err(Error::InvalidParameter {
            name: name.into(),
            reason: format!("{} bps exceeds maximum {} bps", value, max),
        });
    }
    Ok(())
}

/// Validate that bucket shares add up to exactly 100%
pub fn validate_bucket_sum(buckets: &[u64]) -> Result<()> {
    let sum: u128 = buckets.iter().map(|b| *b as u128).sum();
    if sum != BPS_DIVISOR {
        return Err(Error::InvalidParameter {
            name: "buckets".into(),
            reason: format!("bucket bps sum to {}, expected {}", sum, BPS_DIVISOR),
        });
    }
    Ok(())
}
