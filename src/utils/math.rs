//! Fixed-point arithmetic and mathematical utilities.
//!
//! This module provides safe arithmetic operations with overflow protection
//! and fixed-point calculations for precise financial computations. Products
//! of two 128-bit amounts are carried in 256-bit (and, for square roots of
//! scaled invariants, 512-bit) intermediates so no legitimate input overflows
//! before the final division.

use primitive_types::{U256, U512};
use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::utils::constants::{BPS_DIVISOR, WAD};
use std::ops::{Add, Sub};

// ═══════════════════════════════════════════════════════════════════════════════
// FIXED POINT TYPE
// ═══════════════════════════════════════════════════════════════════════════════

/// Fixed-point number with 18 decimal places precision
/// Used for prices and ratios without floating-point errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FixedPoint(u128);

impl FixedPoint {
    /// Scale factor: 10^18
    pub const SCALE: u128 = WAD;

    /// Zero value
    pub const ZERO: Self = Self(0);

    /// One (1.0)
    pub const ONE: Self = Self(Self::SCALE);

    /// Create a new FixedPoint from raw value
    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    /// Create from an integer (scales up)
    pub fn from_integer(value: u64) -> Self {
        Self((value as u128) * Self::SCALE)
    }

    /// Create from basis points (100 bps = 1%)
    pub fn from_bps(bps: u64) -> Self {
        Self((bps as u128) * Self::SCALE / BPS_DIVISOR)
    }

    /// Ratio of two amounts, `numerator / denominator`
    pub fn from_ratio(numerator: u128, denominator: u128) -> Result<Self> {
        mul_div(numerator, Self::SCALE, denominator).map(Self)
    }

    /// Get the raw underlying value
    pub fn raw(&self) -> u128 {
        self.0
    }

    /// Check if value is zero
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Multiply, rounding down
    pub fn checked_mul(&self, other: Self) -> Result<Self> {
        mul_div(self.0, other.0, Self::SCALE).map(Self)
    }

    /// Divide, rounding down
    pub fn checked_div(&self, other: Self) -> Result<Self> {
        mul_div(self.0, Self::SCALE, other.0).map(Self)
    }

    /// Scale an integer amount by this value, rounding down
    pub fn mul_amount(&self, amount: u128) -> Result<u128> {
        mul_div(amount, self.0, Self::SCALE)
    }

    /// Saturating subtraction
    pub fn saturating_sub(&self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Lossless decimal view for display; `None` if beyond `Decimal` range
    pub fn to_decimal(&self) -> Option<Decimal> {
        let mantissa = i128::try_from(self.0).ok()?;
        Decimal::try_from_i128_with_scale(mantissa, 18)
            .ok()
            .map(|d| d.normalize())
    }
}

impl Add for FixedPoint {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for FixedPoint {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl std::fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_decimal() {
            Some(d) => write!(f, "{}", d),
            None => write!(f, "{}e-18", self.0),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SAFE ARITHMETIC OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Safe addition with overflow check
pub fn safe_add(a: u128, b: u128) -> Result<u128> {
    a.checked_add(b).ok_or(Error::Overflow {
        operation: format!("{} + {}", a, b),
    })
}

/// Safe subtraction with underflow check
pub fn safe_sub(a: u128, b: u128) -> Result<u128> {
    a.checked_sub(b).ok_or(Error::Underflow {
        operation: format!("{} - {}", a, b),
    })
}

/// Safe multiplication with overflow check
pub fn safe_mul(a: u128, b: u128) -> Result<u128> {
    a.checked_mul(b).ok_or(Error::Overflow {
        operation: format!("{} * {}", a, b),
    })
}

fn narrow(value: U256, operation: impl FnOnce() -> String) -> Result<u128> {
    if value > U256::from(u128::MAX) {
        return Err(Error::Overflow {
            operation: operation(),
        });
    }
    Ok(value.low_u128())
}

/// Computes `floor(a * b / c)` with a 256-bit intermediate
pub fn mul_div(a: u128, b: u128, c: u128) -> Result<u128> {
    if c == 0 {
        return Err(Error::DivisionByZero {
            operation: format!("({} * {}) / 0", a, b),
        });
    }
    let result = U256::from(a) * U256::from(b) / U256::from(c);
    narrow(result, || format!("({} * {}) / {}", a, b, c))
}

/// Computes `ceil(a * b / c)` with a 256-bit intermediate
pub fn mul_div_up(a: u128, b: u128, c: u128) -> Result<u128> {
    if c == 0 {
        return Err(Error::DivisionByZero {
            operation: format!("ceil(({} * {}) / 0)", a, b),
        });
    }
    let numerator = U256::from(a) * U256::from(b);
    let divisor = U256::from(c);
    let mut result = numerator / divisor;
    if !(numerator % divisor).is_zero() {
        result += U256::one();
    }
    narrow(result, || format!("ceil(({} * {}) / {})", a, b, c))
}

/// The product `a * b` as a 256-bit value
pub fn wide_mul(a: u128, b: u128) -> U256 {
    U256::from(a) * U256::from(b)
}

/// Integer square root via Newton's method
pub fn isqrt(n: u128) -> u128 {
    if n == 0 {
        return 0;
    }
    let mut x = n;
    let mut y = x / 2 + 1;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

/// `floor(sqrt(a * b))` without overflow
pub fn sqrt_product(a: u128, b: u128) -> u128 {
    // sqrt of a value below 2^256 always fits in 128 bits
    wide_mul(a, b).integer_sqrt().low_u128()
}

/// `floor(sqrt(a * b * num / den))`, used to solve `x^2 = k / price`
pub fn sqrt_scaled_product(a: u128, b: u128, num: u128, den: u128) -> Result<u128> {
    if den == 0 {
        return Err(Error::DivisionByZero {
            operation: "sqrt_scaled_product".into(),
        });
    }
    let product = U512::from(a) * U512::from(b) * U512::from(num) / U512::from(den);
    let root = product.integer_sqrt();
    if root > U512::from(u128::MAX) {
        return Err(Error::Overflow {
            operation: "sqrt_scaled_product".into(),
        });
    }
    Ok(root.low_u128())
}

// ═══════════════════════════════════════════════════════════════════════════════
// BASIS POINT HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// `amount * bps / 10000`, rounding down
pub fn apply_bps(amount: u128, bps: u64) -> Result<u128> {
    mul_div(amount, bps as u128, BPS_DIVISOR)
}

/// `amount * (10000 - bps) / 10000`, rounding down
pub fn apply_haircut(amount: u128, bps: u64) -> Result<u128> {
    let keep = BPS_DIVISOR
        .checked_sub(bps as u128)
        .ok_or_else(|| Error::InvalidParameter {
            name: "bps".into(),
            reason: format!("{} exceeds {}", bps, BPS_DIVISOR),
        })?;
    mul_div(amount, keep, BPS_DIVISOR)
}

/// Gross an amount up so that after a `fee_bps` haircut `amount` remains
pub fn gross_up_for_fee(amount: u128, fee_bps: u64) -> Result<u128> {
    let keep = BPS_DIVISOR.saturating_sub(fee_bps as u128);
    mul_div_up(amount, BPS_DIVISOR, keep)
}

/// Signed deviation of `value` from `target` in basis points
pub fn deviation_bps(value: u128, target: u128) -> Result<i128> {
    if target == 0 {
        return Err(Error::DivisionByZero {
            operation: "deviation_bps".into(),
        });
    }
    let magnitude = mul_div(value.abs_diff(target), BPS_DIVISOR, target)?;
    let magnitude = i128::try_from(magnitude).map_err(|_| Error::Overflow {
        operation: "deviation_bps".into(),
    })?;
    Ok(if value >= target { magnitude } else { -magnitude })
}

/// Check if a value is within bps deviation of a target
pub fn within_deviation(value: u128, target: u128, max_deviation_bps: u64) -> bool {
    match deviation_bps(value, target) {
        Ok(dev) => dev.unsigned_abs() <= max_deviation_bps as u128,
        Err(_) => value == target,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DECIMAL NORMALIZATION
// ═══════════════════════════════════════════════════════════════════════════════

/// `10^decimals` as u128
pub fn pow10(decimals: u8) -> Result<u128> {
    10u128.checked_pow(decimals as u32).ok_or(Error::Overflow {
        operation: format!("10^{}", decimals),
    })
}

/// Value in 18-decimal USD of `amount` token units priced at `price` (E18 per whole token)
pub fn value_in_wad(amount: u128, decimals: u8, price: u128) -> Result<u128> {
    mul_div(amount, price, pow10(decimals)?)
}

/// Token units worth `value` (18-decimal USD) at `price` (E18 per whole token)
pub fn units_for_value(value: u128, decimals: u8, price: u128) -> Result<u128> {
    mul_div(value, pow10(decimals)?, price)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_point_basic() {
        let one = FixedPoint::ONE;
        let two = FixedPoint::from_integer(2);

        assert_eq!(one + one, two);
        assert_eq!(two - one, one);
        assert_eq!(one.checked_mul(two).unwrap(), two);
        assert_eq!(two.checked_div(one).unwrap(), two);
    }

    #[test]
    fn test_fixed_point_from_bps() {
        let half = FixedPoint::from_bps(5000);
        assert_eq!(half.raw(), WAD / 2);
        assert_eq!(half.mul_amount(1_000).unwrap(), 500);
    }

    #[test]
    fn test_fixed_point_display() {
        let price = FixedPoint::from_raw(1_050_000_000_000_000_000);
        assert_eq!(price.to_string(), "1.05");
    }

    #[test]
    fn test_safe_arithmetic() {
        assert!(safe_add(1, 2).is_ok());
        assert!(safe_add(u128::MAX, 1).is_err());
        assert!(safe_sub(5, 3).is_ok());
        assert!(safe_sub(3, 5).is_err());
        assert!(safe_mul(u128::MAX, 2).is_err());
    }

    #[test]
    fn test_mul_div_wide_intermediate() {
        // (2^127 * 4) / 8 overflows u128 in the product but not in the result
        let a = 1u128 << 127;
        assert_eq!(mul_div(a, 4, 8).unwrap(), a / 2);
        assert!(mul_div(u128::MAX, u128::MAX, 1).is_err());
        assert!(mul_div(1, 1, 0).is_err());
    }

    #[test]
    fn test_mul_div_up() {
        assert_eq!(mul_div_up(10, 3, 4).unwrap(), 8);
        assert_eq!(mul_div_up(10, 4, 4).unwrap(), 10);
    }

    #[test]
    fn test_isqrt() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(1), 1);
        assert_eq!(isqrt(15), 3);
        assert_eq!(isqrt(16), 4);
        assert_eq!(isqrt(u128::MAX), u64::MAX as u128);
    }

    #[test]
    fn test_sqrt_product_matches_isqrt() {
        assert_eq!(sqrt_product(1_000, 1_000), 1_000);
        assert_eq!(sqrt_product(2, 8), 4);
        let big = 10u128.pow(30);
        assert_eq!(sqrt_product(big, big), big);
    }

    #[test]
    fn test_sqrt_scaled_product() {
        // sqrt(1000 * 1000 * 1 / 4) = 500
        assert_eq!(sqrt_scaled_product(1_000, 1_000, 1, 4).unwrap(), 500);
        // large reserves scaled by WAD do not overflow
        let r = 10u128.pow(27);
        assert_eq!(sqrt_scaled_product(r, r, WAD, WAD).unwrap(), r);
    }

    #[test]
    fn test_bps_helpers() {
        assert_eq!(apply_bps(1_000_000, 50).unwrap(), 5_000);
        assert_eq!(apply_haircut(10_000, 30).unwrap(), 9_970);
        assert!(apply_haircut(1, 10_001).is_err());
        // 9970 grossed up for a 30 bps fee is 10000
        assert_eq!(gross_up_for_fee(9_970, 30).unwrap(), 10_000);
    }

    #[test]
    fn test_deviation() {
        assert_eq!(deviation_bps(105, 100).unwrap(), 500);
        assert_eq!(deviation_bps(95, 100).unwrap(), -500);
        assert!(within_deviation(105, 100, 500));
        assert!(!within_deviation(106, 100, 500));
        assert!(deviation_bps(1, 0).is_err());
    }

    #[test]
    fn test_decimal_normalization() {
        // 1000 units of a 6-decimal token at $1 is 1000e18
        assert_eq!(value_in_wad(1_000_000_000, 6, WAD).unwrap(), 1_000 * WAD);
        assert_eq!(units_for_value(1_000 * WAD, 6, WAD).unwrap(), 1_000_000_000);
        assert!(pow10(39).is_err());
    }
}
