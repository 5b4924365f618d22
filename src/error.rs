//! Error types for the mUSD engine.
//!
//! Every failure is synchronous and atomic: an operation that returns an
//! error has left all state unchanged. Variants carry the bound that was
//! violated and the observed value so both automated and manual triage can
//! act on them. [`Error::kind`] folds the variants onto the coarse taxonomy
//! callers branch on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure taxonomy shared by every component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed or out-of-range input
    InvalidInput,
    /// Referenced state does not exist or is empty
    StateNotFound,
    /// Realized amount is worse than the caller's bound
    Slippage,
    /// Per-block issuance limit reached
    RateLimited,
    /// Oracle price stale or outside configured bounds
    StalenessOrBounds,
    /// A pause, lock or circuit breaker blocks the call
    SafetyTripped,
    /// Caller is not allowed to perform the call
    Unauthorized,
    /// Call arrived after its deadline
    Expired,
    /// Call would leave the system under-collateralized
    Unsafe,
}

impl ErrorKind {
    /// Stable name for logs and external systems
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::StateNotFound => "StateNotFound",
            ErrorKind::Slippage => "Slippage",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::StalenessOrBounds => "StalenessOrBounds",
            ErrorKind::SafetyTripped => "SafetyTripped",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::Expired => "Expired",
            ErrorKind::Unsafe => "Unsafe",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the engine
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Error {
    // ═══════════════════════════════════════════════════════════════════
    // Input Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Amount is zero
    #[error("Amount cannot be zero")]
    ZeroAmount,

    /// Zero address supplied where a real account is required
    #[error("Zero address not allowed for {0}")]
    ZeroAddress(String),

    /// Both sides of a pair are the same token
    #[error("Identical tokens: {0}")]
    IdenticalTokens(String),

    /// Token is not part of the pair
    #[error("Token {token} is not part of pair {pair}")]
    TokenNotInPair {
        /// Offending token
        token: String,
        /// Pair description
        pair: String,
    },

    /// Swap path length outside allowed range
    #[error("Invalid path length {len}: must be between 2 and {max}")]
    InvalidPath {
        /// Supplied path length
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Invalid input parameter
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Account balance too small for the transfer
    #[error("Insufficient balance of {token}: required {required}, available {available}")]
    InsufficientBalance {
        /// Token address
        token: String,
        /// Required amount
        required: u128,
        /// Available amount
        available: u128,
    },

    /// Redemption exceeds tracked collateral
    #[error("Collateral out {requested} exceeds tracked balance {available}")]
    ExceedsCollateralBalance {
        /// Requested collateral
        requested: u128,
        /// Tracked balance
        available: u128,
    },

    /// Conversion amount above per-call cap
    #[error("Amount {amount} exceeds per-call cap {cap}")]
    ExceedsConvertCap {
        /// Requested amount
        amount: u128,
        /// Configured cap
        cap: u128,
    },

    /// Liquidity operation would mint or burn nothing
    #[error("Insufficient liquidity {operation}")]
    InsufficientLiquidityMinted {
        /// Operation that produced zero
        operation: String,
    },

    /// Overflow in calculation
    #[error("Arithmetic overflow in {operation}")]
    Overflow {
        /// Operation that overflowed
        operation: String,
    },

    /// Underflow in calculation
    #[error("Arithmetic underflow in {operation}")]
    Underflow {
        /// Operation that underflowed
        operation: String,
    },

    /// Division by zero
    #[error("Division by zero in {operation}")]
    DivisionByZero {
        /// Operation that divided by zero
        operation: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // State Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Pair has not been created
    #[error("Pair not found: {0}")]
    PairNotFound(String),

    /// Pool has an empty reserve
    #[error("Insufficient liquidity: reserves ({reserve_in}, {reserve_out})")]
    InsufficientLiquidity {
        /// Input-side reserve
        reserve_in: u128,
        /// Output-side reserve
        reserve_out: u128,
    },

    /// Collateral token unknown or disabled
    #[error("Collateral not enabled: {0}")]
    CollateralNotEnabled(String),

    /// Distribution buckets are not configured
    #[error("Distribution not configured: {0}")]
    DistributionNotConfigured(String),

    // ═══════════════════════════════════════════════════════════════════
    // Slippage Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Realized output below caller minimum
    #[error("Slippage: output {actual} below minimum {minimum}")]
    SlippageExceeded {
        /// Realized amount
        actual: u128,
        /// Caller minimum
        minimum: u128,
    },

    /// Required input above caller maximum
    #[error("Slippage: input {required} above maximum {maximum}")]
    ExcessiveInput {
        /// Required input
        required: u128,
        /// Caller maximum
        maximum: u128,
    },

    /// Caller bound looser than the configured slippage floor
    #[error("Slippage: min out {min_out} looser than floor {floor} (quoted {quoted})")]
    MinOutTooLoose {
        /// Caller minimum
        min_out: u128,
        /// Enforced floor
        floor: u128,
        /// Router quote
        quoted: u128,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Rate Limit Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Mint would exceed the per-block cap
    #[error("Mint rate limited at block {block}: minted {minted} + requested {requested} > limit {limit}")]
    MintRateLimited {
        /// Block number
        block: u64,
        /// Already minted in this block
        minted: u128,
        /// Requested mint
        requested: u128,
        /// Per-block cap
        limit: u128,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Oracle Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Price is stale (not updated recently)
    #[error("Price is stale: updated at {updated_at}, now {now}, max age {max_age}s")]
    StalePrice {
        /// Oracle update timestamp
        updated_at: u64,
        /// Current timestamp
        now: u64,
        /// Maximum allowed age in seconds
        max_age: u64,
    },

    /// Price out of bounds
    #[error("Price {price} out of bounds [{min}, {max}]")]
    PriceOutOfBounds {
        /// Actual price
        price: u128,
        /// Minimum allowed price
        min: u128,
        /// Maximum allowed price
        max: u128,
    },

    /// Oracle has no price for the token
    #[error("No oracle price for {0}")]
    PriceUnavailable(String),

    // ═══════════════════════════════════════════════════════════════════
    // Safety Errors
    // ═══════════════════════════════════════════════════════════════════

    /// AMM is paused by governance
    #[error("Engine is paused")]
    EnginePaused,

    /// Issuance is paused
    #[error("Issuance module is paused")]
    IssuancePaused,

    /// Collateral circuit breaker has tripped
    #[error("Circuit breaker tripped")]
    CircuitBreakerTripped,

    /// Treasury is paused
    #[error("Treasury is paused")]
    TreasuryPaused,

    /// Pool lock already held (reentrant call)
    #[error("Pool {0} is locked")]
    Locked(String),

    /// Pool lock poisoned by a panic mid-update
    #[error("Pool {0} lock poisoned")]
    Poisoned(String),

    // ═══════════════════════════════════════════════════════════════════
    // Authorization Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Not authorized to perform this action
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Fee callback from an address that is not the canonical pair
    #[error("Unknown pair: {0}")]
    UnknownPair(String),

    /// Token not on the harvest allowlist
    #[error("Token not allowlisted: {0}")]
    TokenNotAllowlisted(String),

    // ═══════════════════════════════════════════════════════════════════
    // Deadline Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Called after deadline
    #[error("Expired: deadline {deadline}, now {now}")]
    Expired {
        /// Caller deadline
        deadline: u64,
        /// Current timestamp
        now: u64,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Solvency Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Collateralization ratio below minimum
    #[error("Collateral ratio {ratio_bps} bps below required {required_bps} bps")]
    CollateralRatioTooLow {
        /// Ratio that would result
        ratio_bps: u128,
        /// Required ratio
        required_bps: u128,
    },
}

impl Error {
    /// Coarse kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ZeroAmount
            | Error::ZeroAddress(_)
            | Error::IdenticalTokens(_)
            | Error::TokenNotInPair { .. }
            | Error::InvalidPath { .. }
            | Error::InvalidParameter { .. }
            | Error::InsufficientBalance { .. }
            | Error::ExceedsCollateralBalance { .. }
            | Error::ExceedsConvertCap { .. }
            | Error::InsufficientLiquidityMinted { .. }
            | Error::Overflow { .. }
            | Error::Underflow { .. }
            | Error::DivisionByZero { .. } => ErrorKind::InvalidInput,

            Error::PairNotFound(_)
            | Error::InsufficientLiquidity { .. }
            | Error::CollateralNotEnabled(_)
            | Error::DistributionNotConfigured(_) => ErrorKind::StateNotFound,

            Error::SlippageExceeded { .. }
            | Error::ExcessiveInput { .. }
            | Error::MinOutTooLoose { .. } => ErrorKind::Slippage,

            Error::MintRateLimited { .. } => ErrorKind::RateLimited,

            Error::StalePrice { .. }
            | Error::PriceOutOfBounds { .. }
            | Error::PriceUnavailable(_) => ErrorKind::StalenessOrBounds,

            Error::EnginePaused
            | Error::IssuancePaused
            | Error::CircuitBreakerTripped
            | Error::TreasuryPaused
            | Error::Locked(_)
            | Error::Poisoned(_) => ErrorKind::SafetyTripped,

            Error::Unauthorized(_) | Error::UnknownPair(_) | Error::TokenNotAllowlisted(_) => {
                ErrorKind::Unauthorized
            }

            Error::Expired { .. } => ErrorKind::Expired,

            Error::CollateralRatioTooLow { .. } => ErrorKind::Unsafe,
        }
    }

    /// How far the observed value missed its bound, where that is meaningful
    pub fn shortfall(&self) -> Option<u128> {
        match self {
            Error::SlippageExceeded { actual, minimum } => Some(minimum.saturating_sub(*actual)),
            Error::ExcessiveInput { required, maximum } => Some(required.saturating_sub(*maximum)),
            Error::MinOutTooLoose { min_out, floor, .. } => Some(floor.saturating_sub(*min_out)),
            Error::MintRateLimited {
                minted,
                requested,
                limit,
                ..
            } => Some(minted.saturating_add(*requested).saturating_sub(*limit)),
            Error::InsufficientBalance {
                required,
                available,
                ..
            } => Some(required.saturating_sub(*available)),
            Error::ExceedsCollateralBalance {
                requested,
                available,
            } => Some(requested.saturating_sub(*available)),
            Error::ExceedsConvertCap { amount, cap } => Some(amount.saturating_sub(*cap)),
            Error::CollateralRatioTooLow {
                ratio_bps,
                required_bps,
            } => Some(required_bps.saturating_sub(*ratio_bps)),
            Error::StalePrice {
                updated_at,
                now,
                max_age,
            } => Some(now.saturating_sub(updated_at.saturating_add(*max_age)) as u128),
            _ => None,
        }
    }

    /// Returns true if a later attempt may succeed without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Slippage
                | ErrorKind::RateLimited
                | ErrorKind::StalenessOrBounds
                | ErrorKind::Expired
        ) || matches!(self, Error::Locked(_))
    }

    /// Returns the error code for external systems
    pub fn code(&self) -> u32 {
        match self {
            // Input errors: 1xxx
            Error::ZeroAmount => 1001,
            Error::ZeroAddress(_) => 1002,
            Error::IdenticalTokens(_) => 1003,
            Error::TokenNotInPair { .. } => 1004,
            Error::InvalidPath { .. } => 1005,
            Error::InvalidParameter { .. } => 1006,
            Error::InsufficientBalance { .. } => 1007,
            Error::ExceedsCollateralBalance { .. } => 1008,
            Error::ExceedsConvertCap { .. } => 1009,
            Error::InsufficientLiquidityMinted { .. } => 1010,
            Error::Overflow { .. } => 1011,
            Error::Underflow { .. } => 1012,
            Error::DivisionByZero { .. } => 1013,

            // State errors: 2xxx
            Error::PairNotFound(_) => 2001,
            Error::InsufficientLiquidity { .. } => 2002,
            Error::CollateralNotEnabled(_) => 2003,
            Error::DistributionNotConfigured(_) => 2004,

            // Slippage errors: 3xxx
            Error::SlippageExceeded { .. } => 3001,
            Error::ExcessiveInput { .. } => 3002,
            Error::MinOutTooLoose { .. } => 3003,

            // Rate limit errors: 4xxx
            Error::MintRateLimited { .. } => 4001,

            // Oracle errors: 5xxx
            Error::StalePrice { .. } => 5001,
            Error::PriceOutOfBounds { .. } => 5002,
            Error::PriceUnavailable(_) => 5003,

            // Safety errors: 6xxx
            Error::EnginePaused => 6001,
            Error::IssuancePaused => 6002,
            Error::CircuitBreakerTripped => 6003,
            Error::TreasuryPaused => 6004,
            Error::Locked(_) => 6005,
            Error::Poisoned(_) => 6006,

            // Authorization errors: 7xxx
            Error::Unauthorized(_) => 7001,
            Error::UnknownPair(_) => 7002,
            Error::TokenNotAllowlisted(_) => 7003,

            // Deadline errors: 8xxx
            Error::Expired { .. } => 8001,

            // Solvency errors: 9xxx
            Error::CollateralRatioTooLow { .. } => 9001,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_unique() {
        let codes = vec![
            Error::ZeroAmount.code(),
            Error::PairNotFound("".into()).code(),
            Error::SlippageExceeded { actual: 0, minimum: 0 }.code(),
            Error::MintRateLimited { block: 0, minted: 0, requested: 0, limit: 0 }.code(),
            Error::StalePrice { updated_at: 0, now: 0, max_age: 0 }.code(),
            Error::EnginePaused.code(),
            Error::Unauthorized("".into()).code(),
            Error::Expired { deadline: 0, now: 0 }.code(),
            Error::CollateralRatioTooLow { ratio_bps: 0, required_bps: 0 }.code(),
        ];

        let mut unique_codes = codes.clone();
        unique_codes.sort();
        unique_codes.dedup();

        assert_eq!(codes.len(), unique_codes.len(), "Error codes must be unique");
    }

    #[test]
    fn test_code_prefix_matches_kind() {
        let cases = [
            (Error::ZeroAmount, 1),
            (Error::CollateralNotEnabled("x".into()), 2),
            (Error::MinOutTooLoose { min_out: 1, floor: 2, quoted: 3 }, 3),
            (Error::MintRateLimited { block: 1, minted: 1, requested: 1, limit: 1 }, 4),
            (Error::PriceUnavailable("x".into()), 5),
            (Error::Locked("x".into()), 6),
            (Error::TokenNotAllowlisted("x".into()), 7),
            (Error::Expired { deadline: 1, now: 2 }, 8),
            (Error::CollateralRatioTooLow { ratio_bps: 1, required_bps: 2 }, 9),
        ];
        for (err, prefix) in cases {
            assert_eq!(err.code() / 1000, prefix, "{err}");
        }
    }

    #[test]
    fn test_error_display_carries_bounds() {
        let err = Error::SlippageExceeded {
            actual: 90,
            minimum: 100,
        };
        assert!(err.to_string().contains("90"));
        assert!(err.to_string().contains("100"));
        assert_eq!(err.shortfall(), Some(10));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(Error::UnknownPair("p".into()).kind(), ErrorKind::Unauthorized);
        assert_eq!(
            Error::InsufficientLiquidity { reserve_in: 0, reserve_out: 1 }.kind(),
            ErrorKind::StateNotFound
        );
        assert_eq!(Error::CircuitBreakerTripped.kind(), ErrorKind::SafetyTripped);
        assert_eq!(
            Error::PriceOutOfBounds { price: 1, min: 2, max: 3 }.kind(),
            ErrorKind::StalenessOrBounds
        );
    }

    #[test]
    fn test_rate_limit_shortfall() {
        let err = Error::MintRateLimited {
            block: 7,
            minted: 80,
            requested: 30,
            limit: 100,
        };
        assert_eq!(err.shortfall(), Some(10));
        assert!(err.is_retryable());
        assert!(!Error::Unauthorized("x".into()).is_retryable());
    }
}
