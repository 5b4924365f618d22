//! mUSD keeper command line support.
//!
//! Configuration file, in-memory simulation and output formatting used by
//! the `musd-keeper` binary.

pub mod config;
pub mod output;
pub mod simulation;

pub use config::*;
pub use output::*;
pub use simulation::*;

use crate::core::config::PegTarget;
use crate::error::Result;
use crate::peg::planner::{plan_correction, PegDecision, PoolState};

// ═══════════════════════════════════════════════════════════════════════════════
// CLI ERROR
// ═══════════════════════════════════════════════════════════════════════════════

/// CLI error types
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(#[from] crate::core::config::ConfigError),
    /// Engine rejected an operation
    #[error("Engine error: {0}")]
    Engine(#[from] crate::error::Error),
    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// CLI Result type
pub type CliResult<T> = std::result::Result<T, CliError>;

/// Parse a decimal amount such as `1.5` into E18 fixed point
pub fn parse_wad(input: &str) -> CliResult<u128> {
    let invalid = || CliError::InvalidArgument(format!("not a decimal amount: {}", input));
    let input = input.trim().replace('_', "");
    let (whole, frac) = match input.split_once('.') {
        Some((w, f)) => (w, f),
        None => (input.as_str(), ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    if frac.len() > 18 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let frac_value: u128 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<18}", frac);
        padded.parse().map_err(|_| invalid())?
    };
    whole
        .checked_mul(crate::utils::constants::WAD)
        .and_then(|w| w.checked_add(frac_value))
        .ok_or_else(invalid)
}

/// Plan a correction for explicit reserves, validating the target first
pub fn plan_for(target: &PegTarget, pool: &PoolState) -> Result<PegDecision> {
    target.validate()?;
    plan_correction(target, pool)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::Address;
    use crate::utils::constants::WAD;

    #[test]
    fn test_parse_wad() {
        assert_eq!(parse_wad("1").unwrap(), WAD);
        assert_eq!(parse_wad("1.5").unwrap(), WAD * 3 / 2);
        assert_eq!(parse_wad("0.000000000000000001").unwrap(), 1);
        assert_eq!(parse_wad("10_000").unwrap(), 10_000 * WAD);
        assert_eq!(parse_wad(".25").unwrap(), WAD / 4);
        assert!(parse_wad("").is_err());
        assert!(parse_wad("1.2.3").is_err());
        assert!(parse_wad("0.0000000000000000001").is_err());
        assert!(parse_wad("-1").is_err());
    }

    #[test]
    fn test_plan_for_validates_target() {
        let pool = PoolState {
            token_reserve: 100 * WAD,
            stable_reserve: 100 * WAD,
            swap_fee_bps: 30,
        };
        let mut target = PegTarget::new("WETH", Address::from_label("weth"), WAD);
        assert!(plan_for(&target, &pool).is_ok());
        target.correction_fraction_bps = 0;
        assert!(plan_for(&target, &pool).is_err());
    }
}
