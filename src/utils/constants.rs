//! Protocol constants and magic numbers.
//!
//! All protocol-wide constants are defined here for easy auditing and modification.

// ═══════════════════════════════════════════════════════════════════════════════
// FIXED POINT
// ═══════════════════════════════════════════════════════════════════════════════

/// Basis points divisor (10000 = 100%)
pub const BPS_DIVISOR: u128 = 10_000;

/// 18-decimal fixed-point scale (1.0 = 10^18)
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// Decimals of the mUSD stablecoin
pub const STABLE_DECIMALS: u8 = 18;

/// Largest token decimals accepted for collateral normalization
pub const MAX_TOKEN_DECIMALS: u8 = 36;

// ═══════════════════════════════════════════════════════════════════════════════
// AMM CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// LP shares permanently locked on the first mint of every pool
pub const MINIMUM_LIQUIDITY: u128 = 1_000;

/// Default swap fee - 0.30%
pub const DEFAULT_SWAP_FEE_BPS: u64 = 30;

/// Default protocol slice of the swap fee - 0.05%
pub const DEFAULT_PROTOCOL_FEE_BPS: u64 = 5;

/// Swap fee cap - 10%
pub const MAX_SWAP_FEE_BPS: u64 = 1_000;

/// Protocol fee cap - 0.30%
pub const MAX_PROTOCOL_FEE_BPS: u64 = 30;

/// Default maximum router path length (tokens, not hops)
pub const DEFAULT_MAX_PATH_LENGTH: usize = 4;

/// Hard ceiling for governance-set path length
pub const ABSOLUTE_MAX_PATH_LENGTH: usize = 8;

// ═══════════════════════════════════════════════════════════════════════════════
// ISSUANCE CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Minimum collateral ratio - 110%
pub const DEFAULT_MIN_COLLATERAL_RATIO_BPS: u64 = 11_000;

/// Emergency collateral ratio that trips the breaker - 100%
pub const DEFAULT_EMERGENCY_COLLATERAL_RATIO_BPS: u64 = 10_000;

/// Maximum oracle price age in seconds (1 hour)
pub const DEFAULT_STALENESS_THRESHOLD_SECS: u64 = 3_600;

/// Default per-block mint cap - 1,000,000 mUSD
pub const DEFAULT_MAX_MINT_PER_BLOCK: u128 = 1_000_000 * WAD;

/// Blocks of mint counters kept for inspection
pub const MINT_HISTORY_BLOCKS: u64 = 256;

// ═══════════════════════════════════════════════════════════════════════════════
// TREASURY CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Harvest incentive cap - 1%
pub const MAX_HARVEST_INCENTIVE_BPS: u64 = 100;

/// Default harvest incentive - 0.10%
pub const DEFAULT_HARVEST_INCENTIVE_BPS: u64 = 10;

/// Default harvest slippage tolerance - 1%
pub const DEFAULT_MAX_SLIPPAGE_BPS: u64 = 100;

/// Slippage tolerance cap - 10%
pub const MAX_SLIPPAGE_BPS: u64 = 1_000;

// ═══════════════════════════════════════════════════════════════════════════════
// PEG CONTROLLER CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Default deviation that triggers a correction - 0.80%
pub const DEFAULT_TRIGGER_BPS: u64 = 80;

/// Default share of the gap closed per trade - 50%
pub const DEFAULT_CORRECTION_FRACTION_BPS: u64 = 5_000;

/// Default slippage allowance on corrective trades - 0.50%
pub const DEFAULT_PEG_SLIPPAGE_BPS: u64 = 50;

/// Extra stablecoin minted when sourcing input - 0.50%
pub const DEFAULT_MINT_BUFFER_BPS: u64 = 50;

/// Default cooldown between keeper cycles in seconds
pub const DEFAULT_COOLDOWN_SECS: u64 = 30;

/// Default deadline offset for corrective trades in seconds
pub const DEFAULT_TRADE_DEADLINE_SECS: u64 = 120;

/// Consecutive failing cycles before the keeper stops
pub const DEFAULT_MAX_FAILURE_STREAK: u32 = 5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_caps() {
        assert!(DEFAULT_PROTOCOL_FEE_BPS <= DEFAULT_SWAP_FEE_BPS);
        assert!(DEFAULT_SWAP_FEE_BPS <= MAX_SWAP_FEE_BPS);
        assert!(DEFAULT_PROTOCOL_FEE_BPS <= MAX_PROTOCOL_FEE_BPS);
        assert!(DEFAULT_HARVEST_INCENTIVE_BPS <= MAX_HARVEST_INCENTIVE_BPS);
        assert!(DEFAULT_MAX_SLIPPAGE_BPS <= MAX_SLIPPAGE_BPS);
    }

    #[test]
    fn test_ratio_constants() {
        assert!(DEFAULT_EMERGENCY_COLLATERAL_RATIO_BPS <= DEFAULT_MIN_COLLATERAL_RATIO_BPS);
    }

    #[test]
    fn test_path_bounds() {
        assert!(DEFAULT_MAX_PATH_LENGTH >= 2);
        assert!(DEFAULT_MAX_PATH_LENGTH <= ABSOLUTE_MAX_PATH_LENGTH);
    }
}
