//! Corrective trade planning.
//!
//! Pure function of pool reserves and a [`PegTarget`]. The full
//! no-overshoot input comes from the closed-form equilibrium of the
//! constant product, `x' = sqrt(k / p)` on the token side or
//! `y' = sqrt(k * p)` on the stablecoin side, grossed up for the swap fee.
//! Only `correction_fraction_bps` of it is attempted per cycle.

use serde::{Deserialize, Serialize};

use crate::amm::pool::get_amount_out;
use crate::core::config::PegTarget;
use crate::error::Result;
use crate::utils::constants::WAD;
use crate::utils::math::{apply_bps, deviation_bps, gross_up_for_fee, mul_div, sqrt_scaled_product};

/// Reserves of one (token, stablecoin) pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    /// Token reserve
    pub token_reserve: u128,
    /// Stablecoin reserve
    pub stable_reserve: u128,
    /// Swap fee charged by the pool
    pub swap_fee_bps: u64,
}

impl PoolState {
    /// Implied token price in stablecoin (E18)
    pub fn implied_price(&self) -> Result<u128> {
        mul_div(self.stable_reserve, WAD, self.token_reserve)
    }
}

/// Which asset the corrective trade sells into the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectionSide {
    /// Price above target: add token
    SellToken,
    /// Price below target: add stablecoin
    SellStable,
}

impl std::fmt::Display for CorrectionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorrectionSide::SellToken => write!(f, "sell-token"),
            CorrectionSide::SellStable => write!(f, "sell-stable"),
        }
    }
}

/// A sized corrective trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionPlan {
    /// Direction
    pub side: CorrectionSide,
    /// Implied price before the trade
    pub price: u128,
    /// Signed deviation from target
    pub deviation_bps: i128,
    /// Input that would close the whole gap
    pub full_amount_in: u128,
    /// Input to trade this cycle
    pub amount_in: u128,
    /// Pool output for `amount_in`
    pub expected_out: u128,
    /// Whether `max_action_amount` reduced the input
    pub capped: bool,
}

/// Why a symbol needs no trade this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// A reserve is zero
    EmptyPool,
    /// Deviation below the trigger
    WithinBand {
        /// Observed deviation
        deviation_bps: i128,
    },
    /// The full correction is smaller than the minimum action
    BelowMinimum {
        /// Full no-overshoot input
        full_amount_in: u128,
        /// Configured minimum
        min_action_amount: u128,
    },
    /// Not enough input asset after sourcing
    InsufficientBalance {
        /// Input the plan needs
        required: u128,
        /// Balance held
        available: u128,
    },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::EmptyPool => write!(f, "pool has no liquidity"),
            SkipReason::WithinBand { deviation_bps } => {
                write!(f, "deviation {} bps within band", deviation_bps)
            }
            SkipReason::BelowMinimum {
                full_amount_in,
                min_action_amount,
            } => write!(
                f,
                "full correction {} below minimum {}",
                full_amount_in, min_action_amount
            ),
            SkipReason::InsufficientBalance {
                required,
                available,
            } => write!(f, "needs {} but holds {}", required, available),
        }
    }
}

/// Planner verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PegDecision {
    /// Trade
    Act(CorrectionPlan),
    /// Leave the pool alone
    Skip(SkipReason),
}

/// Plan a correction of `pool` towards `target`
pub fn plan_correction(target: &PegTarget, pool: &PoolState) -> Result<PegDecision> {
    if pool.token_reserve == 0 || pool.stable_reserve == 0 {
        return Ok(PegDecision::Skip(SkipReason::EmptyPool));
    }
    let price = pool.implied_price()?;
    let deviation = deviation_bps(price, target.target_price)?;
    if deviation.unsigned_abs() < target.trigger_bps as u128 {
        return Ok(PegDecision::Skip(SkipReason::WithinBand {
            deviation_bps: deviation,
        }));
    }

    let (side, reserve_in, reserve_out, desired) = if deviation > 0 {
        let desired = sqrt_scaled_product(
            pool.token_reserve,
            pool.stable_reserve,
            WAD,
            target.target_price,
        )?;
        (CorrectionSide::SellToken, pool.token_reserve, pool.stable_reserve, desired)
    } else {
        let desired = sqrt_scaled_product(
            pool.token_reserve,
            pool.stable_reserve,
            target.target_price,
            WAD,
        )?;
        (CorrectionSide::SellStable, pool.stable_reserve, pool.token_reserve, desired)
    };

    let raw_in = desired.saturating_sub(reserve_in);
    if raw_in == 0 {
        return Ok(PegDecision::Skip(SkipReason::WithinBand {
            deviation_bps: deviation,
        }));
    }
    let full_amount_in = gross_up_for_fee(raw_in, pool.swap_fee_bps)?;
    if full_amount_in < target.min_action_amount {
        return Ok(PegDecision::Skip(SkipReason::BelowMinimum {
            full_amount_in,
            min_action_amount: target.min_action_amount,
        }));
    }

    let scaled = apply_bps(full_amount_in, target.correction_fraction_bps)?;
    let capped = scaled > target.max_action_amount;
    // Raised to the minimum, which never exceeds the full amount here
    let amount_in = scaled
        .min(target.max_action_amount)
        .max(target.min_action_amount);
    if amount_in == 0 {
        return Ok(PegDecision::Skip(SkipReason::BelowMinimum {
            full_amount_in,
            min_action_amount: target.min_action_amount,
        }));
    }

    let expected_out = get_amount_out(amount_in, reserve_in, reserve_out, pool.swap_fee_bps)?;
    Ok(PegDecision::Act(CorrectionPlan {
        side,
        price,
        deviation_bps: deviation,
        full_amount_in,
        amount_in,
        expected_out,
        capped,
    }))
}
