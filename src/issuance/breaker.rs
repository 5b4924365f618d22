//! Collateral circuit breaker.
//!
//! A two-state breaker keyed on the collateralization ratio. It trips
//! automatically when the ratio falls below the emergency threshold and
//! only closes again through an explicit, ratio-checked reset.

use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// BREAKER STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    /// Normal operation
    Armed,
    /// Ratio fell below the emergency threshold; issuance halted
    Tripped,
}

impl BreakerState {
    /// Check if mint/burn is allowed
    pub fn allows_issuance(&self) -> bool {
        matches!(self, BreakerState::Armed)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COLLATERAL BREAKER
// ═══════════════════════════════════════════════════════════════════════════════

/// Ratio-driven circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralBreaker {
    state: BreakerState,
    /// Times the breaker has tripped
    trip_count: u64,
    /// Ratio observed at the last evaluation
    last_ratio_bps: Option<u128>,
    /// Block of the last trip
    tripped_at_block: Option<u64>,
}

impl Default for CollateralBreaker {
    fn default() -> Self {
        Self {
            state: BreakerState::Armed,
            trip_count: 0,
            last_ratio_bps: None,
            tripped_at_block: None,
        }
    }
}

impl CollateralBreaker {
    /// Create an armed breaker
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Whether the breaker has tripped
    pub fn is_tripped(&self) -> bool {
        self.state == BreakerState::Tripped
    }

    /// Times tripped since creation
    pub fn trip_count(&self) -> u64 {
        self.trip_count
    }

    /// Ratio seen at the last evaluation
    pub fn last_ratio_bps(&self) -> Option<u128> {
        self.last_ratio_bps
    }

    /// Block of the most recent trip
    pub fn tripped_at_block(&self) -> Option<u64> {
        self.tripped_at_block
    }

    /// Evaluate a ratio; returns true if this call tripped the breaker.
    ///
    /// An undefined ratio (zero supply) never trips.
    pub fn evaluate(&mut self, ratio_bps: Option<u128>, emergency_bps: u64, block: u64) -> bool {
        self.last_ratio_bps = ratio_bps;
        match ratio_bps {
            Some(ratio) if ratio < emergency_bps as u128 && !self.is_tripped() => {
                self.state = BreakerState::Tripped;
                self.trip_count += 1;
                self.tripped_at_block = Some(block);
                true
            }
            _ => false,
        }
    }

    /// Close the breaker
    pub fn reset(&mut self) {
        self.state = BreakerState::Armed;
    }
}
