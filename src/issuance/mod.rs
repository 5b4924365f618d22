//! Stablecoin issuance.
//!
//! - Module: oracle-priced mint and burn, reserves, governance
//! - Limiter: rolling per-block mint cap
//! - Breaker: collateral-ratio circuit breaker

pub mod breaker;
pub mod limiter;
pub mod module;

pub use breaker::{BreakerState, CollateralBreaker};
pub use limiter::MintLimiter;
pub use module::{IssuanceModule, IssuanceReceipt};
