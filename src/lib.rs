//! # mUSD Exchange Engine
//!
//! Economic core of a non-custodial exchange: a constant-product AMM, an
//! over-collateralized stablecoin (mUSD) minted against whitelisted
//! collateral, a treasury that collects protocol fees and converts them
//! into mUSD, and a keeper that trades pools back towards their peg.
//!
//! ## Architecture
//!
//! - **AMM**: Pool Engine, Registry and Router
//! - **Issuance**: mint/burn against collateral with a rate limiter and a
//!   collateral circuit breaker
//! - **Treasury**: fee accounting, harvest into mUSD, distribution
//! - **Peg**: correction planner, per-cycle controller and keeper loop
//! - **Protocol**: composition root and the outbound event bus
//!
//! Every mutating call takes a [`core::context::BlockContext`] and either
//! commits fully or leaves all state unchanged.
//!
//! ## Example
//!
//! ```rust,ignore
//! use musd::prelude::*;
//!
//! let feed = Arc::new(PriceFeed::new());
//! let mut protocol = Protocol::new(&EngineConfig::default(), gov, musd, feed)?;
//! protocol.add_liquidity(&ctx, weth, musd, amount_weth, amount_musd, 0, 0, deadline)?;
//! let receipt = protocol.swap_exact_tokens_for_tokens(&ctx, amount_in, min_out, &[weth, musd], to, deadline)?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    unused_lifetimes,
    unused_qualifications
)]

pub mod amm;
pub mod cli;
pub mod core;
pub mod error;
pub mod issuance;
pub mod oracle;
pub mod peg;
pub mod protocol;
pub mod treasury;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::amm::{Pool, PoolHandle, Registry, Router, SwapReceipt};
    pub use crate::core::{
        address::{Address, PairKey},
        config::{
            CollateralConfig, EngineConfig, FeeConfig, HarvestConfig, IssuanceConfig,
            PegControllerConfig, PegTarget, RatioConfig, TreasuryConfig,
        },
        context::BlockContext,
        token::TokenLedger,
    };
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::issuance::{IssuanceModule, IssuanceReceipt};
    pub use crate::oracle::{PriceData, PriceFeed, PriceOracle};
    pub use crate::peg::{
        plan_correction, CycleReport, KeeperSettings, PegController, PegDecision, PegKeeper,
        PoolState, StopReason,
    };
    pub use crate::protocol::{EventBus, EventRecord, Protocol, ProtocolEvent};
    pub use crate::treasury::{DistributionSplit, HarvestReceipt, Treasury};
    pub use crate::utils::{constants::WAD, math::FixedPoint};
    pub use std::sync::Arc;
}

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name
pub const PROTOCOL_NAME: &str = "mUSD";
