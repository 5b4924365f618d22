//! Protocol fee treasury.
//!
//! - Collector: fee intake, harvest into the stablecoin, governance
//! - Distribution: bucket split of stablecoin proceeds

pub mod collector;
pub mod distribution;

pub use collector::{HarvestReceipt, Treasury};
pub use distribution::DistributionSplit;
