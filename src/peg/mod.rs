//! Peg stabilization.
//!
//! - Planner: sizes a corrective trade from pool reserves
//! - Controller: runs one cycle over every symbol, sourcing inputs
//! - Keeper: cooldown, failure streak, resource guard and kill switch

pub mod controller;
pub mod keeper;
pub mod planner;

pub use controller::{CycleReport, PegController, SymbolOutcome, SymbolReport};
pub use keeper::{
    AtomicKillSwitch, FileKillSwitch, GuardMode, GuardVerdict, KeeperSettings, KillSwitch,
    LoopState, PegKeeper, ResourceGuard, StopReason, TickOutcome,
};
pub use planner::{plan_correction, CorrectionPlan, CorrectionSide, PegDecision, PoolState, SkipReason};
