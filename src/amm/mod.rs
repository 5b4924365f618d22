//! Constant-product AMM.
//!
//! - Pool Engine: pricing, reserves and the per-pool lock
//! - Registry: pair creation, fee governance, pause and ownership
//! - Router: multi-hop quoting and all-or-nothing execution

pub mod pool;
pub mod registry;
pub mod router;

pub use pool::{
    get_amount_in, get_amount_out, quote, FeeAccrual, LiquidityReceipt, Pool, PoolControls,
    PoolHandle, SwapOutcome,
};
pub use registry::{InMemoryPairStore, PairStore, Registry};
pub use router::{LiquidityOutcome, Router, SwapReceipt};
