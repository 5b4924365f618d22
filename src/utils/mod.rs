//! Utility modules shared across the engine:
//! - Fixed-point arithmetic
//! - Validation helpers
//! - Constants

pub mod constants;
pub mod math;
pub mod validation;

pub use constants::*;
pub use math::*;
pub use validation::*;
