//! Core modules for the mUSD engine.
//!
//! This module contains the fundamental building blocks:
//! - Addresses and canonical pair keys
//! - Per-call execution context
//! - Multi-token balance ledger
//! - Configuration and parameters

pub mod address;
pub mod config;
pub mod context;
pub mod token;

pub use address::*;
pub use config::*;
pub use context::*;
pub use token::*;
