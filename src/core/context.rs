//! Execution context supplied with every state-mutating call.

use serde::{Deserialize, Serialize};

use crate::core::address::Address;

/// Block-level facts and the authenticated caller of one call.
///
/// The surrounding execution environment applies one call at a time, so a
/// context is only ever live for a single transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContext {
    /// Current block number
    pub block_number: u64,
    /// Current unix timestamp in seconds
    pub timestamp: u64,
    /// Authenticated caller
    pub caller: Address,
}

impl BlockContext {
    /// Create a new context
    pub fn new(block_number: u64, timestamp: u64, caller: Address) -> Self {
        Self {
            block_number,
            timestamp,
            caller,
        }
    }

    /// Same block, different caller
    pub fn with_caller(&self, caller: Address) -> Self {
        Self { caller, ..*self }
    }

    /// Advance by `blocks` blocks and `secs` seconds
    pub fn advance(&self, blocks: u64, secs: u64) -> Self {
        Self {
            block_number: self.block_number.saturating_add(blocks),
            timestamp: self.timestamp.saturating_add(secs),
            caller: self.caller,
        }
    }
}
