//! Protocol module - event stream and composition root.
//!
//! Every component records its transitions as [`ProtocolEvent`]s and
//! publishes them on the shared [`EventBus`] once the call commits.
//! [`Protocol`] owns the ledger and wires the components together.

pub mod engine;
pub mod events;

pub use engine::*;
pub use events::*;
