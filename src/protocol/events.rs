//! Protocol events for state change notifications.
//!
//! Every successful transition produces structured events. They are
//! buffered in an [`EventLog`] while the call runs and handed to the
//! [`EventBus`] only once the call has committed, so a failed call never
//! emits anything. Delivery is fire-and-forget: the engine never waits on a
//! subscriber and downstream consumers de-duplicate by [`EventRecord::id`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::core::address::Address;
use crate::core::config::CollateralConfig;
use crate::core::context::BlockContext;

/// Default capacity of the outbound channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1_024;

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// All protocol event types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolEvent {
    // AMM Events
    /// Pool created for a new pair
    PairCreated {
        /// Lower-ordered token
        token0: Address,
        /// Higher-ordered token
        token1: Address,
        /// Pool address
        pair: Address,
    },
    /// Tokens swapped through one pool
    Swap {
        /// Pool address
        pair: Address,
        /// Account that paid the input
        sender: Address,
        /// Input token
        token_in: Address,
        /// Input amount including fees
        amount_in: u128,
        /// Output token
        token_out: Address,
        /// Output amount
        amount_out: u128,
        /// Output recipient
        to: Address,
    },
    /// Liquidity deposited
    LiquidityAdded {
        /// Pool address
        pair: Address,
        /// Depositor
        provider: Address,
        /// Deposited token0
        amount0: u128,
        /// Deposited token1
        amount1: u128,
        /// Shares minted
        shares: u128,
    },
    /// Liquidity withdrawn
    LiquidityRemoved {
        /// Pool address
        pair: Address,
        /// Share owner
        provider: Address,
        /// Returned token0
        amount0: u128,
        /// Returned token1
        amount1: u128,
        /// Shares burned
        shares: u128,
        /// Recipient
        to: Address,
    },
    /// Protocol slice of a swap fee sent to the treasury
    ProtocolFeeAccrued {
        /// Pool address
        pair: Address,
        /// Fee token
        token: Address,
        /// Fee amount
        amount: u128,
    },

    // Treasury Events
    /// Treasury acknowledged a fee transfer from a pool
    FeeTransferred {
        /// Fee token
        token: Address,
        /// Sending pool
        from_pair: Address,
        /// Amount received
        amount: u128,
    },
    /// Fees converted into the stablecoin
    Converted {
        /// Harvested token
        token_in: Address,
        /// Harvested amount
        amount_in: u128,
        /// Stablecoin received by the treasury
        stable_out: u128,
        /// Incentive paid to the caller
        incentive: u128,
        /// Harvester
        caller: Address,
    },
    /// Stablecoin distributed to buckets
    Distributed {
        /// Total distributed
        amount: u128,
        /// Operations share
        ops: u128,
        /// Liquidity share
        liquidity: u128,
        /// Reserve share, including dust
        reserve: u128,
    },

    // Issuance Events
    /// Stablecoin minted against collateral
    Minted {
        /// Collateral token
        collateral: Address,
        /// Collateral deposited
        collateral_amount: u128,
        /// Stablecoin minted
        stable_amount: u128,
        /// Oracle price used (E18)
        price: u128,
        /// Recipient
        recipient: Address,
    },
    /// Stablecoin burned for collateral
    Burned {
        /// Collateral token
        collateral: Address,
        /// Stablecoin burned
        stable_amount: u128,
        /// Collateral returned
        collateral_amount: u128,
        /// Oracle price used (E18)
        price: u128,
        /// Recipient
        recipient: Address,
    },
    /// Reserve donated to the issuance module
    ReserveDeposited {
        /// Collateral token
        token: Address,
        /// Donor
        from: Address,
        /// Amount
        amount: u128,
    },
    /// Reserve withdrawn by an operator
    ReserveWithdrawn {
        /// Collateral token
        token: Address,
        /// Recipient
        to: Address,
        /// Amount
        amount: u128,
    },
    /// Collateral parameters set
    CollateralConfigured {
        /// Collateral token
        token: Address,
        /// New parameters
        config: CollateralConfig,
    },
    /// Circuit breaker tripped
    CircuitBreakerTripped {
        /// Ratio observed
        ratio_bps: u128,
        /// Emergency threshold
        threshold_bps: u64,
    },
    /// Circuit breaker cleared by governance
    CircuitBreakerReset {
        /// Ratio at reset, `None` if supply was zero
        ratio_bps: Option<u128>,
    },

    // Governance Events
    /// A governed parameter changed
    ConfigChanged {
        /// Component name
        component: String,
        /// Parameter name
        parameter: String,
        /// New value, rendered
        value: String,
    },
    /// Ownership transfer proposed
    OwnershipTransferStarted {
        /// Component name
        component: String,
        /// Current owner
        current: Address,
        /// Proposed owner
        pending: Address,
    },
    /// Ownership transfer accepted
    OwnershipTransferred {
        /// Component name
        component: String,
        /// Previous owner
        previous: Address,
        /// New owner
        new_owner: Address,
    },
    /// Pending ownership transfer withdrawn
    OwnershipTransferCancelled {
        /// Component name
        component: String,
        /// Owner who withdrew the proposal
        owner: Address,
        /// Proposal that was dropped
        pending: Address,
    },
}

impl ProtocolEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PairCreated { .. } => "PairCreated",
            Self::Swap { .. } => "Swap",
            Self::LiquidityAdded { .. } => "LiquidityAdded",
            Self::LiquidityRemoved { .. } => "LiquidityRemoved",
            Self::ProtocolFeeAccrued { .. } => "ProtocolFeeAccrued",
            Self::FeeTransferred { .. } => "FeeTransferred",
            Self::Converted { .. } => "Converted",
            Self::Distributed { .. } => "Distributed",
            Self::Minted { .. } => "Minted",
            Self::Burned { .. } => "Burned",
            Self::ReserveDeposited { .. } => "ReserveDeposited",
            Self::ReserveWithdrawn { .. } => "ReserveWithdrawn",
            Self::CollateralConfigured { .. } => "CollateralConfigured",
            Self::CircuitBreakerTripped { .. } => "CircuitBreakerTripped",
            Self::CircuitBreakerReset { .. } => "CircuitBreakerReset",
            Self::ConfigChanged { .. } => "ConfigChanged",
            Self::OwnershipTransferStarted { .. } => "OwnershipTransferStarted",
            Self::OwnershipTransferred { .. } => "OwnershipTransferred",
            Self::OwnershipTransferCancelled { .. } => "OwnershipTransferCancelled",
        }
    }

    /// Shorthand for a governance parameter change
    pub fn config_changed(
        component: &str,
        parameter: &str,
        value: impl std::fmt::Display,
    ) -> Self {
        Self::ConfigChanged {
            component: component.into(),
            parameter: parameter.into(),
            value: value.to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT RECORD
// ═══════════════════════════════════════════════════════════════════════════════

/// An event stamped with its position in the outbound stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Monotonic sequence number
    pub sequence: u64,
    /// Block of the emitting call
    pub block_number: u64,
    /// Timestamp of the emitting call
    pub timestamp: u64,
    /// Event payload
    pub event: ProtocolEvent,
}

impl EventRecord {
    /// Stable identifier: SHA-256 of the bincode encoding, hex
    pub fn id(&self) -> String {
        let data = bincode::serialize(self).unwrap_or_default();
        hex::encode(Sha256::digest(&data))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT LOG
// ═══════════════════════════════════════════════════════════════════════════════

/// Events buffered during one call
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<ProtocolEvent>,
}

impl EventLog {
    /// Create empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Add event to log
    pub fn push(&mut self, event: ProtocolEvent) {
        self.events.push(event);
    }

    /// Get all events
    pub fn events(&self) -> &[ProtocolEvent] {
        &self.events
    }

    /// Filter events by type
    pub fn filter_by_type(&self, event_type: &str) -> Vec<&ProtocolEvent> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    /// Get event count
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append another log
    pub fn merge(&mut self, other: EventLog) {
        self.events.extend(other.events);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT BUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Outbound event channel shared by every component
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventRecord>,
    sequence: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe to records published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    /// Number of records published so far
    pub fn published(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Stamp and publish a committed call's events
    pub fn publish(&self, ctx: &BlockContext, log: EventLog) -> Vec<EventRecord> {
        let records: Vec<EventRecord> = log
            .events
            .into_iter()
            .map(|event| EventRecord {
                sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
                block_number: ctx.block_number,
                timestamp: ctx.timestamp,
                event,
            })
            .collect();
        for record in &records {
            // No subscribers is not an error
            let _ = self.sender.send(record.clone());
        }
        records
    }

    /// Publish a single event
    pub fn emit(&self, ctx: &BlockContext, event: ProtocolEvent) -> EventRecord {
        let mut log = EventLog::new();
        log.push(event.clone());
        self.publish(ctx, log)
            .into_iter()
            .next()
            .unwrap_or(EventRecord {
                sequence: self.published(),
                block_number: ctx.block_number,
                timestamp: ctx.timestamp,
                event,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> BlockContext {
        BlockContext::new(10, 1_000, Address::from_label("alice"))
    }

    fn swap_event() -> ProtocolEvent {
        ProtocolEvent::Swap {
            pair: Address::from_label("pair"),
            sender: Address::from_label("alice"),
            token_in: Address::from_label("weth"),
            amount_in: 10,
            token_out: Address::from_label("musd"),
            amount_out: 9,
            to: Address::from_label("alice"),
        }
    }

    #[test]
    fn test_event_types() {
        assert_eq!(swap_event().event_type(), "Swap");
        let cfg = ProtocolEvent::config_changed("registry", "swap_fee_bps", 25);
        assert_eq!(cfg.event_type(), "ConfigChanged");
    }

    #[test]
    fn test_event_log() {
        let mut log = EventLog::new();
        assert!(log.is_empty());
        log.push(swap_event());
        log.push(ProtocolEvent::ProtocolFeeAccrued {
            pair: Address::from_label("pair"),
            token: Address::from_label("weth"),
            amount: 1,
        });
        assert_eq!(log.len(), 2);
        assert_eq!(log.filter_by_type("Swap").len(), 1);
    }

    #[test]
    fn test_publish_sequences_and_delivers() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let mut log = EventLog::new();
        log.push(swap_event());
        log.push(swap_event());
        let records = bus.publish(&ctx(), log);

        assert_eq!(records[0].sequence, 0);
        assert_eq!(records[1].sequence, 1);
        assert_eq!(bus.published(), 2);
        assert_eq!(rx.try_recv().unwrap(), records[0]);
        assert_eq!(rx.try_recv().unwrap().block_number, 10);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        let record = bus.emit(&ctx(), swap_event());
        assert_eq!(record.sequence, 0);
    }

    #[test]
    fn test_record_id_distinguishes_sequence() {
        let bus = EventBus::default();
        let a = bus.emit(&ctx(), swap_event());
        let b = bus.emit(&ctx(), swap_event());
        assert_eq!(a.id().len(), 64);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a.clone().id());
    }

    #[test]
    fn test_subscriber_receives_after_commit() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let mut log = EventLog::new();
        log.push(swap_event());
        assert!(rx.try_recv().is_err());

        bus.publish(&ctx(), log);
        let record = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(record.event, swap_event());
        assert_eq!(record.timestamp, 1_000);
    }
}
