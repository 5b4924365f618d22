//! Pair registry and AMM governance.
//!
//! The registry owns the pair store, the global fee config that new pools
//! snapshot, the pause switch and treasury address shared by all pools,
//! and the two-phase ownership of those controls. It is passed explicitly
//! to the router and treasury; nothing reaches it through global state.

use std::collections::HashMap;
use std::sync::Arc;

use crate::amm::pool::{Pool, PoolControls, PoolHandle};
use crate::core::address::{Address, PairKey};
use crate::core::config::FeeConfig;
use crate::core::context::BlockContext;
use crate::error::{Error, Result};
use crate::protocol::events::{EventBus, ProtocolEvent};
use crate::utils::validation::{validate_address, validate_owner};

const COMPONENT: &str = "registry";

// ═══════════════════════════════════════════════════════════════════════════════
// PAIR STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Key-value store of `canonical pair key -> pool handle`
pub trait PairStore: Send + Sync + std::fmt::Debug {
    /// Look up a pool
    fn get(&self, key: &PairKey) -> Option<PoolHandle>;
    /// Insert a new pool
    fn insert(&mut self, key: PairKey, handle: PoolHandle);
    /// All pools in creation order
    fn all(&self) -> Vec<PoolHandle>;
    /// Number of pools
    fn len(&self) -> usize;
    /// Whether the store is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Map-backed pair store
#[derive(Debug, Default)]
pub struct InMemoryPairStore {
    pairs: HashMap<PairKey, PoolHandle>,
    order: Vec<PairKey>,
}

impl PairStore for InMemoryPairStore {
    fn get(&self, key: &PairKey) -> Option<PoolHandle> {
        self.pairs.get(key).cloned()
    }

    fn insert(&mut self, key: PairKey, handle: PoolHandle) {
        if self.pairs.insert(key, handle).is_none() {
            self.order.push(key);
        }
    }

    fn all(&self) -> Vec<PoolHandle> {
        self.order
            .iter()
            .filter_map(|k| self.pairs.get(k).cloned())
            .collect()
    }

    fn len(&self) -> usize {
        self.pairs.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

/// Pair registry and AMM-wide governance
#[derive(Debug)]
pub struct Registry {
    store: Box<dyn PairStore>,
    fees: FeeConfig,
    controls: Arc<PoolControls>,
    owner: Address,
    pending_owner: Option<Address>,
    bus: EventBus,
}

impl Registry {
    /// Create a registry with an in-memory store
    pub fn new(owner: Address, fees: FeeConfig, bus: EventBus) -> Result<Self> {
        Self::with_store(owner, fees, bus, Box::<InMemoryPairStore>::default())
    }

    /// Create a registry over a supplied store
    pub fn with_store(
        owner: Address,
        fees: FeeConfig,
        bus: EventBus,
        store: Box<dyn PairStore>,
    ) -> Result<Self> {
        validate_address(&owner, "registry owner")?;
        fees.validate()?;
        Ok(Self {
            store,
            fees,
            controls: Arc::new(PoolControls::default()),
            owner,
            pending_owner: None,
            bus,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PAIRS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Create the pool for an unordered pair, or return the existing one
    pub fn create_pair(
        &mut self,
        ctx: &BlockContext,
        token_a: Address,
        token_b: Address,
    ) -> Result<PoolHandle> {
        let key = PairKey::new(token_a, token_b)?;
        if let Some(existing) = self.store.get(&key) {
            return Ok(existing);
        }
        let handle = PoolHandle::new(Pool::new(key, self.fees, self.controls.clone()));
        self.store.insert(key, handle.clone());

        self.bus.emit(
            ctx,
            ProtocolEvent::PairCreated {
                token0: key.token0(),
                token1: key.token1(),
                pair: handle.address(),
            },
        );
        tracing::info!(pair = %key, address = %handle.address(), "pair created");
        Ok(handle)
    }

    /// Create a pool and run `init` on it before it becomes visible.
    ///
    /// If the pair already exists `init` runs on the live pool under its
    /// lock. Otherwise the pool is only registered when `init` succeeds, so
    /// a failed first deposit leaves no empty pair behind.
    pub(crate) fn create_pair_with<T, F>(
        &mut self,
        ctx: &BlockContext,
        token_a: Address,
        token_b: Address,
        init: F,
    ) -> Result<(PoolHandle, T)>
    where
        F: FnOnce(&mut Pool) -> Result<T>,
    {
        let key = PairKey::new(token_a, token_b)?;
        if let Some(existing) = self.store.get(&key) {
            let value = {
                let mut pool = existing.lock()?;
                let mut staged = pool.clone();
                let value = init(&mut staged)?;
                *pool = staged;
                value
            };
            return Ok((existing, value));
        }

        let mut pool = Pool::new(key, self.fees, self.controls.clone());
        let value = init(&mut pool)?;
        let handle = PoolHandle::new(pool);
        self.store.insert(key, handle.clone());
        self.bus.emit(
            ctx,
            ProtocolEvent::PairCreated {
                token0: key.token0(),
                token1: key.token1(),
                pair: handle.address(),
            },
        );
        tracing::info!(pair = %key, address = %handle.address(), "pair created");
        Ok((handle, value))
    }

    /// Pool for an unordered pair, if created
    pub fn get_pair(&self, token_a: Address, token_b: Address) -> Result<Option<PoolHandle>> {
        let key = PairKey::new(token_a, token_b)?;
        Ok(self.store.get(&key))
    }

    /// Pool for an unordered pair, failing if absent
    pub fn require_pair(&self, token_a: Address, token_b: Address) -> Result<PoolHandle> {
        let key = PairKey::new(token_a, token_b)?;
        self.store
            .get(&key)
            .ok_or_else(|| Error::PairNotFound(key.to_string()))
    }

    /// Canonical pool address for a pair, if the pair exists
    pub fn pair_address(&self, token_a: Address, token_b: Address) -> Result<Option<Address>> {
        Ok(self.get_pair(token_a, token_b)?.map(|h| h.address()))
    }

    /// All pools in creation order
    pub fn all_pairs(&self) -> Vec<PoolHandle> {
        self.store.all()
    }

    /// Number of pools
    pub fn pair_count(&self) -> usize {
        self.store.len()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // VIEWS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Fee config new pools will snapshot
    pub fn fee_config(&self) -> FeeConfig {
        self.fees
    }

    /// Whether pool mutations are paused
    pub fn is_paused(&self) -> bool {
        self.controls.is_paused()
    }

    /// Protocol fee destination
    pub fn treasury(&self) -> Result<Option<Address>> {
        self.controls.treasury()
    }

    /// Current owner
    pub fn owner(&self) -> Address {
        self.owner
    }

    /// Proposed owner awaiting acceptance
    pub fn pending_owner(&self) -> Option<Address> {
        self.pending_owner
    }

    /// Fail unless `caller` is the owner
    pub fn require_owner(&self, caller: &Address, action: &str) -> Result<()> {
        validate_owner(caller, &self.owner, action)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // GOVERNANCE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Set the fee config for pools created from now on
    pub fn set_fee_params(&mut self, ctx: &BlockContext, fees: FeeConfig) -> Result<()> {
        self.require_owner(&ctx.caller, "set_fee_params")?;
        fees.validate()?;
        self.fees = fees;
        self.bus.emit(
            ctx,
            ProtocolEvent::config_changed(
                COMPONENT,
                "fees",
                format!("{}/{}", fees.swap_fee_bps, fees.protocol_fee_bps),
            ),
        );
        tracing::info!(
            swap_fee_bps = fees.swap_fee_bps,
            protocol_fee_bps = fees.protocol_fee_bps,
            "fee params updated"
        );
        Ok(())
    }

    /// Pause every pool
    pub fn pause(&mut self, ctx: &BlockContext) -> Result<()> {
        self.set_paused(ctx, true)
    }

    /// Resume every pool
    pub fn unpause(&mut self, ctx: &BlockContext) -> Result<()> {
        self.set_paused(ctx, false)
    }

    fn set_paused(&mut self, ctx: &BlockContext, paused: bool) -> Result<()> {
        self.require_owner(&ctx.caller, if paused { "pause" } else { "unpause" })?;
        self.controls.set_paused(paused);
        self.bus
            .emit(ctx, ProtocolEvent::config_changed(COMPONENT, "paused", paused));
        tracing::info!(paused, "amm pause state changed");
        Ok(())
    }

    /// Set the protocol fee destination
    pub fn set_treasury(&mut self, ctx: &BlockContext, treasury: Address) -> Result<()> {
        self.require_owner(&ctx.caller, "set_treasury")?;
        validate_address(&treasury, "treasury")?;
        self.controls.set_treasury(treasury)?;
        self.bus
            .emit(ctx, ProtocolEvent::config_changed(COMPONENT, "treasury", treasury));
        tracing::info!(treasury = %treasury, "treasury updated");
        Ok(())
    }

    /// Propose a new owner
    pub fn propose_owner(&mut self, ctx: &BlockContext, new_owner: Address) -> Result<()> {
        self.require_owner(&ctx.caller, "propose_owner")?;
        validate_address(&new_owner, "new owner")?;
        self.pending_owner = Some(new_owner);
        self.bus.emit(
            ctx,
            ProtocolEvent::OwnershipTransferStarted {
                component: COMPONENT.into(),
                current: self.owner,
                pending: new_owner,
            },
        );
        Ok(())
    }

    /// Accept a pending ownership transfer
    pub fn accept_owner(&mut self, ctx: &BlockContext) -> Result<()> {
        match self.pending_owner {
            Some(pending) if pending == ctx.caller => {
                let previous = self.owner;
                self.owner = pending;
                self.pending_owner = None;
                self.bus.emit(
                    ctx,
                    ProtocolEvent::OwnershipTransferred {
                        component: COMPONENT.into(),
                        previous,
                        new_owner: pending,
                    },
                );
                tracing::info!(previous = %previous, owner = %pending, "registry ownership transferred");
                Ok(())
            }
            _ => Err(Error::Unauthorized(format!(
                "{} is not the pending owner",
                ctx.caller
            ))),
        }
    }

    /// Withdraw a pending ownership proposal
    pub fn cancel_ownership_transfer(&mut self, ctx: &BlockContext) -> Result<()> {
        self.require_owner(&ctx.caller, "cancel_ownership_transfer")?;
        if let Some(pending) = self.pending_owner.take() {
            self.bus.emit(
                ctx,
                ProtocolEvent::OwnershipTransferCancelled {
                    component: COMPONENT.into(),
                    owner: self.owner,
                    pending,
                },
            );
            tracing::info!(pending = %pending, "registry ownership transfer cancelled");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::token::TokenLedger;
    use crate::protocol::events::EventLog;

    fn setup() -> (Registry, BlockContext) {
        let gov = Address::from_label("gov");
        let registry = Registry::new(gov, FeeConfig::default(), EventBus::default()).unwrap();
        (registry, BlockContext::new(1, 1_000, gov))
    }

    #[test]
    fn test_create_pair_idempotent() {
        let (mut registry, ctx) = setup();
        let a = Address::from_label("weth");
        let b = Address::from_label("musd");
        let first = registry.create_pair(&ctx, a, b).unwrap();
        let second = registry.create_pair(&ctx.with_caller(Address::from_label("anyone")), b, a).unwrap();
        assert!(first.same_pool(&second));
        assert_eq!(registry.pair_count(), 1);
        assert_eq!(registry.pair_address(a, b).unwrap(), Some(first.address()));
    }

    #[test]
    fn test_create_pair_rejects_bad_tokens() {
        let (mut registry, ctx) = setup();
        let a = Address::from_label("weth");
        assert!(registry.create_pair(&ctx, a, a).is_err());
        assert!(registry.create_pair(&ctx, a, Address::ZERO).is_err());
        assert_eq!(registry.pair_count(), 0);
    }

    #[test]
    fn test_new_pools_snapshot_fees() {
        let (mut registry, ctx) = setup();
        let a = Address::from_label("a");
        let b = Address::from_label("b");
        let c = Address::from_label("c");
        let old = registry.create_pair(&ctx, a, b).unwrap();
        registry.set_fee_params(&ctx, FeeConfig::new(100, 10)).unwrap();
        let new = registry.create_pair(&ctx, a, c).unwrap();
        assert_eq!(old.snapshot().unwrap().fees().swap_fee_bps, 30);
        assert_eq!(new.snapshot().unwrap().fees().swap_fee_bps, 100);
    }

    #[test]
    fn test_fee_bounds_and_auth() {
        let (mut registry, ctx) = setup();
        assert!(registry.set_fee_params(&ctx, FeeConfig::new(1_001, 5)).is_err());
        assert!(registry.set_fee_params(&ctx, FeeConfig::new(20, 25)).is_err());
        let eve = ctx.with_caller(Address::from_label("eve"));
        assert!(matches!(
            registry.set_fee_params(&eve, FeeConfig::new(30, 5)),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_pause_shared_with_pools() {
        let (mut registry, ctx) = setup();
        let handle = registry
            .create_pair(&ctx, Address::from_label("a"), Address::from_label("b"))
            .unwrap();
        let mut ledger = TokenLedger::new();
        let trader = Address::from_label("trader");
        ledger.mint(Address::from_label("a"), trader, 1_000).unwrap();
        let mut log = EventLog::new();

        registry.pause(&ctx).unwrap();
        assert!(registry.is_paused());
        let err = handle
            .swap(&mut ledger, trader, Address::from_label("a"), 100, trader, &mut log)
            .unwrap_err();
        assert!(matches!(err, Error::EnginePaused));
        assert_eq!(ledger.balance_of(&Address::from_label("a"), &trader), 1_000);

        registry.unpause(&ctx).unwrap();
        assert!(!registry.is_paused());
        // active again: the empty pool now fails on liquidity, not on the pause
        let err = handle
            .swap(&mut ledger, trader, Address::from_label("a"), 100, trader, &mut log)
            .unwrap_err();
        assert!(!matches!(err, Error::EnginePaused));
    }

    #[test]
    fn test_two_phase_ownership() {
        let (mut registry, ctx) = setup();
        let next = Address::from_label("next");
        registry.propose_owner(&ctx, next).unwrap();
        assert_eq!(registry.owner(), ctx.caller);
        assert!(registry.accept_owner(&ctx.with_caller(Address::from_label("eve"))).is_err());
        registry.accept_owner(&ctx.with_caller(next)).unwrap();
        assert_eq!(registry.owner(), next);
        assert_eq!(registry.pending_owner(), None);
        assert!(registry.pause(&ctx).is_err());
    }

    #[test]
    fn test_cancel_ownership_transfer() {
        let (mut registry, ctx) = setup();
        let next = Address::from_label("next");
        registry.propose_owner(&ctx, next).unwrap();
        let mut rx = registry.bus.subscribe();
        registry.cancel_ownership_transfer(&ctx).unwrap();
        let record = rx.try_recv().unwrap();
        assert_eq!(
            record.event,
            ProtocolEvent::OwnershipTransferCancelled {
                component: COMPONENT.into(),
                owner: ctx.caller,
                pending: next,
            }
        );
        assert_eq!(registry.pending_owner(), None);
        assert!(registry.accept_owner(&ctx.with_caller(next)).is_err());
        // nothing pending, nothing emitted
        registry.cancel_ownership_transfer(&ctx).unwrap();
        assert!(rx.try_recv().is_err());
    }
}
