//! Router: multi-hop quoting and execution.
//!
//! Quotes apply the pool pricing formula hop by hop against live reserves.
//! Execution is staged: every pool on the path is locked, copied, and the
//! whole path runs against the copies and a copy of the ledger. Only when
//! every hop and the caller's bound succeed are the copies written back,
//! so a failing hop or a failed slippage check leaves nothing behind.

use std::sync::MutexGuard;

use crate::amm::pool::{FeeAccrual, Pool, PoolHandle};
use crate::amm::registry::Registry;
use crate::core::address::Address;
use crate::core::context::BlockContext;
use crate::core::token::TokenLedger;
use crate::error::{Error, Result};
use crate::protocol::events::{EventBus, EventLog, ProtocolEvent};
use crate::utils::constants::{ABSOLUTE_MAX_PATH_LENGTH, DEFAULT_MAX_PATH_LENGTH};
use crate::utils::validation::{validate_deadline, validate_max_in, validate_min_out, validate_non_zero};

/// Result of a routed swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapReceipt {
    /// Input followed by each hop's output
    pub amounts: Vec<u128>,
    /// Protocol fees sent to the treasury along the path
    pub fees: Vec<FeeAccrual>,
}

impl SwapReceipt {
    /// Input of the first hop
    pub fn amount_in(&self) -> u128 {
        self.amounts.first().copied().unwrap_or(0)
    }

    /// Output of the last hop
    pub fn amount_out(&self) -> u128 {
        self.amounts.last().copied().unwrap_or(0)
    }
}

/// Result of a routed liquidity change, in caller token order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidityOutcome {
    /// Pool address
    pub pair: Address,
    /// Amount of token A moved
    pub amount_a: u128,
    /// Amount of token B moved
    pub amount_b: u128,
    /// Shares minted or burned
    pub shares: u128,
}

/// Locked pools and staged state for one routed call
struct Staged<'a> {
    guards: Vec<MutexGuard<'a, Pool>>,
    pools: Vec<Pool>,
    hop_pool: Vec<usize>,
    ledger: TokenLedger,
    log: EventLog,
}

impl<'a> Staged<'a> {
    fn lock(handles: &'a [PoolHandle], ledger: &TokenLedger) -> Result<Self> {
        let mut unique: Vec<&'a PoolHandle> = Vec::new();
        let mut hop_pool = Vec::with_capacity(handles.len());
        for handle in handles {
            match unique.iter().position(|h| h.same_pool(handle)) {
                Some(idx) => hop_pool.push(idx),
                None => {
                    hop_pool.push(unique.len());
                    unique.push(handle);
                }
            }
        }
        let guards = unique
            .into_iter()
            .map(|h| h.lock())
            .collect::<Result<Vec<_>>>()?;
        let pools = guards.iter().map(|g| (**g).clone()).collect();
        Ok(Self {
            guards,
            pools,
            hop_pool,
            ledger: ledger.clone(),
            log: EventLog::new(),
        })
    }

    fn commit(mut self, ledger: &mut TokenLedger) -> EventLog {
        for (guard, pool) in self.guards.iter_mut().zip(self.pools) {
            **guard = pool;
        }
        *ledger = self.ledger;
        self.log
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROUTER
// ═══════════════════════════════════════════════════════════════════════════════

/// Multi-hop router over the registry
#[derive(Debug, Clone)]
pub struct Router {
    max_path_length: usize,
    escrow: Address,
    bus: EventBus,
}

impl Router {
    /// Create a router with the default path limit
    pub fn new(bus: EventBus) -> Self {
        Self {
            max_path_length: DEFAULT_MAX_PATH_LENGTH,
            escrow: Address::derive(&[b"musd:router:escrow"]),
            bus,
        }
    }

    /// Create a router with a specific path limit
    pub fn with_max_path_length(bus: EventBus, max_path_length: usize) -> Result<Self> {
        check_path_limit(max_path_length)?;
        Ok(Self {
            max_path_length,
            ..Self::new(bus)
        })
    }

    /// Longest accepted path
    pub fn max_path_length(&self) -> usize {
        self.max_path_length
    }

    /// Account that holds intermediate hop outputs
    pub fn escrow(&self) -> Address {
        self.escrow
    }

    /// Set the path limit; governed by the registry owner
    pub fn set_max_path_length(
        &mut self,
        registry: &Registry,
        ctx: &BlockContext,
        max_path_length: usize,
    ) -> Result<()> {
        registry.require_owner(&ctx.caller, "set_max_path_length")?;
        check_path_limit(max_path_length)?;
        self.max_path_length = max_path_length;
        self.bus.emit(
            ctx,
            ProtocolEvent::config_changed("router", "max_path_length", max_path_length),
        );
        tracing::info!(max_path_length, "router path limit updated");
        Ok(())
    }

    fn validate_path(&self, path: &[Address]) -> Result<()> {
        if path.len() < 2 || path.len() > self.max_path_length {
            return Err(Error::InvalidPath {
                len: path.len(),
                max: self.max_path_length,
            });
        }
        Ok(())
    }

    fn resolve(&self, registry: &Registry, path: &[Address]) -> Result<Vec<PoolHandle>> {
        self.validate_path(path)?;
        path.windows(2)
            .map(|hop| registry.require_pair(hop[0], hop[1]))
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUOTES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Amounts along `path` for an exact input; no side effects
    pub fn get_amounts_out(
        &self,
        registry: &Registry,
        amount_in: u128,
        path: &[Address],
    ) -> Result<Vec<u128>> {
        validate_non_zero(amount_in)?;
        let handles = self.resolve(registry, path)?;
        let mut amounts = Vec::with_capacity(path.len());
        amounts.push(amount_in);
        for (i, handle) in handles.iter().enumerate() {
            let pool = handle.snapshot()?;
            let out = pool.quote_out(&path[i], amounts[i])?;
            amounts.push(out);
        }
        Ok(amounts)
    }

    /// Amounts along `path` for an exact output; no side effects
    pub fn get_amounts_in(
        &self,
        registry: &Registry,
        amount_out: u128,
        path: &[Address],
    ) -> Result<Vec<u128>> {
        validate_non_zero(amount_out)?;
        let handles = self.resolve(registry, path)?;
        let mut amounts = vec![0u128; path.len()];
        amounts[path.len() - 1] = amount_out;
        for i in (0..handles.len()).rev() {
            let pool = handles[i].snapshot()?;
            amounts[i] = pool.quote_in(&path[i], amounts[i + 1])?;
        }
        Ok(amounts)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SWAPS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Swap an exact input along `path`, all or nothing
    #[allow(clippy::too_many_arguments)]
    pub fn swap_exact_tokens_for_tokens(
        &self,
        registry: &Registry,
        ledger: &mut TokenLedger,
        ctx: &BlockContext,
        amount_in: u128,
        amount_out_min: u128,
        path: &[Address],
        to: Address,
        deadline: u64,
    ) -> Result<SwapReceipt> {
        validate_deadline(deadline, ctx.timestamp)?;
        validate_non_zero(amount_in)?;
        let handles = self.resolve(registry, path)?;

        let mut staged = Staged::lock(&handles, ledger)?;
        let receipt = self.run_hops(&mut staged, ctx.caller, amount_in, path, to)?;
        validate_min_out(receipt.amount_out(), amount_out_min)?;

        let log = staged.commit(ledger);
        self.bus.publish(ctx, log);
        tracing::debug!(
            hops = path.len() - 1,
            amount_in,
            amount_out = receipt.amount_out(),
            "routed swap"
        );
        Ok(receipt)
    }

    /// Receive an exact output along `path`, paying at most `amount_in_max`
    #[allow(clippy::too_many_arguments)]
    pub fn swap_tokens_for_exact_tokens(
        &self,
        registry: &Registry,
        ledger: &mut TokenLedger,
        ctx: &BlockContext,
        amount_out: u128,
        amount_in_max: u128,
        path: &[Address],
        to: Address,
        deadline: u64,
    ) -> Result<SwapReceipt> {
        validate_deadline(deadline, ctx.timestamp)?;
        validate_non_zero(amount_out)?;
        let handles = self.resolve(registry, path)?;

        let mut staged = Staged::lock(&handles, ledger)?;
        let mut required = amount_out;
        for i in (0..handles.len()).rev() {
            let pool = &staged.pools[staged.hop_pool[i]];
            required = pool.quote_in(&path[i], required)?;
        }
        validate_max_in(required, amount_in_max)?;

        let receipt = self.run_hops(&mut staged, ctx.caller, required, path, to)?;
        validate_min_out(receipt.amount_out(), amount_out)?;

        let log = staged.commit(ledger);
        self.bus.publish(ctx, log);
        tracing::debug!(
            hops = path.len() - 1,
            amount_in = required,
            amount_out = receipt.amount_out(),
            "routed exact-output swap"
        );
        Ok(receipt)
    }

    fn run_hops(
        &self,
        staged: &mut Staged<'_>,
        payer: Address,
        amount_in: u128,
        path: &[Address],
        to: Address,
    ) -> Result<SwapReceipt> {
        let hops = path.len() - 1;
        let mut amounts = Vec::with_capacity(path.len());
        let mut fees = Vec::new();
        amounts.push(amount_in);

        let mut sender = payer;
        for i in 0..hops {
            let recipient = if i + 1 == hops { to } else { self.escrow };
            let idx = staged.hop_pool[i];
            let pool = &mut staged.pools[idx];
            let outcome = pool.swap(
                &mut staged.ledger,
                sender,
                path[i],
                amounts[i],
                recipient,
                &mut staged.log,
            )?;
            amounts.push(outcome.amount_out);
            fees.extend(outcome.fee);
            sender = self.escrow;
        }
        Ok(SwapReceipt { amounts, fees })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIQUIDITY
    // ═══════════════════════════════════════════════════════════════════════════

    /// Deposit liquidity, creating the pair if it does not exist yet
    #[allow(clippy::too_many_arguments)]
    pub fn add_liquidity(
        &self,
        registry: &mut Registry,
        ledger: &mut TokenLedger,
        ctx: &BlockContext,
        token_a: Address,
        token_b: Address,
        amount_a_desired: u128,
        amount_b_desired: u128,
        amount_a_min: u128,
        amount_b_min: u128,
        deadline: u64,
    ) -> Result<LiquidityOutcome> {
        validate_deadline(deadline, ctx.timestamp)?;
        validate_non_zero(amount_a_desired)?;
        validate_non_zero(amount_b_desired)?;

        let a_is_0 = token_a < token_b;
        let (d0, d1, m0, m1) = if a_is_0 {
            (amount_a_desired, amount_b_desired, amount_a_min, amount_b_min)
        } else {
            (amount_b_desired, amount_a_desired, amount_b_min, amount_a_min)
        };

        let mut staged_ledger = ledger.clone();
        let mut log = EventLog::new();
        let (handle, receipt) = registry.create_pair_with(ctx, token_a, token_b, |pool| {
            pool.add_liquidity(&mut staged_ledger, ctx.caller, d0, d1, m0, m1, &mut log)
        })?;
        *ledger = staged_ledger;
        self.bus.publish(ctx, log);

        let (amount_a, amount_b) = if a_is_0 {
            (receipt.amount0, receipt.amount1)
        } else {
            (receipt.amount1, receipt.amount0)
        };
        Ok(LiquidityOutcome {
            pair: handle.address(),
            amount_a,
            amount_b,
            shares: receipt.shares,
        })
    }

    /// Burn shares and pay both tokens to `to`
    #[allow(clippy::too_many_arguments)]
    pub fn remove_liquidity(
        &self,
        registry: &Registry,
        ledger: &mut TokenLedger,
        ctx: &BlockContext,
        token_a: Address,
        token_b: Address,
        shares: u128,
        amount_a_min: u128,
        amount_b_min: u128,
        to: Address,
        deadline: u64,
    ) -> Result<LiquidityOutcome> {
        validate_deadline(deadline, ctx.timestamp)?;
        validate_non_zero(shares)?;
        let handle = registry.require_pair(token_a, token_b)?;

        let a_is_0 = token_a < token_b;
        let (m0, m1) = if a_is_0 {
            (amount_a_min, amount_b_min)
        } else {
            (amount_b_min, amount_a_min)
        };

        let mut log = EventLog::new();
        let receipt = {
            let mut pool = handle.lock()?;
            let mut staged = pool.clone();
            let mut staged_ledger = ledger.clone();
            let receipt = staged.remove_liquidity(
                &mut staged_ledger,
                ctx.caller,
                shares,
                m0,
                m1,
                to,
                &mut log,
            )?;
            *pool = staged;
            *ledger = staged_ledger;
            receipt
        };
        self.bus.publish(ctx, log);

        let (amount_a, amount_b) = if a_is_0 {
            (receipt.amount0, receipt.amount1)
        } else {
            (receipt.amount1, receipt.amount0)
        };
        Ok(LiquidityOutcome {
            pair: handle.address(),
            amount_a,
            amount_b,
            shares: receipt.shares,
        })
    }
}

fn check_path_limit(max_path_length: usize) -> Result<()> {
    if !(2..=ABSOLUTE_MAX_PATH_LENGTH).contains(&max_path_length) {
        return Err(Error::InvalidParameter {
            name: "max_path_length".into(),
            reason: format!("{} outside [2, {}]", max_path_length, ABSOLUTE_MAX_PATH_LENGTH),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FeeConfig;
    use crate::utils::constants::WAD;

    struct Env {
        registry: Registry,
        router: Router,
        ledger: TokenLedger,
        ctx: BlockContext,
        a: Address,
        b: Address,
        c: Address,
    }

    fn env() -> Env {
        let gov = Address::from_label("gov");
        let bus = EventBus::default();
        let mut registry = Registry::new(gov, FeeConfig::default(), bus.clone()).unwrap();
        let router = Router::new(bus);
        let mut ledger = TokenLedger::new();
        let (a, b, c) = (
            Address::from_label("a"),
            Address::from_label("b"),
            Address::from_label("c"),
        );
        let lp = Address::from_label("lp");
        let user = Address::from_label("user");
        for token in [a, b, c] {
            ledger.mint(token, lp, 1_000_000 * WAD).unwrap();
            ledger.mint(token, user, 1_000 * WAD).unwrap();
        }
        let lp_ctx = BlockContext::new(1, 1_000, lp);
        for (x, y) in [(a, b), (b, c)] {
            router
                .add_liquidity(&mut registry, &mut ledger, &lp_ctx, x, y, 10_000 * WAD, 10_000 * WAD, 0, 0, 2_000)
                .unwrap();
        }
        Env {
            registry,
            router,
            ledger,
            ctx: BlockContext::new(2, 1_010, user),
            a,
            b,
            c,
        }
    }

    #[test]
    fn test_path_length_bounds() {
        let e = env();
        assert!(matches!(
            e.router.get_amounts_out(&e.registry, WAD, &[e.a]),
            Err(Error::InvalidPath { len: 1, .. })
        ));
        let long = vec![e.a, e.b, e.c, e.a, e.b];
        assert!(matches!(
            e.router.get_amounts_out(&e.registry, WAD, &long),
            Err(Error::InvalidPath { len: 5, max: 4 })
        ));
    }

    #[test]
    fn test_quotes_match_execution() {
        let mut e = env();
        let path = [e.a, e.b, e.c];
        let quoted = e.router.get_amounts_out(&e.registry, 10 * WAD, &path).unwrap();
        let receipt = e
            .router
            .swap_exact_tokens_for_tokens(&e.registry, &mut e.ledger, &e.ctx, 10 * WAD, 0, &path, e.ctx.caller, 2_000)
            .unwrap();
        assert_eq!(receipt.amounts, quoted);
        assert_eq!(e.ledger.balance_of(&e.b, &e.router.escrow()), 0);
    }

    #[test]
    fn test_expired_swap() {
        let mut e = env();
        let err = e
            .router
            .swap_exact_tokens_for_tokens(&e.registry, &mut e.ledger, &e.ctx, WAD, 0, &[e.a, e.b], e.ctx.caller, 1_009)
            .unwrap_err();
        assert_eq!(err, Error::Expired { deadline: 1_009, now: 1_010 });
    }

    #[test]
    fn test_failed_final_check_discards_all_hops() {
        let mut e = env();
        let path = [e.a, e.b, e.c];
        let before_hash = e.ledger.state_hash();
        let before_ab = e.registry.require_pair(e.a, e.b).unwrap().reserves().unwrap();
        let err = e
            .router
            .swap_exact_tokens_for_tokens(&e.registry, &mut e.ledger, &e.ctx, 10 * WAD, 100 * WAD, &path, e.ctx.caller, 2_000)
            .unwrap_err();
        assert!(matches!(err, Error::SlippageExceeded { .. }));
        assert_eq!(e.ledger.state_hash(), before_hash);
        assert_eq!(e.registry.require_pair(e.a, e.b).unwrap().reserves().unwrap(), before_ab);
    }

    #[test]
    fn test_exact_output_swap() {
        let mut e = env();
        let path = [e.a, e.b];
        let quoted = e.router.get_amounts_in(&e.registry, 5 * WAD, &path).unwrap();
        let receipt = e
            .router
            .swap_tokens_for_exact_tokens(&e.registry, &mut e.ledger, &e.ctx, 5 * WAD, quoted[0], &path, e.ctx.caller, 2_000)
            .unwrap();
        assert_eq!(receipt.amount_in(), quoted[0]);
        assert!(receipt.amount_out() >= 5 * WAD);

        let err = e
            .router
            .swap_tokens_for_exact_tokens(&e.registry, &mut e.ledger, &e.ctx, 5 * WAD, WAD, &path, e.ctx.caller, 2_000)
            .unwrap_err();
        assert!(matches!(err, Error::ExcessiveInput { .. }));
    }

    #[test]
    fn test_missing_pair() {
        let e = env();
        assert!(matches!(
            e.router.get_amounts_out(&e.registry, WAD, &[e.a, e.c]),
            Err(Error::PairNotFound(_))
        ));
    }

    #[test]
    fn test_failed_first_deposit_creates_no_pair() {
        let mut e = env();
        let d = Address::from_label("d");
        e.ledger.mint(d, e.ctx.caller, 10).unwrap();
        let err = e
            .router
            .add_liquidity(&mut e.registry, &mut e.ledger, &e.ctx, e.a, d, 10, 10, 0, 0, 2_000)
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientLiquidityMinted { .. }));
        assert_eq!(e.registry.get_pair(e.a, d).unwrap().map(|h| h.address()), None);
    }

    #[test]
    fn test_remove_liquidity_in_caller_order() {
        let mut e = env();
        let lp = BlockContext::new(3, 1_020, Address::from_label("lp"));
        let shares = e
            .registry
            .require_pair(e.a, e.b)
            .unwrap()
            .snapshot()
            .unwrap()
            .share_balance(&lp.caller);
        let out = e
            .router
            .remove_liquidity(&e.registry, &mut e.ledger, &lp, e.b, e.a, shares / 2, 0, 0, lp.caller, 2_000)
            .unwrap();
        assert_eq!(out.amount_a, out.amount_b);
        assert_eq!(out.shares, shares / 2);
    }

    #[test]
    fn test_set_max_path_length_governed() {
        let mut e = env();
        let gov = e.ctx.with_caller(Address::from_label("gov"));
        assert!(e.router.set_max_path_length(&e.registry, &e.ctx, 3).is_err());
        assert!(e.router.set_max_path_length(&e.registry, &gov, 1).is_err());
        e.router.set_max_path_length(&e.registry, &gov, 3).unwrap();
        assert_eq!(e.router.max_path_length(), 3);
    }
}
