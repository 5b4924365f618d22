//! Protocol fee treasury.
//!
//! Pools send their protocol-fee slice here. Anyone may harvest an
//! allowlisted fee token into the stablecoin through the router, earning a
//! small incentive, and anyone may push stablecoin out to the configured
//! buckets. Governance controls the allowlist, the caps and the guardrails.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::amm::registry::Registry;
use crate::amm::router::Router;
use crate::core::address::Address;
use crate::core::config::{HarvestConfig, TreasuryConfig};
use crate::core::context::BlockContext;
use crate::core::token::TokenLedger;
use crate::error::{Error, Result};
use crate::protocol::events::{EventBus, ProtocolEvent};
use crate::treasury::distribution::DistributionSplit;
use crate::utils::constants::{MAX_HARVEST_INCENTIVE_BPS, MAX_SLIPPAGE_BPS};
use crate::utils::math::{apply_bps, apply_haircut, safe_add};
use crate::utils::validation::{
    validate_address, validate_bps, validate_deadline, validate_non_zero, validate_owner,
};

const COMPONENT: &str = "treasury";

/// Result of a harvest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestReceipt {
    /// Fee token spent
    pub amount_in: u128,
    /// Stablecoin received from the router
    pub stable_out: u128,
    /// Paid to the caller
    pub incentive: u128,
    /// Kept by the treasury
    pub retained: u128,
}

/// Fee collector, converter and distributor
#[derive(Debug)]
pub struct Treasury {
    address: Address,
    stable_token: Address,
    owner: Address,
    distribution: Option<TreasuryConfig>,
    harvest: HarvestConfig,
    allowlist: HashSet<Address>,
    convert_caps: HashMap<Address, u128>,
    accrued: HashMap<Address, u128>,
    paused: bool,
    bus: EventBus,
}

impl Treasury {
    /// Create a treasury converting into `stable_token`
    pub fn new(stable_token: Address, owner: Address, harvest: HarvestConfig, bus: EventBus) -> Result<Self> {
        validate_address(&stable_token, "stable token")?;
        validate_address(&owner, "treasury owner")?;
        harvest.validate()?;
        Ok(Self {
            address: Address::derive(&[b"musd:treasury", stable_token.as_bytes()]),
            stable_token,
            owner,
            distribution: None,
            harvest,
            allowlist: HashSet::new(),
            convert_caps: HashMap::new(),
            accrued: HashMap::new(),
            paused: false,
            bus,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // VIEWS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Account that holds treasury funds
    pub fn address(&self) -> Address {
        self.address
    }

    /// Token harvested into
    pub fn stable_token(&self) -> Address {
        self.stable_token
    }

    /// Governance identity
    pub fn owner(&self) -> Address {
        self.owner
    }

    /// Distribution buckets, if configured
    pub fn distribution_config(&self) -> Option<TreasuryConfig> {
        self.distribution
    }

    /// Harvest guardrails
    pub fn harvest_config(&self) -> HarvestConfig {
        self.harvest
    }

    /// Whether `token` may be harvested
    pub fn is_allowlisted(&self, token: &Address) -> bool {
        self.allowlist.contains(token)
    }

    /// Per-call harvest cap for `token`
    pub fn max_convert_amount(&self, token: &Address) -> u128 {
        self.convert_caps.get(token).copied().unwrap_or(0)
    }

    /// Fees received and not yet harvested
    pub fn accrued_fees(&self, token: &Address) -> u128 {
        self.accrued.get(token).copied().unwrap_or(0)
    }

    /// Whether harvest and distribution are blocked
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn ensure_active(&self) -> Result<()> {
        if self.paused {
            return Err(Error::TreasuryPaused);
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FEE INTAKE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record a fee transfer; the caller must be the registry's pool for a pair holding `token`
    pub fn on_fee_received(
        &mut self,
        registry: &Registry,
        ctx: &BlockContext,
        token: Address,
        amount: u128,
    ) -> Result<()> {
        let from_pair = ctx.caller;
        let known = registry
            .all_pairs()
            .into_iter()
            .any(|handle| handle.address() == from_pair && handle.key().contains(&token));
        if !known {
            return Err(Error::UnknownPair(from_pair.to_hex()));
        }
        self.record_fee(ctx, token, from_pair, amount)
    }

    fn record_fee(&mut self, ctx: &BlockContext, token: Address, from_pair: Address, amount: u128) -> Result<()> {
        let total = safe_add(self.accrued_fees(&token), amount)?;
        self.accrued.insert(token, total);
        self.bus.emit(
            ctx,
            ProtocolEvent::FeeTransferred {
                token,
                from_pair,
                amount,
            },
        );
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // HARVEST
    // ═══════════════════════════════════════════════════════════════════════════

    /// Convert held fees into the stablecoin and pay the caller an incentive
    #[allow(clippy::too_many_arguments)]
    pub fn harvest_and_convert(
        &mut self,
        registry: &Registry,
        router: &Router,
        ledger: &mut TokenLedger,
        ctx: &BlockContext,
        token_in: Address,
        amount_in: u128,
        min_out: u128,
        deadline: u64,
        path: &[Address],
    ) -> Result<HarvestReceipt> {
        self.ensure_active()?;
        validate_deadline(deadline, ctx.timestamp)?;
        validate_non_zero(amount_in)?;
        if !self.is_allowlisted(&token_in) {
            return Err(Error::TokenNotAllowlisted(token_in.to_hex()));
        }
        let cap = self.max_convert_amount(&token_in);
        if amount_in > cap {
            return Err(Error::ExceedsConvertCap { amount: amount_in, cap });
        }
        if path.first() != Some(&token_in) || path.last() != Some(&self.stable_token) {
            return Err(Error::InvalidParameter {
                name: "path".into(),
                reason: "must start at the fee token and end at the stablecoin".into(),
            });
        }

        let quoted = router
            .get_amounts_out(registry, amount_in, path)?
            .last()
            .copied()
            .unwrap_or(0);
        let floor = apply_haircut(quoted, self.harvest.max_slippage_bps)?;
        if min_out < floor {
            return Err(Error::MinOutTooLoose {
                min_out,
                floor,
                quoted,
            });
        }

        let treasury_ctx = ctx.with_caller(self.address);
        let swap = router.swap_exact_tokens_for_tokens(
            registry,
            ledger,
            &treasury_ctx,
            amount_in,
            min_out,
            path,
            self.address,
            deadline,
        )?;
        let stable_out = swap.amount_out();
        let incentive = apply_bps(stable_out, self.harvest.harvest_incentive_bps)?;
        if incentive > 0 {
            ledger.transfer(self.stable_token, self.address, ctx.caller, incentive)?;
        }
        let remaining = self.accrued_fees(&token_in).saturating_sub(amount_in);
        self.accrued.insert(token_in, remaining);
        // The conversion itself pays protocol fees back to this treasury
        let treasury = self.address;
        for fee in swap.fees.iter().filter(|f| f.treasury == treasury) {
            self.record_fee(ctx, fee.token, fee.pair, fee.amount)?;
        }

        self.bus.emit(
            ctx,
            ProtocolEvent::Converted {
                token_in,
                amount_in,
                stable_out,
                incentive,
                caller: ctx.caller,
            },
        );
        tracing::info!(
            token = %token_in.short(),
            amount_in,
            stable_out,
            incentive,
            caller = %ctx.caller,
            "fees harvested"
        );
        Ok(HarvestReceipt {
            amount_in,
            stable_out,
            incentive,
            retained: stable_out - incentive,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DISTRIBUTION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Send `amount` of held stablecoin to the configured buckets
    pub fn distribute_musd(
        &mut self,
        ledger: &mut TokenLedger,
        ctx: &BlockContext,
        amount: u128,
    ) -> Result<DistributionSplit> {
        self.ensure_active()?;
        let config = self
            .distribution
            .ok_or_else(|| Error::DistributionNotConfigured("no buckets set".into()))?;
        validate_non_zero(amount)?;
        let available = ledger.balance_of(&self.stable_token, &self.address);
        if available < amount {
            return Err(Error::InsufficientBalance {
                token: self.stable_token.to_hex(),
                required: amount,
                available,
            });
        }

        let split = DistributionSplit::compute(amount, &config)?;
        for (to, value) in [
            (config.ops_address, split.ops),
            (config.liquidity_address, split.liquidity),
            (config.reserve_address, split.reserve),
        ] {
            if value > 0 {
                ledger.transfer(self.stable_token, self.address, to, value)?;
            }
        }

        self.bus.emit(
            ctx,
            ProtocolEvent::Distributed {
                amount,
                ops: split.ops,
                liquidity: split.liquidity,
                reserve: split.reserve,
            },
        );
        tracing::info!(amount, ops = split.ops, liquidity = split.liquidity, reserve = split.reserve, "distributed");
        Ok(split)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // GOVERNANCE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Set bucket destinations and shares
    pub fn set_distribution_config(&mut self, ctx: &BlockContext, config: TreasuryConfig) -> Result<()> {
        validate_owner(&ctx.caller, &self.owner, "set_distribution_config")?;
        config.validate()?;
        self.distribution = Some(config);
        self.bus.emit(
            ctx,
            ProtocolEvent::config_changed(
                COMPONENT,
                "distribution",
                format!("{}/{}/{}", config.ops_bps, config.liquidity_bps, config.reserve_bps),
            ),
        );
        Ok(())
    }

    /// Allow or forbid harvesting `token`
    pub fn set_token_allowlist(&mut self, ctx: &BlockContext, token: Address, allowed: bool) -> Result<()> {
        validate_owner(&ctx.caller, &self.owner, "set_token_allowlist")?;
        validate_address(&token, "token")?;
        if token == self.stable_token {
            return Err(Error::InvalidParameter {
                name: "token".into(),
                reason: "stablecoin is the harvest output".into(),
            });
        }
        if allowed {
            self.allowlist.insert(token);
        } else {
            self.allowlist.remove(&token);
        }
        self.bus.emit(
            ctx,
            ProtocolEvent::config_changed(COMPONENT, "allowlist", format!("{}={}", token, allowed)),
        );
        Ok(())
    }

    /// Cap a single harvest of `token`
    pub fn set_max_convert_amount_per_call(&mut self, ctx: &BlockContext, token: Address, cap: u128) -> Result<()> {
        validate_owner(&ctx.caller, &self.owner, "set_max_convert_amount_per_call")?;
        validate_address(&token, "token")?;
        self.convert_caps.insert(token, cap);
        self.bus.emit(
            ctx,
            ProtocolEvent::config_changed(COMPONENT, "max_convert_amount", format!("{}={}", token, cap)),
        );
        Ok(())
    }

    /// Set the min-out floor used by harvests
    pub fn set_slippage_limits(&mut self, ctx: &BlockContext, max_slippage_bps: u64) -> Result<()> {
        validate_owner(&ctx.caller, &self.owner, "set_slippage_limits")?;
        validate_bps(max_slippage_bps, MAX_SLIPPAGE_BPS, "max_slippage_bps")?;
        self.harvest.max_slippage_bps = max_slippage_bps;
        self.bus.emit(
            ctx,
            ProtocolEvent::config_changed(COMPONENT, "max_slippage_bps", max_slippage_bps),
        );
        Ok(())
    }

    /// Set the harvester reward
    pub fn set_harvest_incentive_bps(&mut self, ctx: &BlockContext, incentive_bps: u64) -> Result<()> {
        validate_owner(&ctx.caller, &self.owner, "set_harvest_incentive_bps")?;
        validate_bps(incentive_bps, MAX_HARVEST_INCENTIVE_BPS, "harvest_incentive_bps")?;
        self.harvest.harvest_incentive_bps = incentive_bps;
        self.bus.emit(
            ctx,
            ProtocolEvent::config_changed(COMPONENT, "harvest_incentive_bps", incentive_bps),
        );
        Ok(())
    }

    /// Block harvest and distribution
    pub fn pause(&mut self, ctx: &BlockContext) -> Result<()> {
        self.set_paused(ctx, true)
    }

    /// Resume harvest and distribution
    pub fn unpause(&mut self, ctx: &BlockContext) -> Result<()> {
        self.set_paused(ctx, false)
    }

    fn set_paused(&mut self, ctx: &BlockContext, paused: bool) -> Result<()> {
        validate_owner(&ctx.caller, &self.owner, if paused { "pause" } else { "unpause" })?;
        self.paused = paused;
        self.bus
            .emit(ctx, ProtocolEvent::config_changed(COMPONENT, "paused", paused));
        tracing::info!(paused, "treasury pause state changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FeeConfig;
    use crate::utils::constants::WAD;

    struct Env {
        treasury: Treasury,
        registry: Registry,
        router: Router,
        ledger: TokenLedger,
        gov: BlockContext,
        keeper: BlockContext,
        fee_token: Address,
        musd: Address,
    }

    fn env() -> Env {
        let gov_addr = Address::from_label("gov");
        let bus = EventBus::default();
        let musd = Address::from_label("musd");
        let fee_token = Address::from_label("weth");
        let mut registry = Registry::new(gov_addr, FeeConfig::default(), bus.clone()).unwrap();
        let router = Router::new(bus.clone());
        let treasury = Treasury::new(musd, gov_addr, HarvestConfig::default(), bus).unwrap();
        let mut ledger = TokenLedger::new();

        let lp = Address::from_label("lp");
        ledger.mint(fee_token, lp, 1_000_000 * WAD).unwrap();
        ledger.mint(musd, lp, 1_000_000 * WAD).unwrap();
        let lp_ctx = BlockContext::new(1, 1_000, lp);
        router
            .add_liquidity(&mut registry, &mut ledger, &lp_ctx, fee_token, musd, 10_000 * WAD, 10_000 * WAD, 0, 0, 2_000)
            .unwrap();
        ledger.mint(fee_token, treasury.address(), 50 * WAD).unwrap();

        Env {
            treasury,
            registry,
            router,
            ledger,
            gov: BlockContext::new(2, 1_010, gov_addr),
            keeper: BlockContext::new(2, 1_010, Address::from_label("keeper")),
            fee_token,
            musd,
        }
    }

    fn allow(e: &mut Env, cap: u128) {
        e.treasury.set_token_allowlist(&e.gov, e.fee_token, true).unwrap();
        e.treasury
            .set_max_convert_amount_per_call(&e.gov, e.fee_token, cap)
            .unwrap();
    }

    #[test]
    fn test_harvest_requires_allowlist() {
        let mut e = env();
        let before = e.ledger.state_hash();
        let path = [e.fee_token, e.musd];
        let err = e
            .treasury
            .harvest_and_convert(&e.registry, &e.router, &mut e.ledger, &e.keeper, e.fee_token, WAD, 0, 2_000, &path)
            .unwrap_err();
        assert!(matches!(err, Error::TokenNotAllowlisted(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Unauthorized);
        assert_eq!(e.ledger.state_hash(), before);
    }

    #[test]
    fn test_harvest_cap_and_floor() {
        let mut e = env();
        allow(&mut e, 10 * WAD);
        let path = [e.fee_token, e.musd];
        assert!(matches!(
            e.treasury.harvest_and_convert(&e.registry, &e.router, &mut e.ledger, &e.keeper, e.fee_token, 11 * WAD, 0, 2_000, &path),
            Err(Error::ExceedsConvertCap { .. })
        ));
        assert!(matches!(
            e.treasury.harvest_and_convert(&e.registry, &e.router, &mut e.ledger, &e.keeper, e.fee_token, 10 * WAD, 0, 2_000, &path),
            Err(Error::MinOutTooLoose { .. })
        ));
    }

    #[test]
    fn test_harvest_pays_incentive() {
        let mut e = env();
        allow(&mut e, 10 * WAD);
        let path = [e.fee_token, e.musd];
        let quoted = *e.router.get_amounts_out(&e.registry, 10 * WAD, &path).unwrap().last().unwrap();
        let receipt = e
            .treasury
            .harvest_and_convert(&e.registry, &e.router, &mut e.ledger, &e.keeper, e.fee_token, 10 * WAD, quoted, 2_000, &path)
            .unwrap();
        assert_eq!(receipt.stable_out, quoted);
        assert_eq!(receipt.incentive, quoted * 10 / 10_000);
        assert_eq!(e.ledger.balance_of(&e.musd, &e.keeper.caller), receipt.incentive);
        assert_eq!(e.ledger.balance_of(&e.musd, &e.treasury.address()), receipt.retained);
        assert_eq!(e.ledger.balance_of(&e.fee_token, &e.treasury.address()), 40 * WAD);
    }

    #[test]
    fn test_fee_callback_rejects_unknown_sender() {
        let mut e = env();
        let pair = e.registry.pair_address(e.fee_token, e.musd).unwrap().unwrap();
        let from_pool = e.keeper.with_caller(pair);
        e.treasury
            .on_fee_received(&e.registry, &from_pool, e.fee_token, 5)
            .unwrap();
        assert_eq!(e.treasury.accrued_fees(&e.fee_token), 5);

        let other = Address::from_label("other");
        assert!(matches!(
            e.treasury.on_fee_received(&e.registry, &from_pool, other, 5),
            Err(Error::UnknownPair(_))
        ));
        assert!(matches!(
            e.treasury.on_fee_received(&e.registry, &e.keeper, e.fee_token, 5),
            Err(Error::UnknownPair(_))
        ));
    }

    #[test]
    fn test_distribution_requires_config() {
        let mut e = env();
        e.ledger.mint(e.musd, e.treasury.address(), 100).unwrap();
        assert!(matches!(
            e.treasury.distribute_musd(&mut e.ledger, &e.keeper, 100),
            Err(Error::DistributionNotConfigured(_))
        ));

        let bad = TreasuryConfig {
            ops_address: Address::from_label("ops"),
            liquidity_address: Address::from_label("liq"),
            reserve_address: Address::from_label("reserve"),
            ops_bps: 4_000,
            liquidity_bps: 4_000,
            reserve_bps: 1_999,
        };
        assert!(e.treasury.set_distribution_config(&e.gov, bad).is_err());
        let good = TreasuryConfig { reserve_bps: 2_000, ..bad };
        e.treasury.set_distribution_config(&e.gov, good).unwrap();

        let split = e.treasury.distribute_musd(&mut e.ledger, &e.keeper, 100).unwrap();
        assert_eq!((split.ops, split.liquidity, split.reserve), (40, 40, 20));
        assert_eq!(e.ledger.balance_of(&e.musd, &good.reserve_address), 20);
    }

    #[test]
    fn test_pause_blocks_harvest() {
        let mut e = env();
        allow(&mut e, 10 * WAD);
        e.treasury.pause(&e.gov).unwrap();
        let path = [e.fee_token, e.musd];
        assert!(matches!(
            e.treasury.harvest_and_convert(&e.registry, &e.router, &mut e.ledger, &e.keeper, e.fee_token, WAD, 0, 2_000, &path),
            Err(Error::TreasuryPaused)
        ));
        assert!(matches!(e.treasury.unpause(&e.keeper), Err(Error::Unauthorized(_))));
    }

    #[test]
    fn test_setter_bounds() {
        let mut e = env();
        assert!(e.treasury.set_harvest_incentive_bps(&e.gov, 101).is_err());
        assert!(e.treasury.set_slippage_limits(&e.gov, 1_001).is_err());
        e.treasury.set_harvest_incentive_bps(&e.gov, 100).unwrap();
        assert_eq!(e.treasury.harvest_config().harvest_incentive_bps, 100);
    }
}
