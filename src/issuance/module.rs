//! Collateral-backed stablecoin issuance.
//!
//! Mint and burn are priced by the oracle, rate limited per block and
//! guarded by the collateral circuit breaker. Every call validates and
//! computes its full effect, including the resulting collateralization
//! ratio, before it touches any balance, so a rejected call changes
//! nothing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::address::Address;
use crate::core::config::{CollateralConfig, IssuanceConfig, RatioConfig};
use crate::core::context::BlockContext;
use crate::core::token::TokenLedger;
use crate::error::{Error, Result};
use crate::issuance::breaker::CollateralBreaker;
use crate::issuance::limiter::MintLimiter;
use crate::oracle::{validated_price, PriceOracle};
use crate::protocol::events::{EventBus, EventLog, ProtocolEvent};
use crate::utils::constants::BPS_DIVISOR;
use crate::utils::math::{
    mul_div, mul_div_up, pow10, safe_add, safe_sub, units_for_value, value_in_wad,
};
use crate::utils::validation::{validate_address, validate_min_out, validate_non_zero, validate_owner};

const COMPONENT: &str = "issuance";

/// Result of a mint or burn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceReceipt {
    /// Collateral moved
    pub collateral_amount: u128,
    /// Stablecoin minted or burned
    pub stable_amount: u128,
    /// Oracle price used (E18)
    pub price: u128,
    /// Ratio after the call, `None` when supply is zero
    pub ratio_bps: Option<u128>,
    /// Whether this call tripped the breaker
    pub tripped: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ISSUANCE MODULE
// ═══════════════════════════════════════════════════════════════════════════════

/// Stablecoin mint/burn against oracle-priced collateral
#[derive(Debug)]
pub struct IssuanceModule {
    stable_token: Address,
    vault: Address,
    config: IssuanceConfig,
    collaterals: BTreeMap<Address, CollateralConfig>,
    balances: HashMap<Address, u128>,
    limiter: MintLimiter,
    breaker: CollateralBreaker,
    paused: bool,
    owner: Address,
    operators: HashSet<Address>,
    oracle: Arc<dyn PriceOracle>,
    bus: EventBus,
}

impl IssuanceModule {
    /// Create a module issuing `stable_token`
    pub fn new(
        stable_token: Address,
        owner: Address,
        config: IssuanceConfig,
        oracle: Arc<dyn PriceOracle>,
        bus: EventBus,
    ) -> Result<Self> {
        validate_address(&stable_token, "stable token")?;
        validate_address(&owner, "issuance owner")?;
        config.validate()?;
        Ok(Self {
            stable_token,
            vault: Address::derive(&[b"musd:issuance:vault", stable_token.as_bytes()]),
            limiter: MintLimiter::new(config.max_mint_per_block),
            config,
            collaterals: BTreeMap::new(),
            balances: HashMap::new(),
            breaker: CollateralBreaker::new(),
            paused: false,
            owner,
            operators: HashSet::new(),
            oracle,
            bus,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // VIEWS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Issued token
    pub fn stable_token(&self) -> Address {
        self.stable_token
    }

    /// Account holding collateral
    pub fn vault(&self) -> Address {
        self.vault
    }

    /// Governance identity
    pub fn owner(&self) -> Address {
        self.owner
    }

    /// Current parameters
    pub fn config(&self) -> &IssuanceConfig {
        &self.config
    }

    /// Collateral parameters, if configured
    pub fn collateral_config(&self, token: &Address) -> Option<CollateralConfig> {
        self.collaterals.get(token).copied()
    }

    /// Tokens currently enabled as collateral
    pub fn enabled_collaterals(&self) -> Vec<Address> {
        self.collaterals
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(t, _)| *t)
            .collect()
    }

    /// Tracked collateral balance
    pub fn collateral_balance(&self, token: &Address) -> u128 {
        self.balances.get(token).copied().unwrap_or(0)
    }

    /// Stablecoin minted in `block`
    pub fn minted_in_block(&self, block: u64) -> u128 {
        self.limiter.minted_in(block)
    }

    /// Whether governance or the breaker paused the module
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Breaker state
    pub fn breaker(&self) -> &CollateralBreaker {
        &self.breaker
    }

    /// Whether `account` may withdraw reserves
    pub fn is_operator(&self, account: &Address) -> bool {
        self.operators.contains(account)
    }

    /// Collateralization ratio in bps, `None` when supply is zero
    ///
    /// Only enabled collateral counts towards backing, and every held
    /// enabled collateral must have a valid price or the ratio is an error.
    pub fn get_collateral_ratio_bps(&self, ledger: &TokenLedger, now: u64) -> Result<Option<u128>> {
        self.ratio_for(&self.balances, ledger.total_supply(&self.stable_token), now)
    }

    fn ratio_for(
        &self,
        balances: &HashMap<Address, u128>,
        supply: u128,
        now: u64,
    ) -> Result<Option<u128>> {
        if supply == 0 {
            return Ok(None);
        }
        let mut value = 0u128;
        for (token, cfg) in self.collaterals.iter().filter(|(_, c)| c.enabled) {
            let balance = balances.get(token).copied().unwrap_or(0);
            if balance == 0 {
                continue;
            }
            let price = self.price(token, cfg, now)?;
            value = safe_add(value, value_in_wad(balance, cfg.decimals, price)?)?;
        }
        Ok(Some(mul_div(value, BPS_DIVISOR, supply)?))
    }

    fn price(&self, token: &Address, cfg: &CollateralConfig, now: u64) -> Result<u128> {
        validated_price(
            self.oracle.as_ref(),
            token,
            cfg,
            self.config.staleness_threshold_secs,
            now,
        )
    }

    fn enabled_config(&self, token: &Address) -> Result<CollateralConfig> {
        match self.collaterals.get(token) {
            Some(cfg) if cfg.enabled => Ok(*cfg),
            _ => Err(Error::CollateralNotEnabled(token.to_hex())),
        }
    }

    fn ensure_active(&self) -> Result<()> {
        if self.breaker.is_tripped() {
            return Err(Error::CircuitBreakerTripped);
        }
        if self.paused {
            return Err(Error::IssuancePaused);
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUOTES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Stablecoin minted for `collateral_amount` of `token` at current price
    pub fn quote_mint(&self, token: &Address, collateral_amount: u128, now: u64) -> Result<u128> {
        validate_non_zero(collateral_amount)?;
        let cfg = self.enabled_config(token)?;
        let price = self.price(token, &cfg, now)?;
        self.mint_amount(collateral_amount, &cfg, price)
    }

    /// Collateral returned for `stable_amount` at current price
    pub fn quote_burn(&self, token: &Address, stable_amount: u128, now: u64) -> Result<u128> {
        validate_non_zero(stable_amount)?;
        let cfg = self.enabled_config(token)?;
        let price = self.price(token, &cfg, now)?;
        units_for_value(stable_amount, cfg.decimals, price)
    }

    /// Collateral needed to mint at least `stable_amount`, rounded up
    pub fn quote_collateral_for_mint(&self, token: &Address, stable_amount: u128, now: u64) -> Result<u128> {
        validate_non_zero(stable_amount)?;
        let cfg = self.enabled_config(token)?;
        let price = self.price(token, &cfg, now)?;
        let usd_value = mul_div_up(
            stable_amount,
            self.config.ratios.min_collateral_ratio_bps as u128,
            BPS_DIVISOR,
        )?;
        // one extra unit absorbs the floor in the forward conversion
        safe_add(mul_div_up(usd_value, pow10(cfg.decimals)?, price)?, 1)
    }

    /// Stablecoin to burn for at least `collateral_amount`, rounded up
    pub fn quote_stable_for_collateral(&self, token: &Address, collateral_amount: u128, now: u64) -> Result<u128> {
        validate_non_zero(collateral_amount)?;
        let cfg = self.enabled_config(token)?;
        let price = self.price(token, &cfg, now)?;
        mul_div_up(collateral_amount, price, pow10(cfg.decimals)?)
    }

    fn mint_amount(&self, collateral_amount: u128, cfg: &CollateralConfig, price: u128) -> Result<u128> {
        let usd_value = value_in_wad(collateral_amount, cfg.decimals, price)?;
        mul_div(
            usd_value,
            BPS_DIVISOR,
            self.config.ratios.min_collateral_ratio_bps as u128,
        )
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MINT / BURN
    // ═══════════════════════════════════════════════════════════════════════════

    /// Deposit collateral from the caller and mint stablecoin to `recipient`
    pub fn mint_with_collateral(
        &mut self,
        ledger: &mut TokenLedger,
        ctx: &BlockContext,
        token: Address,
        collateral_amount: u128,
        min_out: u128,
        recipient: Address,
    ) -> Result<IssuanceReceipt> {
        self.ensure_active()?;
        validate_non_zero(collateral_amount)?;
        validate_address(&recipient, "recipient")?;
        let cfg = self.enabled_config(&token)?;
        let price = self.price(&token, &cfg, ctx.timestamp)?;

        let minted = self.mint_amount(collateral_amount, &cfg, price)?;
        validate_non_zero(minted)?;
        validate_min_out(minted, min_out)?;
        self.limiter.check(ctx.block_number, minted)?;

        let available = ledger.balance_of(&token, &ctx.caller);
        if available < collateral_amount {
            return Err(Error::InsufficientBalance {
                token: token.to_hex(),
                required: collateral_amount,
                available,
            });
        }

        let mut balances = self.balances.clone();
        let new_balance = safe_add(self.collateral_balance(&token), collateral_amount)?;
        balances.insert(token, new_balance);
        let supply = safe_add(ledger.total_supply(&self.stable_token), minted)?;
        let ratio = self.ratio_for(&balances, supply, ctx.timestamp)?;

        ledger.transfer(token, ctx.caller, self.vault, collateral_amount)?;
        ledger.mint(self.stable_token, recipient, minted)?;
        self.balances = balances;
        self.limiter.record(ctx.block_number, minted);

        let mut log = EventLog::new();
        log.push(ProtocolEvent::Minted {
            collateral: token,
            collateral_amount,
            stable_amount: minted,
            price,
            recipient,
        });
        let tripped = self.evaluate_breaker(ratio, ctx.block_number, &mut log);
        self.bus.publish(ctx, log);

        tracing::debug!(
            collateral = %token.short(),
            collateral_amount,
            minted,
            ratio_bps = ?ratio,
            "minted"
        );
        Ok(IssuanceReceipt {
            collateral_amount,
            stable_amount: minted,
            price,
            ratio_bps: ratio,
            tripped,
        })
    }

    /// Burn the caller's stablecoin and return collateral to `recipient`
    pub fn burn_for_collateral(
        &mut self,
        ledger: &mut TokenLedger,
        ctx: &BlockContext,
        token: Address,
        stable_amount: u128,
        min_collateral_out: u128,
        recipient: Address,
    ) -> Result<IssuanceReceipt> {
        self.ensure_active()?;
        validate_non_zero(stable_amount)?;
        validate_address(&recipient, "recipient")?;
        let cfg = self.enabled_config(&token)?;
        let price = self.price(&token, &cfg, ctx.timestamp)?;

        let collateral_out = units_for_value(stable_amount, cfg.decimals, price)?;
        validate_non_zero(collateral_out)?;
        let tracked = self.collateral_balance(&token);
        if collateral_out > tracked {
            return Err(Error::ExceedsCollateralBalance {
                requested: collateral_out,
                available: tracked,
            });
        }
        validate_min_out(collateral_out, min_collateral_out)?;

        let available = ledger.balance_of(&self.stable_token, &ctx.caller);
        if available < stable_amount {
            return Err(Error::InsufficientBalance {
                token: self.stable_token.to_hex(),
                required: stable_amount,
                available,
            });
        }

        let mut balances = self.balances.clone();
        balances.insert(token, tracked - collateral_out);
        let supply = safe_sub(ledger.total_supply(&self.stable_token), stable_amount)?;
        let ratio = self.ratio_for(&balances, supply, ctx.timestamp)?;

        ledger.burn(self.stable_token, ctx.caller, stable_amount)?;
        ledger.transfer(token, self.vault, recipient, collateral_out)?;
        self.balances = balances;

        let mut log = EventLog::new();
        log.push(ProtocolEvent::Burned {
            collateral: token,
            stable_amount,
            collateral_amount: collateral_out,
            price,
            recipient,
        });
        let tripped = self.evaluate_breaker(ratio, ctx.block_number, &mut log);
        self.bus.publish(ctx, log);

        tracing::debug!(
            collateral = %token.short(),
            stable_amount,
            collateral_out,
            ratio_bps = ?ratio,
            "burned"
        );
        Ok(IssuanceReceipt {
            collateral_amount: collateral_out,
            stable_amount,
            price,
            ratio_bps: ratio,
            tripped,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CIRCUIT BREAKER
    // ═══════════════════════════════════════════════════════════════════════════

    fn evaluate_breaker(&mut self, ratio: Option<u128>, block: u64, log: &mut EventLog) -> bool {
        let threshold = self.config.ratios.emergency_collateral_ratio_bps;
        let tripped = self.breaker.evaluate(ratio, threshold, block);
        if tripped {
            self.paused = true;
            let ratio_bps = ratio.unwrap_or(0);
            log.push(ProtocolEvent::CircuitBreakerTripped {
                ratio_bps,
                threshold_bps: threshold,
            });
            tracing::warn!(ratio_bps, threshold_bps = threshold, "circuit breaker tripped");
        }
        tripped
    }

    /// Re-evaluate the ratio and trip if it is below the emergency threshold
    pub fn check_and_trip_circuit_breaker(
        &mut self,
        ledger: &TokenLedger,
        ctx: &BlockContext,
    ) -> Result<bool> {
        let ratio = self.get_collateral_ratio_bps(ledger, ctx.timestamp)?;
        let mut log = EventLog::new();
        let tripped = self.evaluate_breaker(ratio, ctx.block_number, &mut log);
        self.bus.publish(ctx, log);
        Ok(tripped)
    }

    /// Clear the breaker and unpause; requires the ratio at or above minimum
    pub fn reset_circuit_breaker(&mut self, ledger: &TokenLedger, ctx: &BlockContext) -> Result<()> {
        validate_owner(&ctx.caller, &self.owner, "reset_circuit_breaker")?;
        let ratio = self.get_collateral_ratio_bps(ledger, ctx.timestamp)?;
        let required = self.config.ratios.min_collateral_ratio_bps as u128;
        if let Some(ratio_bps) = ratio {
            if ratio_bps < required {
                return Err(Error::CollateralRatioTooLow {
                    ratio_bps,
                    required_bps: required,
                });
            }
        }
        self.breaker.reset();
        self.paused = false;
        self.bus
            .emit(ctx, ProtocolEvent::CircuitBreakerReset { ratio_bps: ratio });
        tracing::info!(ratio_bps = ?ratio, "circuit breaker reset");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RESERVES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Donate collateral to the reserve; anyone may call
    pub fn deposit_reserve(
        &mut self,
        ledger: &mut TokenLedger,
        ctx: &BlockContext,
        token: Address,
        amount: u128,
    ) -> Result<()> {
        validate_non_zero(amount)?;
        if !self.collaterals.contains_key(&token) {
            return Err(Error::CollateralNotEnabled(token.to_hex()));
        }
        let new_balance = safe_add(self.collateral_balance(&token), amount)?;
        ledger.transfer(token, ctx.caller, self.vault, amount)?;
        self.balances.insert(token, new_balance);
        self.bus.emit(
            ctx,
            ProtocolEvent::ReserveDeposited {
                token,
                from: ctx.caller,
                amount,
            },
        );
        Ok(())
    }

    /// Withdraw reserve collateral; operators only, never below the minimum ratio
    pub fn withdraw_reserve(
        &mut self,
        ledger: &mut TokenLedger,
        ctx: &BlockContext,
        token: Address,
        amount: u128,
        to: Address,
    ) -> Result<()> {
        if !self.is_operator(&ctx.caller) {
            return Err(Error::Unauthorized(format!(
                "withdraw_reserve requires operator, caller {}",
                ctx.caller
            )));
        }
        validate_non_zero(amount)?;
        validate_address(&to, "recipient")?;
        let tracked = self.collateral_balance(&token);
        if amount > tracked {
            return Err(Error::ExceedsCollateralBalance {
                requested: amount,
                available: tracked,
            });
        }

        let mut balances = self.balances.clone();
        balances.insert(token, tracked - amount);
        let supply = ledger.total_supply(&self.stable_token);
        let required = self.config.ratios.min_collateral_ratio_bps as u128;
        if let Some(ratio_bps) = self.ratio_for(&balances, supply, ctx.timestamp)? {
            if ratio_bps < required {
                return Err(Error::CollateralRatioTooLow {
                    ratio_bps,
                    required_bps: required,
                });
            }
        }

        ledger.transfer(token, self.vault, to, amount)?;
        self.balances = balances;
        self.bus
            .emit(ctx, ProtocolEvent::ReserveWithdrawn { token, to, amount });
        tracing::info!(token = %token.short(), amount, to = %to, "reserve withdrawn");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // GOVERNANCE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Add or update a collateral token
    pub fn configure_collateral(
        &mut self,
        ctx: &BlockContext,
        token: Address,
        config: CollateralConfig,
    ) -> Result<()> {
        validate_owner(&ctx.caller, &self.owner, "configure_collateral")?;
        validate_address(&token, "collateral")?;
        if token == self.stable_token {
            return Err(Error::InvalidParameter {
                name: "collateral".into(),
                reason: "stable token cannot back itself".into(),
            });
        }
        config.validate()?;
        self.collaterals.insert(token, config);
        self.bus
            .emit(ctx, ProtocolEvent::CollateralConfigured { token, config });
        tracing::info!(token = %token, enabled = config.enabled, "collateral configured");
        Ok(())
    }

    /// Stop accepting a collateral token
    pub fn disable_collateral(&mut self, ctx: &BlockContext, token: Address) -> Result<()> {
        validate_owner(&ctx.caller, &self.owner, "disable_collateral")?;
        let mut config = self.enabled_config(&token)?;
        config.enabled = false;
        self.collaterals.insert(token, config);
        self.bus
            .emit(ctx, ProtocolEvent::CollateralConfigured { token, config });
        Ok(())
    }

    /// Pause mint and burn
    pub fn pause(&mut self, ctx: &BlockContext) -> Result<()> {
        validate_owner(&ctx.caller, &self.owner, "pause")?;
        self.paused = true;
        self.bus
            .emit(ctx, ProtocolEvent::config_changed(COMPONENT, "paused", true));
        Ok(())
    }

    /// Resume mint and burn; refused while the breaker is tripped
    pub fn unpause(&mut self, ctx: &BlockContext) -> Result<()> {
        validate_owner(&ctx.caller, &self.owner, "unpause")?;
        if self.breaker.is_tripped() {
            return Err(Error::CircuitBreakerTripped);
        }
        self.paused = false;
        self.bus
            .emit(ctx, ProtocolEvent::config_changed(COMPONENT, "paused", false));
        Ok(())
    }

    /// Grant or revoke reserve-withdrawal rights
    pub fn set_operator(&mut self, ctx: &BlockContext, operator: Address, enabled: bool) -> Result<()> {
        validate_owner(&ctx.caller, &self.owner, "set_operator")?;
        validate_address(&operator, "operator")?;
        if enabled {
            self.operators.insert(operator);
        } else {
            self.operators.remove(&operator);
        }
        self.bus.emit(
            ctx,
            ProtocolEvent::config_changed(COMPONENT, "operator", format!("{}={}", operator, enabled)),
        );
        Ok(())
    }

    /// Change the per-block mint cap
    pub fn set_max_mint_per_block(&mut self, ctx: &BlockContext, limit: u128) -> Result<()> {
        validate_owner(&ctx.caller, &self.owner, "set_max_mint_per_block")?;
        self.config.max_mint_per_block = limit;
        self.limiter.set_limit(limit);
        self.bus.emit(
            ctx,
            ProtocolEvent::config_changed(COMPONENT, "max_mint_per_block", limit),
        );
        Ok(())
    }

    /// Change the oracle staleness threshold
    pub fn set_staleness_threshold(&mut self, ctx: &BlockContext, secs: u64) -> Result<()> {
        validate_owner(&ctx.caller, &self.owner, "set_staleness_threshold")?;
        let mut next = self.config;
        next.staleness_threshold_secs = secs;
        next.validate()?;
        self.config = next;
        self.bus.emit(
            ctx,
            ProtocolEvent::config_changed(COMPONENT, "staleness_threshold_secs", secs),
        );
        Ok(())
    }

    /// Change the collateralization thresholds
    pub fn set_ratio_config(&mut self, ctx: &BlockContext, ratios: RatioConfig) -> Result<()> {
        validate_owner(&ctx.caller, &self.owner, "set_ratio_config")?;
        ratios.validate()?;
        self.config.ratios = ratios;
        self.bus.emit(
            ctx,
            ProtocolEvent::config_changed(
                COMPONENT,
                "ratios",
                format!(
                    "{}/{}",
                    ratios.min_collateral_ratio_bps, ratios.emergency_collateral_ratio_bps
                ),
            ),
        );
        tracing::info!(
            min = ratios.min_collateral_ratio_bps,
            emergency = ratios.emergency_collateral_ratio_bps,
            "ratio config updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::PriceFeed;
    use crate::utils::constants::WAD;

    const USDC_UNIT: u128 = 1_000_000;

    struct Fixture {
        module: IssuanceModule,
        feed: Arc<PriceFeed>,
        ledger: TokenLedger,
        gov: BlockContext,
        user: BlockContext,
        usdc: Address,
    }

    fn fixture() -> Fixture {
        let gov_addr = Address::from_label("gov");
        let usdc = Address::from_label("usdc");
        let feed = Arc::new(PriceFeed::new());
        feed.set_price(usdc, WAD, 1_000).unwrap();
        let mut module = IssuanceModule::new(
            Address::from_label("musd"),
            gov_addr,
            IssuanceConfig::default(),
            feed.clone(),
            EventBus::default(),
        )
        .unwrap();
        let gov = BlockContext::new(1, 1_000, gov_addr);
        module
            .configure_collateral(&gov, usdc, CollateralConfig::enabled(6, WAD * 95 / 100, WAD * 105 / 100))
            .unwrap();
        let user = BlockContext::new(1, 1_000, Address::from_label("user"));
        let mut ledger = TokenLedger::new();
        ledger.mint(usdc, user.caller, 1_000_000 * USDC_UNIT).unwrap();
        Fixture {
            module,
            feed,
            ledger,
            gov,
            user,
            usdc,
        }
    }

    #[test]
    fn test_mint_reference_case() {
        let mut f = fixture();
        let receipt = f
            .module
            .mint_with_collateral(&mut f.ledger, &f.user, f.usdc, 1_000 * USDC_UNIT, 0, f.user.caller)
            .unwrap();
        assert_eq!(receipt.stable_amount, 1_000 * WAD * 10_000 / 11_000);
        assert_eq!(receipt.ratio_bps, Some(11_000));
        assert_eq!(f.module.collateral_balance(&f.usdc), 1_000 * USDC_UNIT);
        assert_eq!(f.ledger.balance_of(&f.usdc, &f.module.vault()), 1_000 * USDC_UNIT);
    }

    #[test]
    fn test_mint_requires_enabled_collateral() {
        let mut f = fixture();
        let weth = Address::from_label("weth");
        let err = f
            .module
            .mint_with_collateral(&mut f.ledger, &f.user, weth, 1, 0, f.user.caller)
            .unwrap_err();
        assert!(matches!(err, Error::CollateralNotEnabled(_)));
    }

    #[test]
    fn test_mint_min_out_slippage() {
        let mut f = fixture();
        let err = f
            .module
            .mint_with_collateral(&mut f.ledger, &f.user, f.usdc, 1_000 * USDC_UNIT, 1_000 * WAD, f.user.caller)
            .unwrap_err();
        assert!(matches!(err, Error::SlippageExceeded { .. }));
        assert_eq!(f.module.collateral_balance(&f.usdc), 0);
    }

    #[test]
    fn test_mint_rate_limited() {
        let mut f = fixture();
        f.module.set_max_mint_per_block(&f.gov, 1_000 * WAD).unwrap();
        f.module
            .mint_with_collateral(&mut f.ledger, &f.user, f.usdc, 1_000 * USDC_UNIT, 0, f.user.caller)
            .unwrap();
        let err = f
            .module
            .mint_with_collateral(&mut f.ledger, &f.user, f.usdc, 1_000 * USDC_UNIT, 0, f.user.caller)
            .unwrap_err();
        assert!(matches!(err, Error::MintRateLimited { block: 1, .. }));
        let next_block = f.user.advance(1, 12);
        assert!(f
            .module
            .mint_with_collateral(&mut f.ledger, &next_block, f.usdc, 1_000 * USDC_UNIT, 0, f.user.caller)
            .is_ok());
    }

    #[test]
    fn test_stale_price_rejected() {
        let mut f = fixture();
        let late = f.user.advance(1, 3_601);
        let err = f
            .module
            .mint_with_collateral(&mut f.ledger, &late, f.usdc, USDC_UNIT, 0, f.user.caller)
            .unwrap_err();
        assert!(matches!(err, Error::StalePrice { .. }));
    }

    #[test]
    fn test_burn_returns_collateral() {
        let mut f = fixture();
        let minted = f
            .module
            .mint_with_collateral(&mut f.ledger, &f.user, f.usdc, 1_100 * USDC_UNIT, 0, f.user.caller)
            .unwrap()
            .stable_amount;
        assert_eq!(minted, 1_000 * WAD);
        let receipt = f
            .module
            .burn_for_collateral(&mut f.ledger, &f.user, f.usdc, 500 * WAD, 500 * USDC_UNIT, f.user.caller)
            .unwrap();
        assert_eq!(receipt.collateral_amount, 500 * USDC_UNIT);
        assert_eq!(f.module.collateral_balance(&f.usdc), 600 * USDC_UNIT);
        assert_eq!(receipt.ratio_bps, Some(12_000));
    }

    #[test]
    fn test_burn_exceeding_tracked_collateral() {
        let mut f = fixture();
        f.module
            .mint_with_collateral(&mut f.ledger, &f.user, f.usdc, 1_100 * USDC_UNIT, 0, f.user.caller)
            .unwrap();
        f.ledger.mint(f.module.stable_token(), f.user.caller, 1_000 * WAD).unwrap();
        let err = f
            .module
            .burn_for_collateral(&mut f.ledger, &f.user, f.usdc, 2_000 * WAD, 0, f.user.caller)
            .unwrap_err();
        assert!(matches!(err, Error::ExceedsCollateralBalance { .. }));
    }

    #[test]
    fn test_ratio_undefined_without_supply() {
        let f = fixture();
        assert_eq!(f.module.get_collateral_ratio_bps(&f.ledger, 1_000).unwrap(), None);
    }

    #[test]
    fn test_price_drop_trips_breaker_and_reset_requires_ratio() {
        let mut f = fixture();
        f.module
            .mint_with_collateral(&mut f.ledger, &f.user, f.usdc, 1_100 * USDC_UNIT, 0, f.user.caller)
            .unwrap();
        // 1100 USDC at 0.95 backs 1000 mUSD at 104.5%; lower the emergency line above that
        let later = f.gov.advance(1, 10);
        f.feed.set_price(f.usdc, WAD * 95 / 100, later.timestamp).unwrap();
        f.module
            .set_ratio_config(&later, RatioConfig { min_collateral_ratio_bps: 11_000, emergency_collateral_ratio_bps: 10_500 })
            .unwrap();

        assert!(f.module.check_and_trip_circuit_breaker(&f.ledger, &later).unwrap());
        assert!(f.module.is_paused());
        assert!(matches!(
            f.module.mint_with_collateral(&mut f.ledger, &later.with_caller(f.user.caller), f.usdc, 1, 0, f.user.caller),
            Err(Error::CircuitBreakerTripped)
        ));
        assert!(matches!(f.module.unpause(&later), Err(Error::CircuitBreakerTripped)));
        assert!(matches!(
            f.module.reset_circuit_breaker(&f.ledger, &later),
            Err(Error::CollateralRatioTooLow { .. })
        ));

        f.feed.set_price(f.usdc, WAD, later.timestamp).unwrap();
        f.module.reset_circuit_breaker(&f.ledger, &later).unwrap();
        assert!(!f.module.is_paused());
        assert!(!f.module.breaker().is_tripped());
    }

    #[test]
    fn test_mint_below_emergency_ratio_trips_breaker() {
        let mut f = fixture();
        let receipt = f
            .module
            .mint_with_collateral(&mut f.ledger, &f.user, f.usdc, 1_100 * USDC_UNIT, 0, f.user.caller)
            .unwrap();
        assert!(!receipt.tripped);
        // supply issued outside the module dilutes the backing
        f.ledger.mint(f.module.stable_token(), f.user.caller, 1_000 * WAD).unwrap();

        let receipt = f
            .module
            .mint_with_collateral(&mut f.ledger, &f.user, f.usdc, 110 * USDC_UNIT, 0, f.user.caller)
            .unwrap();
        assert!(receipt.tripped);
        assert_eq!(receipt.ratio_bps, Some(1_210 * 10_000 / 2_100));
        assert!(f.module.is_paused());
        assert!(f.module.breaker().is_tripped());
        assert_eq!(f.module.collateral_balance(&f.usdc), 1_210 * USDC_UNIT);

        let err = f
            .module
            .mint_with_collateral(&mut f.ledger, &f.user, f.usdc, USDC_UNIT, 0, f.user.caller)
            .unwrap_err();
        assert!(matches!(err, Error::CircuitBreakerTripped));
    }

    #[test]
    fn test_burn_below_emergency_ratio_trips_breaker() {
        let mut f = fixture();
        f.module
            .mint_with_collateral(&mut f.ledger, &f.user, f.usdc, 1_100 * USDC_UNIT, 0, f.user.caller)
            .unwrap();
        f.ledger.mint(f.module.stable_token(), f.user.caller, 50 * WAD).unwrap();
        f.feed.set_price(f.usdc, WAD * 95 / 100, 1_000).unwrap();

        let receipt = f
            .module
            .burn_for_collateral(&mut f.ledger, &f.user, f.usdc, 500 * WAD, 0, f.user.caller)
            .unwrap();
        assert!(receipt.tripped);
        assert!(receipt.ratio_bps.unwrap() < 10_000);
        assert!(f.module.is_paused());

        let err = f
            .module
            .burn_for_collateral(&mut f.ledger, &f.user, f.usdc, WAD, 0, f.user.caller)
            .unwrap_err();
        assert!(matches!(err, Error::CircuitBreakerTripped));
    }

    #[test]
    fn test_withdraw_reserve_guarded() {
        let mut f = fixture();
        f.module
            .mint_with_collateral(&mut f.ledger, &f.user, f.usdc, 1_100 * USDC_UNIT, 0, f.user.caller)
            .unwrap();
        f.module.deposit_reserve(&mut f.ledger, &f.user, f.usdc, 100 * USDC_UNIT).unwrap();

        let op = Address::from_label("operator");
        let op_ctx = f.gov.with_caller(op);
        assert!(matches!(
            f.module.withdraw_reserve(&mut f.ledger, &op_ctx, f.usdc, 1, op),
            Err(Error::Unauthorized(_))
        ));
        f.module.set_operator(&f.gov, op, true).unwrap();
        assert!(matches!(
            f.module.withdraw_reserve(&mut f.ledger, &op_ctx, f.usdc, 101 * USDC_UNIT, op),
            Err(Error::CollateralRatioTooLow { .. })
        ));
        f.module.withdraw_reserve(&mut f.ledger, &op_ctx, f.usdc, 100 * USDC_UNIT, op).unwrap();
        assert_eq!(f.ledger.balance_of(&f.usdc, &op), 100 * USDC_UNIT);
    }

    #[test]
    fn test_disable_collateral() {
        let mut f = fixture();
        f.module.disable_collateral(&f.gov, f.usdc).unwrap();
        assert!(f.module.enabled_collaterals().is_empty());
        assert!(f.module.quote_mint(&f.usdc, USDC_UNIT, 1_000).is_err());
    }

    #[test]
    fn test_governance_requires_owner() {
        let mut f = fixture();
        assert!(matches!(f.module.pause(&f.user), Err(Error::Unauthorized(_))));
        assert!(f
            .module
            .set_ratio_config(&f.gov, RatioConfig { min_collateral_ratio_bps: 9_000, emergency_collateral_ratio_bps: 10_000 })
            .is_err());
        f.module.pause(&f.gov).unwrap();
        assert!(matches!(
            f.module.mint_with_collateral(&mut f.ledger, &f.user, f.usdc, 1, 0, f.user.caller),
            Err(Error::IssuancePaused)
        ));
    }
}
