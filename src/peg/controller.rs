//! Peg controller - one correction cycle over every configured symbol.
//!
//! Symbols are independent: a failure is logged and recorded for that
//! symbol and the cycle moves on, unless strict mode is set. Input assets
//! the operator does not hold are sourced through the issuance module
//! before trading.

use serde::{Deserialize, Serialize};

use crate::core::address::Address;
use crate::core::config::{PegControllerConfig, PegTarget};
use crate::core::context::BlockContext;
use crate::error::{Error, Result};
use crate::peg::planner::{plan_correction, CorrectionSide, PegDecision, PoolState, SkipReason};
use crate::protocol::engine::Protocol;
use crate::utils::math::{apply_bps, apply_haircut, safe_add};

// ═══════════════════════════════════════════════════════════════════════════════
// REPORTS
// ═══════════════════════════════════════════════════════════════════════════════

/// What happened to one symbol in a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolOutcome {
    /// A corrective trade executed
    Traded {
        /// Direction
        side: CorrectionSide,
        /// Deviation before the trade
        deviation_bps: i128,
        /// Input sold
        amount_in: u128,
        /// Output received
        amount_out: u128,
        /// Whether the input was reduced to the available balance
        partial: bool,
    },
    /// No trade needed or possible
    Skipped(SkipReason),
    /// The attempt failed and left no trade behind
    Failed(Error),
}

/// Per-symbol line of a cycle report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolReport {
    /// Symbol
    pub symbol: String,
    /// Outcome
    pub outcome: SymbolOutcome,
}

/// Summary of one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Block the cycle ran in
    pub block_number: u64,
    /// Timestamp the cycle ran at
    pub timestamp: u64,
    /// One entry per configured symbol, in order
    pub symbols: Vec<SymbolReport>,
}

impl CycleReport {
    /// Symbols that traded
    pub fn traded(&self) -> usize {
        self.count(|o| matches!(o, SymbolOutcome::Traded { .. }))
    }

    /// Symbols skipped
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, SymbolOutcome::Skipped(_)))
    }

    /// Symbols that failed
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, SymbolOutcome::Failed(_)))
    }

    /// Outcome for `symbol`
    pub fn outcome(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .map(|s| &s.outcome)
    }

    fn count(&self, pred: impl Fn(&SymbolOutcome) -> bool) -> usize {
        self.symbols.iter().filter(|s| pred(&s.outcome)).count()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROLLER
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-cycle peg stabilizer acting as `operator`
#[derive(Debug, Clone)]
pub struct PegController {
    config: PegControllerConfig,
    operator: Address,
}

impl PegController {
    /// Create a controller; every target is validated
    pub fn new(config: PegControllerConfig, operator: Address) -> Result<Self> {
        config.validate()?;
        if operator.is_zero() {
            return Err(Error::ZeroAddress("peg operator".into()));
        }
        Ok(Self { config, operator })
    }

    /// Settings
    pub fn config(&self) -> &PegControllerConfig {
        &self.config
    }

    /// Identity that signs corrective trades
    pub fn operator(&self) -> Address {
        self.operator
    }

    /// Read the (token, stablecoin) pool for `target`
    pub fn pool_state(&self, protocol: &Protocol, target: &PegTarget) -> Result<PoolState> {
        let stable = protocol.stable_token();
        let pool = protocol
            .registry()
            .require_pair(target.token, stable)?
            .snapshot()?;
        Ok(PoolState {
            token_reserve: pool.reserve_of(&target.token)?,
            stable_reserve: pool.reserve_of(&stable)?,
            swap_fee_bps: pool.fees().swap_fee_bps,
        })
    }

    /// Run one pass over every target
    pub fn run_cycle(&self, protocol: &mut Protocol, ctx: &BlockContext) -> Result<CycleReport> {
        let op_ctx = ctx.with_caller(self.operator);
        let mut report = CycleReport {
            block_number: ctx.block_number,
            timestamp: ctx.timestamp,
            symbols: Vec::with_capacity(self.config.targets.len()),
        };

        for target in &self.config.targets {
            let outcome = match self.correct(protocol, &op_ctx, target) {
                Ok(outcome) => outcome,
                Err(err) if self.config.strict => {
                    tracing::error!(symbol = %target.symbol, error = %err, "strict mode: cycle aborted");
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(symbol = %target.symbol, error = %err, "correction failed");
                    SymbolOutcome::Failed(err)
                }
            };
            if let SymbolOutcome::Skipped(reason) = &outcome {
                tracing::debug!(symbol = %target.symbol, %reason, "symbol skipped");
            }
            report.symbols.push(SymbolReport {
                symbol: target.symbol.clone(),
                outcome,
            });
        }

        tracing::info!(
            block = ctx.block_number,
            traded = report.traded(),
            skipped = report.skipped(),
            failed = report.failed(),
            "peg cycle complete"
        );
        Ok(report)
    }

    fn correct(
        &self,
        protocol: &mut Protocol,
        ctx: &BlockContext,
        target: &PegTarget,
    ) -> Result<SymbolOutcome> {
        let state = self.pool_state(protocol, target)?;
        let plan = match plan_correction(target, &state)? {
            PegDecision::Act(plan) => plan,
            PegDecision::Skip(reason) => return Ok(SymbolOutcome::Skipped(reason)),
        };

        let stable = protocol.stable_token();
        let (asset_in, asset_out) = match plan.side {
            CorrectionSide::SellToken => (target.token, stable),
            CorrectionSide::SellStable => (stable, target.token),
        };

        let mut available = protocol.ledger().balance_of(&asset_in, &self.operator);
        if available < plan.amount_in {
            let shortfall = plan.amount_in - available;
            let sourced = match plan.side {
                CorrectionSide::SellStable => self.source_stable(protocol, ctx, shortfall, Some(target.token)),
                CorrectionSide::SellToken => self.source_token(protocol, ctx, target.token, shortfall),
            };
            match sourced {
                Err(err) if self.config.strict => return Err(err),
                Err(err) => tracing::warn!(symbol = %target.symbol, error = %err, "sourcing failed"),
                Ok(()) => {}
            }
            available = protocol.ledger().balance_of(&asset_in, &self.operator);
        }

        let mut amount_in = plan.amount_in;
        let mut expected_out = plan.expected_out;
        if available < amount_in {
            if !self.config.partial_fill || available == 0 || available < target.min_action_amount {
                return Ok(SymbolOutcome::Skipped(SkipReason::InsufficientBalance {
                    required: amount_in,
                    available,
                }));
            }
            amount_in = available;
            expected_out = protocol
                .router()
                .get_amounts_out(protocol.registry(), amount_in, &[asset_in, asset_out])?
                .last()
                .copied()
                .unwrap_or(0);
        }

        let min_out = apply_haircut(expected_out, target.slippage_bps)?;
        let deadline = safe_add(ctx.timestamp as u128, self.config.trade_deadline_secs as u128)?;
        let deadline = u64::try_from(deadline).unwrap_or(u64::MAX);
        let receipt = protocol.swap_exact_tokens_for_tokens(
            ctx,
            amount_in,
            min_out,
            &[asset_in, asset_out],
            self.operator,
            deadline,
        )?;

        tracing::info!(
            symbol = %target.symbol,
            side = %plan.side,
            deviation_bps = plan.deviation_bps as i64,
            amount_in,
            amount_out = receipt.amount_out(),
            "corrective trade executed"
        );
        Ok(SymbolOutcome::Traded {
            side: plan.side,
            deviation_bps: plan.deviation_bps,
            amount_in,
            amount_out: receipt.amount_out(),
            partial: amount_in < plan.amount_in,
        })
    }

    /// Mint `shortfall` plus the buffer, preferring `preferred` then the fallback list
    fn source_stable(
        &self,
        protocol: &mut Protocol,
        ctx: &BlockContext,
        shortfall: u128,
        preferred: Option<Address>,
    ) -> Result<()> {
        let stable = protocol.stable_token();
        let wanted = safe_add(shortfall, apply_bps(shortfall, self.config.mint_buffer_bps)?)?;
        let start = protocol.ledger().balance_of(&stable, &self.operator);
        let goal = safe_add(start, wanted)?;

        let candidates = preferred
            .into_iter()
            .chain(self.config.fallback_collateral.iter().copied());
        let mut last_err = None;
        for collateral in candidates {
            let held = protocol.ledger().balance_of(&stable, &self.operator);
            if held >= goal {
                break;
            }
            if protocol.issuance().collateral_config(&collateral).map(|c| c.enabled) != Some(true) {
                continue;
            }
            let result = protocol
                .issuance()
                .quote_collateral_for_mint(&collateral, goal - held, ctx.timestamp)
                .and_then(|needed| {
                    let owned = protocol.ledger().balance_of(&collateral, &self.operator);
                    let amount = needed.min(owned);
                    if amount == 0 {
                        return Err(Error::InsufficientBalance {
                            token: collateral.to_hex(),
                            required: needed,
                            available: 0,
                        });
                    }
                    protocol.mint_with_collateral(ctx, collateral, amount, 0, self.operator)
                });
            match result {
                Ok(receipt) => tracing::debug!(
                    collateral = %collateral.short(),
                    minted = receipt.stable_amount,
                    "stablecoin sourced by mint"
                ),
                Err(err) => {
                    tracing::debug!(collateral = %collateral.short(), error = %err, "mint source unavailable");
                    last_err = Some(err);
                }
            }
        }

        let held = protocol.ledger().balance_of(&stable, &self.operator);
        if held >= safe_add(start, shortfall)? {
            Ok(())
        } else {
            Err(last_err.unwrap_or(Error::InsufficientBalance {
                token: stable.to_hex(),
                required: safe_add(start, shortfall)?,
                available: held,
            }))
        }
    }

    /// Burn stablecoin for `shortfall` of `token`, minting the stablecoin first if needed
    fn source_token(
        &self,
        protocol: &mut Protocol,
        ctx: &BlockContext,
        token: Address,
        shortfall: u128,
    ) -> Result<()> {
        let stable = protocol.stable_token();
        let burn = protocol
            .issuance()
            .quote_stable_for_collateral(&token, shortfall, ctx.timestamp)?;
        let held = protocol.ledger().balance_of(&stable, &self.operator);
        if held < burn {
            // Minting against the token being bought back would be circular
            self.source_stable(protocol, ctx, burn - held, None)?;
        }
        let receipt = protocol.burn_for_collateral(ctx, token, burn, shortfall, self.operator)?;
        tracing::debug!(
            token = %token.short(),
            burned = burn,
            received = receipt.collateral_amount,
            "token sourced by burn"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{CollateralConfig, EngineConfig};
    use crate::oracle::PriceFeed;
    use crate::utils::constants::WAD;
    use std::sync::Arc;

    struct Env {
        protocol: Protocol,
        gov: BlockContext,
        operator: Address,
        weth: Address,
        usdc: Address,
    }

    /// WETH/mUSD pool at `stable` mUSD per 10,000 WETH, target price 1
    fn env(stable: u128) -> Env {
        let gov = Address::from_label("gov");
        let musd = Address::from_label("musd");
        let weth = Address::from_label("weth");
        let usdc = Address::from_label("usdc");
        let feed = Arc::new(PriceFeed::new());
        feed.set_price(weth, WAD, 1_000).unwrap();
        feed.set_price(usdc, WAD, 1_000).unwrap();

        let mut protocol = Protocol::new(&EngineConfig::default(), gov, musd, feed).unwrap();
        let gov_ctx = BlockContext::new(1, 1_000, gov);
        let lp = BlockContext::new(1, 1_000, Address::from_label("lp"));
        protocol.ledger_mut().mint(weth, lp.caller, 200_000 * WAD).unwrap();
        protocol.ledger_mut().mint(musd, lp.caller, 100_000 * WAD).unwrap();
        protocol
            .add_liquidity(&lp, weth, musd, 10_000 * WAD, stable * WAD, 0, 0, 2_000)
            .unwrap();
        for token in [weth, usdc] {
            let decimals = if token == usdc { 6 } else { 18 };
            protocol
                .issuance_mut()
                .configure_collateral(&gov_ctx, token, CollateralConfig::enabled(decimals, WAD / 2, WAD * 2))
                .unwrap();
        }
        // Back the seeded supply at 150%
        protocol.deposit_reserve(&lp, weth, 150_000 * WAD).unwrap();
        Env {
            protocol,
            gov: gov_ctx,
            operator: Address::from_label("keeper"),
            weth,
            usdc,
        }
    }

    fn controller(operator: Address, weth: Address, tweak: impl FnOnce(&mut PegControllerConfig)) -> PegController {
        let mut config = PegControllerConfig::default();
        config.targets.push(PegTarget::new("WETH", weth, WAD));
        tweak(&mut config);
        PegController::new(config, operator).unwrap()
    }

    #[test]
    fn test_within_band_no_trade() {
        let mut e = env(10_050);
        let c = controller(e.operator, e.weth, |_| {});
        let report = c.run_cycle(&mut e.protocol, &e.gov.advance(1, 10)).unwrap();
        assert_eq!(report.skipped(), 1);
        assert!(matches!(report.outcome("WETH"), Some(SymbolOutcome::Skipped(SkipReason::WithinBand { .. }))));
    }

    #[test]
    fn test_overvalued_trades_held_token() {
        let mut e = env(10_500);
        e.protocol.ledger_mut().mint(e.weth, e.operator, 1_000 * WAD).unwrap();
        let c = controller(e.operator, e.weth, |_| {});
        let before = c.pool_state(&e.protocol, &c.config().targets[0]).unwrap().implied_price().unwrap();
        let report = c.run_cycle(&mut e.protocol, &e.gov.advance(1, 10)).unwrap();
        assert_eq!(report.traded(), 1);
        let after = c.pool_state(&e.protocol, &c.config().targets[0]).unwrap().implied_price().unwrap();
        assert!(after < before);
        assert!(after > WAD);
    }

    #[test]
    fn test_undervalued_sources_stable_by_mint() {
        let mut e = env(9_500);
        e.protocol.ledger_mut().mint(e.usdc, e.operator, 1_000_000 * 1_000_000).unwrap();
        let c = controller(e.operator, e.weth, |cfg| cfg.fallback_collateral = vec![e.usdc]);
        let report = c.run_cycle(&mut e.protocol, &e.gov.advance(1, 10)).unwrap();
        assert!(matches!(
            report.outcome("WETH"),
            Some(SymbolOutcome::Traded { side: CorrectionSide::SellStable, partial: false, .. })
        ));
        assert!(e.protocol.issuance().collateral_balance(&e.usdc) > 0);
    }

    #[test]
    fn test_overvalued_sources_token_by_burn() {
        let mut e = env(10_500);
        // Seed the vault with WETH the burn can pay out
        let whale = BlockContext::new(1, 1_000, Address::from_label("whale"));
        e.protocol.ledger_mut().mint(e.weth, whale.caller, 1_000 * WAD).unwrap();
        e.protocol
            .mint_with_collateral(&whale, e.weth, 1_000 * WAD, 0, whale.caller)
            .unwrap();
        e.protocol.ledger_mut().mint(e.usdc, e.operator, 1_000_000 * 1_000_000).unwrap();

        let vault_weth = e.protocol.issuance().collateral_balance(&e.weth);

        let c = controller(e.operator, e.weth, |cfg| cfg.fallback_collateral = vec![e.usdc]);
        let report = c.run_cycle(&mut e.protocol, &e.gov.advance(1, 10)).unwrap();
        assert!(matches!(
            report.outcome("WETH"),
            Some(SymbolOutcome::Traded { side: CorrectionSide::SellToken, partial: false, .. })
        ));
        assert!(e.protocol.issuance().collateral_balance(&e.weth) < vault_weth);
        assert!(e.protocol.issuance().collateral_balance(&e.usdc) > 0);
        assert!(!e.protocol.issuance().is_paused());
    }

    #[test]
    fn test_sourcing_failure_skips_or_aborts_in_strict_mode() {
        let mut e = env(10_500);

        let tolerant = controller(e.operator, e.weth, |_| {});
        let report = tolerant.run_cycle(&mut e.protocol, &e.gov.advance(1, 10)).unwrap();
        assert!(matches!(
            report.outcome("WETH"),
            Some(SymbolOutcome::Skipped(SkipReason::InsufficientBalance { available: 0, .. }))
        ));

        let strict = controller(e.operator, e.weth, |cfg| cfg.strict = true);
        let before = e.protocol.ledger().state_hash();
        assert!(matches!(
            strict.run_cycle(&mut e.protocol, &e.gov.advance(2, 20)),
            Err(Error::InsufficientBalance { .. })
        ));
        assert_eq!(e.protocol.ledger().state_hash(), before);
    }

    #[test]
    fn test_unsourceable_skips_or_partially_fills() {
        let mut e = env(10_500);
        e.protocol.ledger_mut().mint(e.weth, e.operator, 10 * WAD).unwrap();

        let c = controller(e.operator, e.weth, |_| {});
        let report = c.run_cycle(&mut e.protocol, &e.gov.advance(1, 10)).unwrap();
        assert!(matches!(
            report.outcome("WETH"),
            Some(SymbolOutcome::Skipped(SkipReason::InsufficientBalance { .. }))
        ));

        let partial = controller(e.operator, e.weth, |cfg| cfg.partial_fill = true);
        let report = partial.run_cycle(&mut e.protocol, &e.gov.advance(2, 20)).unwrap();
        assert!(matches!(
            report.outcome("WETH"),
            Some(SymbolOutcome::Traded { amount_in, partial: true, .. }) if *amount_in == 10 * WAD
        ));
    }

    #[test]
    fn test_missing_pool_fails_symbol_or_aborts_in_strict_mode() {
        let mut e = env(10_500);
        let dai = Address::from_label("dai");
        let tolerant = controller(e.operator, e.weth, |cfg| {
            cfg.targets.insert(0, PegTarget::new("DAI", dai, WAD));
        });
        let report = tolerant.run_cycle(&mut e.protocol, &e.gov.advance(1, 10)).unwrap();
        assert!(matches!(report.outcome("DAI"), Some(SymbolOutcome::Failed(Error::PairNotFound(_)))));
        assert_eq!(report.symbols.len(), 2);

        let strict = controller(e.operator, e.weth, |cfg| {
            cfg.targets.insert(0, PegTarget::new("DAI", dai, WAD));
            cfg.strict = true;
        });
        assert!(matches!(
            strict.run_cycle(&mut e.protocol, &e.gov.advance(1, 10)),
            Err(Error::PairNotFound(_))
        ));
    }
}
