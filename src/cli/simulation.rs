//! In-memory deployment for `musd-keeper simulate`.
//!
//! Builds a [`Protocol`] from a [`KeeperConfig`], seeds its pools and
//! balances, and runs a [`PegKeeper`] over simulated blocks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cli::config::{KeeperConfig, MarketSeed};
use crate::core::address::Address;
use crate::core::context::BlockContext;
use crate::error::{Error, Result};
use crate::oracle::PriceFeed;
use crate::peg::controller::{CycleReport, PegController};
use crate::peg::keeper::{AtomicKillSwitch, FileKillSwitch, KillSwitch, PegKeeper, StopReason, TickOutcome};
use crate::peg::planner::PoolState;
use crate::protocol::engine::Protocol;
use crate::utils::math::{deviation_bps, safe_add, safe_sub};

// ═══════════════════════════════════════════════════════════════════════════════
// REPORTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Pool state of one market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Symbol
    pub symbol: String,
    /// Pool reserves
    pub pool: PoolState,
    /// Implied price (E18, raw units)
    pub price: u128,
    /// Peg target, if the market is stabilized
    pub target_price: Option<u128>,
    /// Deviation from the target
    pub deviation_bps: Option<i128>,
}

/// Everything `simulate` prints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationReport {
    /// Markets before the first cycle
    pub before: Vec<MarketSnapshot>,
    /// Reports of the cycles that ran
    pub cycles: Vec<CycleReport>,
    /// Cycles strict mode aborted, with the error message
    pub aborted: Vec<(u64, String)>,
    /// Why the keeper stopped
    pub stop_reason: Option<StopReason>,
    /// Markets after the last cycle
    pub after: Vec<MarketSnapshot>,
    /// Issuance collateral ratio at the end
    pub collateral_ratio_bps: Option<u128>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SIMULATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Seeded deployment plus the clock that drives it
#[derive(Debug)]
pub struct Simulation {
    config: KeeperConfig,
    protocol: Protocol,
    feed: Arc<PriceFeed>,
    ctx: BlockContext,
}

impl Simulation {
    /// Build and seed a deployment
    pub fn build(config: &KeeperConfig) -> Result<Self> {
        config.validate()?;
        let sim = &config.simulation;
        let governance = sim.governance_address();
        let stable = sim.stable_address();
        let lp = sim.liquidity_provider_address();
        let operator = sim.operator_address();

        let feed = Arc::new(PriceFeed::new());
        let mut engine = config.engine.clone();
        engine.peg = config.peg_config();
        let mut protocol = Protocol::new(&engine, governance, stable, feed.clone())?;

        let gov = BlockContext::new(1, sim.start_timestamp, governance);
        for market in &sim.markets {
            let token = market.address();
            protocol
                .ledger_mut()
                .register(token, market.symbol.clone(), market.decimals);
            feed.set_price(token, market.oracle_price, gov.timestamp)?;
            if let Some(collateral) = market.collateral_config() {
                protocol.issuance_mut().configure_collateral(&gov, token, collateral)?;
            }
        }

        let mut simulation = Self {
            config: config.clone(),
            protocol,
            feed,
            ctx: gov.with_caller(operator),
        };

        let stable_needed = sim
            .markets
            .iter()
            .try_fold(sim.operator_stable_balance, |acc, m| safe_add(acc, m.stable_reserve))?;
        simulation.fund_stable(lp, stable_needed)?;
        if sim.operator_stable_balance > 0 {
            let lp_ctx = simulation.ctx.with_caller(lp);
            simulation.protocol.ledger_mut().transfer(
                stable,
                lp_ctx.caller,
                operator,
                sim.operator_stable_balance,
            )?;
        }

        for market in &sim.markets {
            let token = market.address();
            let lp_ctx = simulation.ctx.with_caller(lp);
            simulation.protocol.ledger_mut().mint(token, lp, market.token_reserve)?;
            simulation.protocol.add_liquidity(
                &lp_ctx,
                token,
                stable,
                market.token_reserve,
                market.stable_reserve,
                0,
                0,
                lp_ctx.timestamp,
            )?;
            if market.operator_balance > 0 {
                simulation
                    .protocol
                    .ledger_mut()
                    .mint(token, operator, market.operator_balance)?;
            }
        }

        tracing::info!(
            markets = sim.markets.len(),
            stable_supply = simulation.protocol.ledger().total_supply(&stable),
            "simulation seeded"
        );
        Ok(simulation)
    }

    /// Mint `amount` stablecoin to `holder` through issuance, one block at a time
    ///
    /// Without collateral markets the stablecoin is credited directly and the
    /// deployment starts unbacked.
    fn fund_stable(&mut self, holder: Address, amount: u128) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let backing = self
            .config
            .simulation
            .markets
            .iter()
            .find(|m| m.collateral.is_some())
            .map(MarketSeed::address);
        let stable = self.protocol.stable_token();
        let Some(collateral) = backing else {
            tracing::warn!("no collateral market, stablecoin seeded unbacked");
            return self.protocol.ledger_mut().mint(stable, holder, amount);
        };

        // headroom for the rounding surplus of each mint
        let cap = self.protocol.issuance().config().max_mint_per_block;
        let per_block = cap - cap / 100;
        if per_block == 0 {
            return Err(Error::InvalidParameter {
                name: "max_mint_per_block".into(),
                reason: "too small to seed the simulation".into(),
            });
        }
        let mut remaining = amount;
        while remaining > 0 {
            let chunk = remaining.min(per_block);
            let ctx = self.ctx.with_caller(holder);
            let needed = self
                .protocol
                .issuance()
                .quote_collateral_for_mint(&collateral, chunk, ctx.timestamp)?;
            self.protocol.ledger_mut().mint(collateral, holder, needed)?;
            let receipt = self
                .protocol
                .mint_with_collateral(&ctx, collateral, needed, chunk, holder)?;
            remaining = remaining.saturating_sub(receipt.stable_amount);
            self.ctx = self.ctx.advance(1, 0);
        }
        // minting rounds in the holder's favour
        let balance = self.protocol.ledger().balance_of(&stable, &holder);
        if balance < amount {
            return Err(Error::InsufficientBalance {
                token: stable.to_hex(),
                required: amount,
                available: balance,
            });
        }
        Ok(())
    }

    /// Deployment
    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Mutable deployment
    pub fn protocol_mut(&mut self) -> &mut Protocol {
        &mut self.protocol
    }

    /// Context of the latest simulated block
    pub fn context(&self) -> BlockContext {
        self.ctx
    }

    /// Advance one block and refresh every oracle price
    pub fn next_context(&mut self) -> Result<BlockContext> {
        Self::step(&mut self.ctx, &self.feed, &self.config)
    }

    fn step(ctx: &mut BlockContext, feed: &PriceFeed, config: &KeeperConfig) -> Result<BlockContext> {
        *ctx = ctx.advance(1, config.simulation.block_time_secs);
        for market in &config.simulation.markets {
            feed.set_price(market.address(), market.oracle_price, ctx.timestamp)?;
        }
        Ok(*ctx)
    }

    /// Keeper for the configured operator, kill switch and loop settings
    pub fn keeper(&self) -> Result<PegKeeper> {
        let controller = PegController::new(
            self.config.peg_config(),
            self.config.simulation.operator_address(),
        )?;
        let kill_switch: Box<dyn KillSwitch> = match &self.config.kill_switch_file {
            Some(path) => Box::new(FileKillSwitch::new(path)),
            None => Box::new(AtomicKillSwitch::new()),
        };
        PegKeeper::new(controller, self.config.keeper.clone(), kill_switch)
    }

    /// Current state of every seeded market
    pub fn snapshot(&self) -> Result<Vec<MarketSnapshot>> {
        let stable = self.protocol.stable_token();
        let peg = self.config.peg_config();
        self.config
            .simulation
            .markets
            .iter()
            .map(|market| {
                let token = market.address();
                let pool = self.protocol.registry().require_pair(token, stable)?.snapshot()?;
                let state = PoolState {
                    token_reserve: pool.reserve_of(&token)?,
                    stable_reserve: pool.reserve_of(&stable)?,
                    swap_fee_bps: pool.fees().swap_fee_bps,
                };
                let price = if state.token_reserve == 0 {
                    0
                } else {
                    state.implied_price()?
                };
                let target_price = peg
                    .targets
                    .iter()
                    .find(|t| t.token == token)
                    .map(|t| t.target_price);
                let deviation_bps = match target_price {
                    Some(target) if price > 0 => Some(deviation_bps(price, target)?),
                    _ => None,
                };
                Ok(MarketSnapshot {
                    symbol: market.symbol.clone(),
                    pool: state,
                    price,
                    target_price,
                    deviation_bps,
                })
            })
            .collect()
    }

    /// Run the keeper until it stops
    ///
    /// Without `max_cycles`, a kill switch or a failure streak the loop
    /// runs until the process is interrupted.
    pub async fn run(&mut self) -> Result<SimulationReport> {
        let mut keeper = self.keeper()?;
        let mut report = SimulationReport {
            before: self.snapshot()?,
            ..Default::default()
        };

        let Self {
            config,
            protocol,
            feed,
            ctx,
        } = self;
        let mut clock_error = None;
        let stop = keeper
            .run_observed(
                protocol,
                || match Self::step(ctx, feed, config) {
                    Ok(next) => next,
                    Err(err) => {
                        clock_error.get_or_insert(err);
                        *ctx
                    }
                },
                |ctx, outcome| match outcome {
                    TickOutcome::Ran(cycle) => report.cycles.push(cycle.clone()),
                    TickOutcome::Aborted(err) => report.aborted.push((ctx.block_number, err.to_string())),
                    TickOutcome::CoolingDown { .. } | TickOutcome::Stopped(_) => {}
                },
            )
            .await;
        if let Some(err) = clock_error {
            return Err(err);
        }

        report.stop_reason = Some(stop);
        report.after = self.snapshot()?;
        report.collateral_ratio_bps = self.protocol.collateral_ratio_bps(&self.ctx)?;
        Ok(report)
    }

    /// Net token and stablecoin change of the operator since `before`
    pub fn operator_delta(&self, token: &Address, before: u128) -> Result<i128> {
        let now = self
            .protocol
            .ledger()
            .balance_of(token, &self.config.simulation.operator_address());
        let magnitude = if now >= before {
            safe_sub(now, before)?
        } else {
            safe_sub(before, now)?
        };
        let signed = i128::try_from(magnitude).map_err(|_| Error::Overflow {
            operation: "operator delta".into(),
        })?;
        Ok(if now >= before { signed } else { -signed })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
