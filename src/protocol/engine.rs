//! Protocol engine - composition root.
//!
//! Owns the token ledger and wires the registry, router, issuance module
//! and treasury to one event bus and one oracle. User-facing calls go
//! through here so that protocol fees paid by a swap are reported to the
//! treasury callback on behalf of the pool that paid them.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::amm::pool::FeeAccrual;
use crate::amm::registry::Registry;
use crate::amm::router::{LiquidityOutcome, Router, SwapReceipt};
use crate::core::address::Address;
use crate::core::config::EngineConfig;
use crate::core::context::BlockContext;
use crate::core::token::TokenLedger;
use crate::error::Result;
use crate::issuance::module::{IssuanceModule, IssuanceReceipt};
use crate::oracle::PriceOracle;
use crate::protocol::events::{EventBus, EventRecord};
use crate::treasury::collector::{HarvestReceipt, Treasury};
use crate::treasury::distribution::DistributionSplit;
use crate::utils::constants::STABLE_DECIMALS;

/// Symbol registered for the issued stablecoin
pub const STABLE_SYMBOL: &str = "mUSD";

// ═══════════════════════════════════════════════════════════════════════════════
// PROTOCOL
// ═══════════════════════════════════════════════════════════════════════════════

/// All components of one deployment
#[derive(Debug)]
pub struct Protocol {
    ledger: TokenLedger,
    registry: Registry,
    router: Router,
    issuance: IssuanceModule,
    treasury: Treasury,
    oracle: Arc<dyn PriceOracle>,
    bus: EventBus,
    governance: Address,
}

impl Protocol {
    /// Build a deployment from validated configuration
    pub fn new(
        config: &EngineConfig,
        governance: Address,
        stable_token: Address,
        oracle: Arc<dyn PriceOracle>,
    ) -> Result<Self> {
        config.validate()?;
        let bus = EventBus::default();
        let genesis = BlockContext::new(0, 0, governance);

        let mut ledger = TokenLedger::new();
        ledger.register(stable_token, STABLE_SYMBOL, STABLE_DECIMALS);

        let mut registry = Registry::new(governance, config.fees, bus.clone())?;
        let router = Router::with_max_path_length(bus.clone(), config.max_path_length)?;
        let issuance = IssuanceModule::new(
            stable_token,
            governance,
            config.issuance,
            oracle.clone(),
            bus.clone(),
        )?;
        let mut treasury = Treasury::new(stable_token, governance, config.harvest, bus.clone())?;
        if let Some(distribution) = config.treasury {
            treasury.set_distribution_config(&genesis, distribution)?;
        }
        registry.set_treasury(&genesis, treasury.address())?;

        tracing::info!(
            stable = %stable_token,
            governance = %governance,
            treasury = %treasury.address(),
            "protocol initialized"
        );
        Ok(Self {
            ledger,
            registry,
            router,
            issuance,
            treasury,
            oracle,
            bus,
            governance,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Token balances
    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    /// Token balances, for funding accounts outside any protocol call
    pub fn ledger_mut(&mut self) -> &mut TokenLedger {
        &mut self.ledger
    }

    /// Pair registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Pair registry, for governance calls
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Router
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Issuance module
    pub fn issuance(&self) -> &IssuanceModule {
        &self.issuance
    }

    /// Issuance module, for governance calls
    pub fn issuance_mut(&mut self) -> &mut IssuanceModule {
        &mut self.issuance
    }

    /// Treasury
    pub fn treasury(&self) -> &Treasury {
        &self.treasury
    }

    /// Treasury, for governance calls
    pub fn treasury_mut(&mut self) -> &mut Treasury {
        &mut self.treasury
    }

    /// Injected price oracle
    pub fn oracle(&self) -> &Arc<dyn PriceOracle> {
        &self.oracle
    }

    /// Event bus shared by every component
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Subscribe to the outbound event stream
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.bus.subscribe()
    }

    /// Issued stablecoin
    pub fn stable_token(&self) -> Address {
        self.issuance.stable_token()
    }

    /// Governance identity set at construction
    pub fn governance(&self) -> Address {
        self.governance
    }

    /// Set the router path limit
    pub fn set_max_path_length(&mut self, ctx: &BlockContext, max_path_length: usize) -> Result<()> {
        self.router
            .set_max_path_length(&self.registry, ctx, max_path_length)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // AMM
    // ═══════════════════════════════════════════════════════════════════════════

    /// Exact-input swap; protocol fees are reported to the treasury
    #[allow(clippy::too_many_arguments)]
    pub fn swap_exact_tokens_for_tokens(
        &mut self,
        ctx: &BlockContext,
        amount_in: u128,
        amount_out_min: u128,
        path: &[Address],
        to: Address,
        deadline: u64,
    ) -> Result<SwapReceipt> {
        let receipt = self.router.swap_exact_tokens_for_tokens(
            &self.registry,
            &mut self.ledger,
            ctx,
            amount_in,
            amount_out_min,
            path,
            to,
            deadline,
        )?;
        self.forward_fees(ctx, &receipt.fees);
        Ok(receipt)
    }

    /// Exact-output swap; protocol fees are reported to the treasury
    #[allow(clippy::too_many_arguments)]
    pub fn swap_tokens_for_exact_tokens(
        &mut self,
        ctx: &BlockContext,
        amount_out: u128,
        amount_in_max: u128,
        path: &[Address],
        to: Address,
        deadline: u64,
    ) -> Result<SwapReceipt> {
        let receipt = self.router.swap_tokens_for_exact_tokens(
            &self.registry,
            &mut self.ledger,
            ctx,
            amount_out,
            amount_in_max,
            path,
            to,
            deadline,
        )?;
        self.forward_fees(ctx, &receipt.fees);
        Ok(receipt)
    }

    fn forward_fees(&mut self, ctx: &BlockContext, fees: &[FeeAccrual]) {
        let treasury = self.treasury.address();
        for fee in fees.iter().filter(|f| f.treasury == treasury) {
            let pool_ctx = ctx.with_caller(fee.pair);
            // The swap has committed; a rejected callback only loses the accounting entry
            if let Err(err) = self
                .treasury
                .on_fee_received(&self.registry, &pool_ctx, fee.token, fee.amount)
            {
                tracing::warn!(pair = %fee.pair, error = %err, "fee callback rejected");
            }
        }
    }

    /// Add liquidity, creating the pair when missing
    #[allow(clippy::too_many_arguments)]
    pub fn add_liquidity(
        &mut self,
        ctx: &BlockContext,
        token_a: Address,
        token_b: Address,
        amount_a_desired: u128,
        amount_b_desired: u128,
        amount_a_min: u128,
        amount_b_min: u128,
        deadline: u64,
    ) -> Result<LiquidityOutcome> {
        self.router.add_liquidity(
            &mut self.registry,
            &mut self.ledger,
            ctx,
            token_a,
            token_b,
            amount_a_desired,
            amount_b_desired,
            amount_a_min,
            amount_b_min,
            deadline,
        )
    }

    /// Remove liquidity
    #[allow(clippy::too_many_arguments)]
    pub fn remove_liquidity(
        &mut self,
        ctx: &BlockContext,
        token_a: Address,
        token_b: Address,
        shares: u128,
        amount_a_min: u128,
        amount_b_min: u128,
        to: Address,
        deadline: u64,
    ) -> Result<LiquidityOutcome> {
        self.router.remove_liquidity(
            &self.registry,
            &mut self.ledger,
            ctx,
            token_a,
            token_b,
            shares,
            amount_a_min,
            amount_b_min,
            to,
            deadline,
        )
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ISSUANCE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Mint stablecoin against collateral
    pub fn mint_with_collateral(
        &mut self,
        ctx: &BlockContext,
        token: Address,
        collateral_amount: u128,
        min_out: u128,
        recipient: Address,
    ) -> Result<IssuanceReceipt> {
        self.issuance.mint_with_collateral(
            &mut self.ledger,
            ctx,
            token,
            collateral_amount,
            min_out,
            recipient,
        )
    }

    /// Burn stablecoin for collateral
    pub fn burn_for_collateral(
        &mut self,
        ctx: &BlockContext,
        token: Address,
        stable_amount: u128,
        min_collateral_out: u128,
        recipient: Address,
    ) -> Result<IssuanceReceipt> {
        self.issuance.burn_for_collateral(
            &mut self.ledger,
            ctx,
            token,
            stable_amount,
            min_collateral_out,
            recipient,
        )
    }

    /// Collateralization ratio at `ctx`'s timestamp
    pub fn collateral_ratio_bps(&self, ctx: &BlockContext) -> Result<Option<u128>> {
        self.issuance
            .get_collateral_ratio_bps(&self.ledger, ctx.timestamp)
    }

    /// Permissionless breaker check
    pub fn check_and_trip_circuit_breaker(&mut self, ctx: &BlockContext) -> Result<bool> {
        self.issuance
            .check_and_trip_circuit_breaker(&self.ledger, ctx)
    }

    /// Governance breaker reset
    pub fn reset_circuit_breaker(&mut self, ctx: &BlockContext) -> Result<()> {
        self.issuance.reset_circuit_breaker(&self.ledger, ctx)
    }

    /// Donate collateral to the reserve
    pub fn deposit_reserve(&mut self, ctx: &BlockContext, token: Address, amount: u128) -> Result<()> {
        self.issuance
            .deposit_reserve(&mut self.ledger, ctx, token, amount)
    }

    /// Operator reserve withdrawal
    pub fn withdraw_reserve(
        &mut self,
        ctx: &BlockContext,
        token: Address,
        amount: u128,
        to: Address,
    ) -> Result<()> {
        self.issuance
            .withdraw_reserve(&mut self.ledger, ctx, token, amount, to)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TREASURY
    // ═══════════════════════════════════════════════════════════════════════════

    /// Permissionless fee harvest into the stablecoin
    pub fn harvest_and_convert(
        &mut self,
        ctx: &BlockContext,
        token_in: Address,
        amount_in: u128,
        min_out: u128,
        deadline: u64,
        path: &[Address],
    ) -> Result<HarvestReceipt> {
        self.treasury.harvest_and_convert(
            &self.registry,
            &self.router,
            &mut self.ledger,
            ctx,
            token_in,
            amount_in,
            min_out,
            deadline,
            path,
        )
    }

    /// Permissionless distribution of treasury stablecoin
    pub fn distribute_musd(&mut self, ctx: &BlockContext, amount: u128) -> Result<DistributionSplit> {
        self.treasury
            .distribute_musd(&mut self.ledger, ctx, amount)
    }
}
