//! Pool Engine.
//!
//! Per-pair constant-product state and the three mutating operations:
//! swap, add liquidity and remove liquidity. Reserves mirror the pool's
//! balances in the [`TokenLedger`], so every operation moves real balances
//! and updates the recorded reserves together.
//!
//! A [`PoolHandle`] wraps each pool in a mutex that is acquired with
//! `try_lock`: a nested call that reaches a pool already in use fails with
//! [`Error::Locked`] instead of observing half-updated reserves. The guard
//! is a scoped value, so it is released on every exit path.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError};

use crate::core::address::{Address, PairKey};
use crate::core::config::FeeConfig;
use crate::core::token::TokenLedger;
use crate::error::{Error, Result};
use crate::protocol::events::{EventLog, ProtocolEvent};
use crate::utils::constants::{BPS_DIVISOR, MINIMUM_LIQUIDITY, WAD};
use crate::utils::math::{apply_bps, mul_div, safe_add, safe_sub, sqrt_product, wide_mul};
use crate::utils::validation::{validate_min_out, validate_non_zero};

// ═══════════════════════════════════════════════════════════════════════════════
// PRICING
// ═══════════════════════════════════════════════════════════════════════════════

/// Output for an exact input:
/// `floor(in*(BPS-fee)*rOut / (rIn*BPS + in*(BPS-fee)))`
pub fn get_amount_out(amount_in: u128, reserve_in: u128, reserve_out: u128, fee_bps: u64) -> Result<u128> {
    validate_non_zero(amount_in)?;
    if reserve_in == 0 || reserve_out == 0 {
        return Err(Error::InsufficientLiquidity {
            reserve_in,
            reserve_out,
        });
    }
    let fee_keep = U256::from(BPS_DIVISOR - fee_bps as u128);
    let in_with_fee = U256::from(amount_in) * fee_keep;
    let numerator = in_with_fee * U256::from(reserve_out);
    let denominator = U256::from(reserve_in) * U256::from(BPS_DIVISOR) + in_with_fee;
    // Output is strictly below reserve_out, so it fits
    Ok((numerator / denominator).low_u128())
}

/// Input required for an exact output:
/// `floor(rIn*out*BPS / ((rOut-out)*(BPS-fee))) + 1`
pub fn get_amount_in(amount_out: u128, reserve_in: u128, reserve_out: u128, fee_bps: u64) -> Result<u128> {
    validate_non_zero(amount_out)?;
    if reserve_in == 0 || reserve_out == 0 || amount_out >= reserve_out {
        return Err(Error::InsufficientLiquidity {
            reserve_in,
            reserve_out,
        });
    }
    let numerator = wide_mul(reserve_in, amount_out) * U256::from(BPS_DIVISOR);
    let denominator =
        U256::from(reserve_out - amount_out) * U256::from(BPS_DIVISOR - fee_bps as u128);
    let amount_in = numerator / denominator + U256::one();
    if amount_in > U256::from(u128::MAX) {
        return Err(Error::Overflow {
            operation: "get_amount_in".into(),
        });
    }
    Ok(amount_in.low_u128())
}

/// Counterpart amount at the current ratio: `amount_a * reserve_b / reserve_a`
pub fn quote(amount_a: u128, reserve_a: u128, reserve_b: u128) -> Result<u128> {
    validate_non_zero(amount_a)?;
    if reserve_a == 0 || reserve_b == 0 {
        return Err(Error::InsufficientLiquidity {
            reserve_in: reserve_a,
            reserve_out: reserve_b,
        });
    }
    mul_div(amount_a, reserve_b, reserve_a)
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED CONTROLS
// ═══════════════════════════════════════════════════════════════════════════════

/// Registry-owned switches every pool reads
#[derive(Debug, Default)]
pub struct PoolControls {
    paused: AtomicBool,
    treasury: RwLock<Option<Address>>,
}

impl PoolControls {
    /// Whether mutations are paused
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Destination for protocol fees
    pub fn treasury(&self) -> Result<Option<Address>> {
        self.treasury
            .read()
            .map(|t| *t)
            .map_err(|_| Error::Poisoned("pool controls".into()))
    }

    pub(crate) fn set_treasury(&self, treasury: Address) -> Result<()> {
        let mut slot = self
            .treasury
            .write()
            .map_err(|_| Error::Poisoned("pool controls".into()))?;
        *slot = Some(treasury);
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_paused() {
            return Err(Error::EnginePaused);
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECEIPTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Protocol fee sent to the treasury by a swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeAccrual {
    /// Pool that paid the fee
    pub pair: Address,
    /// Fee token (the swap input)
    pub token: Address,
    /// Amount transferred
    pub amount: u128,
    /// Treasury that received it
    pub treasury: Address,
}

/// Result of a single-pool swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapOutcome {
    /// Output paid to the recipient
    pub amount_out: u128,
    /// Protocol fee, when a treasury is configured and the slice is non-zero
    pub fee: Option<FeeAccrual>,
}

/// Amounts moved by a liquidity change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityReceipt {
    /// token0 moved
    pub amount0: u128,
    /// token1 moved
    pub amount1: u128,
    /// Shares minted or burned
    pub shares: u128,
}

// ═══════════════════════════════════════════════════════════════════════════════
// POOL
// ═══════════════════════════════════════════════════════════════════════════════

/// Reserve state of one pair
#[derive(Debug, Clone)]
pub struct Pool {
    key: PairKey,
    address: Address,
    reserve0: u128,
    reserve1: u128,
    total_shares: u128,
    shares: HashMap<Address, u128>,
    fees: FeeConfig,
    controls: Arc<PoolControls>,
}

impl Pool {
    /// Create an empty pool with a fee snapshot
    pub fn new(key: PairKey, fees: FeeConfig, controls: Arc<PoolControls>) -> Self {
        Self {
            key,
            address: key.pair_address(),
            reserve0: 0,
            reserve1: 0,
            total_shares: 0,
            shares: HashMap::new(),
            fees,
            controls,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // VIEWS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Canonical pair key
    pub fn key(&self) -> PairKey {
        self.key
    }

    /// Pool address
    pub fn address(&self) -> Address {
        self.address
    }

    /// `(reserve0, reserve1)`
    pub fn reserves(&self) -> (u128, u128) {
        (self.reserve0, self.reserve1)
    }

    /// `(reserve_in, reserve_out)` oriented by input token
    pub fn reserves_for(&self, token_in: &Address) -> Result<(u128, u128)> {
        if *token_in == self.key.token0() {
            Ok((self.reserve0, self.reserve1))
        } else if *token_in == self.key.token1() {
            Ok((self.reserve1, self.reserve0))
        } else {
            Err(Error::TokenNotInPair {
                token: token_in.to_hex(),
                pair: self.key.to_string(),
            })
        }
    }

    /// Reserve of `token`
    pub fn reserve_of(&self, token: &Address) -> Result<u128> {
        self.reserves_for(token).map(|(r, _)| r)
    }

    /// Fee snapshot taken at creation
    pub fn fees(&self) -> FeeConfig {
        self.fees
    }

    /// Outstanding shares, including the locked minimum
    pub fn total_shares(&self) -> u128 {
        self.total_shares
    }

    /// Shares held by `owner`
    pub fn share_balance(&self, owner: &Address) -> u128 {
        self.shares.get(owner).copied().unwrap_or(0)
    }

    /// Price of `base` in units of the other token (E18)
    pub fn spot_price(&self, base: &Address) -> Result<u128> {
        let (r_base, r_quote) = self.reserves_for(base)?;
        if r_base == 0 {
            return Err(Error::InsufficientLiquidity {
                reserve_in: r_base,
                reserve_out: r_quote,
            });
        }
        mul_div(r_quote, WAD, r_base)
    }

    /// Constant product `reserve0 * reserve1`
    pub fn k(&self) -> U256 {
        wide_mul(self.reserve0, self.reserve1)
    }

    /// Quote an exact-input swap against current reserves
    pub fn quote_out(&self, token_in: &Address, amount_in: u128) -> Result<u128> {
        let (r_in, r_out) = self.reserves_for(token_in)?;
        get_amount_out(amount_in, r_in, r_out, self.fees.swap_fee_bps)
    }

    /// Quote the input for an exact output
    pub fn quote_in(&self, token_in: &Address, amount_out: u128) -> Result<u128> {
        let (r_in, r_out) = self.reserves_for(token_in)?;
        get_amount_in(amount_out, r_in, r_out, self.fees.swap_fee_bps)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SWAP
    // ═══════════════════════════════════════════════════════════════════════════

    /// Swap an exact `amount_in` of `token_in` paid by `sender`
    pub fn swap(
        &mut self,
        ledger: &mut TokenLedger,
        sender: Address,
        token_in: Address,
        amount_in: u128,
        to: Address,
        log: &mut EventLog,
    ) -> Result<SwapOutcome> {
        self.controls.ensure_active()?;
        let token_out = self.key.other(&token_in)?;
        let (r_in, r_out) = self.reserves_for(&token_in)?;
        let amount_out = get_amount_out(amount_in, r_in, r_out, self.fees.swap_fee_bps)?;
        validate_non_zero(amount_out).map_err(|_| Error::SlippageExceeded {
            actual: 0,
            minimum: 1,
        })?;

        let treasury = self.controls.treasury()?;
        let protocol_fee = match treasury {
            Some(_) => apply_bps(amount_in, self.fees.protocol_fee_bps)?,
            None => 0,
        };

        let new_in = safe_sub(safe_add(r_in, amount_in)?, protocol_fee)?;
        let new_out = safe_sub(r_out, amount_out)?;
        if wide_mul(new_in, new_out) < wide_mul(r_in, r_out) {
            return Err(Error::InvalidParameter {
                name: "k".into(),
                reason: "constant product would decrease".into(),
            });
        }

        let available = ledger.balance_of(&token_in, &sender);
        if available < amount_in {
            return Err(Error::InsufficientBalance {
                token: token_in.to_hex(),
                required: amount_in,
                available,
            });
        }

        // Balances were checked above, so the transfers below cannot fail
        ledger.transfer(token_in, sender, self.address, amount_in)?;
        let fee = match treasury {
            Some(treasury) if protocol_fee > 0 => {
                ledger.transfer(token_in, self.address, treasury, protocol_fee)?;
                Some(FeeAccrual {
                    pair: self.address,
                    token: token_in,
                    amount: protocol_fee,
                    treasury,
                })
            }
            _ => None,
        };
        ledger.transfer(token_out, self.address, to, amount_out)?;
        self.set_reserves_for(&token_in, new_in, new_out);

        log.push(ProtocolEvent::Swap {
            pair: self.address,
            sender,
            token_in,
            amount_in,
            token_out,
            amount_out,
            to,
        });
        if let Some(accrual) = fee {
            log.push(ProtocolEvent::ProtocolFeeAccrued {
                pair: self.address,
                token: token_in,
                amount: accrual.amount,
            });
        }
        tracing::debug!(
            pair = %self.key,
            amount_in,
            amount_out,
            protocol_fee,
            "swap"
        );

        Ok(SwapOutcome { amount_out, fee })
    }

    fn set_reserves_for(&mut self, token_in: &Address, new_in: u128, new_out: u128) {
        if *token_in == self.key.token0() {
            self.reserve0 = new_in;
            self.reserve1 = new_out;
        } else {
            self.reserve1 = new_in;
            self.reserve0 = new_out;
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIQUIDITY
    // ═══════════════════════════════════════════════════════════════════════════

    /// Deposit up to the desired amounts at the current ratio
    #[allow(clippy::too_many_arguments)]
    pub fn add_liquidity(
        &mut self,
        ledger: &mut TokenLedger,
        provider: Address,
        desired0: u128,
        desired1: u128,
        min0: u128,
        min1: u128,
        log: &mut EventLog,
    ) -> Result<LiquidityReceipt> {
        self.controls.ensure_active()?;
        validate_non_zero(desired0)?;
        validate_non_zero(desired1)?;

        let (amount0, amount1) = self.optimal_amounts(desired0, desired1, min0, min1)?;

        let first_mint = self.total_shares == 0;
        let shares = if first_mint {
            let root = sqrt_product(amount0, amount1);
            if root <= MINIMUM_LIQUIDITY {
                return Err(Error::InsufficientLiquidityMinted {
                    operation: "minted".into(),
                });
            }
            root - MINIMUM_LIQUIDITY
        } else {
            let by0 = mul_div(amount0, self.total_shares, self.reserve0)?;
            let by1 = mul_div(amount1, self.total_shares, self.reserve1)?;
            by0.min(by1)
        };
        if shares == 0 {
            return Err(Error::InsufficientLiquidityMinted {
                operation: "minted".into(),
            });
        }

        let (token0, token1) = (self.key.token0(), self.key.token1());
        for (token, amount) in [(token0, amount0), (token1, amount1)] {
            let available = ledger.balance_of(&token, &provider);
            if available < amount {
                return Err(Error::InsufficientBalance {
                    token: token.to_hex(),
                    required: amount,
                    available,
                });
            }
        }
        let new_reserve0 = safe_add(self.reserve0, amount0)?;
        let new_reserve1 = safe_add(self.reserve1, amount1)?;
        let minted_total = if first_mint {
            safe_add(shares, MINIMUM_LIQUIDITY)?
        } else {
            shares
        };
        let new_total = safe_add(self.total_shares, minted_total)?;

        ledger.transfer(token0, provider, self.address, amount0)?;
        ledger.transfer(token1, provider, self.address, amount1)?;
        self.reserve0 = new_reserve0;
        self.reserve1 = new_reserve1;
        self.total_shares = new_total;
        if first_mint {
            // Permanently locked so the pool can never be fully drained
            *self.shares.entry(Address::ZERO).or_default() += MINIMUM_LIQUIDITY;
        }
        *self.shares.entry(provider).or_default() += shares;

        log.push(ProtocolEvent::LiquidityAdded {
            pair: self.address,
            provider,
            amount0,
            amount1,
            shares,
        });
        tracing::debug!(pair = %self.key, amount0, amount1, shares, "liquidity added");

        Ok(LiquidityReceipt {
            amount0,
            amount1,
            shares,
        })
    }

    fn optimal_amounts(
        &self,
        desired0: u128,
        desired1: u128,
        min0: u128,
        min1: u128,
    ) -> Result<(u128, u128)> {
        if self.reserve0 == 0 && self.reserve1 == 0 {
            return Ok((desired0, desired1));
        }
        let optimal1 = quote(desired0, self.reserve0, self.reserve1)?;
        if optimal1 <= desired1 {
            validate_min_out(optimal1, min1)?;
            return Ok((desired0, optimal1));
        }
        let optimal0 = quote(desired1, self.reserve1, self.reserve0)?;
        // optimal1 > desired1 implies optimal0 <= desired0 up to rounding
        let optimal0 = optimal0.min(desired0);
        validate_min_out(optimal0, min0)?;
        Ok((optimal0, desired1))
    }

    /// Burn `shares` owned by `provider` and pay out both tokens to `to`
    #[allow(clippy::too_many_arguments)]
    pub fn remove_liquidity(
        &mut self,
        ledger: &mut TokenLedger,
        provider: Address,
        shares: u128,
        min0: u128,
        min1: u128,
        to: Address,
        log: &mut EventLog,
    ) -> Result<LiquidityReceipt> {
        self.controls.ensure_active()?;
        validate_non_zero(shares)?;
        let owned = self.share_balance(&provider);
        if owned < shares {
            return Err(Error::InsufficientBalance {
                token: format!("{} shares", self.key),
                required: shares,
                available: owned,
            });
        }

        let amount0 = mul_div(shares, self.reserve0, self.total_shares)?;
        let amount1 = mul_div(shares, self.reserve1, self.total_shares)?;
        if amount0 == 0 || amount1 == 0 {
            return Err(Error::InsufficientLiquidityMinted {
                operation: "burned".into(),
            });
        }
        validate_min_out(amount0, min0)?;
        validate_min_out(amount1, min1)?;

        ledger.transfer(self.key.token0(), self.address, to, amount0)?;
        ledger.transfer(self.key.token1(), self.address, to, amount1)?;
        self.reserve0 -= amount0;
        self.reserve1 -= amount1;
        self.total_shares -= shares;
        if owned == shares {
            self.shares.remove(&provider);
        } else {
            self.shares.insert(provider, owned - shares);
        }

        log.push(ProtocolEvent::LiquidityRemoved {
            pair: self.address,
            provider,
            amount0,
            amount1,
            shares,
            to,
        });
        tracing::debug!(pair = %self.key, amount0, amount1, shares, "liquidity removed");

        Ok(LiquidityReceipt {
            amount0,
            amount1,
            shares,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POOL HANDLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared, lock-guarded reference to a pool
#[derive(Debug, Clone)]
pub struct PoolHandle {
    key: PairKey,
    address: Address,
    inner: Arc<Mutex<Pool>>,
}

impl PoolHandle {
    /// Wrap a pool
    pub fn new(pool: Pool) -> Self {
        Self {
            key: pool.key(),
            address: pool.address(),
            inner: Arc::new(Mutex::new(pool)),
        }
    }

    /// Pair key, readable without the lock
    pub fn key(&self) -> PairKey {
        self.key
    }

    /// Pool address, readable without the lock
    pub fn address(&self) -> Address {
        self.address
    }

    /// Whether two handles point at the same pool
    pub fn same_pool(&self, other: &PoolHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Acquire the pool lock, failing instead of waiting if it is held
    pub fn lock(&self) -> Result<MutexGuard<'_, Pool>> {
        match self.inner.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(Error::Locked(self.key.to_string())),
            Err(TryLockError::Poisoned(_)) => Err(Error::Poisoned(self.key.to_string())),
        }
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> Result<Pool> {
        Ok(self.lock()?.clone())
    }

    /// Current reserves
    pub fn reserves(&self) -> Result<(u128, u128)> {
        Ok(self.lock()?.reserves())
    }

    /// Guarded [`Pool::swap`]
    pub fn swap(
        &self,
        ledger: &mut TokenLedger,
        sender: Address,
        token_in: Address,
        amount_in: u128,
        to: Address,
        log: &mut EventLog,
    ) -> Result<SwapOutcome> {
        let mut pool = self.lock()?;
        pool.swap(ledger, sender, token_in, amount_in, to, log)
    }

    /// Guarded [`Pool::add_liquidity`]
    #[allow(clippy::too_many_arguments)]
    pub fn add_liquidity(
        &self,
        ledger: &mut TokenLedger,
        provider: Address,
        desired0: u128,
        desired1: u128,
        min0: u128,
        min1: u128,
        log: &mut EventLog,
    ) -> Result<LiquidityReceipt> {
        let mut pool = self.lock()?;
        pool.add_liquidity(ledger, provider, desired0, desired1, min0, min1, log)
    }

    /// Guarded [`Pool::remove_liquidity`]
    #[allow(clippy::too_many_arguments)]
    pub fn remove_liquidity(
        &self,
        ledger: &mut TokenLedger,
        provider: Address,
        shares: u128,
        min0: u128,
        min1: u128,
        to: Address,
        log: &mut EventLog,
    ) -> Result<LiquidityReceipt> {
        let mut pool = self.lock()?;
        pool.remove_liquidity(ledger, provider, shares, min0, min1, to, log)
    }
}
