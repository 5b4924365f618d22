//! Multi-token balance ledger.
//!
//! This module tracks every fungible balance the engine touches:
//! - Balances per (token, holder)
//! - Total supply per token
//! - Mint, burn and transfer operations
//!
//! Pool reserves, treasury holdings and issuance collateral are all plain
//! balances held by their component's address. The ledger is `Clone` so
//! multi-step calls can stage changes on a copy and commit atomically.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

use crate::core::address::Address;
use crate::error::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// TOKEN METADATA
// ═══════════════════════════════════════════════════════════════════════════════

/// Display metadata for a registered token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Ticker symbol
    pub symbol: String,
    /// Decimal places of one whole unit
    pub decimals: u8,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TOKEN LEDGER
// ═══════════════════════════════════════════════════════════════════════════════

/// Balances and supplies for every token known to the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenLedger {
    /// Registered token metadata
    tokens: HashMap<Address, TokenInfo>,
    /// Balances keyed by (token, holder)
    balances: HashMap<(Address, Address), u128>,
    /// Total supply per token
    supplies: HashMap<Address, u128>,
}

impl TokenLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Register display metadata for a token
    pub fn register(&mut self, token: Address, symbol: impl Into<String>, decimals: u8) {
        self.tokens.insert(
            token,
            TokenInfo {
                symbol: symbol.into(),
                decimals,
            },
        );
    }

    /// Metadata for a token, if registered
    pub fn info(&self, token: &Address) -> Option<&TokenInfo> {
        self.tokens.get(token)
    }

    /// Symbol for a token, falling back to a short address
    pub fn symbol(&self, token: &Address) -> String {
        self.tokens
            .get(token)
            .map(|i| i.symbol.clone())
            .unwrap_or_else(|| token.short())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Balance of `holder` in `token`
    pub fn balance_of(&self, token: &Address, holder: &Address) -> u128 {
        self.balances.get(&(*token, *holder)).copied().unwrap_or(0)
    }

    /// Total supply of `token`
    pub fn total_supply(&self, token: &Address) -> u128 {
        self.supplies.get(token).copied().unwrap_or(0)
    }

    /// Number of non-zero holders of `token`
    pub fn holder_count(&self, token: &Address) -> usize {
        self.balances.keys().filter(|(t, _)| t == token).count()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MUTATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Create `amount` new units for `to`
    pub fn mint(&mut self, token: Address, to: Address, amount: u128) -> Result<()> {
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }

        let new_supply = self
            .total_supply(&token)
            .checked_add(amount)
            .ok_or(Error::Overflow {
                operation: "mint total supply".into(),
            })?;
        let new_balance = self
            .balance_of(&token, &to)
            .checked_add(amount)
            .ok_or(Error::Overflow {
                operation: "mint balance".into(),
            })?;

        self.balances.insert((token, to), new_balance);
        self.supplies.insert(token, new_supply);
        Ok(())
    }

    /// Destroy `amount` units held by `from`
    pub fn burn(&mut self, token: Address, from: Address, amount: u128) -> Result<()> {
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        self.debit(token, from, amount)?;
        let supply = self.total_supply(&token).saturating_sub(amount);
        self.supplies.insert(token, supply);
        Ok(())
    }

    /// Move `amount` of `token` from `from` to `to`
    pub fn transfer(&mut self, token: Address, from: Address, to: Address, amount: u128) -> Result<()> {
        if amount == 0 {
            return Err(Error::ZeroAmount);
        }
        if from == to {
            // Still enforce the balance so a self-transfer cannot fake funds
            let available = self.balance_of(&token, &from);
            if available < amount {
                return Err(Error::InsufficientBalance {
                    token: token.to_hex(),
                    required: amount,
                    available,
                });
            }
            return Ok(());
        }

        let to_balance = self
            .balance_of(&token, &to)
            .checked_add(amount)
            .ok_or(Error::Overflow {
                operation: "transfer balance".into(),
            })?;
        self.debit(token, from, amount)?;
        self.balances.insert((token, to), to_balance);
        Ok(())
    }

    fn debit(&mut self, token: Address, from: Address, amount: u128) -> Result<()> {
        let available = self.balance_of(&token, &from);
        if available < amount {
            return Err(Error::InsufficientBalance {
                token: token.to_hex(),
                required: amount,
                available,
            });
        }
        let remaining = available - amount;
        if remaining == 0 {
            self.balances.remove(&(token, from));
        } else {
            self.balances.insert((token, from), remaining);
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INTEGRITY
    // ═══════════════════════════════════════════════════════════════════════════

    /// Verify supply invariant (supply == sum of balances) for every token
    pub fn verify_supply_invariant(&self) -> bool {
        let mut sums: HashMap<Address, u128> = HashMap::new();
        for ((token, _), balance) in &self.balances {
            *sums.entry(*token).or_default() += *balance;
        }
        self.supplies
            .iter()
            .all(|(token, supply)| sums.get(token).copied().unwrap_or(0) == *supply)
            && sums.keys().all(|t| self.supplies.contains_key(t))
    }

    /// Deterministic digest over all balances, hex encoded
    pub fn state_hash(&self) -> String {
        let sorted: BTreeMap<_, _> = self.balances.iter().collect();
        let mut hasher = Sha256::new();
        for ((token, holder), balance) in sorted {
            hasher.update(token.as_bytes());
            hasher.update(holder.as_bytes());
            hasher.update(balance.to_be_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn musd() -> Address {
        Address::from_label("musd")
    }

    #[test]
    fn test_mint() {
        let mut ledger = TokenLedger::new();
        let owner = Address::from_label("alice");

        ledger.mint(musd(), owner, 1_000).unwrap();

        assert_eq!(ledger.balance_of(&musd(), &owner), 1_000);
        assert_eq!(ledger.total_supply(&musd()), 1_000);
    }

    #[test]
    fn test_burn_insufficient_balance() {
        let mut ledger = TokenLedger::new();
        let owner = Address::from_label("alice");

        ledger.mint(musd(), owner, 100).unwrap();
        let err = ledger.burn(musd(), owner, 200).unwrap_err();

        assert_eq!(err.shortfall(), Some(100));
        assert_eq!(ledger.total_supply(&musd()), 100);
    }

    #[test]
    fn test_transfer() {
        let mut ledger = TokenLedger::new();
        let from = Address::from_label("alice");
        let to = Address::from_label("bob");

        ledger.mint(musd(), from, 1_000).unwrap();
        ledger.transfer(musd(), from, to, 300).unwrap();

        assert_eq!(ledger.balance_of(&musd(), &from), 700);
        assert_eq!(ledger.balance_of(&musd(), &to), 300);
        assert_eq!(ledger.total_supply(&musd()), 1_000);
    }

    #[test]
    fn test_self_transfer_requires_balance() {
        let mut ledger = TokenLedger::new();
        let alice = Address::from_label("alice");
        assert!(ledger.transfer(musd(), alice, alice, 1).is_err());
    }

    #[test]
    fn test_supply_invariant() {
        let mut ledger = TokenLedger::new();
        let a = Address::from_label("alice");
        let b = Address::from_label("bob");
        let weth = Address::from_label("weth");

        ledger.mint(musd(), a, 1_000).unwrap();
        ledger.mint(weth, b, 500).unwrap();
        ledger.transfer(musd(), a, b, 200).unwrap();
        ledger.burn(musd(), b, 100).unwrap();

        assert!(ledger.verify_supply_invariant());
        assert_eq!(ledger.holder_count(&musd()), 2);
    }

    #[test]
    fn test_state_hash_deterministic() {
        let mut l1 = TokenLedger::new();
        let mut l2 = TokenLedger::new();
        let owner = Address::from_label("alice");

        l1.mint(musd(), owner, 100).unwrap();
        l2.mint(musd(), owner, 100).unwrap();

        assert_eq!(l1.state_hash(), l2.state_hash());
    }
}
