//! Keeper configuration.
//!
//! One JSON file drives `musd-keeper`: the engine parameters, the loop
//! settings, an optional kill-switch file and the markets seeded into an
//! in-memory deployment for `simulate`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::address::Address;
use crate::core::config::{
    CollateralConfig, ConfigError, EngineConfig, PegControllerConfig, PegTarget,
};
use crate::error::{Error, Result};
use crate::peg::keeper::KeeperSettings;
use crate::utils::constants::{MAX_TOKEN_DECIMALS, WAD};

// ═══════════════════════════════════════════════════════════════════════════════
// KEEPER CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Keeper configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    /// Engine parameters
    pub engine: EngineConfig,
    /// Loop parameters
    pub keeper: KeeperSettings,
    /// Loop stops once this file exists
    pub kill_switch_file: Option<PathBuf>,
    /// Deployment seeded by `simulate`
    pub simulation: SimulationConfig,
}

impl KeeperConfig {
    /// Load from file
    pub fn load(path: &Path) -> std::result::Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save to file
    pub fn save(&self, path: &Path) -> std::result::Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from `path`, then apply `MUSD_*` environment overrides
    pub fn load_with_env(path: &Path) -> std::result::Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Defaults with `MUSD_*` environment overrides applied
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply engine overrides plus `MUSD_COOLDOWN_SECS`,
    /// `MUSD_MAX_FAILURE_STREAK`, `MUSD_MAX_CYCLES` and
    /// `MUSD_KILL_SWITCH_FILE`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> std::result::Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(
            name: &str,
            value: String,
        ) -> std::result::Result<T, ConfigError> {
            value.trim().parse().map_err(|_| ConfigError::Override {
                name: name.into(),
                value,
            })
        }

        self.engine.apply_overrides(&lookup)?;
        if let Some(v) = lookup("MUSD_COOLDOWN_SECS") {
            self.keeper.cooldown_secs = parse("MUSD_COOLDOWN_SECS", v)?;
        }
        if let Some(v) = lookup("MUSD_MAX_FAILURE_STREAK") {
            self.keeper.max_failure_streak = parse("MUSD_MAX_FAILURE_STREAK", v)?;
        }
        if let Some(v) = lookup("MUSD_MAX_CYCLES") {
            self.keeper.max_cycles = Some(parse("MUSD_MAX_CYCLES", v)?);
        }
        if let Some(v) = lookup("MUSD_KILL_SWITCH_FILE") {
            self.kill_switch_file = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Peg settings with a target added for every market that names one
    pub fn peg_config(&self) -> PegControllerConfig {
        let mut peg = self.engine.peg.clone();
        for market in &self.simulation.markets {
            let token = market.address();
            if let Some(target_price) = market.target_price {
                if !peg.targets.iter().any(|t| t.token == token) {
                    peg.targets
                        .push(PegTarget::new(market.symbol.clone(), token, target_price));
                }
            }
            if market.fallback && !peg.fallback_collateral.contains(&token) {
                peg.fallback_collateral.push(token);
            }
        }
        peg
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.keeper.validate()?;
        self.peg_config().validate()?;
        self.simulation.validate()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SIMULATION SEED
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory deployment used by `simulate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Label the governance address is derived from
    pub governance: String,
    /// Label the keeper operator address is derived from
    pub operator: String,
    /// Label the stablecoin address is derived from
    pub stable: String,
    /// Label of the account that seeds pool liquidity
    pub liquidity_provider: String,
    /// Seconds between simulated blocks
    pub block_time_secs: u64,
    /// Timestamp of the first simulated block
    pub start_timestamp: u64,
    /// Stablecoin the operator starts with
    pub operator_stable_balance: u128,
    /// Token/stablecoin markets
    pub markets: Vec<MarketSeed>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            governance: "governance".into(),
            operator: "keeper".into(),
            stable: "musd".into(),
            liquidity_provider: "lp".into(),
            block_time_secs: 12,
            start_timestamp: 1_700_000_000,
            operator_stable_balance: 0,
            markets: Vec::new(),
        }
    }
}

impl SimulationConfig {
    /// Governance address
    pub fn governance_address(&self) -> Address {
        Address::from_label(&self.governance)
    }

    /// Operator address
    pub fn operator_address(&self) -> Address {
        Address::from_label(&self.operator)
    }

    /// Stablecoin address
    pub fn stable_address(&self) -> Address {
        Address::from_label(&self.stable)
    }

    /// Liquidity provider address
    pub fn liquidity_provider_address(&self) -> Address {
        Address::from_label(&self.liquidity_provider)
    }

    /// Validate seeds
    pub fn validate(&self) -> Result<()> {
        if self.block_time_secs == 0 {
            return Err(Error::InvalidParameter {
                name: "block_time_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for market in &self.markets {
            if !seen.insert(market.symbol.to_lowercase()) {
                return Err(Error::InvalidParameter {
                    name: "markets".into(),
                    reason: format!("duplicate symbol {}", market.symbol),
                });
            }
            if market.address() == self.stable_address() {
                return Err(Error::InvalidParameter {
                    name: "markets".into(),
                    reason: format!("{} collides with the stablecoin", market.symbol),
                });
            }
            market.validate()?;
        }
        Ok(())
    }
}

/// Oracle bounds for a market usable as collateral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralBounds {
    /// Lowest oracle price accepted (E18)
    pub min_oracle_price: u128,
    /// Highest oracle price accepted (E18)
    pub max_oracle_price: u128,
}

/// One token paired against the stablecoin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSeed {
    /// Token symbol, also the address label
    pub symbol: String,
    /// Token decimals
    pub decimals: u8,
    /// Oracle price in stablecoin per whole token (E18)
    pub oracle_price: u128,
    /// Token side of the initial liquidity
    pub token_reserve: u128,
    /// Stablecoin side of the initial liquidity
    pub stable_reserve: u128,
    /// Token the operator starts with
    #[serde(default)]
    pub operator_balance: u128,
    /// Enable as issuance collateral with these bounds
    #[serde(default)]
    pub collateral: Option<CollateralBounds>,
    /// Peg target price, if the keeper should stabilize this pool
    #[serde(default)]
    pub target_price: Option<u128>,
    /// Try this collateral when minting for other symbols
    #[serde(default)]
    pub fallback: bool,
}

impl MarketSeed {
    /// Market with 18 decimals and no collateral or peg role
    pub fn new(
        symbol: impl Into<String>,
        oracle_price: u128,
        token_reserve: u128,
        stable_reserve: u128,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            decimals: 18,
            oracle_price,
            token_reserve,
            stable_reserve,
            operator_balance: 0,
            collateral: None,
            target_price: None,
            fallback: false,
        }
    }

    /// Token address
    pub fn address(&self) -> Address {
        Address::from_label(&self.symbol.to_lowercase())
    }

    /// Issuance config for this market, if it is collateral
    pub fn collateral_config(&self) -> Option<CollateralConfig> {
        self.collateral.map(|b| {
            CollateralConfig::enabled(self.decimals, b.min_oracle_price, b.max_oracle_price)
        })
    }

    /// Implied pool price of the seeded reserves (E18, whole units)
    pub fn seeded_price(&self) -> Result<u128> {
        let scale = crate::utils::math::pow10(self.decimals)?;
        crate::utils::math::mul_div(self.stable_reserve, scale, self.token_reserve)
    }

    fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(Error::InvalidParameter {
                name: "symbol".into(),
                reason: "must not be empty".into(),
            });
        }
        if self.decimals > MAX_TOKEN_DECIMALS {
            return Err(Error::InvalidParameter {
                name: "decimals".into(),
                reason: format!("{} exceeds {}", self.decimals, MAX_TOKEN_DECIMALS),
            });
        }
        if self.oracle_price == 0 || self.token_reserve == 0 || self.stable_reserve == 0 {
            return Err(Error::InvalidParameter {
                name: self.symbol.clone(),
                reason: "price and reserves must be greater than 0".into(),
            });
        }
        if let Some(config) = self.collateral_config() {
            config.validate()?;
        }
        if self.fallback && self.collateral.is_none() {
            return Err(Error::InvalidParameter {
                name: self.symbol.clone(),
                reason: "fallback market must be collateral".into(),
            });
        }
        Ok(())
    }
}

/// Example configuration written by `musd-keeper init`
pub fn sample_config() -> KeeperConfig {
    let mut usdc = MarketSeed::new("USDC", WAD, 1_000_000 * 1_000_000, 1_000_000 * WAD);
    usdc.decimals = 6;
    usdc.operator_balance = 250_000 * 1_000_000;
    usdc.collateral = Some(CollateralBounds {
        min_oracle_price: WAD * 95 / 100,
        max_oracle_price: WAD * 105 / 100,
    });
    usdc.fallback = true;

    let mut weth = MarketSeed::new("WETH", 2_000 * WAD, 500 * WAD, 1_050_000 * WAD);
    weth.operator_balance = 50 * WAD;
    weth.collateral = Some(CollateralBounds {
        min_oracle_price: 500 * WAD,
        max_oracle_price: 10_000 * WAD,
    });
    weth.target_price = Some(2_000 * WAD);

    KeeperConfig {
        keeper: KeeperSettings {
            max_cycles: Some(10),
            poll_interval_ms: 0,
            ..Default::default()
        },
        simulation: SimulationConfig {
            markets: vec![usdc, weth],
            ..Default::default()
        },
        ..Default::default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_sample_config_is_valid() {
        let config = sample_config();
        config.validate().unwrap();

        let peg = config.peg_config();
        assert_eq!(peg.targets.len(), 1);
        assert_eq!(peg.targets[0].symbol, "WETH");
        assert_eq!(peg.fallback_collateral, vec![Address::from_label("usdc")]);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("keeper.json");
        let config = sample_config();
        config.save(&path).unwrap();
        assert_eq!(KeeperConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_sections_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keeper.json");
        std::fs::write(&path, r#"{ "keeper": { "cooldown_secs": 60 } }"#).unwrap();

        let config = KeeperConfig::load(&path).unwrap();
        assert_eq!(config.keeper.cooldown_secs, 60);
        assert_eq!(config.keeper.max_failure_streak, KeeperSettings::default().max_failure_streak);
        assert_eq!(config.engine, EngineConfig::default());
        assert!(config.simulation.markets.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("MUSD_COOLDOWN_SECS", "5"),
            ("MUSD_MAX_CYCLES", "3"),
            ("MUSD_PEG_STRICT", "true"),
            ("MUSD_KILL_SWITCH_FILE", "/tmp/musd.stop"),
        ]
        .into_iter()
        .collect();

        let mut config = KeeperConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.keeper.cooldown_secs, 5);
        assert_eq!(config.keeper.max_cycles, Some(3));
        assert!(config.engine.peg.strict);
        assert_eq!(config.kill_switch_file, Some(PathBuf::from("/tmp/musd.stop")));

        let err = config
            .apply_overrides(|name| (name == "MUSD_MAX_CYCLES").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Override { .. }));
    }

    #[test]
    fn test_invalid_markets_rejected() {
        let mut config = sample_config();
        config.simulation.markets.push(MarketSeed::new("weth", WAD, WAD, WAD));
        assert!(config.validate().is_err());

        let mut config = sample_config();
        config.simulation.markets[1].fallback = true;
        config.simulation.markets[1].collateral = None;
        assert!(config.validate().is_err());

        let mut config = sample_config();
        config.simulation.block_time_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_seeded_price_respects_decimals() {
        let config = sample_config();
        assert_eq!(config.simulation.markets[0].seeded_price().unwrap(), WAD);
        assert_eq!(config.simulation.markets[1].seeded_price().unwrap(), 2_100 * WAD);
    }
}
