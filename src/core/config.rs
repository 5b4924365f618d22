//! Engine configuration and parameters.
//!
//! Parameters are grouped by the component that owns them. Every group has
//! a `Default` drawn from `utils::constants` and a `validate()` that
//! enforces the invariants the component relies on. [`EngineConfig`]
//! aggregates the groups and can be loaded from JSON with `MUSD_*`
//! environment overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::core::address::Address;
use crate::error::{Error, Result};
use crate::utils::constants::*;
use crate::utils::validation::{validate_address, validate_bps, validate_bucket_sum};

// ═══════════════════════════════════════════════════════════════════════════════
// AMM FEES
// ═══════════════════════════════════════════════════════════════════════════════

/// Swap and protocol fee rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Total swap fee retained by the pool
    pub swap_fee_bps: u64,
    /// Slice of the input sent to the treasury
    pub protocol_fee_bps: u64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            swap_fee_bps: DEFAULT_SWAP_FEE_BPS,
            protocol_fee_bps: DEFAULT_PROTOCOL_FEE_BPS,
        }
    }
}

impl FeeConfig {
    /// Create a fee config
    pub fn new(swap_fee_bps: u64, protocol_fee_bps: u64) -> Self {
        Self {
            swap_fee_bps,
            protocol_fee_bps,
        }
    }

    /// Enforce `protocol <= swap <= cap` and `protocol <= protocol cap`
    pub fn validate(&self) -> Result<()> {
        validate_bps(self.swap_fee_bps, MAX_SWAP_FEE_BPS, "swap_fee_bps")?;
        validate_bps(self.protocol_fee_bps, MAX_PROTOCOL_FEE_BPS, "protocol_fee_bps")?;
        if self.protocol_fee_bps > self.swap_fee_bps {
            return Err(Error::InvalidParameter {
                name: "protocol_fee_bps".into(),
                reason: format!(
                    "protocol fee {} bps exceeds swap fee {} bps",
                    self.protocol_fee_bps, self.swap_fee_bps
                ),
            });
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ISSUANCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-collateral issuance parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralConfig {
    /// Whether mint/burn is allowed against this token
    pub enabled: bool,
    /// Decimals of one whole collateral unit
    pub decimals: u8,
    /// Lowest oracle price accepted (E18)
    pub min_oracle_price: u128,
    /// Highest oracle price accepted (E18)
    pub max_oracle_price: u128,
}

impl CollateralConfig {
    /// Enabled collateral with the given bounds
    pub fn enabled(decimals: u8, min_oracle_price: u128, max_oracle_price: u128) -> Self {
        Self {
            enabled: true,
            decimals,
            min_oracle_price,
            max_oracle_price,
        }
    }

    /// Validate bounds and decimals
    pub fn validate(&self) -> Result<()> {
        if self.decimals > MAX_TOKEN_DECIMALS {
            return Err(Error::InvalidParameter {
                name: "decimals".into(),
                reason: format!("{} exceeds {}", self.decimals, MAX_TOKEN_DECIMALS),
            });
        }
        if self.min_oracle_price == 0 || self.min_oracle_price > self.max_oracle_price {
            return Err(Error::InvalidParameter {
                name: "oracle_bounds".into(),
                reason: format!(
                    "need 0 < min ({}) <= max ({})",
                    self.min_oracle_price, self.max_oracle_price
                ),
            });
        }
        Ok(())
    }
}

/// Collateralization thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioConfig {
    /// Ratio minting targets and resets require
    pub min_collateral_ratio_bps: u64,
    /// Ratio below which the breaker trips
    pub emergency_collateral_ratio_bps: u64,
}

impl Default for RatioConfig {
    fn default() -> Self {
        Self {
            min_collateral_ratio_bps: DEFAULT_MIN_COLLATERAL_RATIO_BPS,
            emergency_collateral_ratio_bps: DEFAULT_EMERGENCY_COLLATERAL_RATIO_BPS,
        }
    }
}

impl RatioConfig {
    /// Enforce `0 < emergency <= min`
    pub fn validate(&self) -> Result<()> {
        if self.emergency_collateral_ratio_bps == 0
            || self.emergency_collateral_ratio_bps > self.min_collateral_ratio_bps
        {
            return Err(Error::InvalidParameter {
                name: "ratio_config".into(),
                reason: format!(
                    "need 0 < emergency ({}) <= min ({})",
                    self.emergency_collateral_ratio_bps, self.min_collateral_ratio_bps
                ),
            });
        }
        Ok(())
    }
}

/// Issuance module parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceConfig {
    /// Cap on stablecoin minted within one block
    pub max_mint_per_block: u128,
    /// Maximum oracle age in seconds
    pub staleness_threshold_secs: u64,
    /// Collateralization thresholds
    pub ratios: RatioConfig,
}

impl Default for IssuanceConfig {
    fn default() -> Self {
        Self {
            max_mint_per_block: DEFAULT_MAX_MINT_PER_BLOCK,
            staleness_threshold_secs: DEFAULT_STALENESS_THRESHOLD_SECS,
            ratios: RatioConfig::default(),
        }
    }
}

impl IssuanceConfig {
    /// Validate issuance parameters
    pub fn validate(&self) -> Result<()> {
        if self.staleness_threshold_secs == 0 {
            return Err(Error::InvalidParameter {
                name: "staleness_threshold_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        self.ratios.validate()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TREASURY
// ═══════════════════════════════════════════════════════════════════════════════

/// Distribution destinations and their shares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryConfig {
    /// Operations bucket
    pub ops_address: Address,
    /// Liquidity incentives bucket
    pub liquidity_address: Address,
    /// Reserve bucket, also receives rounding dust
    pub reserve_address: Address,
    /// Operations share
    pub ops_bps: u64,
    /// Liquidity share
    pub liquidity_bps: u64,
    /// Reserve share
    pub reserve_bps: u64,
}

impl TreasuryConfig {
    /// Destinations must be set and shares must sum to 10,000
    pub fn validate(&self) -> Result<()> {
        validate_address(&self.ops_address, "ops_address")?;
        validate_address(&self.liquidity_address, "liquidity_address")?;
        validate_address(&self.reserve_address, "reserve_address")?;
        validate_bucket_sum(&[self.ops_bps, self.liquidity_bps, self.reserve_bps])
    }
}

/// Harvest guardrails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Floor on caller-supplied min out, relative to the router quote
    pub max_slippage_bps: u64,
    /// Share of proceeds paid to the harvester
    pub harvest_incentive_bps: u64,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_slippage_bps: DEFAULT_MAX_SLIPPAGE_BPS,
            harvest_incentive_bps: DEFAULT_HARVEST_INCENTIVE_BPS,
        }
    }
}

impl HarvestConfig {
    /// Validate bounds
    pub fn validate(&self) -> Result<()> {
        validate_bps(self.max_slippage_bps, MAX_SLIPPAGE_BPS, "max_slippage_bps")?;
        validate_bps(
            self.harvest_incentive_bps,
            MAX_HARVEST_INCENTIVE_BPS,
            "harvest_incentive_bps",
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PEG CONTROLLER
// ═══════════════════════════════════════════════════════════════════════════════

/// Peg parameters for one (token, stablecoin) pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PegTarget {
    /// Display symbol
    pub symbol: String,
    /// Token paired against the stablecoin
    pub token: Address,
    /// Target price of one token in stablecoin (E18)
    pub target_price: u128,
    /// Deviation that triggers a correction
    pub trigger_bps: u64,
    /// Share of the full correction attempted per cycle
    pub correction_fraction_bps: u64,
    /// Largest input per correction
    pub max_action_amount: u128,
    /// Smallest input worth trading
    pub min_action_amount: u128,
    /// Haircut applied to the quoted output for min out
    pub slippage_bps: u64,
}

impl PegTarget {
    /// Target with default trigger, fraction and slippage
    pub fn new(symbol: impl Into<String>, token: Address, target_price: u128) -> Self {
        Self {
            symbol: symbol.into(),
            token,
            target_price,
            trigger_bps: DEFAULT_TRIGGER_BPS,
            correction_fraction_bps: DEFAULT_CORRECTION_FRACTION_BPS,
            max_action_amount: u128::MAX,
            min_action_amount: 0,
            slippage_bps: DEFAULT_PEG_SLIPPAGE_BPS,
        }
    }

    /// Validate target parameters
    pub fn validate(&self) -> Result<()> {
        validate_address(&self.token, "peg token")?;
        if self.target_price == 0 {
            return Err(Error::InvalidParameter {
                name: "target_price".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.correction_fraction_bps == 0 {
            return Err(Error::InvalidParameter {
                name: "correction_fraction_bps".into(),
                reason: "must be greater than 0".into(),
            });
        }
        validate_bps(
            self.correction_fraction_bps,
            BPS_DIVISOR as u64,
            "correction_fraction_bps",
        )?;
        validate_bps(self.trigger_bps, BPS_DIVISOR as u64, "trigger_bps")?;
        validate_bps(self.slippage_bps, MAX_SLIPPAGE_BPS, "slippage_bps")?;
        if self.min_action_amount > self.max_action_amount {
            return Err(Error::InvalidParameter {
                name: "action_amount".into(),
                reason: format!(
                    "min {} exceeds max {}",
                    self.min_action_amount, self.max_action_amount
                ),
            });
        }
        Ok(())
    }
}

/// Controller-wide peg settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PegControllerConfig {
    /// Symbols to stabilize
    pub targets: Vec<PegTarget>,
    /// Abort the cycle on the first failure
    pub strict: bool,
    /// Extra stablecoin minted when sourcing a shortfall
    pub mint_buffer_bps: u64,
    /// Collateral tried after the correction token when minting
    pub fallback_collateral: Vec<Address>,
    /// Trade whatever balance is available after a failed sourcing attempt
    pub partial_fill: bool,
    /// Deadline offset applied to every corrective trade
    pub trade_deadline_secs: u64,
}

impl Default for PegControllerConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            strict: false,
            mint_buffer_bps: DEFAULT_MINT_BUFFER_BPS,
            fallback_collateral: Vec::new(),
            partial_fill: false,
            trade_deadline_secs: DEFAULT_TRADE_DEADLINE_SECS,
        }
    }
}

impl PegControllerConfig {
    /// Validate every target and the shared settings
    pub fn validate(&self) -> Result<()> {
        validate_bps(self.mint_buffer_bps, BPS_DIVISOR as u64, "mint_buffer_bps")?;
        if self.trade_deadline_secs == 0 {
            return Err(Error::InvalidParameter {
                name: "trade_deadline_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        self.targets.iter().try_for_each(PegTarget::validate)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration load/save error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Parse error
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// Invalid value in an override
    #[error("Invalid override {name}={value}")]
    Override {
        /// Variable name
        name: String,
        /// Raw value
        value: String,
    },
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(#[from] Error),
}

/// Full engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Initial global fee config
    pub fees: FeeConfig,
    /// Router path length limit
    pub max_path_length: usize,
    /// Issuance parameters
    pub issuance: IssuanceConfig,
    /// Treasury distribution, if configured at startup
    pub treasury: Option<TreasuryConfig>,
    /// Harvest guardrails
    pub harvest: HarvestConfig,
    /// Peg controller settings
    pub peg: PegControllerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fees: FeeConfig::default(),
            max_path_length: DEFAULT_MAX_PATH_LENGTH,
            issuance: IssuanceConfig::default(),
            treasury: None,
            harvest: HarvestConfig::default(),
            peg: PegControllerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file
    pub fn load(path: &Path) -> std::result::Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save to a JSON file, creating parent directories
    pub fn save(&self, path: &Path) -> std::result::Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Defaults with `MUSD_*` environment overrides applied
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup
    ///
    /// Recognized variables: `MUSD_SWAP_FEE_BPS`, `MUSD_PROTOCOL_FEE_BPS`,
    /// `MUSD_MAX_PATH_LENGTH`, `MUSD_MAX_MINT_PER_BLOCK`,
    /// `MUSD_STALENESS_SECS`, `MUSD_MIN_RATIO_BPS`, `MUSD_EMERGENCY_RATIO_BPS`,
    /// `MUSD_PEG_STRICT`.
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

        if let Some(v) = lookup("MUSD_SWAP_FEE_BPS") {
            self.fees.swap_fee_bps = parse("MUSD_SWAP_FEE_BPS", v)?;
        }
        if let Some(v) = lookup("MUSD_PROTOCOL_FEE_BPS") {
            self.fees.protocol_fee_bps = parse("MUSD_PROTOCOL_FEE_BPS", v)?;
        }
        if let Some(v) = lookup("MUSD_MAX_PATH_LENGTH") {
            self.max_path_length = parse("MUSD_MAX_PATH_LENGTH", v)?;
        }
        if let Some(v) = lookup("MUSD_MAX_MINT_PER_BLOCK") {
            self.issuance.max_mint_per_block = parse("MUSD_MAX_MINT_PER_BLOCK", v)?;
        }
        if let Some(v) = lookup("MUSD_STALENESS_SECS") {
            self.issuance.staleness_threshold_secs = parse("MUSD_STALENESS_SECS", v)?;
        }
        if let Some(v) = lookup("MUSD_MIN_RATIO_BPS") {
            self.issuance.ratios.min_collateral_ratio_bps = parse("MUSD_MIN_RATIO_BPS", v)?;
        }
        if let Some(v) = lookup("MUSD_EMERGENCY_RATIO_BPS") {
            self.issuance.ratios.emergency_collateral_ratio_bps =
                parse("MUSD_EMERGENCY_RATIO_BPS", v)?;
        }
        if let Some(v) = lookup("MUSD_PEG_STRICT") {
            self.peg.strict = parse("MUSD_PEG_STRICT", v)?;
        }
        Ok(())
    }

    /// Validate every group
    pub fn validate(&self) -> Result<()> {
        self.fees.validate()?;
        if self.max_path_length < 2 || self.max_path_length > ABSOLUTE_MAX_PATH_LENGTH {
            return Err(Error::InvalidParameter {
                name: "max_path_length".into(),
                reason: format!(
                    "{} outside [2, {}]",
                    self.max_path_length, ABSOLUTE_MAX_PATH_LENGTH
                ),
            });
        }
        self.issuance.validate()?;
        if let Some(treasury) = &self.treasury {
            treasury.validate()?;
        }
        self.harvest.validate()?;
        self.peg.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_fee_config_bounds() {
        assert!(FeeConfig::new(30, 5).validate().is_ok());
        assert!(FeeConfig::new(1_000, 30).validate().is_ok());
        assert!(FeeConfig::new(1_001, 5).validate().is_err());
        assert!(FeeConfig::new(100, 31).validate().is_err());
        assert!(FeeConfig::new(10, 20).validate().is_err());
    }

    #[test]
    fn test_collateral_bounds() {
        assert!(CollateralConfig::enabled(6, WAD / 2, 2 * WAD).validate().is_ok());
        assert!(CollateralConfig::enabled(6, 2 * WAD, WAD).validate().is_err());
        assert!(CollateralConfig::enabled(37, WAD, WAD).validate().is_err());
    }

    #[test]
    fn test_ratio_config() {
        let mut ratios = RatioConfig::default();
        assert!(ratios.validate().is_ok());
        ratios.emergency_collateral_ratio_bps = 12_000;
        assert!(ratios.validate().is_err());
    }

    #[test]
    fn test_treasury_config_sum() {
        let cfg = TreasuryConfig {
            ops_address: Address::from_label("ops"),
            liquidity_address: Address::from_label("liq"),
            reserve_address: Address::from_label("reserve"),
            ops_bps: 4_000,
            liquidity_bps: 4_000,
            reserve_bps: 2_000,
        };
        assert!(cfg.validate().is_ok());
        assert!(TreasuryConfig { reserve_bps: 2_001, ..cfg }.validate().is_err());
        assert!(TreasuryConfig { ops_address: Address::ZERO, ..cfg }.validate().is_err());
    }

    #[test]
    fn test_peg_target_validation() {
        let target = PegTarget::new("WETH", Address::from_label("weth"), 2_000 * WAD);
        assert!(target.validate().is_ok());

        let mut bad = target.clone();
        bad.correction_fraction_bps = 0;
        assert!(bad.validate().is_err());

        let mut bad = target;
        bad.min_action_amount = 10;
        bad.max_action_amount = 5;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [("MUSD_SWAP_FEE_BPS", "50"), ("MUSD_PEG_STRICT", "true")]
            .into_iter()
            .collect();
        let mut config = EngineConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.fees.swap_fee_bps, 50);
        assert!(config.peg.strict);

        let err = config.apply_overrides(|name| {
            (name == "MUSD_MAX_PATH_LENGTH").then(|| "many".to_string())
        });
        assert!(matches!(err, Err(ConfigError::Override { .. })));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.json");

        let mut config = EngineConfig::default();
        config.peg.targets.push(PegTarget::new(
            "WETH",
            Address::from_label("weth"),
            2_000 * WAD,
        ));
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
