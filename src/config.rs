// src/config.rs

use anyhow::{anyhow, Result};
use config::{Config as Loader, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;

fn default_min_hedge_size() -> Decimal { dec!(0.005) }
fn default_hedge_threshold() -> Decimal { dec!(0.01) }
fn default_max_slippage_percent() -> Decimal { dec!(0.5) }
fn default_leverage() -> Decimal { dec!(1) }
fn default_poll_interval() -> u64 { 5 }
fn default_max_retries() -> u32 { 3 }
fn default_retry_delay() -> u64 { 2 }
fn default_database_url() -> String { "sqlite://lphedger.db".into() }
fn default_log_level() -> String { "INFO".into() }
fn default_symbol_perpetual() -> String { "ETH/USDT:USDT".into() }

/// Core bot configuration. Required values have no default and fail the
/// load when absent; everything else carries the documented default.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub rpc_url: String,
    pub pool_address: String,
    pub venue_api_key: String,
    pub venue_api_secret: String,

    #[serde(default)]
    pub venue_testnet: bool,

    /// Smallest hedge worth sending, in token1 units.
    #[serde(default = "default_min_hedge_size")]
    pub min_hedge_size: Decimal,
    /// Delta magnitude above which a hedge is considered.
    #[serde(default = "default_hedge_threshold")]
    pub hedge_threshold: Decimal,
    #[serde(default = "default_max_slippage_percent")]
    pub max_slippage_percent: Decimal,
    /// Leverage cap; sizing never exceeds this.
    #[serde(default = "default_leverage")]
    pub default_leverage: Decimal,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,

    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,

    #[serde(default = "default_symbol_perpetual")]
    pub symbol_perpetual: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let file = env::var("LPHEDGER_CONFIG").unwrap_or_else(|_| "Config.toml".into());

        let loader = Loader::builder()
            .add_source(File::with_name(&file).required(false))
            .add_source(Environment::with_prefix("LPHEDGER").separator("__"))
            .build()?;

        let cfg = loader.try_deserialize::<Config>()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.pool_address.starts_with("0x") {
            return Err(anyhow!("Invalid pool address format: {}", self.pool_address));
        }
        if self.pool_address.len() != 42 {
            return Err(anyhow!("Invalid pool address length: {}", self.pool_address));
        }
        if self.min_hedge_size <= Decimal::ZERO {
            return Err(anyhow!("Minimum hedge size must be positive"));
        }
        if self.hedge_threshold <= Decimal::ZERO {
            return Err(anyhow!("Hedge threshold must be positive"));
        }
        if self.max_slippage_percent < Decimal::ZERO
            || self.max_slippage_percent > Decimal::ONE_HUNDRED
        {
            return Err(anyhow!("Max slippage must be between 0 and 100"));
        }
        if self.default_leverage < Decimal::ONE || self.default_leverage > Decimal::ONE_HUNDRED {
            return Err(anyhow!("Leverage must be between 1 and 100"));
        }
        if self.poll_interval_seconds < 1 {
            return Err(anyhow!("Poll interval must be at least 1 second"));
        }
        Ok(())
    }

    /// Produce a new validated configuration from this one. The original
    /// is untouched when the mutation fails validation.
    pub fn update(&self, mutate: impl FnOnce(&mut Config)) -> Result<Config> {
        let mut next = self.clone();
        mutate(&mut next);
        next.validate()?;
        Ok(next)
    }

    /// Quote currency of the perpetual symbol, e.g. "USDT" for
    /// "ETH/USDT:USDT".
    pub fn quote_currency(&self) -> &str {
        self.symbol_perpetual
            .split('/')
            .nth(1)
            .and_then(|s| s.split(':').next())
            .filter(|s| !s.is_empty())
            .unwrap_or("USDT")
    }
}

fn default_vault0() -> String { "0x313603FA690301b0CaeEf8069c065862f9162162".into() }
fn default_vault1() -> String { "0xD8b27CF359b7D15710a5BE299AF6e7Bf904984C2".into() }
fn default_token0_address() -> String { "0xdac17f958d2ee523a2206206994597c13d831ec7".into() }
fn default_token1_address() -> String { "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2".into() }
fn default_token0_decimals() -> u32 { 6 }
fn default_token1_decimals() -> u32 { 18 }
fn default_chain_id() -> u64 { 1 }
fn default_block_time() -> u64 { 12 }
fn default_equilibrium_reserve0() -> Decimal { dec!(1000000) }
fn default_equilibrium_reserve1() -> Decimal { dec!(500) }
fn default_equilibrium_price() -> Decimal { dec!(2000) }
fn default_desync_warning_percent() -> Decimal { dec!(5) }
fn default_max_position_size() -> Decimal { dec!(100) }
fn default_min_balance() -> Decimal { dec!(1000) }
fn default_emergency_stop_loss() -> Decimal { dec!(10000) }
fn default_max_delta_exposure() -> Decimal { dec!(0.5) }
fn default_max_gas_price_gwei() -> Decimal { dec!(100) }
fn default_gas_limit_multiplier() -> Decimal { dec!(1.2) }
fn default_funding_rate_threshold() -> Decimal { dec!(0.05) }
fn default_funding_check_interval() -> u64 { 28_800 }

/// Mainnet deployment profile: the base configuration plus the
/// pool/venue specifics of the canonical USDT/WETH pool.
#[derive(Debug, Clone, Deserialize)]
pub struct MainnetConfig {
    #[serde(flatten)]
    pub base: Config,

    #[serde(default = "default_vault0")]
    pub vault0: String,
    #[serde(default = "default_vault1")]
    pub vault1: String,
    #[serde(default = "default_token0_address")]
    pub token0_address: String,
    #[serde(default = "default_token1_address")]
    pub token1_address: String,
    #[serde(default = "default_token0_decimals")]
    pub token0_decimals: u32,
    #[serde(default = "default_token1_decimals")]
    pub token1_decimals: u32,

    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default = "default_block_time")]
    pub block_time_seconds: u64,

    #[serde(default = "default_equilibrium_reserve0")]
    pub equilibrium_reserve0: Decimal,
    #[serde(default = "default_equilibrium_reserve1")]
    pub equilibrium_reserve1: Decimal,
    #[serde(default = "default_equilibrium_price")]
    pub equilibrium_price: Decimal,

    #[serde(default = "default_desync_warning_percent")]
    pub desync_warning_percent: Decimal,
    #[serde(default = "default_max_position_size")]
    pub max_position_size: Decimal,
    #[serde(default = "default_min_balance")]
    pub min_balance: Decimal,
    #[serde(default = "default_emergency_stop_loss")]
    pub emergency_stop_loss: Decimal,
    /// Hard cap on tolerated delta exposure, in token1 units.
    #[serde(default = "default_max_delta_exposure")]
    pub max_delta_exposure: Decimal,

    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: Decimal,
    #[serde(default = "default_gas_limit_multiplier")]
    pub gas_limit_multiplier: Decimal,

    /// Funding rate (percent per interval) above which a warning fires.
    #[serde(default = "default_funding_rate_threshold")]
    pub funding_rate_threshold: Decimal,
    #[serde(default = "default_funding_check_interval")]
    pub funding_rate_check_interval_seconds: u64,
}

impl MainnetConfig {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let file = env::var("LPHEDGER_CONFIG").unwrap_or_else(|_| "Config.toml".into());

        let loader = Loader::builder()
            .add_source(File::with_name(&file).required(false))
            .add_source(Environment::with_prefix("LPHEDGER").separator("__"))
            .build()?;

        let cfg = loader.try_deserialize::<MainnetConfig>()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;

        if self.token0_decimals != 6 {
            return Err(anyhow!(
                "Stablecoin (token0) should have 6 decimals, got {}",
                self.token0_decimals
            ));
        }
        if self.token1_decimals != 18 {
            return Err(anyhow!(
                "Volatile asset (token1) should have 18 decimals, got {}",
                self.token1_decimals
            ));
        }
        if self.chain_id != 1 {
            return Err(anyhow!("Expected mainnet chain id 1, got {}", self.chain_id));
        }
        if self.equilibrium_reserve0 <= Decimal::ZERO || self.equilibrium_reserve1 <= Decimal::ZERO
        {
            return Err(anyhow!("Equilibrium reserves must be positive"));
        }
        Ok(())
    }
}
