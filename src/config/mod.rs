//! Configuration management for the paper broker.
//!
//! Loads settings from environment variables and config files.

use crate::exchange::Venue;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Instrument and venue selection
    #[serde(default)]
    pub market: MarketConfig,
    /// Simulator parameters (balance, fees, latency)
    #[serde(default)]
    pub simulator: SimulatorConfig,
    /// Spread dislocation guard tuning
    #[serde(default)]
    pub dislocation: DislocationSettings,
    /// Market-data feed selection
    #[serde(default)]
    pub feed: FeedConfig,
    /// Persistence paths
    #[serde(default)]
    pub data: DataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Venue whose market data drives the simulation
    #[serde(default = "default_venue")]
    pub venue: Venue,
    /// Instrument symbol, e.g. BTC-USD
    #[serde(default = "default_symbol")]
    pub symbol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Starting balance when no checkpoint exists
    #[serde(default = "default_starting_balance")]
    pub starting_balance: Decimal,
    /// Maker fee rate; positive credits the account (rebate)
    #[serde(default = "default_maker_fee_rate")]
    pub maker_fee_rate: Decimal,
    /// Taker fee rate; negative debits the account
    #[serde(default = "default_taker_fee_rate")]
    pub taker_fee_rate: Decimal,
    /// Lower bound of the simulated submission round trip
    #[serde(default = "default_min_submit_latency_ms")]
    pub min_submit_latency_ms: u64,
    /// Upper bound of the simulated submission round trip
    #[serde(default = "default_max_submit_latency_ms")]
    pub max_submit_latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DislocationSettings {
    /// Sliding-window length in seconds
    #[serde(default = "default_dislocation_window_secs")]
    pub window_secs: u64,
    /// Samples required before the guard may flag
    #[serde(default = "default_dislocation_min_samples")]
    pub min_samples: usize,
    /// Spread-to-average multiple that counts as dislocated
    #[serde(default = "default_dislocation_multiplier")]
    pub multiplier: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Use the synthetic random-walk feed instead of the venue feed
    #[serde(default)]
    pub synthetic: bool,
    /// Synthetic feed starting price
    #[serde(default = "default_synthetic_start_price")]
    pub synthetic_start_price: Decimal,
    /// Synthetic feed tick interval in milliseconds
    #[serde(default = "default_synthetic_tick_interval_ms")]
    pub synthetic_tick_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory holding the trade log and balance checkpoint
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
}

// Default value functions
fn default_venue() -> Venue {
    Venue::Dydx
}

fn default_symbol() -> String {
    "BTC-USD".to_string()
}

fn default_starting_balance() -> Decimal {
    Decimal::new(10_000, 0) // 10000 USD
}

fn default_maker_fee_rate() -> Decimal {
    Decimal::new(2, 4) // 0.0002 rebate
}

fn default_taker_fee_rate() -> Decimal {
    Decimal::new(-5, 4) // -0.0005 charge
}

fn default_min_submit_latency_ms() -> u64 {
    250
}

fn default_max_submit_latency_ms() -> u64 {
    750
}

fn default_dislocation_window_secs() -> u64 {
    6
}

fn default_dislocation_min_samples() -> usize {
    20
}

fn default_dislocation_multiplier() -> Decimal {
    Decimal::new(75, 1) // 7.5x
}

fn default_synthetic_start_price() -> Decimal {
    Decimal::new(64_000, 0)
}

fn default_synthetic_tick_interval_ms() -> u64 {
    250
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("PAPER"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.market.symbol.is_empty(),
            "market.symbol must not be empty"
        );

        anyhow::ensure!(
            self.simulator.starting_balance > Decimal::ZERO,
            "starting_balance must be positive"
        );

        anyhow::ensure!(
            self.simulator.min_submit_latency_ms <= self.simulator.max_submit_latency_ms,
            "min_submit_latency_ms must not exceed max_submit_latency_ms"
        );

        anyhow::ensure!(
            self.dislocation.min_samples >= 1,
            "dislocation.min_samples must be at least 1"
        );

        anyhow::ensure!(
            self.dislocation.multiplier > Decimal::ONE,
            "dislocation.multiplier must exceed 1"
        );

        anyhow::ensure!(
            self.feed.synthetic_start_price > Decimal::ZERO,
            "feed.synthetic_start_price must be positive"
        );

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            market: MarketConfig::default(),
            simulator: SimulatorConfig::default(),
            dislocation: DislocationSettings::default(),
            feed: FeedConfig::default(),
            data: DataConfig::default(),
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            venue: default_venue(),
            symbol: default_symbol(),
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            starting_balance: default_starting_balance(),
            maker_fee_rate: default_maker_fee_rate(),
            taker_fee_rate: default_taker_fee_rate(),
            min_submit_latency_ms: default_min_submit_latency_ms(),
            max_submit_latency_ms: default_max_submit_latency_ms(),
        }
    }
}

impl Default for DislocationSettings {
    fn default() -> Self {
        Self {
            window_secs: default_dislocation_window_secs(),
            min_samples: default_dislocation_min_samples(),
            multiplier: default_dislocation_multiplier(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            synthetic: false,
            synthetic_start_price: default_synthetic_start_price(),
            synthetic_tick_interval_ms: default_synthetic_tick_interval_ms(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.market.venue, Venue::Dydx);
        assert_eq!(config.market.symbol, "BTC-USD");
    }

    #[test]
    fn test_inverted_latency_rejected() {
        let mut config = Config::default();
        config.simulator.min_submit_latency_ms = 800;
        config.simulator.max_submit_latency_ms = 200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_balance_rejected() {
        let mut config = Config::default();
        config.simulator.starting_balance = Decimal::ZERO;
        assert!(config.validate().is_err());
    }
}
