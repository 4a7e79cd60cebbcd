//! # Paper Broker
//!
//! A paper-trading simulator for crypto-derivatives venues: live best
//! bid/ask data drives a synthetic matching engine over simulated orders,
//! with fee, funding, and PnL accounting against a virtual balance.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Market-data feeds (dYdX indexer WebSocket, synthetic)
//! - `broker`: Matching, ledger, fees, funding, events, and persistence
//! - `utils`: Shared decimal arithmetic helpers

pub mod broker;
pub mod config;
pub mod exchange;
pub mod utils;

pub use broker::PaperBroker;
pub use config::Config;
