//! Quote-feed abstraction shared by live and synthetic market data.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Supported venue identifiers. The venue only affects feed selection and
/// the persistence file naming; the simulator itself is venue-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Dydx,
    Paradex,
}

impl Venue {
    /// Short code used in file names and log fields.
    pub fn code(&self) -> &'static str {
        match self {
            Venue::Dydx => "dydx",
            Venue::Paradex => "paradex",
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Market-data events delivered to the engine.
#[derive(Debug, Clone)]
pub enum QuoteEvent {
    /// Best bid changed.
    BestBid {
        price: Decimal,
        size: Decimal,
        ts: DateTime<Utc>,
    },
    /// Best ask changed.
    BestAsk {
        price: Decimal,
        size: Decimal,
        ts: DateTime<Utc>,
    },
    /// Mark (oracle) price update.
    MarkPrice { price: Decimal, ts: DateTime<Utc> },
    /// Funding-rate update, annualized and expressed in percent.
    FundingRate {
        annual_rate_pct: Decimal,
        ts: DateTime<Utc>,
    },
    /// Feed connected.
    Connected,
    /// Feed lost its connection; the caller decides whether to reconnect.
    Disconnected,
}

/// A source of [`QuoteEvent`]s for a single instrument.
#[async_trait]
pub trait QuoteFeed: Send + Sync {
    /// Stream events into `tx` until the connection ends or `tx` closes.
    async fn run(&self, tx: mpsc::Sender<QuoteEvent>) -> anyhow::Result<()>;
}
