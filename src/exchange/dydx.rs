//! dYdX v4 indexer WebSocket feed.
//!
//! Subscribes to the `v4_orderbook` channel for the configured market and to
//! `v4_markets` for oracle prices and funding rates. The indexer reports a
//! 1-hour funding rate; it is re-expressed as an annualized percentage
//! before being handed to the engine.

use crate::exchange::traits::{QuoteEvent, QuoteFeed};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const INDEXER_WS_URL: &str = "wss://indexer.dydx.trade/v4/ws";

/// hourly rate × 876000 = annualized percent (24 × 365 × 100).
const HOURLY_TO_ANNUAL_PCT: Decimal = dec!(876000);

pub struct DydxQuoteFeed {
    symbol: String,
    url: String,
}

impl DydxQuoteFeed {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            url: INDEXER_WS_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_url(symbol: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            url: url.into(),
        }
    }

    /// Translate one indexer message into engine events.
    fn parse_message(&self, raw: &str) -> Vec<QuoteEvent> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(_) => return Vec::new(),
        };

        match value.get("channel").and_then(Value::as_str) {
            Some("v4_orderbook") => self.parse_orderbook(&value),
            Some("v4_markets") => self.parse_markets(&value),
            _ => Vec::new(),
        }
    }

    fn parse_orderbook(&self, value: &Value) -> Vec<QuoteEvent> {
        let contents = match value.get("contents") {
            Some(contents) => contents,
            None => return Vec::new(),
        };
        let ts = Utc::now();
        let mut events = Vec::new();

        if let Some((price, size)) = best_level(contents.get("bids")) {
            events.push(QuoteEvent::BestBid { price, size, ts });
        }
        if let Some((price, size)) = best_level(contents.get("asks")) {
            events.push(QuoteEvent::BestAsk { price, size, ts });
        }
        events
    }

    fn parse_markets(&self, value: &Value) -> Vec<QuoteEvent> {
        let contents = match value.get("contents") {
            Some(contents) => contents,
            None => return Vec::new(),
        };
        // Initial snapshots nest under "markets", deltas under "trading".
        let market = contents
            .get("markets")
            .or_else(|| contents.get("trading"))
            .and_then(|m| m.get(&self.symbol));
        let market = match market {
            Some(market) => market,
            None => return Vec::new(),
        };

        let ts = Utc::now();
        let mut events = Vec::new();

        if let Some(price) = decimal_field(market, "oraclePrice") {
            events.push(QuoteEvent::MarkPrice { price, ts });
        }
        if let Some(hourly) = decimal_field(market, "nextFundingRate") {
            events.push(QuoteEvent::FundingRate {
                annual_rate_pct: hourly * HOURLY_TO_ANNUAL_PCT,
                ts,
            });
        }
        events
    }
}

/// Extract the top-of-book level from either indexer shape:
/// `[{"price": "..", "size": ".."}, ..]` or `[["price", "size"], ..]`.
fn best_level(levels: Option<&Value>) -> Option<(Decimal, Decimal)> {
    let first = levels?.as_array()?.first()?;

    let (price, size) = match first {
        Value::Object(level) => (level.get("price")?, level.get("size")?),
        Value::Array(pair) => (pair.first()?, pair.get(1)?),
        _ => return None,
    };

    let price = Decimal::from_str(price.as_str()?).ok()?;
    let size = Decimal::from_str(size.as_str()?).ok()?;
    // Size zero means the level was removed; there is no best to report.
    if size == Decimal::ZERO {
        return None;
    }
    Some((price, size))
}

fn decimal_field(value: &Value, field: &str) -> Option<Decimal> {
    Decimal::from_str(value.get(field)?.as_str()?).ok()
}

#[async_trait]
impl QuoteFeed for DydxQuoteFeed {
    async fn run(&self, tx: mpsc::Sender<QuoteEvent>) -> Result<()> {
        info!(url = %self.url, symbol = %self.symbol, "Connecting to dYdX indexer");

        let (ws_stream, _) = connect_async(&self.url)
            .await
            .context("Failed to connect to dYdX indexer WebSocket")?;
        let (mut write, mut read) = ws_stream.split();

        let subscriptions = [
            json!({"type": "subscribe", "channel": "v4_orderbook", "id": self.symbol}),
            json!({"type": "subscribe", "channel": "v4_markets"}),
        ];
        for sub in subscriptions {
            write
                .send(Message::Text(sub.to_string().into()))
                .await
                .context("Failed to send subscription")?;
        }

        let _ = tx.send(QuoteEvent::Connected).await;

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    for event in self.parse_message(&text) {
                        if tx.send(event).await.is_err() {
                            warn!("Quote receiver dropped, closing feed");
                            return Ok(());
                        }
                    }
                }
                Ok(Message::Ping(_)) => {
                    debug!("Received ping");
                    // Pong is handled automatically by tungstenite
                }
                Ok(Message::Close(_)) => {
                    info!("Indexer closed the connection");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }

        let _ = tx.send(QuoteEvent::Disconnected).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_orderbook_object_levels() {
        let feed = DydxQuoteFeed::with_url("BTC-USD", "ws://unused");
        let raw = r#"{
            "type": "subscribed",
            "channel": "v4_orderbook",
            "id": "BTC-USD",
            "contents": {
                "bids": [{"price": "64000.5", "size": "1.2"}],
                "asks": [{"price": "64001.0", "size": "0.8"}]
            }
        }"#;

        let events = feed.parse_message(raw);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            QuoteEvent::BestBid { price, size, .. }
                if price == dec!(64000.5) && size == dec!(1.2)
        ));
        assert!(matches!(
            events[1],
            QuoteEvent::BestAsk { price, .. } if price == dec!(64001.0)
        ));
    }

    #[test]
    fn test_parse_orderbook_pair_levels() {
        let feed = DydxQuoteFeed::with_url("BTC-USD", "ws://unused");
        let raw = r#"{
            "type": "channel_data",
            "channel": "v4_orderbook",
            "id": "BTC-USD",
            "contents": {"bids": [["64002", "0.5"]]}
        }"#;

        let events = feed.parse_message(raw);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            QuoteEvent::BestBid { price, .. } if price == dec!(64002)
        ));
    }

    #[test]
    fn test_zero_size_level_is_ignored() {
        let feed = DydxQuoteFeed::with_url("BTC-USD", "ws://unused");
        let raw = r#"{
            "type": "channel_data",
            "channel": "v4_orderbook",
            "id": "BTC-USD",
            "contents": {"asks": [["64001", "0"]]}
        }"#;

        assert!(feed.parse_message(raw).is_empty());
    }

    #[test]
    fn test_parse_markets_funding_is_annualized() {
        let feed = DydxQuoteFeed::with_url("BTC-USD", "ws://unused");
        let raw = r#"{
            "type": "channel_data",
            "channel": "v4_markets",
            "contents": {
                "trading": {
                    "BTC-USD": {"oraclePrice": "64000", "nextFundingRate": "0.00001"}
                }
            }
        }"#;

        let events = feed.parse_message(raw);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            QuoteEvent::MarkPrice { price, .. } if price == dec!(64000)
        ));
        // 0.00001/hour annualizes to 8.76%.
        assert!(matches!(
            events[1],
            QuoteEvent::FundingRate { annual_rate_pct, .. }
                if annual_rate_pct == dec!(8.76000)
        ));
    }

    #[test]
    fn test_other_symbols_ignored() {
        let feed = DydxQuoteFeed::with_url("BTC-USD", "ws://unused");
        let raw = r#"{
            "type": "channel_data",
            "channel": "v4_markets",
            "contents": {"trading": {"ETH-USD": {"oraclePrice": "3000"}}}
        }"#;

        assert!(feed.parse_message(raw).is_empty());
    }

    #[test]
    fn test_garbage_is_ignored() {
        let feed = DydxQuoteFeed::with_url("BTC-USD", "ws://unused");
        assert!(feed.parse_message("not json").is_empty());
        assert!(feed.parse_message(r#"{"type":"connected"}"#).is_empty());
    }
}
