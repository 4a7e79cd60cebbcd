//! Synthetic random-walk quote feed for offline runs and demos.

use crate::exchange::traits::{QuoteEvent, QuoteFeed};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// Every `FUNDING_EVERY_TICKS` ticks a funding-rate event is emitted.
const FUNDING_EVERY_TICKS: u64 = 60;

pub struct SyntheticQuoteFeed {
    start_price: Decimal,
    tick_interval: Duration,
    /// Half-spread applied on each side of the mid.
    half_spread: Decimal,
    /// Maximum per-tick drift in price units.
    max_step: Decimal,
}

impl SyntheticQuoteFeed {
    pub fn new(start_price: Decimal, tick_interval: Duration) -> Self {
        // Spread and step scale with the starting price.
        Self {
            start_price,
            tick_interval,
            half_spread: start_price * dec!(0.0001),
            max_step: start_price * dec!(0.0005),
        }
    }
}

#[async_trait]
impl QuoteFeed for SyntheticQuoteFeed {
    async fn run(&self, tx: mpsc::Sender<QuoteEvent>) -> Result<()> {
        info!(start_price = %self.start_price, "Starting synthetic quote feed");

        let mut rng = StdRng::from_entropy();
        let mut mid = self.start_price;
        let mut tick: u64 = 0;

        let _ = tx.send(QuoteEvent::Connected).await;

        loop {
            tokio::time::sleep(self.tick_interval).await;
            tick += 1;

            // Random walk in thousandths of the max step.
            let step_mills: i64 = rng.gen_range(-1000..=1000);
            mid += self.max_step * Decimal::from(step_mills) / dec!(1000);
            if mid <= self.half_spread {
                mid = self.start_price;
            }

            let ts = Utc::now();
            let size = Decimal::from(rng.gen_range(1..=50)) / dec!(10);

            let events = [
                QuoteEvent::BestBid {
                    price: mid - self.half_spread,
                    size,
                    ts,
                },
                QuoteEvent::BestAsk {
                    price: mid + self.half_spread,
                    size,
                    ts,
                },
                QuoteEvent::MarkPrice { price: mid, ts },
            ];
            for event in events {
                if tx.send(event).await.is_err() {
                    return Ok(());
                }
            }

            if tick % FUNDING_EVERY_TICKS == 0 {
                // Annualized percent in [-15, 15].
                let rate = Decimal::from(rng.gen_range(-1500..=1500)) / dec!(100);
                if tx
                    .send(QuoteEvent::FundingRate {
                        annual_rate_pct: rate,
                        ts: Utc::now(),
                    })
                    .await
                    .is_err()
                {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_feed_emits_sane_quotes() {
        let feed = SyntheticQuoteFeed::new(dec!(100), Duration::from_millis(1));
        let (tx, mut rx) = mpsc::channel(64);
        let handle = tokio::spawn(async move { feed.run(tx).await });

        assert!(matches!(rx.recv().await, Some(QuoteEvent::Connected)));

        let mut bid = None;
        let mut ask = None;
        for _ in 0..20 {
            match rx.recv().await.unwrap() {
                QuoteEvent::BestBid { price, size, .. } => {
                    assert!(price > Decimal::ZERO);
                    assert!(size > Decimal::ZERO);
                    bid = Some(price);
                }
                QuoteEvent::BestAsk { price, .. } => {
                    assert!(price > Decimal::ZERO);
                    ask = Some(price);
                }
                _ => {}
            }
        }

        let (bid, ask) = (bid.unwrap(), ask.unwrap());
        assert!(ask > bid, "ask {ask} should sit above bid {bid}");

        handle.abort();
    }

    #[tokio::test]
    async fn test_feed_stops_when_receiver_drops() {
        let feed = SyntheticQuoteFeed::new(dec!(100), Duration::from_millis(1));
        let (tx, rx) = mpsc::channel(4);
        drop(rx);

        // Must return rather than loop forever.
        feed.run(tx).await.unwrap();
    }
}
