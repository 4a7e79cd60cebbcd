//! One side of the resting order book.
//!
//! Each side owns its orders behind an independent lock: a best-ask tick only
//! ever locks the bid side (incoming ask prices can fill resting buys) and a
//! best-bid tick only locks the ask side. Removal and the decision to fill
//! happen under the same lock acquisition, so a racing cancel can never
//! double-process an order.

use crate::broker::types::{OrderRecord, Side};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Concurrent map of resting orders for one side.
#[derive(Debug)]
pub struct BookSide {
    side: Side,
    orders: Mutex<HashMap<String, OrderRecord>>,
}

impl BookSide {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            orders: Mutex::new(HashMap::new()),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Make an order visible in the book.
    pub async fn insert(&self, order: OrderRecord) {
        debug!(order_id = %order.id, side = %self.side, "Order resting in book");
        self.orders.lock().await.insert(order.id.clone(), order);
    }

    /// Best-effort removal; `None` when a concurrent fill already won.
    pub async fn remove(&self, order_id: &str) -> Option<OrderRecord> {
        self.orders.lock().await.remove(order_id)
    }

    /// Remove and return every order crossed by the incoming opposite-side
    /// best price.
    ///
    /// A resting BUY crosses when the best ask falls strictly below its
    /// limit; a resting SELL crosses when the best bid strictly exceeds its
    /// limit. Fills are all-or-nothing: there is no depth model, only a
    /// single best-price tick.
    pub async fn take_crossing(&self, opposite_best: Decimal) -> Vec<OrderRecord> {
        let mut orders = self.orders.lock().await;

        let crossed_ids: Vec<String> = orders
            .values()
            .filter(|order| {
                order
                    .limit_price
                    .map(|limit| Self::crosses(self.side, limit, opposite_best))
                    .unwrap_or(false)
            })
            .map(|order| order.id.clone())
            .collect();

        crossed_ids
            .into_iter()
            .filter_map(|id| orders.remove(&id))
            .collect()
    }

    fn crosses(side: Side, limit: Decimal, opposite_best: Decimal) -> bool {
        match side {
            Side::Buy => opposite_best < limit,
            Side::Sell => opposite_best > limit,
        }
    }

    /// Remove every resting order (bulk cancel).
    pub async fn drain(&self) -> Vec<OrderRecord> {
        self.orders.lock().await.drain().map(|(_, v)| v).collect()
    }

    pub async fn open_orders(&self) -> Vec<OrderRecord> {
        self.orders.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.orders.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::types::{OrderTicket, Side};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn resting(side: Side, id: &str, limit: Decimal) -> OrderRecord {
        let ticket = OrderTicket::limit("BTC-USD", side, dec!(1), limit);
        let mut order = OrderRecord::from_ticket(id.to_string(), &ticket, Utc::now());
        order.mark_open().unwrap();
        order
    }

    #[tokio::test]
    async fn test_bid_crossed_by_lower_ask() {
        let bids = BookSide::new(Side::Buy);
        bids.insert(resting(Side::Buy, "a", dec!(100))).await;
        bids.insert(resting(Side::Buy, "b", dec!(95))).await;

        // Ask at 98 crosses only the 100 bid (strictly below its limit).
        let crossed = bids.take_crossing(dec!(98)).await;
        assert_eq!(crossed.len(), 1);
        assert_eq!(crossed[0].id, "a");
        assert_eq!(bids.len().await, 1);
    }

    #[tokio::test]
    async fn test_equal_price_does_not_cross() {
        let bids = BookSide::new(Side::Buy);
        bids.insert(resting(Side::Buy, "a", dec!(100))).await;

        assert!(bids.take_crossing(dec!(100)).await.is_empty());
        assert_eq!(bids.len().await, 1);
    }

    #[tokio::test]
    async fn test_ask_crossed_by_higher_bid() {
        let asks = BookSide::new(Side::Sell);
        asks.insert(resting(Side::Sell, "s1", dec!(105))).await;
        asks.insert(resting(Side::Sell, "s2", dec!(110))).await;

        let crossed = asks.take_crossing(dec!(107)).await;
        assert_eq!(crossed.len(), 1);
        assert_eq!(crossed[0].id, "s1");
    }

    #[tokio::test]
    async fn test_remove_is_best_effort() {
        let bids = BookSide::new(Side::Buy);
        bids.insert(resting(Side::Buy, "a", dec!(100))).await;

        assert!(bids.remove("a").await.is_some());
        assert!(bids.remove("a").await.is_none());
        assert!(bids.remove("never-existed").await.is_none());
    }

    #[tokio::test]
    async fn test_drain_empties_side() {
        let asks = BookSide::new(Side::Sell);
        asks.insert(resting(Side::Sell, "s1", dec!(105))).await;
        asks.insert(resting(Side::Sell, "s2", dec!(110))).await;

        let drained = asks.drain().await;
        assert_eq!(drained.len(), 2);
        assert_eq!(asks.len().await, 0);
    }
}
