//! Paper broker engine: the broker-facing surface and quote-tick reactor.
//!
//! Quote callbacks run on the feed's task and only ever lock the *opposite*
//! book side (an incoming ask can fill resting buys, and vice versa), so the
//! two sides never contend. Ledger mutation is serialized by its own mutex
//! because fills from both sides can race. Submission and cancellation
//! return immediately; their effects happen on worker tasks after a
//! simulated network round trip.

use crate::broker::book::BookSide;
use crate::broker::dislocation::{DislocationConfig, DislocationGuard};
use crate::broker::error::BrokerError;
use crate::broker::events::{AccountListener, EventDispatcher, OrderEventListener};
use crate::broker::fees::FeeSchedule;
use crate::broker::funding::FundingAccrual;
use crate::broker::ledger::Ledger;
use crate::broker::snapshot::{BalanceCheckpoint, SnapshotScheduler};
use crate::broker::tradelog::{TradeLog, TradeRow};
use crate::broker::types::{
    AccountState, AccountUpdate, CancelReason, Fill, Liquidity, OrderEvent, OrderModifier,
    OrderRecord, OrderTicket, OrderType, Position, Side, StatusSnapshot,
};
use crate::config::Config;
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Latest market view, updated synchronously on each quote callback.
#[derive(Debug, Default, Clone)]
struct MarketState {
    best_bid: Option<Decimal>,
    best_ask: Option<Decimal>,
    mark: Option<Decimal>,
    mid: Option<Decimal>,
    dislocated: bool,
}

struct Inner {
    symbol: String,
    latency_ms: (u64, u64),
    fees: FeeSchedule,
    bids: BookSide,
    asks: BookSide,
    ledger: Mutex<Ledger>,
    funding: Mutex<FundingAccrual>,
    guard: Mutex<DislocationGuard>,
    market: Mutex<MarketState>,
    dispatcher: EventDispatcher,
    tradelog: TradeLog,
    checkpoint: BalanceCheckpoint,
    status: RwLock<Option<StatusSnapshot>>,
    order_seq: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Cloneable handle to one simulated broker instance (one instrument, one
/// venue). All collaborators are injected at construction; there are no
/// process-wide registries.
#[derive(Clone)]
pub struct PaperBroker {
    inner: Arc<Inner>,
}

impl PaperBroker {
    /// Build an engine from configuration, resuming the balance from the
    /// per-instrument checkpoint file when one exists.
    pub fn new(config: &Config) -> Result<Self, BrokerError> {
        let symbol = config.market.symbol.clone();
        let venue_code = config.market.venue.code().to_string();

        let checkpoint = BalanceCheckpoint::new(&config.data.dir, &symbol, &venue_code);
        let starting_balance = checkpoint
            .load()
            .unwrap_or(config.simulator.starting_balance);

        let tradelog = TradeLog::open(&config.data.dir, &symbol, &venue_code)?;

        let guard = DislocationGuard::new(DislocationConfig {
            window: chrono::Duration::seconds(config.dislocation.window_secs as i64),
            min_samples: config.dislocation.min_samples,
            multiplier: config.dislocation.multiplier,
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            %symbol,
            venue = %venue_code,
            %starting_balance,
            "Paper broker initialized"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                symbol,
                latency_ms: (
                    config.simulator.min_submit_latency_ms,
                    config.simulator.max_submit_latency_ms,
                ),
                fees: FeeSchedule::new(
                    config.simulator.maker_fee_rate,
                    config.simulator.taker_fee_rate,
                ),
                bids: BookSide::new(Side::Buy),
                asks: BookSide::new(Side::Sell),
                ledger: Mutex::new(Ledger::new(starting_balance)),
                funding: Mutex::new(FundingAccrual::new()),
                guard: Mutex::new(guard),
                market: Mutex::new(MarketState::default()),
                dispatcher: EventDispatcher::new(),
                tradelog,
                checkpoint,
                status: RwLock::new(None),
                order_seq: AtomicU64::new(0),
                shutdown_tx,
                shutdown_rx,
            }),
        })
    }

    /// Start the 1-second snapshot scheduler.
    pub fn start(&self) -> JoinHandle<()> {
        SnapshotScheduler::spawn(self.clone(), self.inner.shutdown_rx.clone())
    }

    /// Signal background tasks to stop.
    pub fn shutdown(&self) {
        self.inner.shutdown_tx.send(true).ok();
    }

    pub fn symbol(&self) -> &str {
        &self.inner.symbol
    }

    pub async fn register_order_listener(&self, listener: Arc<dyn OrderEventListener>) {
        self.inner.dispatcher.register_order_listener(listener).await;
    }

    pub async fn register_account_listener(&self, listener: Arc<dyn AccountListener>) {
        self.inner
            .dispatcher
            .register_account_listener(listener)
            .await;
    }

    // ------------------------------------------------------------------
    // Order operations
    // ------------------------------------------------------------------

    /// Submit an order. Returns the generated order id immediately; the
    /// order becomes visible in the book (or fills, for MARKET) only after
    /// a simulated 250–750 ms round trip on a worker task.
    pub async fn place_order(&self, ticket: OrderTicket) -> Result<String, BrokerError> {
        if ticket.size <= Decimal::ZERO {
            return Err(BrokerError::InvalidTicket(format!(
                "size must be positive, got {}",
                ticket.size
            )));
        }
        match ticket.order_type {
            OrderType::Limit => {
                let limit = ticket
                    .limit_price
                    .ok_or_else(|| BrokerError::InvalidTicket("limit order without price".into()))?;
                if limit <= Decimal::ZERO {
                    return Err(BrokerError::InvalidTicket(format!(
                        "limit price must be positive, got {limit}"
                    )));
                }
            }
            OrderType::Market => {
                // Fail fast when the market has not warmed up yet.
                let market = self.inner.market.lock().await;
                let opposite = match ticket.side {
                    Side::Buy => market.best_ask,
                    Side::Sell => market.best_bid,
                };
                if opposite.is_none() {
                    return Err(BrokerError::NotConnected(match ticket.side {
                        Side::Buy => "ask",
                        Side::Sell => "bid",
                    }));
                }
            }
        }

        let seq = self.inner.order_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("PB-{seq}");
        let order = OrderRecord::from_ticket(id.clone(), &ticket, Utc::now());

        debug!(order_id = %id, side = %ticket.side, order_type = %ticket.order_type, size = %ticket.size, "Order submitted");

        let latency = self.submit_latency();
        let broker = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            broker.activate_order(order).await;
        });

        Ok(id)
    }

    /// Cancel an order, best-effort: a concurrent fill racing the cancel
    /// silently wins, and an unknown id is a warn-level no-op.
    pub fn cancel_order(&self, order_id: &str) {
        let latency = self.submit_latency();
        let broker = self.clone();
        let order_id = order_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;

            let removed = match broker.inner.bids.remove(&order_id).await {
                Some(order) => Some(order),
                None => broker.inner.asks.remove(&order_id).await,
            };

            match removed {
                Some(mut order) => {
                    if order.mark_canceled().is_ok() {
                        info!(%order_id, "Order canceled");
                        broker
                            .inner
                            .dispatcher
                            .publish_order_event(OrderEvent::Canceled {
                                order,
                                reason: CancelReason::UserCanceled,
                            })
                            .await;
                    }
                }
                None => {
                    warn!(%order_id, "Cancel for unknown or already closed order, ignoring");
                }
            }
        });
    }

    /// Cancel every resting order on both sides.
    pub async fn cancel_all_orders(&self) {
        let mut drained = self.inner.bids.drain().await;
        drained.extend(self.inner.asks.drain().await);

        info!(count = drained.len(), "Canceling all open orders");
        for mut order in drained {
            if order.mark_canceled().is_ok() {
                self.inner
                    .dispatcher
                    .publish_order_event(OrderEvent::Canceled {
                        order,
                        reason: CancelReason::UserCanceled,
                    })
                    .await;
            }
        }
    }

    /// Every order currently resting in the book.
    pub async fn open_orders(&self) -> Vec<OrderRecord> {
        let mut orders = self.inner.bids.open_orders().await;
        orders.extend(self.inner.asks.open_orders().await);
        orders
    }

    pub async fn position(&self) -> Position {
        self.inner.ledger.lock().await.position
    }

    /// All positions keyed by symbol (one instrument per engine instance).
    pub async fn positions(&self) -> Vec<(String, Position)> {
        let position = self.position().await;
        if position.is_flat() {
            Vec::new()
        } else {
            vec![(self.inner.symbol.clone(), position)]
        }
    }

    pub async fn account(&self) -> AccountState {
        self.inner.ledger.lock().await.account.clone()
    }

    /// Balance plus unrealized PnL at the current mark (mid as fallback).
    pub async fn net_account_value(&self) -> Decimal {
        let mark = {
            let market = self.inner.market.lock().await;
            market.mark.or(market.mid)
        };
        self.inner.ledger.lock().await.net_account_value(mark)
    }

    /// Latest snapshot produced by the scheduler tick, if any yet.
    pub async fn status(&self) -> Option<StatusSnapshot> {
        self.inner.status.read().await.clone()
    }

    // ------------------------------------------------------------------
    // Quote callbacks (run on the feed's task)
    // ------------------------------------------------------------------

    /// React to a best-bid update: scan resting SELL orders for crossings.
    pub async fn on_best_bid(&self, price: Decimal, size: Decimal, ts: DateTime<Utc>) {
        if price <= Decimal::ZERO || size < Decimal::ZERO {
            warn!(%price, %size, "Malformed best-bid update, ignoring");
            return;
        }

        {
            let mut market = self.inner.market.lock().await;
            market.best_bid = Some(price);
        }

        let crossed = self.inner.asks.take_crossing(price).await;
        for order in crossed {
            let fill_price = order.limit_price.unwrap_or(price);
            self.execute_fill(order, fill_price, Liquidity::Maker).await;
        }

        self.refresh_mid_and_guard(ts).await;
    }

    /// React to a best-ask update: scan resting BUY orders for crossings.
    pub async fn on_best_ask(&self, price: Decimal, size: Decimal, ts: DateTime<Utc>) {
        if price <= Decimal::ZERO || size < Decimal::ZERO {
            warn!(%price, %size, "Malformed best-ask update, ignoring");
            return;
        }

        {
            let mut market = self.inner.market.lock().await;
            market.best_ask = Some(price);
        }

        let crossed = self.inner.bids.take_crossing(price).await;
        for order in crossed {
            let fill_price = order.limit_price.unwrap_or(price);
            self.execute_fill(order, fill_price, Liquidity::Maker).await;
        }

        self.refresh_mid_and_guard(ts).await;
    }

    pub async fn on_mark_price(&self, price: Decimal, _ts: DateTime<Utc>) {
        if price <= Decimal::ZERO {
            warn!(%price, "Malformed mark price, ignoring");
            return;
        }
        self.inner.market.lock().await.mark = Some(price);
    }

    /// React to an annualized funding-rate update (percent). Settles the
    /// elapsed interval since the prior update; the first update only
    /// records its timestamp.
    pub async fn on_funding_rate(&self, annual_rate_pct: Decimal, ts: DateTime<Utc>) {
        let mark = {
            let market = self.inner.market.lock().await;
            market.mark.or(market.mid)
        };
        let mark = match mark {
            Some(m) => m,
            None => {
                warn!(%annual_rate_pct, "Funding update before any mark price; settling zero");
                Decimal::ZERO
            }
        };

        let mut ledger = self.inner.ledger.lock().await;
        let position_size = ledger.position.size;
        let amount = self
            .inner
            .funding
            .lock()
            .await
            .settle(annual_rate_pct, ts, mark, position_size);

        if amount != Decimal::ZERO {
            ledger.apply_funding(amount);
            info!(
                funding = %amount,
                cumulative = %ledger.account.funding_accrued,
                balance = %ledger.account.balance,
                "Funding settled"
            );
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn submit_latency(&self) -> Duration {
        let (min, max) = self.inner.latency_ms;
        let ms = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        Duration::from_millis(ms)
    }

    /// Runs after the simulated round trip: the order either rests, fills
    /// (MARKET), or dies to the POST_ONLY cross check.
    async fn activate_order(&self, mut order: OrderRecord) {
        match order.order_type {
            OrderType::Market => {
                let opposite = {
                    let market = self.inner.market.lock().await;
                    match order.side {
                        Side::Buy => market.best_ask,
                        Side::Sell => market.best_bid,
                    }
                };
                match opposite {
                    Some(price) => self.execute_fill(order, price, Liquidity::Taker).await,
                    None => {
                        error!(order_id = %order.id, "Market order activated with no opposite best price");
                    }
                }
            }
            OrderType::Limit => {
                let limit = match order.limit_price {
                    Some(limit) => limit,
                    None => {
                        error!(order_id = %order.id, "Limit order without price reached activation");
                        return;
                    }
                };

                if order.has_modifier(OrderModifier::PostOnly) {
                    let crosses = {
                        let market = self.inner.market.lock().await;
                        match order.side {
                            Side::Buy => market.best_ask.map(|ask| limit >= ask),
                            Side::Sell => market.best_bid.map(|bid| limit <= bid),
                        }
                        .unwrap_or(false)
                    };
                    if crosses {
                        warn!(order_id = %order.id, %limit, "POST_ONLY order would cross, canceling");
                        if order.mark_canceled().is_ok() {
                            self.inner
                                .dispatcher
                                .publish_order_event(OrderEvent::Canceled {
                                    order,
                                    reason: CancelReason::PostOnlyWouldCross,
                                })
                                .await;
                        }
                        return;
                    }
                }

                if order.mark_open().is_ok() {
                    let book = match order.side {
                        Side::Buy => &self.inner.bids,
                        Side::Sell => &self.inner.asks,
                    };
                    book.insert(order).await;
                }
            }
        }
    }

    /// Apply one all-or-nothing fill: ledger, fees, trade log, events. Any
    /// arithmetic failure abandons this fill only.
    async fn execute_fill(&self, mut order: OrderRecord, price: Decimal, liquidity: Liquidity) {
        let fee = match self.inner.fees.fee(price, order.requested_size, liquidity) {
            Ok(fee) => fee,
            Err(e) => {
                error!(order_id = %order.id, error = %e, "Fee computation failed, abandoning fill");
                return;
            }
        };

        let ts = Utc::now();
        let mark = {
            let market = self.inner.market.lock().await;
            market.mark.or(market.mid)
        };
        let (account, unrealized) = {
            let mut ledger = self.inner.ledger.lock().await;
            if let Err(e) = ledger.apply_fill(order.side, order.requested_size, price, fee) {
                error!(order_id = %order.id, error = %e, "Ledger rejected fill, abandoning");
                return;
            }
            let unrealized = mark
                .map(|m| ledger.unrealized_pnl(m))
                .unwrap_or(Decimal::ZERO);
            (ledger.account.clone(), unrealized)
        };

        if let Err(e) = order.mark_filled(ts) {
            error!(order_id = %order.id, error = %e, "Order refused fill transition");
            return;
        }

        let fill = Fill {
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            size: order.requested_size,
            price,
            fee,
            liquidity,
            ts,
        };

        info!(
            order_id = %order.id,
            side = %order.side,
            size = %fill.size,
            %price,
            %fee,
            "Simulated fill"
        );

        self.inner.tradelog.record(TradeRow::from_fill(&order, &fill));

        self.inner
            .dispatcher
            .publish_account_update(AccountUpdate {
                balance: account.balance,
                equity: account.balance + unrealized,
                realized_pnl: account.realized_pnl,
                unrealized_pnl: unrealized,
                ts,
            })
            .await;

        self.inner
            .dispatcher
            .publish_order_event(OrderEvent::Filled { order, fill })
            .await;
    }

    /// Recompute the midpoint after matching and feed the dislocation guard.
    async fn refresh_mid_and_guard(&self, ts: DateTime<Utc>) {
        let pair = {
            let mut market = self.inner.market.lock().await;
            match (market.best_bid, market.best_ask) {
                (Some(bid), Some(ask)) => {
                    market.mid = Some((bid + ask) / dec!(2));
                    Some((bid, ask))
                }
                _ => None,
            }
        };

        if let Some((bid, ask)) = pair {
            let dislocated = self.inner.guard.lock().await.observe(bid, ask, ts);
            self.inner.market.lock().await.dislocated = dislocated;
        }
    }

    /// One scheduler tick: publish equity, rebuild the snapshot, write the
    /// checkpoint. Each step is isolated from the others' failures.
    pub(crate) async fn snapshot_tick(&self) {
        let ts = Utc::now();
        let market = self.inner.market.lock().await.clone();
        let (account, position, unrealized) = {
            let ledger = self.inner.ledger.lock().await;
            let unrealized = market
                .mark
                .or(market.mid)
                .map(|m| ledger.unrealized_pnl(m))
                .unwrap_or(Decimal::ZERO);
            (ledger.account.clone(), ledger.position, unrealized)
        };

        // (a) account-equity update
        self.inner
            .dispatcher
            .publish_account_update(AccountUpdate {
                balance: account.balance,
                equity: account.balance + unrealized,
                realized_pnl: account.realized_pnl,
                unrealized_pnl: unrealized,
                ts,
            })
            .await;

        // (b) status snapshot
        let open_order_count = self.inner.bids.len().await + self.inner.asks.len().await;
        let snapshot = StatusSnapshot {
            account: account.clone(),
            position,
            best_bid: market.best_bid,
            best_ask: market.best_ask,
            mid: market.mid,
            open_order_count,
            dislocated: market.dislocated,
            ts,
        };
        *self.inner.status.write().await = Some(snapshot);

        // (c) balance checkpoint
        if let Err(e) = self.inner.checkpoint.store_async(account.balance).await {
            error!(error = %e, "Balance checkpoint write failed; trading continues");
        }
    }

    pub(crate) async fn write_checkpoint(&self) -> std::io::Result<()> {
        let balance = self.inner.ledger.lock().await.account.balance;
        self.inner.checkpoint.store_async(balance).await
    }
}
