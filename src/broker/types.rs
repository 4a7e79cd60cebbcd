//! Core data model for the paper broker.

use crate::broker::error::BrokerError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The opposite side of the book.
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Sign applied to a size to get a signed position delta.
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => -Decimal::ONE,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

/// Order lifecycle status: NEW → OPEN → {FILLED | CANCELED}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Open,
    Filled,
    Canceled,
}

impl OrderStatus {
    /// Terminal states permit no further mutation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Canceled)
    }
}

/// Order modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderModifier {
    /// Must rest on the book; auto-canceled if it would cross.
    PostOnly,
    /// Pass-through flag; not enforced in the matching path.
    ReduceOnly,
}

/// Why an order was canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    UserCanceled,
    PostOnlyWouldCross,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::UserCanceled => write!(f, "USER_CANCELED"),
            CancelReason::PostOnlyWouldCross => write!(f, "POST_ONLY_WOULD_CROSS"),
        }
    }
}

/// Order submission request from a strategy.
#[derive(Debug, Clone)]
pub struct OrderTicket {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub size: Decimal,
    /// Required for LIMIT orders, ignored for MARKET.
    pub limit_price: Option<Decimal>,
    pub modifiers: Vec<OrderModifier>,
}

impl OrderTicket {
    /// Plain limit order without modifiers.
    pub fn limit(symbol: &str, side: Side, size: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            size,
            limit_price: Some(price),
            modifiers: Vec::new(),
        }
    }

    /// Market order.
    pub fn market(symbol: &str, side: Side, size: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            size,
            limit_price: None,
            modifiers: Vec::new(),
        }
    }

    /// Attach a modifier.
    pub fn with_modifier(mut self, modifier: OrderModifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    pub fn has_modifier(&self, modifier: OrderModifier) -> bool {
        self.modifiers.contains(&modifier)
    }
}

/// A simulated order.
///
/// Owned by one book side while resting; after removal (fill or cancel) the
/// record is terminal and handed to the event dispatcher and trade log.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    pub requested_size: Decimal,
    pub filled_size: Decimal,
    pub status: OrderStatus,
    pub modifiers: Vec<OrderModifier>,
    pub entry_time: DateTime<Utc>,
    pub filled_time: Option<DateTime<Utc>>,
}

impl OrderRecord {
    /// Create a NEW order from a ticket.
    pub fn from_ticket(id: String, ticket: &OrderTicket, now: DateTime<Utc>) -> Self {
        Self {
            id,
            symbol: ticket.symbol.clone(),
            side: ticket.side,
            order_type: ticket.order_type,
            limit_price: ticket.limit_price,
            requested_size: ticket.size,
            filled_size: Decimal::ZERO,
            status: OrderStatus::New,
            modifiers: ticket.modifiers.clone(),
            entry_time: now,
            filled_time: None,
        }
    }

    pub fn has_modifier(&self, modifier: OrderModifier) -> bool {
        self.modifiers.contains(&modifier)
    }

    /// Transition NEW → OPEN when the order becomes visible in the book.
    pub fn mark_open(&mut self) -> Result<(), BrokerError> {
        if self.status.is_terminal() {
            return Err(BrokerError::OrderClosed(self.id.clone()));
        }
        self.status = OrderStatus::Open;
        Ok(())
    }

    /// Fill the order in full (the simulator has no partial fills).
    pub fn mark_filled(&mut self, ts: DateTime<Utc>) -> Result<(), BrokerError> {
        if self.status.is_terminal() {
            return Err(BrokerError::OrderClosed(self.id.clone()));
        }
        self.filled_size = self.requested_size;
        self.filled_time = Some(ts);
        self.status = OrderStatus::Filled;
        Ok(())
    }

    /// Cancel the order.
    pub fn mark_canceled(&mut self) -> Result<(), BrokerError> {
        if self.status.is_terminal() {
            return Err(BrokerError::OrderClosed(self.id.clone()));
        }
        self.status = OrderStatus::Canceled;
        Ok(())
    }
}

/// Whether a fill rested on the book (maker) or aggressed (taker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liquidity {
    Maker,
    Taker,
}

/// A simulated execution.
#[derive(Debug, Clone)]
pub struct Fill {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
    /// Signed balance adjustment: positive credited, negative debited.
    pub fee: Decimal,
    pub liquidity: Liquidity,
    pub ts: DateTime<Utc>,
}

/// Terminal order events published to listeners.
#[derive(Debug, Clone)]
pub enum OrderEvent {
    Filled { order: OrderRecord, fill: Fill },
    Canceled { order: OrderRecord, reason: CancelReason },
}

impl OrderEvent {
    pub fn order_id(&self) -> &str {
        match self {
            OrderEvent::Filled { order, .. } => &order.id,
            OrderEvent::Canceled { order, .. } => &order.id,
        }
    }
}

/// Signed position: positive long, negative short, zero flat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub size: Decimal,
    /// Meaningful only when `size != 0`; reset to zero on flat.
    pub avg_entry_price: Decimal,
}

impl Position {
    pub fn flat() -> Self {
        Self {
            size: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.size == Decimal::ZERO
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::flat()
    }
}

/// Accumulating account ledger.
///
/// Every field except `balance` is monotone in absolute terms; `balance`
/// moves with every fill and funding tick. Unrealized PnL is derived, never
/// stored.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountState {
    pub starting_balance: Decimal,
    pub balance: Decimal,
    pub realized_pnl: Decimal,
    /// Cost convention: positive means net fees paid, negative means net
    /// rebates received.
    pub total_fees_paid: Decimal,
    pub funding_accrued: Decimal,
    pub dollar_volume: Decimal,
    pub fill_count: u64,
}

impl AccountState {
    pub fn new(starting_balance: Decimal) -> Self {
        Self {
            starting_balance,
            balance: starting_balance,
            realized_pnl: Decimal::ZERO,
            total_fees_paid: Decimal::ZERO,
            funding_accrued: Decimal::ZERO,
            dollar_volume: Decimal::ZERO,
            fill_count: 0,
        }
    }
}

/// Periodic account-equity update published to account listeners.
#[derive(Debug, Clone)]
pub struct AccountUpdate {
    pub balance: Decimal,
    pub equity: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub ts: DateTime<Utc>,
}

/// Point-in-time view produced once per scheduler tick.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub account: AccountState,
    pub position: Position,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub mid: Option<Decimal>,
    pub open_order_count: usize,
    pub dislocated: bool,
    pub ts: DateTime<Utc>,
}
