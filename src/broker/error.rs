//! Error taxonomy for the paper broker.
//!
//! Input errors (unknown ids, malformed quotes) are logged no-ops and never
//! surface here; these variants cover the conditions that must fail a single
//! operation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Operation requires market data that has not arrived yet.
    #[error("no {0} price available yet; quote feed not connected or warm")]
    NotConnected(&'static str),

    /// The order has already reached a terminal state.
    #[error("order {0} is closed")]
    OrderClosed(String),

    /// The submission request is malformed.
    #[error("invalid order ticket: {0}")]
    InvalidTicket(String),

    /// Decimal overflow or degenerate scale in the fill path.
    #[error("arithmetic failure in {0}")]
    Arithmetic(&'static str),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
