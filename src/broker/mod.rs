//! Simulated broker: synthetic matching, position ledger, fees, funding,
//! dislocation guard, event fan-out, and persistence.
//!
//! The engine in [`engine`] ties the pieces together; everything else is a
//! leaf component with its own tests.

pub mod book;
pub mod dislocation;
pub mod engine;
pub mod error;
pub mod events;
pub mod fees;
pub mod funding;
pub mod ledger;
pub mod snapshot;
pub mod tradelog;
pub mod types;

pub use engine::PaperBroker;
pub use error::BrokerError;
pub use events::{AccountListener, EventDispatcher, OrderEventListener};
pub use fees::FeeSchedule;
pub use types::{
    AccountState, AccountUpdate, CancelReason, Fill, Liquidity, OrderEvent, OrderModifier,
    OrderRecord, OrderStatus, OrderTicket, OrderType, Position, Side, StatusSnapshot,
};
