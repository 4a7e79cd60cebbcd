//! Market-data feeds and venue identifiers.

pub mod dydx;
pub mod synthetic;
pub mod traits;

pub use dydx::DydxQuoteFeed;
pub use synthetic::SyntheticQuoteFeed;
pub use traits::{QuoteEvent, QuoteFeed, Venue};
