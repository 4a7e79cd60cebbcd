//! Maker/taker fee model.
//!
//! Sign convention (explicit by design, see `FeeSchedule`): the configured
//! rate is a signed balance adjustment per unit of notional. A positive rate
//! credits the balance (rebate), a negative rate debits it (cost). Both
//! directions use the same formula; only the configured rate differs.

use crate::broker::error::BrokerError;
use crate::broker::types::Liquidity;
use rust_decimal::Decimal;

/// Configured maker and taker rates as decimal fractions of notional
/// (e.g. `0.00005` = +0.5 bps rebate, `-0.0003` = 3 bps cost).
#[derive(Debug, Clone, Copy)]
pub struct FeeSchedule {
    pub maker_rate: Decimal,
    pub taker_rate: Decimal,
}

impl FeeSchedule {
    pub fn new(maker_rate: Decimal, taker_rate: Decimal) -> Self {
        Self {
            maker_rate,
            taker_rate,
        }
    }

    /// Signed fee for a fill: `|price × size| × rate`.
    ///
    /// Checked arithmetic so a degenerate notional fails the single fill,
    /// not the engine.
    pub fn fee(
        &self,
        price: Decimal,
        size: Decimal,
        liquidity: Liquidity,
    ) -> Result<Decimal, BrokerError> {
        let rate = match liquidity {
            Liquidity::Maker => self.maker_rate,
            Liquidity::Taker => self.taker_rate,
        };

        let notional = price
            .checked_mul(size)
            .ok_or(BrokerError::Arithmetic("fee notional"))?
            .abs();

        notional
            .checked_mul(rate)
            .ok_or(BrokerError::Arithmetic("fee amount"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_maker_rebate_credits() {
        // +0.5 bps on notional 100,000 credits exactly 5.0
        let fees = FeeSchedule::new(dec!(0.00005), dec!(-0.0003));
        let fee = fees.fee(dec!(50000), dec!(2), Liquidity::Maker).unwrap();
        assert_eq!(fee, dec!(5.0));
    }

    #[test]
    fn test_taker_fee_debits() {
        // -3.0 bps on notional 100,000 debits exactly 30.0
        let fees = FeeSchedule::new(dec!(0.00005), dec!(-0.0003));
        let fee = fees.fee(dec!(50000), dec!(2), Liquidity::Taker).unwrap();
        assert_eq!(fee, dec!(-30.0));
    }

    #[test]
    fn test_notional_is_absolute() {
        let fees = FeeSchedule::new(dec!(0.0001), dec!(-0.0001));
        let fee = fees.fee(dec!(-100), dec!(10), Liquidity::Maker).unwrap();
        assert_eq!(fee, dec!(0.1));
    }

    #[test]
    fn test_zero_size_zero_fee() {
        let fees = FeeSchedule::new(dec!(0.0001), dec!(-0.0003));
        let fee = fees
            .fee(dec!(50000), Decimal::ZERO, Liquidity::Taker)
            .unwrap();
        assert_eq!(fee, Decimal::ZERO);
    }
}
