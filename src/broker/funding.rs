//! Continuous funding accrual.
//!
//! The external feed supplies an annualized funding rate in percent. Each
//! update converts it to an hourly rate and settles the elapsed interval
//! since the previous update against the current mark price and position.
//! The very first update only records its timestamp; there is no prior
//! period to settle.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

/// Hours per year × 100 for the percent-expressed annual rate.
const ANNUAL_PCT_TO_HOURLY: Decimal = dec!(876000); // 365 × 24 × 100

/// Convert an annualized percent rate to an hourly decimal rate.
pub fn hourly_rate(annual_rate_pct: Decimal) -> Decimal {
    annual_rate_pct / ANNUAL_PCT_TO_HOURLY
}

#[derive(Debug, Default)]
pub struct FundingAccrual {
    last_update: Option<DateTime<Utc>>,
}

impl FundingAccrual {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settle funding for the interval since the previous rate update.
    ///
    /// Returns the signed balance adjustment:
    /// `mark × positionSize × (−hourlyRate) × elapsedHours`. A long position
    /// pays positive funding and receives negative funding; short positions
    /// are the mirror. Returns zero on the first update.
    pub fn settle(
        &mut self,
        annual_rate_pct: Decimal,
        ts: DateTime<Utc>,
        mark_price: Decimal,
        position_size: Decimal,
    ) -> Decimal {
        let prev = match self.last_update.replace(ts) {
            Some(prev) => prev,
            None => {
                debug!(annual_rate_pct = %annual_rate_pct, "First funding update, nothing to settle");
                return Decimal::ZERO;
            }
        };

        let elapsed_ms = (ts - prev).num_milliseconds();
        if elapsed_ms <= 0 {
            return Decimal::ZERO;
        }
        let elapsed_hours = Decimal::from(elapsed_ms) / dec!(3600000);

        let amount =
            mark_price * position_size * -hourly_rate(annual_rate_pct) * elapsed_hours;

        debug!(
            annual_rate_pct = %annual_rate_pct,
            %elapsed_hours,
            %mark_price,
            %position_size,
            funding = %amount,
            "Funding settled"
        );

        amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_hourly_conversion() {
        // 8.76% annual = 0.00001 per hour
        assert_eq!(hourly_rate(dec!(8.76)), dec!(0.00001));
    }

    #[test]
    fn test_first_update_settles_nothing() {
        let mut accrual = FundingAccrual::new();
        let amount = accrual.settle(dec!(10), Utc::now(), dec!(50000), dec!(3));
        assert_eq!(amount, Decimal::ZERO);
    }

    #[test]
    fn test_long_pays_positive_rate() {
        let mut accrual = FundingAccrual::new();
        let t0 = Utc::now();
        accrual.settle(dec!(8.76), t0, dec!(50000), dec!(2));

        // One hour later: 50000 × 2 × (−0.00001) × 1 = −1
        let amount = accrual.settle(dec!(8.76), t0 + Duration::hours(1), dec!(50000), dec!(2));
        assert_eq!(amount, dec!(-1.00000));
    }

    #[test]
    fn test_short_receives_positive_rate() {
        let mut accrual = FundingAccrual::new();
        let t0 = Utc::now();
        accrual.settle(dec!(8.76), t0, dec!(50000), dec!(-2));

        let amount = accrual.settle(dec!(8.76), t0 + Duration::hours(2), dec!(50000), dec!(-2));
        assert_eq!(amount, dec!(2.00000));
    }

    #[test]
    fn test_flat_position_accrues_nothing() {
        let mut accrual = FundingAccrual::new();
        let t0 = Utc::now();
        accrual.settle(dec!(8.76), t0, dec!(50000), Decimal::ZERO);
        let amount = accrual.settle(
            dec!(8.76),
            t0 + Duration::hours(5),
            dec!(50000),
            Decimal::ZERO,
        );
        assert_eq!(amount, Decimal::ZERO);
    }

    #[test]
    fn test_out_of_order_timestamp_is_noop() {
        let mut accrual = FundingAccrual::new();
        let t0 = Utc::now();
        accrual.settle(dec!(8.76), t0, dec!(50000), dec!(1));
        let amount = accrual.settle(dec!(8.76), t0 - Duration::hours(1), dec!(50000), dec!(1));
        assert_eq!(amount, Decimal::ZERO);
    }
}
