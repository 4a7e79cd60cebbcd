//! Weighted-average-cost position ledger.
//!
//! A single-lot weighted-average model rather than FIFO lot tracking: the
//! simulator has no tax-lot reporting requirement. Realized PnL and fees are
//! settled into the balance the moment a fill is applied; unrealized PnL is
//! always derived from the mark price, never stored.

use crate::broker::error::BrokerError;
use crate::broker::types::{AccountState, Position, Side};
use crate::utils::decimal::{sign_of, weighted_average};
use rust_decimal::Decimal;
use tracing::debug;

/// Outcome of applying one fill.
#[derive(Debug, Clone, Copy)]
pub struct FillApplication {
    pub realized_pnl: Decimal,
    pub position_after: Position,
}

/// Position + account state, mutated only through `apply_fill` and
/// `apply_funding`. Callers serialize access with a single mutex because
/// fills from both book sides can race.
#[derive(Debug)]
pub struct Ledger {
    pub position: Position,
    pub account: AccountState,
}

impl Ledger {
    pub fn new(starting_balance: Decimal) -> Self {
        Self {
            position: Position::flat(),
            account: AccountState::new(starting_balance),
        }
    }

    /// Apply a fill to the position and settle realized PnL and the signed
    /// fee adjustment into the balance.
    ///
    /// Same-direction fills extend the position at the size-weighted average
    /// price. Opposite-direction fills first close up to `min(|position|,
    /// size)` at the existing average price, realizing
    /// `(price − avg) × closed × sign(old)`; any remainder flips into a new
    /// position at the fill price.
    pub fn apply_fill(
        &mut self,
        side: Side,
        size: Decimal,
        price: Decimal,
        fee: Decimal,
    ) -> Result<FillApplication, BrokerError> {
        let signed = size
            .checked_mul(side.sign())
            .ok_or(BrokerError::Arithmetic("fill size"))?;
        let old = self.position;

        let mut realized = Decimal::ZERO;

        if old.is_flat() || sign_of(old.size) == sign_of(signed) {
            // Extending (or opening): weight old average by |old size|.
            let avg = weighted_average(&[
                (old.avg_entry_price, old.size.abs()),
                (price, size),
            ]);
            self.position.size = old
                .size
                .checked_add(signed)
                .ok_or(BrokerError::Arithmetic("position size"))?;
            self.position.avg_entry_price = avg;
        } else {
            let closable = old.size.abs().min(size);
            realized = price
                .checked_sub(old.avg_entry_price)
                .and_then(|d| d.checked_mul(closable))
                .and_then(|d| d.checked_mul(sign_of(old.size)))
                .ok_or(BrokerError::Arithmetic("realized pnl"))?;

            let new_size = old
                .size
                .checked_add(signed)
                .ok_or(BrokerError::Arithmetic("position size"))?;

            if new_size == Decimal::ZERO {
                // Exact close: average price resets the instant we go flat.
                self.position = Position::flat();
            } else if sign_of(new_size) != sign_of(old.size) {
                // Flip: the remainder opens a new position at the fill price.
                self.position.size = new_size;
                self.position.avg_entry_price = price;
            } else {
                // Partial close: average price of the remainder is unchanged.
                self.position.size = new_size;
            }
        }

        let notional = price
            .checked_mul(size)
            .ok_or(BrokerError::Arithmetic("fill notional"))?
            .abs();

        self.account.realized_pnl += realized;
        self.account.balance += realized + fee;
        // Cost convention: a credited rebate reduces total fees paid.
        self.account.total_fees_paid -= fee;
        self.account.dollar_volume += notional;
        self.account.fill_count += 1;

        debug!(
            %side,
            %size,
            %price,
            %fee,
            realized_pnl = %realized,
            position = %self.position.size,
            avg_entry = %self.position.avg_entry_price,
            balance = %self.account.balance,
            "Fill applied to ledger"
        );

        Ok(FillApplication {
            realized_pnl: realized,
            position_after: self.position,
        })
    }

    /// Settle a funding amount (signed) into the balance and cumulative tally.
    pub fn apply_funding(&mut self, amount: Decimal) {
        self.account.funding_accrued += amount;
        self.account.balance += amount;
    }

    /// Derived unrealized PnL at the given mark price.
    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        if self.position.is_flat() {
            Decimal::ZERO
        } else {
            (mark - self.position.avg_entry_price) * self.position.size
        }
    }

    /// Balance plus unrealized PnL at the given mark price.
    pub fn net_account_value(&self, mark: Option<Decimal>) -> Decimal {
        match mark {
            Some(m) => self.account.balance + self.unrealized_pnl(m),
            None => self.account.balance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ledger() -> Ledger {
        Ledger::new(dec!(10000))
    }

    #[test]
    fn test_weighted_average_same_direction() {
        let mut l = ledger();
        l.apply_fill(Side::Buy, dec!(10), dec!(100), Decimal::ZERO)
            .unwrap();
        l.apply_fill(Side::Buy, dec!(30), dec!(120), Decimal::ZERO)
            .unwrap();

        // (100*10 + 120*30) / 40 = 115
        assert_eq!(l.position.size, dec!(40));
        assert_eq!(l.position.avg_entry_price, dec!(115));
        assert_eq!(l.account.realized_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_weighted_average_short_side() {
        let mut l = ledger();
        l.apply_fill(Side::Sell, dec!(5), dec!(200), Decimal::ZERO)
            .unwrap();
        l.apply_fill(Side::Sell, dec!(5), dec!(210), Decimal::ZERO)
            .unwrap();

        assert_eq!(l.position.size, dec!(-10));
        assert_eq!(l.position.avg_entry_price, dec!(205));
    }

    #[test]
    fn test_partial_close_keeps_average() {
        let mut l = ledger();
        l.apply_fill(Side::Buy, dec!(10), dec!(100), Decimal::ZERO)
            .unwrap();
        let out = l
            .apply_fill(Side::Sell, dec!(4), dec!(110), Decimal::ZERO)
            .unwrap();

        // (110 - 100) * 4 = 40 realized; remainder keeps its average.
        assert_eq!(out.realized_pnl, dec!(40));
        assert_eq!(l.position.size, dec!(6));
        assert_eq!(l.position.avg_entry_price, dec!(100));
        assert_eq!(l.account.balance, dec!(10040));
    }

    #[test]
    fn test_exact_close_resets_average() {
        let mut l = ledger();
        l.apply_fill(Side::Buy, dec!(10), dec!(100), Decimal::ZERO)
            .unwrap();
        let out = l
            .apply_fill(Side::Sell, dec!(10), dec!(90), Decimal::ZERO)
            .unwrap();

        assert_eq!(out.realized_pnl, dec!(-100));
        assert!(l.position.is_flat());
        assert_eq!(l.position.avg_entry_price, Decimal::ZERO);
    }

    #[test]
    fn test_flip_invariant() {
        // +10 @ 100 receiving SELL 15 @ 110 realizes (110-100)*10 = 100
        // and leaves -5 @ 110.
        let mut l = ledger();
        l.apply_fill(Side::Buy, dec!(10), dec!(100), Decimal::ZERO)
            .unwrap();
        let out = l
            .apply_fill(Side::Sell, dec!(15), dec!(110), Decimal::ZERO)
            .unwrap();

        assert_eq!(out.realized_pnl, dec!(100));
        assert_eq!(l.position.size, dec!(-5));
        assert_eq!(l.position.avg_entry_price, dec!(110));
        assert_eq!(l.account.balance, dec!(10100));
    }

    #[test]
    fn test_short_flip_to_long() {
        let mut l = ledger();
        l.apply_fill(Side::Sell, dec!(8), dec!(50), Decimal::ZERO)
            .unwrap();
        let out = l
            .apply_fill(Side::Buy, dec!(12), dec!(45), Decimal::ZERO)
            .unwrap();

        // (45 - 50) * 8 * sign(-8) = +40
        assert_eq!(out.realized_pnl, dec!(40));
        assert_eq!(l.position.size, dec!(4));
        assert_eq!(l.position.avg_entry_price, dec!(45));
    }

    #[test]
    fn test_fee_settlement_and_cost_convention() {
        let mut l = ledger();
        l.apply_fill(Side::Buy, dec!(1), dec!(100), dec!(-0.3))
            .unwrap();

        assert_eq!(l.account.balance, dec!(9999.7));
        assert_eq!(l.account.total_fees_paid, dec!(0.3));

        // A rebate credits the balance and drives fees paid net-negative.
        l.apply_fill(Side::Buy, dec!(1), dec!(100), dec!(0.5))
            .unwrap();
        assert_eq!(l.account.balance, dec!(10000.2));
        assert_eq!(l.account.total_fees_paid, dec!(-0.2));
    }

    #[test]
    fn test_unrealized_pnl_derived() {
        let mut l = ledger();
        l.apply_fill(Side::Buy, dec!(2), dec!(100), Decimal::ZERO)
            .unwrap();

        assert_eq!(l.unrealized_pnl(dec!(110)), dec!(20));
        assert_eq!(l.unrealized_pnl(dec!(95)), dec!(-10));
        assert_eq!(l.net_account_value(Some(dec!(110))), dec!(10020));

        // Flat position carries no unrealized PnL.
        l.apply_fill(Side::Sell, dec!(2), dec!(100), Decimal::ZERO)
            .unwrap();
        assert_eq!(l.unrealized_pnl(dec!(500)), Decimal::ZERO);
    }

    #[test]
    fn test_volume_and_fill_count_accumulate() {
        let mut l = ledger();
        l.apply_fill(Side::Buy, dec!(2), dec!(100), Decimal::ZERO)
            .unwrap();
        l.apply_fill(Side::Sell, dec!(1), dec!(100), Decimal::ZERO)
            .unwrap();

        assert_eq!(l.account.dollar_volume, dec!(300));
        assert_eq!(l.account.fill_count, 2);
    }
}
