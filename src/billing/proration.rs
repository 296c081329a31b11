//! Mid-cycle proration estimates.
//!
//! A linear, tax-free model over the current calendar month. The result is an
//! advisory estimate for display; the subscription backend remains the system
//! of record for invoicing.

use chrono::{Datelike, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::tiers::Tier;

/// Decimal places kept for currency amounts.
pub const CURRENCY_SCALE: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProrationResult {
    pub current_tier: String,
    pub new_tier: String,
    /// Days left in the month, today included.
    pub remaining_days: u32,
    pub days_in_month: u32,
    /// Credit for the unused part of the current tier.
    pub refund: Decimal,
    pub new_charge: Decimal,
    /// `new_charge - refund`; negative means a net credit.
    pub net_charge: Decimal,
    pub effective_date: NaiveDate,
}

impl ProrationResult {
    pub fn is_credit(&self) -> bool {
        self.net_charge.is_sign_negative() && !self.net_charge.is_zero()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProrationCalculator;

impl ProrationCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Prorate a switch from `current` to `new` effective `today`, using monthly prices.
    pub fn compute(&self, current: &Tier, new: &Tier, today: NaiveDate) -> ProrationResult {
        let days_in_month = days_in_month(today);
        let remaining_days = days_in_month - today.day() + 1;

        let days = Decimal::from(days_in_month);
        let remaining = Decimal::from(remaining_days);

        let refund = (current.monthly_price / days * remaining).round_dp(CURRENCY_SCALE);
        let new_charge = (new.monthly_price / days * remaining).round_dp(CURRENCY_SCALE);
        let net_charge = new_charge - refund;

        tracing::debug!(
            current_tier = %current.id,
            new_tier = %new.id,
            remaining_days,
            days_in_month,
            %refund,
            %new_charge,
            %net_charge,
            "Computed proration"
        );

        ProrationResult {
            current_tier: current.id.clone(),
            new_tier: new.id.clone(),
            remaining_days,
            days_in_month,
            refund,
            new_charge,
            net_charge,
            effective_date: today,
        }
    }

    pub fn compute_today(&self, current: &Tier, new: &Tier) -> ProrationResult {
        self.compute(current, new, Utc::now().date_naive())
    }
}

/// Length of `date`'s calendar month.
pub fn days_in_month(date: NaiveDate) -> u32 {
    let first = date.with_day(1).unwrap_or(date);
    match first.checked_add_months(Months::new(1)) {
        Some(next) => (next - first).num_days() as u32,
        // Only reachable at the end of chrono's representable range.
        None => 31,
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::tiers::builtin_catalog;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(date(2024, 1, 31)), 31);
        assert_eq!(days_in_month(date(2024, 2, 10)), 29);
        assert_eq!(days_in_month(date(2023, 2, 10)), 28);
        assert_eq!(days_in_month(date(2024, 4, 1)), 30);
        assert_eq!(days_in_month(date(2024, 12, 25)), 31);
    }

    #[test]
    fn test_basic_to_pro_mid_month() {
        let catalog = builtin_catalog();
        let basic = catalog.get("basic").unwrap();
        let pro = catalog.get("pro").unwrap();

        let result = ProrationCalculator::new().compute(basic, pro, date(2024, 6, 15));
        assert_eq!(result.days_in_month, 30);
        assert_eq!(result.remaining_days, 16);
        assert_eq!(result.refund, dec!(15.47));
        assert_eq!(result.new_charge, dec!(52.80));
        assert_eq!(result.net_charge, dec!(37.33));
        assert_eq!(result.net_charge, result.new_charge - result.refund);
        assert_eq!(result.effective_date, date(2024, 6, 15));
    }

    #[test]
    fn test_downgrade_is_credit() {
        let catalog = builtin_catalog();
        let pro = catalog.get("pro").unwrap();
        let free = catalog.get("free").unwrap();

        let result = ProrationCalculator::new().compute(pro, free, date(2024, 6, 15));
        assert_eq!(result.new_charge, dec!(0));
        assert_eq!(result.net_charge, -result.refund);
        assert!(result.is_credit());
    }

    #[test]
    fn test_first_and_last_day() {
        let catalog = builtin_catalog();
        let basic = catalog.get("basic").unwrap();
        let pro = catalog.get("pro").unwrap();
        let calc = ProrationCalculator::new();

        let first = calc.compute(basic, pro, date(2024, 6, 1));
        assert_eq!(first.remaining_days, 30);
        assert_eq!(first.refund, dec!(29.00));
        assert_eq!(first.new_charge, dec!(99.00));

        let last = calc.compute(basic, pro, date(2024, 6, 30));
        assert_eq!(last.remaining_days, 1);
        assert_eq!(last.new_charge, dec!(3.30));
    }
}
