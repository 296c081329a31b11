//! Billing estimates for tier changes.

mod proration;

pub use proration::{CURRENCY_SCALE, ProrationCalculator, ProrationResult, days_in_month};
