//! Quota admission control.

mod decision;
mod guard;

pub use decision::{GraceStatus, ProspectiveAction, QuotaDecision, ResourceDecision};
pub use guard::{Admitted, QuotaGuard, evaluate};
