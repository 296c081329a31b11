//! Tier change workflow: select, review, confirm, apply.

mod review;
mod state;
mod tier_change;

pub use review::{ChangeReview, ReviewSeverity, ReviewWarning};
pub use state::{Acknowledgements, WorkflowState};
pub use tier_change::TierChangeWorkflow;

use serde::{Deserialize, Serialize};

/// How a downgrade that leaves usage above the new tier's limits is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum OverLimitPolicy {
    /// Over-limit usage is an error-level review finding and blocks confirmation.
    #[default]
    HardBlock,
    /// The change may proceed after acknowledgement. The account records a
    /// `grace_until` date; admission still denies new consumption of any
    /// resource above its limit. `QuotaGuard::enforce_grace` closes the
    /// window and reports expiry once the date passes.
    Grace { days: u32 },
}
