//! Usage tracking: counters, snapshots and severity classification.

mod severity;
mod snapshot;
mod store;

pub use severity::{
    DEFAULT_CAUTION_THRESHOLD, DEFAULT_CRITICAL_THRESHOLD, DEFAULT_WARNING_THRESHOLD, Severity,
    SeverityClassifier, Thresholds,
};
pub use snapshot::{UsageCounters, UsageSnapshot};
pub use store::{Admission, CheckedCommit, UsageStore};
