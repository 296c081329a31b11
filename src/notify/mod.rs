//! Usage alerts and the typed quota event stream.

mod dispatcher;
mod events;

pub use dispatcher::{NotificationDispatcher, SeverityState};
pub use events::{
    DEFAULT_EVENT_CAPACITY, EventBus, GraceExpired, QuotaEvent, QuotaExceeded, TierChanged,
    UsageAlert,
};
