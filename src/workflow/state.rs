use std::fmt;

use serde::{Deserialize, Serialize};

/// Tier change progress.
///
/// `SelectingPlan -> ReviewingChanges -> Confirming -> Applying -> Completed`,
/// with `Error` reachable from reviewing, confirming and applying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkflowState {
    SelectingPlan,
    ReviewingChanges,
    Confirming,
    Applying,
    Completed,
    Error { message: String, retryable: bool },
}

impl WorkflowState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SelectingPlan => "selecting_plan",
            Self::ReviewingChanges => "reviewing_changes",
            Self::Confirming => "confirming",
            Self::Applying => "applying",
            Self::Completed => "completed",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Explicit user consent collected in `Confirming`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgements {
    /// Terms of service and billing change.
    pub terms: bool,
    /// Loss of features or data access; required for downgrades.
    pub data_loss: bool,
}

impl Acknowledgements {
    pub fn terms() -> Self {
        Self {
            terms: true,
            data_loss: false,
        }
    }

    pub fn all() -> Self {
        Self {
            terms: true,
            data_loss: true,
        }
    }
}
