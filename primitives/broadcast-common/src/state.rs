use std::fmt;

use serde::Serialize;

/// Lifecycle of a single broadcast.
///
/// ```text
/// Pending -> Resolving -> Delivering -> Completed
///                 \
///                  -> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastState {
    Pending,
    Resolving,
    Delivering,
    Completed,
    Failed,
}

/// A transition that is not in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid broadcast transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: BroadcastState,
    pub to: BroadcastState,
}

impl BroadcastState {
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        use BroadcastState::*;
        matches!(
            (self, to),
            (Pending, Resolving)
                | (Resolving, Delivering)
                | (Resolving, Failed)
                | (Delivering, Completed)
        )
    }

    pub fn transition(self, to: Self) -> Result<Self, InvalidTransition> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for BroadcastState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::Delivering => "delivering",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}
