use std::path::PathBuf;

use crate::state::InvalidTransition;

/// Crate-wide result type for broadcast operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure classes the CLI maps onto exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Resolution,
    Delivery,
    Config,
    Internal,
}

/// Errors that abort a broadcast before any message is sent.
///
/// Per-channel delivery failures are not represented here; they are folded
/// into the [`DeliveryOutcome`](crate::DeliveryOutcome) of the affected
/// channel instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or out-of-bounds input.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A channel, list or mention could not be resolved.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Missing credential or malformed configuration.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The orchestrator attempted an undefined state change.
    #[error(transparent)]
    State(#[from] InvalidTransition),
}

impl Error {
    #[must_use]
    pub fn config(message: impl std::fmt::Display) -> Self {
        Self::Config {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Resolution(_) => ErrorKind::Resolution,
            Self::Config { .. } => ErrorKind::Config,
            Self::State(_) => ErrorKind::Internal,
        }
    }
}

/// Input rejected before resolution starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("message from {origin} is empty")]
    EmptyContent { origin: String },

    #[error("message from {origin} is {actual} characters, exceeding the {limit} character limit")]
    ContentTooLong {
        origin: String,
        limit: usize,
        actual: usize,
    },

    #[error("failed to read message file {}: {reason}", path.display())]
    UnreadableFile { path: PathBuf, reason: String },

    #[error("channel list name cannot be empty")]
    EmptyListName,

    #[error("channel list {list:?} has no channels")]
    EmptyList { list: String },

    #[error("channel list {list:?} has {count} channels, exceeding the limit of {limit}")]
    TooManyChannels {
        list: String,
        count: usize,
        limit: usize,
    },

    #[error("channel list {list:?} contains {target:?} more than once")]
    DuplicateTarget { list: String, target: String },

    #[error("channel list {name:?} is defined more than once")]
    DuplicateList { name: String },
}

/// A name that did not map onto a directory entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("unknown channel {target:?}")]
    UnknownChannel { target: String },

    #[error("channel list {list:?} could not be resolved; unknown channels: {}", targets.join(", "))]
    UnresolvedList { list: String, targets: Vec<String> },

    #[error("no channel list named {name:?}")]
    UnknownList { name: String },

    #[error("unresolved mentions: {}", names.join(", "))]
    UnresolvedMentions { names: Vec<String> },

    #[error("directory lookup for {name:?} failed: {reason}")]
    Lookup { name: String, reason: String },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        let validation: Error = ValidationError::EmptyListName.into();
        assert_eq!(validation.kind(), ErrorKind::Validation);

        let resolution: Error = ResolutionError::UnknownList {
            name: "ops".into(),
        }
        .into();
        assert_eq!(resolution.kind(), ErrorKind::Resolution);

        assert_eq!(Error::config("missing token").kind(), ErrorKind::Config);
    }

    #[test]
    fn too_long_names_limit() {
        let err = ValidationError::ContentTooLong {
            origin: "notes.txt".into(),
            limit: 2000,
            actual: 2001,
        };
        assert!(err.to_string().contains("2000 character limit"));
    }
}
