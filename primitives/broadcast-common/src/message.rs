//! Validated message content and the broadcast request built from it.
//!
//! File-sourced content comes from template files and is capped at 2000
//! characters after trailing whitespace is trimmed. Inline content is kept
//! verbatim and may use Slack's full 40000 character message size.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Result, ValidationError};

/// Maximum length of file-sourced content, after trimming.
pub const FILE_CONTENT_LIMIT: usize = 2000;

/// Maximum length of inline content.
pub const INLINE_CONTENT_LIMIT: usize = 40_000;

/// Number of characters returned by [`MessageInput::preview`].
pub const PREVIEW_CHARS: usize = 200;

/// Where message content came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageSource {
    File { path: PathBuf },
    Inline,
}

impl MessageSource {
    fn describe(&self) -> String {
        match self {
            Self::File { path } => path.display().to_string(),
            Self::Inline => "inline text".to_string(),
        }
    }
}

/// Message content that passed the length checks for its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInput {
    content: String,
    source: MessageSource,
    limit: usize,
}

impl MessageInput {
    /// Validates content read from a template file.
    ///
    /// Only trailing whitespace and newlines are removed; leading and inner
    /// whitespace is part of the message.
    pub fn from_file_content(raw: &str, source_path: impl Into<PathBuf>) -> Result<Self> {
        let source = MessageSource::File {
            path: source_path.into(),
        };
        let content = raw.trim_end();
        Self::checked(content.to_string(), source, FILE_CONTENT_LIMIT)
    }

    /// Reads `path` as UTF-8 and validates it as file content.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| ValidationError::UnreadableFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_file_content(&raw, path)
    }

    /// Validates content passed on the command line, without trimming.
    pub fn from_inline(raw: impl Into<String>) -> Result<Self> {
        Self::checked(raw.into(), MessageSource::Inline, INLINE_CONTENT_LIMIT)
    }

    fn checked(content: String, source: MessageSource, limit: usize) -> Result<Self> {
        let actual = content.chars().count();
        if actual == 0 {
            return Err(ValidationError::EmptyContent {
                origin: source.describe(),
            }
            .into());
        }
        if actual > limit {
            return Err(ValidationError::ContentTooLong {
                origin: source.describe(),
                limit,
                actual,
            }
            .into());
        }
        Ok(Self {
            content,
            source,
            limit,
        })
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn source(&self) -> &MessageSource {
        &self.source
    }

    /// The length limit that applied to this content.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Length in characters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.content.chars().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// First 200 characters, for logs.
    #[must_use]
    pub fn preview(&self) -> &str {
        match self.content.char_indices().nth(PREVIEW_CHARS) {
            Some((idx, _)) => &self.content[..idx],
            None => &self.content,
        }
    }
}

/// Where a broadcast goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum BroadcastTarget {
    /// One channel, by id or name.
    Channel(String),
    /// A configured named channel list.
    List(String),
}

/// A single send request. Built once per invocation.
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    content: MessageInput,
    target: BroadcastTarget,
    dry_run: bool,
    created_at: DateTime<Utc>,
}

impl BroadcastMessage {
    #[must_use]
    pub fn new(content: MessageInput, target: BroadcastTarget, dry_run: bool) -> Self {
        Self {
            content,
            target,
            dry_run,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn content(&self) -> &MessageInput {
        &self.content
    }

    #[must_use]
    pub fn target(&self) -> &BroadcastTarget {
        &self.target
    }

    #[must_use]
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
