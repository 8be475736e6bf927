use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

/// A concrete identifier found for a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub id: String,
    pub display_name: String,
}

impl DirectoryEntry {
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Read-only name lookup shared by the mention and channel resolvers.
///
/// `Ok(None)` means the name is unknown; `Err` is reserved for lookups that
/// could not be performed at all.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<Option<DirectoryEntry>>;
}

/// In-memory directory keyed by exact name.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    entries: HashMap<String, DirectoryEntry>,
}

impl StaticDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` as an alias for `entry`.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, entry: DirectoryEntry) -> Self {
        self.insert(name, entry);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: DirectoryEntry) {
        self.entries.insert(name.into(), entry);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn resolve(&self, name: &str) -> Result<Option<DirectoryEntry>> {
        Ok(self.entries.get(name).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_lookup() {
        let dir = StaticDirectory::new()
            .with("general", DirectoryEntry::new("C001", "general"))
            .with("C001", DirectoryEntry::new("C001", "general"));

        assert_eq!(dir.len(), 2);
        let hit = dir.resolve("general").await;
        assert!(matches!(hit, Ok(Some(ref e)) if e.id == "C001"));
        assert!(matches!(dir.resolve("random").await, Ok(None)));
    }
}
