//! Named channel lists and their resolution into deliverable channels.
//!
//! A list resolves as a unit: either every target maps onto a channel and the
//! result is cached on the list for the rest of the process, or the whole
//! list fails and nothing is cached.

use std::{collections::HashSet, path::Path, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{
    directory::{Directory, DirectoryEntry},
    error::{Error, ResolutionError, Result, ValidationError},
};

/// Maximum number of channels in one named list.
pub const MAX_CHANNELS_PER_LIST: usize = 100;

/// A channel reference as written in configuration: a name or an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelTarget(String);

impl ChannelTarget {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChannelTarget {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// A channel that was found in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedChannel {
    id: String,
    display_name: String,
    resolved: bool,
}

impl ResolvedChannel {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }
}

impl From<DirectoryEntry> for ResolvedChannel {
    fn from(entry: DirectoryEntry) -> Self {
        Self {
            id: entry.id,
            display_name: entry.display_name,
            resolved: true,
        }
    }
}

/// An operator-defined group of channels.
#[derive(Debug)]
pub struct NamedChannelList {
    name: String,
    targets: Vec<ChannelTarget>,
    resolved: OnceCell<Vec<ResolvedChannel>>,
}

impl NamedChannelList {
    pub fn new(name: impl Into<String>, targets: Vec<ChannelTarget>) -> Self {
        Self {
            name: name.into(),
            targets,
            resolved: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn targets(&self) -> &[ChannelTarget] {
        &self.targets
    }

    /// The resolved channels, once resolution has succeeded.
    #[must_use]
    pub fn resolved(&self) -> Option<&[ResolvedChannel]> {
        self.resolved.get().map(Vec::as_slice)
    }

    /// Checks name, size and uniqueness without touching the directory.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyListName);
        }
        if self.targets.is_empty() {
            return Err(ValidationError::EmptyList {
                list: self.name.clone(),
            });
        }
        if self.targets.len() > MAX_CHANNELS_PER_LIST {
            return Err(ValidationError::TooManyChannels {
                list: self.name.clone(),
                count: self.targets.len(),
                limit: MAX_CHANNELS_PER_LIST,
            });
        }

        let mut seen = HashSet::with_capacity(self.targets.len());
        for target in &self.targets {
            if !seen.insert(target.raw()) {
                return Err(ValidationError::DuplicateTarget {
                    list: self.name.clone(),
                    target: target.raw().to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Resolves channel references through a [`Directory`].
#[derive(Clone)]
pub struct ChannelListResolver {
    directory: Arc<dyn Directory>,
}

impl ChannelListResolver {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// Validates `list` and resolves every target, all or nothing.
    ///
    /// The first successful resolution is stored on the list; later calls
    /// return it without further lookups.
    pub async fn resolve<'a>(&self, list: &'a NamedChannelList) -> Result<&'a [ResolvedChannel]> {
        list.validate()?;
        let channels = list
            .resolved
            .get_or_try_init(|| self.lookup_all(list))
            .await?;
        Ok(channels.as_slice())
    }

    /// Resolves a single explicit channel. No list rules apply.
    pub async fn resolve_channel(&self, raw: &str) -> Result<ResolvedChannel> {
        match self.directory.resolve(raw).await? {
            Some(entry) => Ok(entry.into()),
            None => Err(ResolutionError::UnknownChannel {
                target: raw.to_string(),
            }
            .into()),
        }
    }

    async fn lookup_all(&self, list: &NamedChannelList) -> Result<Vec<ResolvedChannel>> {
        let mut channels = Vec::with_capacity(list.targets.len());
        let mut missing = Vec::new();

        for target in &list.targets {
            match self.directory.resolve(target.raw()).await? {
                Some(entry) => {
                    debug!(list = %list.name, channel = target.raw(), id = %entry.id, "channel resolved");
                    channels.push(entry.into());
                }
                None => missing.push(target.raw().to_string()),
            }
        }

        if !missing.is_empty() {
            return Err(ResolutionError::UnresolvedList {
                list: list.name.clone(),
                targets: missing,
            }
            .into());
        }

        info!(list = %list.name, channels = channels.len(), "channel list resolved");
        Ok(channels)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ListsFile {
    #[serde(default)]
    list: Vec<ListEntry>,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    name: String,
    #[serde(default)]
    channels: Vec<ChannelTarget>,
}

/// All configured channel lists, by name.
#[derive(Debug, Default)]
pub struct ChannelListRegistry {
    lists: Vec<NamedChannelList>,
}

impl ChannelListRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses lists from TOML:
    ///
    /// ```toml
    /// [[list]]
    /// name = "engineering"
    /// channels = ["#eng-announce", "C0123456789"]
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: ListsFile =
            toml::from_str(source).map_err(|e| Error::config(format!("channel lists: {e}")))?;

        let mut registry = Self::new();
        for entry in file.list {
            registry.insert(NamedChannelList::new(entry.name, entry.channels))?;
        }
        Ok(registry)
    }

    /// Loads lists from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    pub fn insert(&mut self, list: NamedChannelList) -> std::result::Result<(), ValidationError> {
        if self.lists.iter().any(|l| l.name == list.name) {
            return Err(ValidationError::DuplicateList { name: list.name });
        }
        self.lists.push(list);
        Ok(())
    }

    pub fn get(&self, name: &str) -> std::result::Result<&NamedChannelList, ResolutionError> {
        self.lists
            .iter()
            .find(|l| l.name == name)
            .ok_or_else(|| ResolutionError::UnknownList {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.lists.iter().map(|l| l.name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lists.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}
