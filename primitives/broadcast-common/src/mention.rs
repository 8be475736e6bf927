use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    directory::Directory,
    error::{ResolutionError, Result},
    tokenizer::tokenize,
};

/// What to do with a mention whose name is not in the directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedMentionPolicy {
    /// Keep the placeholder text as written.
    #[default]
    PassThrough,
    /// Refuse to send the message.
    Reject,
}

/// Message text after mention substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedText {
    pub text: String,
    /// Distinct names left unresolved, in order of first appearance.
    pub unresolved: Vec<String>,
}

/// Replaces mention placeholders with Slack user references (`<@U123>`).
pub struct MentionResolver {
    directory: Arc<dyn Directory>,
    policy: UnresolvedMentionPolicy,
}

impl MentionResolver {
    pub fn new(directory: Arc<dyn Directory>, policy: UnresolvedMentionPolicy) -> Self {
        Self { directory, policy }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: UnresolvedMentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolves every mention in `text`. Text outside the placeholders is
    /// copied through untouched.
    pub async fn resolve(&self, text: &str) -> Result<ResolvedText> {
        let mut ids: HashMap<&str, Option<String>> = HashMap::new();
        let mut unresolved: Vec<String> = Vec::new();
        let mut out = String::with_capacity(text.len());
        let mut last = 0;

        for token in tokenize(text) {
            let id = match ids.get(token.name) {
                Some(id) => id.clone(),
                None => {
                    let id = self.directory.resolve(token.name).await?.map(|e| e.id);
                    debug!(name = token.name, found = id.is_some(), "mention lookup");
                    ids.insert(token.name, id.clone());
                    id
                }
            };

            out.push_str(&text[last..token.start]);
            match id {
                Some(id) => {
                    out.push_str("<@");
                    out.push_str(&id);
                    out.push('>');
                }
                None => {
                    out.push_str(&text[token.span()]);
                    if !unresolved.iter().any(|n| n == token.name) {
                        unresolved.push(token.name.to_string());
                    }
                }
            }
            last = token.end;
        }
        out.push_str(&text[last..]);

        if self.policy == UnresolvedMentionPolicy::Reject && !unresolved.is_empty() {
            return Err(ResolutionError::UnresolvedMentions { names: unresolved }.into());
        }

        Ok(ResolvedText {
            text: out,
            unresolved,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        directory::{DirectoryEntry, StaticDirectory},
        error::Error,
    };

    fn people() -> Arc<StaticDirectory> {
        Arc::new(
            StaticDirectory::new()
                .with("alice", DirectoryEntry::new("U001", "Alice"))
                .with("Bob Stone", DirectoryEntry::new("U002", "Bob Stone")),
        )
    }

    #[tokio::test]
    async fn substitutes_known_names() {
        let resolver = MentionResolver::new(people(), UnresolvedMentionPolicy::PassThrough);
        let resolved = resolver
            .resolve("Hi @alice and @{Bob Stone}, deploy at 5.")
            .await
            .unwrap();
        assert_eq!(resolved.text, "Hi <@U001> and <@U002>, deploy at 5.");
        assert!(resolved.unresolved.is_empty());
    }

    #[tokio::test]
    async fn pass_through_keeps_placeholder() {
        let resolver = MentionResolver::new(people(), UnresolvedMentionPolicy::PassThrough);
        let resolved = resolver
            .resolve("@{ghost} and @ghost meet @alice")
            .await
            .unwrap();
        assert_eq!(resolved.text, "@{ghost} and @ghost meet <@U001>");
        assert_eq!(resolved.unresolved, vec!["ghost".to_string()]);
    }

    #[tokio::test]
    async fn reject_fails_whole_message() {
        let resolver = MentionResolver::new(people(), UnresolvedMentionPolicy::Reject);
        let err = resolver
            .resolve("@alice @nobody @{someone else}")
            .await
            .unwrap_err();
        match err {
            Error::Resolution(ResolutionError::UnresolvedMentions { names }) => {
                assert_eq!(names, vec!["nobody".to_string(), "someone else".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn text_without_mentions_is_unchanged() {
        let resolver = MentionResolver::new(people(), UnresolvedMentionPolicy::Reject);
        let text = "nothing to mention here\n\twith odd  spacing ";
        let resolved = resolver.resolve(text).await.unwrap();
        assert_eq!(resolved.text, text);
    }

    struct Counting {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl Directory for Counting {
        async fn resolve(&self, name: &str) -> Result<Option<DirectoryEntry>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(Some(DirectoryEntry::new(format!("U-{name}"), name)))
        }
    }

    #[tokio::test]
    async fn each_name_looked_up_once() {
        let dir = Arc::new(Counting {
            lookups: AtomicUsize::new(0),
        });
        let resolver = MentionResolver::new(dir.clone(), UnresolvedMentionPolicy::Reject);
        let resolved = resolver.resolve("@a @b @a @{a} @b").await.unwrap();
        assert_eq!(resolved.text, "<@U-a> <@U-b> <@U-a> <@U-a> <@U-b>");
        assert_eq!(dir.lookups.load(Ordering::SeqCst), 2);
    }
}
