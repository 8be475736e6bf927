//! Runtime configuration assembled from flags, environment and the channel
//! lists file.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use broadcast_common::{ChannelListRegistry, DeliverySettings, Error, Result};
use tracing::debug;

use crate::{Args, slack::DEFAULT_API_BASE};

/// Lists file read from the working directory when none is given.
pub const DEFAULT_LISTS_FILE: &str = "channel-lists.toml";

#[derive(Debug)]
pub struct Config {
    pub token: String,
    pub api_base: String,
    pub settings: DeliverySettings,
    pub lists: ChannelListRegistry,
}

impl Config {
    pub fn from_args(args: &Args) -> Result<Self> {
        let token = args
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::config("no Slack bot token; set SLACK_BOT_TOKEN or pass --token"))?
            .to_string();

        let settings = DeliverySettings {
            retry_count: args.retries,
            attempt_timeout: Duration::from_secs(args.timeout),
            deadline: Duration::from_secs(args.deadline),
            concurrency: usize::from(args.concurrency),
            ..DeliverySettings::default()
        };
        if settings.deadline < settings.attempt_timeout {
            return Err(Error::config(format!(
                "deadline ({}s) is shorter than the per-attempt timeout ({}s)",
                args.deadline, args.timeout
            )));
        }

        Ok(Self {
            token,
            api_base: args
                .api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            settings,
            lists: load_lists(args.lists_file.as_deref())?,
        })
    }
}

/// An explicit path must exist. The default file is optional.
fn load_lists(path: Option<&Path>) -> Result<ChannelListRegistry> {
    match path {
        Some(path) => ChannelListRegistry::load(path),
        None => {
            let path = PathBuf::from(DEFAULT_LISTS_FILE);
            if path.exists() {
                ChannelListRegistry::load(&path)
            } else {
                debug!(path = %path.display(), "no channel lists file");
                Ok(ChannelListRegistry::new())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::io::Write;

    use broadcast_common::{ErrorKind, ValidationError};
    use clap::Parser;
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["slack-broadcast", "hello", "--channel", "#eng"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    fn lists_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn flags_become_delivery_settings() {
        let mut args = parse(&["--retries", "1", "--timeout", "3", "--concurrency", "8"]);
        args.token = Some("xoxb-1".into());
        args.deadline = 30;

        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.token, "xoxb-1");
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.settings.retry_count, 1);
        assert_eq!(config.settings.attempt_timeout, Duration::from_secs(3));
        assert_eq!(config.settings.deadline, Duration::from_secs(30));
        assert_eq!(config.settings.concurrency, 8);
    }

    #[test]
    fn missing_token_is_config_error() {
        let mut args = parse(&[]);
        args.token = Some("   ".into());
        let err = Config::from_args(&args).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        args.token = None;
        assert_eq!(Config::from_args(&args).unwrap_err().kind(), ErrorKind::Config);
    }

    #[test]
    fn deadline_shorter_than_attempt_is_rejected() {
        let mut args = parse(&[]);
        args.token = Some("xoxb-1".into());
        args.timeout = 20;
        args.deadline = 5;
        assert_eq!(Config::from_args(&args).unwrap_err().kind(), ErrorKind::Config);
    }

    #[test]
    fn explicit_lists_file_is_loaded() {
        let file = lists_file(
            r##"
            [[list]]
            name = "eng"
            channels = ["#eng-announce", "C0123"]
            "##,
        );
        let lists = load_lists(Some(file.path())).unwrap();
        assert_eq!(lists.names().collect::<Vec<_>>(), vec!["eng"]);
        assert_eq!(lists.get("eng").unwrap().targets().len(), 2);
    }

    #[test]
    fn explicit_lists_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_lists(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn duplicate_list_names_are_rejected() {
        let file = lists_file(
            r#"
            [[list]]
            name = "eng"
            channels = ["C1"]

            [[list]]
            name = "eng"
            channels = ["C2"]
            "#,
        );
        let err = load_lists(Some(file.path())).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::DuplicateList { .. })
        ));
    }

    #[test]
    fn malformed_lists_file_is_config_error() {
        let file = lists_file("[[list]]\nname = 3\n");
        let err = load_lists(Some(file.path())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
