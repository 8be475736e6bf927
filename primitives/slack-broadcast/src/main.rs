//! Slack Broadcast - Channel and Channel-List Announcer
//!
//! Posts one message to a single Slack channel or to every channel of a
//! named list. `@{Display Name}` and `@handle` placeholders are replaced by
//! user mentions before sending. Nothing is sent unless every channel and
//! every required mention resolves.
//!
//! # Usage
//!
//! ```bash
//! # One channel
//! slack-broadcast "Deploy finished, thanks @{Alice W}" --channel '#eng-announce'
//!
//! # Every channel of a list from channel-lists.toml
//! slack-broadcast --file notes.md --list engineering
//!
//! # Resolve and print, without sending
//! slack-broadcast "hello" --list engineering --dry-run --json
//! ```
//!
//! Exit codes: 0 success, 1 invalid input, 2 configuration or credential
//! problem, 3 resolution failure, 4 delivery failure, 5 internal error.

mod config;
mod report;
mod slack;

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use broadcast_common::{
    BroadcastMessage, BroadcastOrchestrator, BroadcastTarget, ErrorKind, MessageInput,
    UnresolvedMentionPolicy,
};
use clap::{ArgGroup, Parser};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    config::Config,
    slack::{SlackClient, SlackDirectory},
};

const EXIT_INVALID_INPUT: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_RESOLUTION: u8 = 3;
const EXIT_DELIVERY: u8 = 4;
const EXIT_INTERNAL: u8 = 5;

/// Broadcasts a message to one Slack channel or a named channel list.
#[derive(Parser, Debug)]
#[command(name = "slack-broadcast", version)]
#[command(about = "Broadcasts a message to a Slack channel or channel list")]
#[command(group(ArgGroup::new("content").required(true).args(["message", "file"])))]
#[command(group(ArgGroup::new("destination").required(true).args(["channel", "list"])))]
struct Args {
    /// Message text. Up to 40000 characters, sent as written.
    message: Option<String>,

    /// Read the message from a file. Up to 2000 characters after trailing
    /// whitespace is trimmed.
    #[arg(short, long, conflicts_with = "message")]
    file: Option<PathBuf>,

    /// Channel name (with or without '#') or channel id.
    #[arg(short, long)]
    channel: Option<String>,

    /// Name of a channel list from the lists file.
    #[arg(short, long)]
    list: Option<String>,

    /// Resolve everything and report what would be sent.
    #[arg(long)]
    dry_run: bool,

    /// Fail when a mention does not match any user.
    #[arg(long)]
    strict_mentions: bool,

    /// Print the delivery report as JSON.
    #[arg(long)]
    json: bool,

    /// Slack bot token.
    #[arg(long, env = "SLACK_BOT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// TOML file with `[[list]]` entries. Defaults to ./channel-lists.toml
    /// when present.
    #[arg(long, env = "SLACK_BROADCAST_LISTS")]
    lists_file: Option<PathBuf>,

    /// Per-attempt timeout in seconds.
    #[arg(long, env = "SLACK_BROADCAST_TIMEOUT", default_value = "10",
          value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Retries per channel after the first attempt.
    #[arg(long, env = "SLACK_BROADCAST_RETRIES", default_value = "3")]
    retries: u32,

    /// Channels delivered to at once.
    #[arg(long, env = "SLACK_BROADCAST_CONCURRENCY", default_value = "4",
          value_parser = clap::value_parser!(u16).range(1..))]
    concurrency: u16,

    /// Overall delivery deadline in seconds.
    #[arg(long, env = "SLACK_BROADCAST_DEADLINE", default_value = "120",
          value_parser = clap::value_parser!(u64).range(1..))]
    deadline: u64,

    /// Slack Web API base URL.
    #[arg(long, env = "SLACK_API_BASE")]
    api_base: Option<String>,

    /// Debug logging for this tool.
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn target(&self) -> Option<BroadcastTarget> {
        match (&self.channel, &self.list) {
            (Some(channel), None) => Some(BroadcastTarget::Channel(channel.clone())),
            (None, Some(list)) => Some(BroadcastTarget::List(list.clone())),
            _ => None,
        }
    }

    fn input(&self) -> broadcast_common::Result<MessageInput> {
        match (&self.file, &self.message) {
            (Some(path), _) => MessageInput::from_file(path),
            (None, Some(text)) => MessageInput::from_inline(text.clone()),
            (None, None) => MessageInput::from_inline(String::new()),
        }
    }

    fn mention_policy(&self) -> UnresolvedMentionPolicy {
        if self.strict_mentions {
            UnresolvedMentionPolicy::Reject
        } else {
            UnresolvedMentionPolicy::PassThrough
        }
    }
}

fn init_tracing(args: &Args) {
    let default = if args.verbose {
        "warn,slack_broadcast=debug,broadcast_common=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if args.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Validation => EXIT_INVALID_INPUT,
        ErrorKind::Config => EXIT_CONFIG,
        ErrorKind::Resolution => EXIT_RESOLUTION,
        ErrorKind::Delivery => EXIT_DELIVERY,
        ErrorKind::Internal => EXIT_INTERNAL,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_INVALID_INPUT)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_tracing(&args);

    tokio::select! {
        code = run(&args) => code,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, channels still in flight may or may not have received the message");
            ExitCode::from(EXIT_INTERNAL)
        }
    }
}

async fn run(args: &Args) -> ExitCode {
    let (input, config) = match prepare(args) {
        Ok(ready) => ready,
        Err(e) => return fail(&e),
    };
    let Some(target) = args.target() else {
        eprintln!("error: exactly one of --channel or --list is required");
        return ExitCode::from(EXIT_INVALID_INPUT);
    };

    let client = match SlackClient::new(
        config.token.clone(),
        &config.api_base,
        config.settings.attempt_timeout + Duration::from_secs(1),
    ) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %format!("{e:#}"), "cannot create Slack client");
            eprintln!("error: {e:#}");
            return ExitCode::from(EXIT_INTERNAL);
        }
    };

    let orchestrator = BroadcastOrchestrator::new(
        Arc::new(SlackDirectory::users(client.clone())),
        Arc::new(SlackDirectory::channels(client.clone())),
        Arc::new(client),
        config.settings,
    )
    .with_lists(Arc::new(config.lists))
    .with_mention_policy(args.mention_policy());

    let message = BroadcastMessage::new(input, target, args.dry_run);
    let report = match orchestrator.broadcast(&message).await {
        Ok(report) => report,
        Err(e) => return fail(&e),
    };

    if args.json {
        match report::render_json(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("error: serializing report: {e}");
                return ExitCode::from(EXIT_INTERNAL);
            }
        }
    } else {
        println!("{}", report::render_text(&report));
    }

    match report.failure_kind() {
        None => ExitCode::SUCCESS,
        Some(kind) => ExitCode::from(exit_code(kind)),
    }
}

/// Input problems are reported before credentials are checked.
fn prepare(args: &Args) -> broadcast_common::Result<(MessageInput, Config)> {
    let input = args.input()?;
    let config = Config::from_args(args)?;
    Ok((input, config))
}

fn fail(e: &broadcast_common::Error) -> ExitCode {
    error!(error = %e, "broadcast not sent");
    eprintln!("error: {e}");
    ExitCode::from(exit_code(e.kind()))
}
