//! Broadcast Common - Mention Resolution and Channel Fan-out
//!
//! Shared core for broadcasting one message to a Slack channel or to a named
//! list of channels:
//!
//! - [`tokenizer`] finds `@{name}` and `@name` placeholders.
//! - [`mention`] swaps them for user references via a [`Directory`].
//! - [`channel_list`] validates and resolves named channel lists.
//! - [`message`] enforces content limits per input source.
//! - [`orchestrator`] resolves everything up front, then delivers to every
//!   channel concurrently with retries, and reports per-channel outcomes.
//!
//! Platform access is injected through the [`Directory`] and
//! [`ChannelSender`] traits.

pub mod channel_list;
pub mod delivery;
pub mod directory;
pub mod error;
pub mod mention;
pub mod message;
pub mod orchestrator;
pub mod state;
pub mod tokenizer;

pub use channel_list::{
    ChannelListRegistry, ChannelListResolver, ChannelTarget, NamedChannelList, ResolvedChannel,
};
pub use delivery::{
    ChannelSender, DeliveryOutcome, DeliverySettings, DeliveryStatus, SendError, SendErrorKind,
};
pub use directory::{Directory, DirectoryEntry, StaticDirectory};
pub use error::{Error, ErrorKind, ResolutionError, Result, ValidationError};
pub use mention::{MentionResolver, ResolvedText, UnresolvedMentionPolicy};
pub use message::{BroadcastMessage, BroadcastTarget, MessageInput, MessageSource};
pub use orchestrator::{BroadcastOrchestrator, DeliveryReport};
pub use state::{BroadcastState, InvalidTransition};
pub use tokenizer::{MentionSyntax, MentionToken, tokenize};
