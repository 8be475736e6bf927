//! Top-level broadcast driver.
//!
//! A broadcast resolves mentions and channels first and only then talks to
//! the send primitive, so any validation or resolution failure ends the run
//! without a single message going out. Once delivery starts, each channel is
//! on its own: one channel failing never stops the others.

use std::{
    any::Any,
    collections::VecDeque,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Instant,
};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::{sync::Mutex, task::JoinSet};
use tracing::{debug, info, warn};

use crate::{
    channel_list::{ChannelListRegistry, ChannelListResolver, ResolvedChannel},
    delivery::{
        ChannelSender, DeliveryOutcome, DeliverySettings, DeliveryStatus, SendError, SendErrorKind,
        deliver,
    },
    directory::Directory,
    error::{ErrorKind, Result},
    mention::{MentionResolver, UnresolvedMentionPolicy},
    message::{BroadcastMessage, BroadcastTarget},
    state::BroadcastState,
};

/// Everything a broadcast produced, in channel resolution order.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub state: BroadcastState,
    /// When the broadcast was requested.
    pub requested_at: DateTime<Utc>,
    pub dry_run: bool,
    /// Content after mention substitution, as sent (or as it would be sent).
    pub content: String,
    pub unresolved_mentions: Vec<String>,
    pub outcomes: Vec<DeliveryOutcome>,
    pub elapsed_ms: u64,
}

impl DeliveryReport {
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(DeliveryOutcome::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeliveryOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    #[must_use]
    pub fn count(&self, status: DeliveryStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Failure class of the report, if any channel failed.
    ///
    /// A rejected credential outranks ordinary delivery failures.
    #[must_use]
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        let mut kind = None;
        for failure in self.failures() {
            if failure.error_kind == Some(SendErrorKind::Unauthorized) {
                return Some(ErrorKind::Config);
            }
            kind = Some(ErrorKind::Delivery);
        }
        kind
    }
}

/// Drives a [`BroadcastMessage`] from resolution to a [`DeliveryReport`].
pub struct BroadcastOrchestrator {
    mentions: MentionResolver,
    channels: ChannelListResolver,
    lists: Arc<ChannelListRegistry>,
    sender: Arc<dyn ChannelSender>,
    settings: DeliverySettings,
}

impl BroadcastOrchestrator {
    /// `users` resolves mention names, `channels` resolves channel names and
    /// ids. Unresolved mentions pass through unless a policy is set.
    pub fn new(
        users: Arc<dyn Directory>,
        channels: Arc<dyn Directory>,
        sender: Arc<dyn ChannelSender>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            mentions: MentionResolver::new(users, UnresolvedMentionPolicy::default()),
            channels: ChannelListResolver::new(channels),
            lists: Arc::new(ChannelListRegistry::new()),
            sender,
            settings,
        }
    }

    #[must_use]
    pub fn with_lists(mut self, lists: Arc<ChannelListRegistry>) -> Self {
        self.lists = lists;
        self
    }

    #[must_use]
    pub fn with_mention_policy(mut self, policy: UnresolvedMentionPolicy) -> Self {
        self.mentions = self.mentions.with_policy(policy);
        self
    }

    /// Runs one broadcast.
    ///
    /// Returns `Err` only when the broadcast never reached delivery. Delivery
    /// failures are reported per channel in the returned report.
    pub async fn broadcast(&self, message: &BroadcastMessage) -> Result<DeliveryReport> {
        let started = Instant::now();
        let mut state = BroadcastState::Pending;

        advance(&mut state, BroadcastState::Resolving)?;
        info!(
            destination = ?message.target(),
            requested_at = %message.created_at(),
            dry_run = message.dry_run(),
            chars = message.content().len(),
            preview = message.content().preview(),
            "resolving broadcast"
        );

        let resolved = tokio::try_join!(
            self.mentions.resolve(message.content().content()),
            self.resolve_target(message.target()),
        );
        let (text, channels) = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                advance(&mut state, BroadcastState::Failed)?;
                warn!(error = %e, "broadcast aborted before delivery");
                return Err(e);
            }
        };
        if !text.unresolved.is_empty() {
            warn!(names = ?text.unresolved, "mentions left as written");
        }

        advance(&mut state, BroadcastState::Delivering)?;
        let outcomes = if message.dry_run() {
            channels.iter().map(DeliveryOutcome::simulated).collect()
        } else {
            self.deliver_all(&channels, &text.text).await
        };
        advance(&mut state, BroadcastState::Completed)?;

        let report = DeliveryReport {
            state,
            requested_at: message.created_at(),
            dry_run: message.dry_run(),
            content: text.text,
            unresolved_mentions: text.unresolved,
            outcomes,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        info!(
            channels = report.outcomes.len(),
            succeeded = report.count(DeliveryStatus::Succeeded),
            failed = report.count(DeliveryStatus::Failed),
            simulated = report.count(DeliveryStatus::Simulated),
            "broadcast completed"
        );
        Ok(report)
    }

    async fn resolve_target(&self, target: &BroadcastTarget) -> Result<Vec<ResolvedChannel>> {
        match target {
            BroadcastTarget::Channel(raw) => Ok(vec![self.channels.resolve_channel(raw).await?]),
            BroadcastTarget::List(name) => {
                let list = self.lists.get(name)?;
                Ok(self.channels.resolve(list).await?.to_vec())
            }
        }
    }

    /// Fans `content` out to `channels` through a bounded worker pool.
    ///
    /// Workers pull `(index, channel)` pairs off a shared queue and write
    /// outcomes into the slot for that index, so the result keeps resolution
    /// order. A panicking send fails only its own channel. When the deadline
    /// passes, workers are aborted and every empty slot becomes a timeout
    /// failure.
    async fn deliver_all(&self, channels: &[ResolvedChannel], content: &str) -> Vec<DeliveryOutcome> {
        let total = channels.len();
        let workers = self.settings.concurrency.max(1).min(total);
        debug!(channels = total, workers, "starting delivery");

        let content: Arc<str> = Arc::from(content);
        let queue = Arc::new(Mutex::new(
            channels.iter().cloned().enumerate().collect::<VecDeque<_>>(),
        ));
        let slots: Arc<Mutex<Vec<Option<DeliveryOutcome>>>> =
            Arc::new(Mutex::new(vec![None; total]));
        let attempts: Arc<Vec<AtomicU32>> =
            Arc::new((0..total).map(|_| AtomicU32::new(0)).collect());

        let mut pool = JoinSet::new();
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let slots = Arc::clone(&slots);
            let attempts = Arc::clone(&attempts);
            let sender = Arc::clone(&self.sender);
            let content = Arc::clone(&content);
            let settings = self.settings;

            pool.spawn(async move {
                loop {
                    let Some((index, channel)) = queue.lock().await.pop_front() else {
                        break;
                    };
                    let delivery = deliver(
                        sender.as_ref(),
                        &channel,
                        &content,
                        &settings,
                        &attempts[index],
                    );
                    let outcome = match AssertUnwindSafe(delivery).catch_unwind().await {
                        Ok(outcome) => outcome,
                        Err(panic) => {
                            let reason = panic_message(&*panic);
                            warn!(channel = channel.id(), reason, "sender panicked");
                            DeliveryOutcome::failed(
                                &channel,
                                attempts[index].load(Ordering::SeqCst).max(1),
                                &SendError::internal(format!("sender panicked: {reason}")),
                            )
                        }
                    };
                    slots.lock().await[index] = Some(outcome);
                }
            });
        }

        let drained = tokio::time::timeout(self.settings.deadline, async {
            while let Some(joined) = pool.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "delivery worker stopped");
                }
            }
        })
        .await;

        let deadline_hit = drained.is_err();
        if deadline_hit {
            warn!(
                deadline_ms = self.settings.deadline.as_millis(),
                "delivery deadline exceeded, cancelling outstanding channels"
            );
            pool.abort_all();
            while pool.join_next().await.is_some() {}
        }

        let mut slots = slots.lock().await;
        channels
            .iter()
            .enumerate()
            .map(|(index, channel)| {
                slots[index].take().unwrap_or_else(|| {
                    let started = attempts[index].load(Ordering::SeqCst).max(1);
                    let error = if deadline_hit {
                        SendError::new(SendErrorKind::Timeout, "delivery deadline exceeded")
                    } else {
                        SendError::internal("delivery worker stopped before finishing")
                    };
                    DeliveryOutcome::failed(channel, started, &error)
                })
            })
            .collect()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn advance(state: &mut BroadcastState, to: BroadcastState) -> Result<()> {
    *state = state.transition(to)?;
    debug!(state = %state, "broadcast state");
    Ok(())
}
