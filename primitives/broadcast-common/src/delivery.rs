//! Per-channel delivery with retries.

use std::{
    fmt,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::channel_list::ResolvedChannel;

/// How a send attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendErrorKind {
    /// The attempt or the delivery deadline timed out.
    Timeout,
    /// Network error or server-side failure.
    Transient,
    /// The platform asked us to slow down.
    RateLimited,
    /// The channel does not exist, is archived, or the bot is not a member.
    InvalidTarget,
    /// The credential was rejected or lacks the required scope.
    Unauthorized,
    /// The platform refused the message itself.
    Rejected,
    /// The sender failed in an unexpected way, e.g. panicked.
    Internal,
}

impl SendErrorKind {
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::Transient | Self::RateLimited)
    }
}

impl fmt::Display for SendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Transient => "transient error",
            Self::RateLimited => "rate limited",
            Self::InvalidTarget => "invalid channel",
            Self::Unauthorized => "unauthorized",
            Self::Rejected => "rejected",
            Self::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// A failed send attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct SendError {
    pub kind: SendErrorKind,
    pub message: String,
    /// Server-provided wait before the next attempt.
    pub retry_after: Option<Duration>,
}

impl SendError {
    #[must_use]
    pub fn new(kind: SendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::new(
            SendErrorKind::Timeout,
            format!("no response within {}ms", after.as_millis()),
        )
    }

    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(SendErrorKind::Transient, message)
    }

    #[must_use]
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(SendErrorKind::RateLimited, "rate limited")
        }
    }

    #[must_use]
    pub fn invalid_target(message: impl Into<String>) -> Self {
        Self::new(SendErrorKind::InvalidTarget, message)
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(SendErrorKind::Unauthorized, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(SendErrorKind::Internal, message)
    }

    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(SendErrorKind::Rejected, message)
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// The platform send primitive. Called once per delivery attempt.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, channel_id: &str, content: &str) -> Result<(), SendError>;
}

/// Retry, timeout and fan-out limits for the delivery phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverySettings {
    /// Extra attempts after the first one for retryable failures.
    pub retry_count: u32,
    /// Upper bound for a single send attempt, and for each backoff delay.
    pub attempt_timeout: Duration,
    /// Delay before the first retry; doubles on each further retry.
    pub base_backoff: Duration,
    /// Upper bound for the whole delivery phase.
    pub deadline: Duration,
    /// Maximum number of channels delivered to at once.
    pub concurrency: usize,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            retry_count: 3,
            attempt_timeout: Duration::from_secs(10),
            base_backoff: Duration::from_millis(500),
            deadline: Duration::from_secs(120),
            concurrency: 4,
        }
    }
}

impl DeliverySettings {
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    /// Delay after failed attempt number `attempt` (1-based).
    ///
    /// `base_backoff * 2^(attempt - 1)`, or the server hint when present,
    /// capped at the per-attempt timeout.
    #[must_use]
    pub fn backoff(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        hint.unwrap_or_else(|| self.base_backoff.saturating_mul(factor))
            .min(self.attempt_timeout)
    }
}

/// Terminal state of one channel's delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Succeeded,
    Failed,
    /// Dry run: nothing was sent.
    Simulated,
}

/// What happened for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    pub channel_id: String,
    pub channel_name: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<SendErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryOutcome {
    fn new(channel: &ResolvedChannel, status: DeliveryStatus, attempts: u32) -> Self {
        Self {
            channel_id: channel.id().to_string(),
            channel_name: channel.display_name().to_string(),
            status,
            attempts,
            error_kind: None,
            error: None,
        }
    }

    #[must_use]
    pub fn succeeded(channel: &ResolvedChannel, attempts: u32) -> Self {
        Self::new(channel, DeliveryStatus::Succeeded, attempts)
    }

    #[must_use]
    pub fn simulated(channel: &ResolvedChannel) -> Self {
        Self::new(channel, DeliveryStatus::Simulated, 1)
    }

    #[must_use]
    pub fn failed(channel: &ResolvedChannel, attempts: u32, error: &SendError) -> Self {
        Self {
            error_kind: Some(error.kind),
            error: Some(error.to_string()),
            ..Self::new(channel, DeliveryStatus::Failed, attempts)
        }
    }

    /// Succeeded or simulated.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            DeliveryStatus::Succeeded | DeliveryStatus::Simulated
        )
    }
}

/// Runs the retry loop for one channel.
///
/// `attempts` is updated before every attempt so that a caller cancelling
/// this future can still report how far it got.
pub(crate) async fn deliver(
    sender: &dyn ChannelSender,
    channel: &ResolvedChannel,
    content: &str,
    settings: &DeliverySettings,
    attempts: &AtomicU32,
) -> DeliveryOutcome {
    let max_attempts = settings.max_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        attempts.store(attempt, Ordering::SeqCst);

        let result = tokio::time::timeout(
            settings.attempt_timeout,
            sender.send(channel.id(), content),
        )
        .await
        .unwrap_or_else(|_| Err(SendError::timeout(settings.attempt_timeout)));

        match result {
            Ok(()) => {
                info!(channel = channel.id(), attempt, "delivered");
                return DeliveryOutcome::succeeded(channel, attempt);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = settings.backoff(attempt, e.retry_after);
                warn!(
                    channel = channel.id(),
                    error = %e,
                    "send failed, retrying ({attempt}/{max_attempts}) in {}ms",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(channel = channel.id(), attempt, error = %e, "delivery failed");
                return DeliveryOutcome::failed(channel, attempt, &e);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::directory::DirectoryEntry;

    /// Replays scripted results, then succeeds.
    struct Scripted {
        script: Mutex<Vec<Result<(), SendError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(mut script: Vec<Result<(), SendError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ChannelSender for Scripted {
        async fn send(&self, _channel_id: &str, _content: &str) -> Result<(), SendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.lock().unwrap().pop().unwrap_or(Ok(()))
        }
    }

    fn channel() -> ResolvedChannel {
        DirectoryEntry::new("C1", "general").into()
    }

    fn fast(retry_count: u32) -> DeliverySettings {
        DeliverySettings {
            retry_count,
            attempt_timeout: Duration::from_millis(200),
            base_backoff: Duration::from_millis(1),
            ..DeliverySettings::default()
        }
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        let settings = DeliverySettings {
            base_backoff: Duration::from_millis(100),
            attempt_timeout: Duration::from_millis(350),
            ..DeliverySettings::default()
        };
        assert_eq!(settings.backoff(1, None), Duration::from_millis(100));
        assert_eq!(settings.backoff(2, None), Duration::from_millis(200));
        assert_eq!(settings.backoff(3, None), Duration::from_millis(350));
        assert_eq!(settings.backoff(40, None), Duration::from_millis(350));
        assert_eq!(
            settings.backoff(1, Some(Duration::from_secs(30))),
            Duration::from_millis(350)
        );
        assert_eq!(
            settings.backoff(1, Some(Duration::from_millis(5))),
            Duration::from_millis(5)
        );
    }

    #[test]
    fn retryable_kinds() {
        assert!(SendError::timeout(Duration::from_secs(1)).is_retryable());
        assert!(SendError::transient("reset").is_retryable());
        assert!(SendError::rate_limited(None).is_retryable());
        assert!(!SendError::invalid_target("channel_not_found").is_retryable());
        assert!(!SendError::unauthorized("invalid_auth").is_retryable());
        assert!(!SendError::rejected("msg_too_long").is_retryable());
    }

    #[tokio::test]
    async fn retryable_failure_uses_every_attempt() {
        let sender = Scripted::new(vec![Err(SendError::transient("boom")); 10]);
        let attempts = AtomicU32::new(0);
        let outcome = deliver(&sender, &channel(), "hi", &fast(2), &attempts).await;

        assert_eq!(outcome.status, DeliveryStatus::Failed);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.error_kind, Some(SendErrorKind::Transient));
        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let sender = Scripted::new(vec![Err(SendError::invalid_target("channel_not_found"))]);
        let outcome = deliver(&sender, &channel(), "hi", &fast(5), &AtomicU32::new(0)).await;

        assert_eq!(outcome.status, DeliveryStatus::Failed);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.error_kind, Some(SendErrorKind::InvalidTarget));
        assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_rate_limit() {
        let sender = Scripted::new(vec![
            Err(SendError::rate_limited(Some(Duration::from_millis(2)))),
            Err(SendError::transient("502")),
        ]);
        let outcome = deliver(&sender, &channel(), "hi", &fast(3), &AtomicU32::new(0)).await;

        assert_eq!(outcome.status, DeliveryStatus::Succeeded);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.error.is_none());
    }

    struct Hanging;

    #[async_trait]
    impl ChannelSender for Hanging {
        async fn send(&self, _channel_id: &str, _content: &str) -> Result<(), SendError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn slow_attempts_time_out_and_retry() {
        let settings = DeliverySettings {
            attempt_timeout: Duration::from_millis(20),
            ..fast(1)
        };
        let outcome = deliver(&Hanging, &channel(), "hi", &settings, &AtomicU32::new(0)).await;

        assert_eq!(outcome.status, DeliveryStatus::Failed);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.error_kind, Some(SendErrorKind::Timeout));
    }

    #[test]
    fn outcome_serializes_without_empty_errors() {
        let json = serde_json::to_value(DeliveryOutcome::simulated(&channel())).unwrap();
        assert_eq!(json["status"], "simulated");
        assert_eq!(json["attempts"], 1);
        assert!(json.get("error").is_none());
    }
}
