//! Minimal Slack Web API client: `chat.postMessage` for delivery, and
//! `users.list` / `conversations.list` as lookup directories.

use std::{collections::HashMap, time::Duration};

use anyhow::{Context, bail};
use async_trait::async_trait;
use broadcast_common::{
    ChannelSender, Directory, DirectoryEntry, Error, ResolutionError, SendError, SendErrorKind,
};
use reqwest::{Client, StatusCode, header::RETRY_AFTER};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, info};

pub const DEFAULT_API_BASE: &str = "https://slack.com/api";

/// Page size for list endpoints.
const PAGE_LIMIT: u32 = 200;

/// Slack error codes that mean the token itself is unusable.
const AUTH_ERRORS: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
    "token_expired",
    "missing_scope",
    "no_permission",
];

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct UsersPage {
    ok: bool,
    error: Option<String>,
    #[serde(default)]
    members: Vec<SlackUser>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Deserialize)]
struct ChannelsPage {
    ok: bool,
    error: Option<String>,
    #[serde(default)]
    channels: Vec<SlackChannel>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackUser {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub profile: SlackProfile,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackProfile {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub real_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackChannel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_archived: bool,
}

/// Authenticated Slack Web API client.
#[derive(Clone)]
pub struct SlackClient {
    http: Client,
    token: String,
    api_base: String,
}

impl SlackClient {
    pub fn new(token: String, api_base: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            token,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base)
    }

    async fn users_page(&self, cursor: &str) -> anyhow::Result<UsersPage> {
        let mut query = vec![("limit", PAGE_LIMIT.to_string())];
        if !cursor.is_empty() {
            query.push(("cursor", cursor.to_string()));
        }
        let page: UsersPage = self
            .http
            .get(self.url("users.list"))
            .bearer_auth(&self.token)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if !page.ok {
            bail!(page.error.unwrap_or_else(|| "unknown error".into()));
        }
        Ok(page)
    }

    async fn channels_page(&self, cursor: &str) -> anyhow::Result<ChannelsPage> {
        let mut query = vec![
            ("limit", PAGE_LIMIT.to_string()),
            ("types", "public_channel,private_channel".to_string()),
            ("exclude_archived", "true".to_string()),
        ];
        if !cursor.is_empty() {
            query.push(("cursor", cursor.to_string()));
        }
        let page: ChannelsPage = self
            .http
            .get(self.url("conversations.list"))
            .bearer_auth(&self.token)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if !page.ok {
            bail!(page.error.unwrap_or_else(|| "unknown error".into()));
        }
        Ok(page)
    }

    /// Every workspace member, following pagination.
    pub async fn list_users(&self) -> anyhow::Result<Vec<SlackUser>> {
        let mut users = Vec::new();
        let mut cursor = String::new();
        loop {
            let page = self.users_page(&cursor).await.context("users.list")?;
            users.extend(page.members);
            cursor = page.response_metadata.next_cursor;
            if cursor.is_empty() {
                break;
            }
        }
        Ok(users)
    }

    /// Every non-archived conversation the token can see.
    pub async fn list_channels(&self) -> anyhow::Result<Vec<SlackChannel>> {
        let mut channels = Vec::new();
        let mut cursor = String::new();
        loop {
            let page = self
                .channels_page(&cursor)
                .await
                .context("conversations.list")?;
            channels.extend(page.channels);
            cursor = page.response_metadata.next_cursor;
            if cursor.is_empty() {
                break;
            }
        }
        Ok(channels)
    }
}

#[async_trait]
impl ChannelSender for SlackClient {
    async fn send(&self, channel_id: &str, content: &str) -> Result<(), SendError> {
        let response = self
            .http
            .post(self.url("chat.postMessage"))
            .bearer_auth(&self.token)
            .json(&json!({
                "channel": channel_id,
                "text": content,
            }))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(SendError::rate_limited(retry_after));
        }
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(SendError::unauthorized(format!("HTTP {status}")));
        }
        if status.is_server_error() {
            return Err(SendError::transient(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(SendError::rejected(format!("HTTP {status}")));
        }

        let parsed: PostMessageResponse = response.json().await.map_err(classify_transport)?;
        if parsed.ok {
            Ok(())
        } else {
            Err(classify_api_error(
                parsed.error.as_deref().unwrap_or("unknown_error"),
            ))
        }
    }
}

fn classify_transport(e: reqwest::Error) -> SendError {
    if e.is_timeout() {
        SendError::new(SendErrorKind::Timeout, e.to_string())
    } else if e.is_decode() {
        SendError::rejected(format!("unreadable response: {e}"))
    } else {
        SendError::transient(e.to_string())
    }
}

/// Maps a Slack `error` code onto a delivery error kind.
pub fn classify_api_error(code: &str) -> SendError {
    match code {
        "ratelimited" | "rate_limited" => SendError::rate_limited(None),
        "internal_error" | "fatal_error" | "service_unavailable" | "request_timeout" => {
            SendError::transient(code)
        }
        "channel_not_found" | "is_archived" | "not_in_channel" | "channel_is_archived" => {
            SendError::invalid_target(code)
        }
        code if AUTH_ERRORS.contains(&code) => SendError::unauthorized(code),
        _ => SendError::rejected(code),
    }
}

/// What a [`SlackDirectory`] looks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryKind {
    Users,
    Channels,
}

/// Slack users or channels, fetched on first lookup and kept for the
/// lifetime of the process.
pub struct SlackDirectory {
    client: SlackClient,
    kind: DirectoryKind,
    index: OnceCell<HashMap<String, DirectoryEntry>>,
}

impl SlackDirectory {
    pub fn users(client: SlackClient) -> Self {
        Self {
            client,
            kind: DirectoryKind::Users,
            index: OnceCell::new(),
        }
    }

    pub fn channels(client: SlackClient) -> Self {
        Self {
            client,
            kind: DirectoryKind::Channels,
            index: OnceCell::new(),
        }
    }

    async fn load(&self) -> anyhow::Result<HashMap<String, DirectoryEntry>> {
        let index = match self.kind {
            DirectoryKind::Users => index_users(self.client.list_users().await?),
            DirectoryKind::Channels => index_channels(self.client.list_channels().await?),
        };
        info!(kind = ?self.kind, entries = index.len(), "slack directory loaded");
        Ok(index)
    }
}

#[async_trait]
impl Directory for SlackDirectory {
    async fn resolve(&self, name: &str) -> broadcast_common::Result<Option<DirectoryEntry>> {
        let index = self
            .index
            .get_or_try_init(|| self.load())
            .await
            .map_err(|e| lookup_error(name, &e))?;
        let hit = lookup(index, self.kind, name);
        debug!(kind = ?self.kind, name, found = hit.is_some(), "slack lookup");
        Ok(hit)
    }
}

fn lookup(
    index: &HashMap<String, DirectoryEntry>,
    kind: DirectoryKind,
    name: &str,
) -> Option<DirectoryEntry> {
    let key = match kind {
        DirectoryKind::Users => name.trim(),
        DirectoryKind::Channels => name.trim().trim_start_matches('#'),
    };
    index
        .get(key)
        .or_else(|| index.get(&key.to_lowercase()))
        .cloned()
}

fn lookup_error(name: &str, e: &anyhow::Error) -> Error {
    let reason = format!("{e:#}");
    if AUTH_ERRORS.iter().any(|code| reason.contains(code)) {
        return Error::config(format!("slack rejected the bot token: {reason}"));
    }
    ResolutionError::Lookup {
        name: name.to_string(),
        reason,
    }
    .into()
}

/// Indexes users by id, handle and display name. Deleted users are skipped.
/// Handles and display names are stored lowercased.
pub fn index_users(users: Vec<SlackUser>) -> HashMap<String, DirectoryEntry> {
    let mut index = HashMap::new();
    for user in users.into_iter().filter(|u| !u.deleted) {
        let display = [&user.profile.display_name, &user.profile.real_name]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or(&user.name)
            .clone();
        let entry = DirectoryEntry::new(user.id.clone(), display);

        if !user.profile.display_name.is_empty() {
            index
                .entry(user.profile.display_name.to_lowercase())
                .or_insert_with(|| entry.clone());
        }
        index.insert(user.name.to_lowercase(), entry.clone());
        index.insert(user.id, entry);
    }
    index
}

/// Indexes channels by id and lowercased name. Archived channels are skipped.
pub fn index_channels(channels: Vec<SlackChannel>) -> HashMap<String, DirectoryEntry> {
    let mut index = HashMap::new();
    for channel in channels.into_iter().filter(|c| !c.is_archived) {
        let entry = DirectoryEntry::new(channel.id.clone(), channel.name.clone());
        index.insert(channel.name.to_lowercase(), entry.clone());
        index.insert(channel.id, entry);
    }
    index
}
