//! Collaborator interfaces consumed by the core.
//!
//! The core never talks to the messaging platform or the channel registry
//! directly; it goes through the traits defined here. Implementations wrap
//! the real Telegram client and persistent storage, and are expected to map
//! their failures into the closed [`ApiError`] / [`RegistryError`] taxonomy
//! so callers classify by variant instead of matching error text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A reference to a chat the bot can query.
///
/// Channel ids stored as numeric strings are coerced to integers; usernames
/// with a leading `@` stay as strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChatRef {
    /// Numeric chat identifier
    Id(i64),
    /// `@username`-style public handle
    Username(String),
}

impl ChatRef {
    /// Parse a stored channel identifier into a chat reference.
    pub fn parse(raw: &str) -> Self {
        if !raw.starts_with('@') {
            if let Ok(id) = raw.parse::<i64>() {
                return ChatRef::Id(id);
            }
        }
        ChatRef::Username(raw.to_string())
    }
}

impl std::fmt::Display for ChatRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatRef::Id(id) => write!(f, "{}", id),
            ChatRef::Username(name) => write!(f, "{}", name),
        }
    }
}

/// Membership status of a user within a chat, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Owner,
    Administrator,
    Member,
    Restricted,
    Left,
    Banned,
}

impl MemberStatus {
    /// Statuses that count as belonging to the chat.
    pub fn is_joined(&self) -> bool {
        matches!(
            self,
            MemberStatus::Owner | MemberStatus::Administrator | MemberStatus::Member
        )
    }
}

/// Closed error taxonomy surfaced by the messaging-API client wrapper.
///
/// Retry decisions are made by matching on these variants, never by
/// inspecting error strings.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// Connectivity failure or timeout. Transient by definition.
    #[error("network error: {reason}")]
    Network { reason: String },

    /// The platform asked us to slow down.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// The bot lacks access to the chat (kicked, never added, bad token).
    #[error("unauthorized")]
    Unauthorized,

    /// The chat or user does not exist.
    #[error("not found")]
    NotFound,

    /// Any other authoritative rejection from the platform.
    #[error("rejected: {reason}")]
    Rejected { reason: String },
}

impl ApiError {
    /// Whether a failed delivery may succeed if simply retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Network { .. } | ApiError::RateLimited { .. }
        )
    }

    /// Whether a verification outcome is indeterminate rather than negative.
    ///
    /// Only connectivity failures qualify: an authoritative error (the bot
    /// lacks access, the chat is gone) is a real negative and fails closed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network { .. })
    }
}

/// A channel users must belong to before interacting with the bot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequiredChannel {
    /// Stored identifier, either a numeric id or an `@username`
    pub channel_id: String,
    /// Human-readable title, shown in join prompts
    pub title: String,
    /// Deep link users follow to join
    pub url: String,
    /// Inactive channels are excluded from verification
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl RequiredChannel {
    /// The chat reference used for membership queries.
    pub fn chat_ref(&self) -> ChatRef {
        ChatRef::parse(&self.channel_id)
    }
}

/// Failure of the channel registry or locale collaborator.
#[derive(Error, Debug)]
#[error("registry unavailable: {0}")]
pub struct RegistryError(pub String);

/// Async messaging-platform client, as seen by the verifier and the
/// delivery queue.
#[async_trait]
pub trait MembershipClient: Send + Sync {
    /// Query the membership status of a user within a chat.
    async fn get_chat_member(
        &self,
        chat: &ChatRef,
        user_id: i64,
    ) -> std::result::Result<MemberStatus, ApiError>;
}

/// Persistent registry of required channels.
///
/// The verifier always reads a fresh snapshot; the registry is never cached
/// here. Whoever mutates the registry (add/remove/reorder/toggle) must call
/// [`crate::membership::MembershipCache::invalidate_all`], because the
/// definition of membership changed for every user at once.
#[async_trait]
pub trait ChannelRegistry: Send + Sync {
    /// Fetch the current list of active required channels.
    async fn required_channels(&self)
        -> std::result::Result<Vec<RequiredChannel>, RegistryError>;
}

/// Resolves the preferred language of a user, used only to localize prompts.
#[async_trait]
pub trait LocaleResolver: Send + Sync {
    /// Returns the user's language tag, or `None` if not chosen yet.
    async fn user_lang(&self, user_id: i64)
        -> std::result::Result<Option<String>, RegistryError>;
}
