use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::WireMessage;
use crate::content::MessageContent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    /// Creator broadcast with viewer replies, threaded by mention prefix.
    Channel,
    /// Multi-member chat, threaded by explicit parent id.
    Group,
}

impl ConversationKind {
    /// Path segment used by the REST endpoints.
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::Channel => "channels",
            Self::Group => "groups",
        }
    }
}

impl FromStr for ConversationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "channel" | "channels" => Ok(Self::Channel),
            "group" | "groups" => Ok(Self::Group),
            other => Err(format!("unknown conversation kind '{}'", other)),
        }
    }
}

/// Addressing information needed to reach a conversation's endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationRef {
    pub kind: ConversationKind,
    pub id: Uuid,
}

/// A conversation attached to a time-boxed post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub owner_id: String,
    pub owner_handle: String,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl Conversation {
    pub fn reference(&self) -> ConversationRef {
        ConversationRef {
            kind: self.kind,
            id: self.id,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + self.ttl
    }

    /// Expired conversations are read-only and get evicted.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }
}

/// The authenticated user looking at a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: String,
    pub handle: String,
    pub email: Option<String>,
}

impl Viewer {
    /// Every handle form other people may use to address this viewer:
    /// the own handle and the handle derived from the email local part.
    pub fn handles(&self) -> Vec<String> {
        let mut handles = Vec::with_capacity(2);
        let own = normalize_handle(&self.handle);
        if !own.is_empty() {
            handles.push(own);
        }
        if let Some(from_email) = self.email.as_deref().and_then(email_handle) {
            if !handles.contains(&from_email) {
                handles.push(from_email);
            }
        }
        handles
    }
}

/// Stable identity of a message inside a conversation window.
/// Server messages are keyed by id; id-less messages get a synthetic key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKey {
    Id(i64),
    Local(String),
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::Local(key) => write!(f, "local:{}", key),
        }
    }
}

/// A chat message with its body already decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Option<i64>,
    pub sender_id: String,
    pub display_handle: String,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
    pub reply_to_id: Option<i64>,
    pub hidden: bool,
}

impl Message {
    pub fn key(&self) -> MessageKey {
        match self.id {
            Some(id) => MessageKey::Id(id),
            None => MessageKey::Local(format!(
                "{}:{}:{}",
                self.created_at.timestamp_millis(),
                self.sender_id,
                self.content.encode()
            )),
        }
    }

    /// Sender handle in normalized form.
    pub fn handle(&self) -> String {
        normalize_handle(&self.display_handle)
    }

    pub fn text(&self) -> Option<&str> {
        self.content.as_text()
    }
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        Self {
            id: wire.id,
            sender_id: wire.sender_id,
            display_handle: wire.display_handle,
            content: MessageContent::decode(&wire.body),
            created_at: wire.created_at,
            reply_to_id: wire.reply_to_id,
            hidden: wire.hidden,
        }
    }
}

/// Lazily fetched profile data shown next to a mention.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MentionProfile {
    pub photo_uri: Option<String>,
    pub socials: BTreeMap<String, String>,
}

/// Normalize a handle to lowercase with exactly one leading `@`.
/// Returns an empty string when nothing is left.
pub fn normalize_handle(raw: &str) -> String {
    let bare = raw.trim().trim_start_matches('@').trim();
    if bare.is_empty() {
        return String::new();
    }
    format!("@{}", bare.to_lowercase())
}

/// Handle form derived from an email address (`jane@x.io` -> `@jane`).
pub fn email_handle(email: &str) -> Option<String> {
    let (local, domain) = email.trim().split_once('@')?;
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    Some(normalize_handle(local))
}
