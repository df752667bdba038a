//! Reward-gated media.
//!
//! Images sent by someone else stay hidden until the viewer completes a
//! reward event for them. The unlocked state is persisted per user and never
//! expires.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use ember_db::Database;
use ember_db::models::UnlockRow;
use ember_types::models::{Conversation, Message, Viewer};

use crate::error::SyncError;

/// Identity of one gated media item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnlockKey {
    pub conversation_id: Uuid,
    pub message_key: String,
    pub media_fingerprint: String,
}

impl UnlockKey {
    /// Key for an image message; `None` for anything else.
    pub fn for_image(conversation_id: Uuid, message: &Message) -> Option<Self> {
        let image = message.content.as_image()?;
        Some(Self {
            conversation_id,
            message_key: message.key().to_string(),
            media_fingerprint: media_fingerprint(&image.url),
        })
    }
}

/// Hex SHA-256 of the media URL.
pub fn media_fingerprint(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// Reward gate consulted before showing media.
pub trait RewardGate: Send + Sync {
    fn is_unlocked(&self, key: &UnlockKey) -> Result<bool, SyncError>;

    /// Record a completed reward event. Returns `true` if the item was
    /// locked before.
    fn unlock(&self, key: &UnlockKey) -> Result<bool, SyncError>;
}

/// SQLite-backed [`RewardGate`] for one authenticated user.
pub struct UnlockRegistry {
    db: Arc<Database>,
    user_id: String,
}

impl UnlockRegistry {
    pub fn new(db: Arc<Database>, user_id: impl Into<String>) -> Self {
        Self {
            db,
            user_id: user_id.into(),
        }
    }

    pub fn entries(&self, conversation_id: Uuid) -> Result<Vec<UnlockRow>, SyncError> {
        Ok(self
            .db
            .unlocks_for_conversation(&self.user_id, &conversation_id.to_string())?)
    }
}

impl RewardGate for UnlockRegistry {
    fn is_unlocked(&self, key: &UnlockKey) -> Result<bool, SyncError> {
        Ok(self.db.check_unlock(
            &self.user_id,
            &key.conversation_id.to_string(),
            &key.message_key,
            &key.media_fingerprint,
        )?)
    }

    fn unlock(&self, key: &UnlockKey) -> Result<bool, SyncError> {
        let was_locked = self.db.mark_unlocked(
            &self.user_id,
            &key.conversation_id.to_string(),
            &key.message_key,
            &key.media_fingerprint,
        )?;
        if was_locked {
            info!(
                "Unlocked media {} in conversation {}",
                key.message_key,
                key.conversation_id
            );
        }
        Ok(was_locked)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaAccess {
    NotMedia,
    Visible,
    Locked(UnlockKey),
}

/// Decide whether `viewer` may see the media in `message`.
/// The owner and the sender always see it.
pub fn media_access(
    gate: &dyn RewardGate,
    conversation: &Conversation,
    viewer: &Viewer,
    message: &Message,
) -> Result<MediaAccess, SyncError> {
    let Some(key) = UnlockKey::for_image(conversation.id, message) else {
        return Ok(MediaAccess::NotMedia);
    };
    if message.sender_id == viewer.user_id || conversation.is_owner(&viewer.user_id) {
        return Ok(MediaAccess::Visible);
    }
    if gate.is_unlocked(&key)? {
        Ok(MediaAccess::Visible)
    } else {
        Ok(MediaAccess::Locked(key))
    }
}
