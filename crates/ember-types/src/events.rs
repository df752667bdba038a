use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Viewport instruction produced by the scroll anchor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScrollCommand {
    /// Move to the newest message.
    ScrollToEnd,
    /// Jump to an absolute offset, keeping the visual position after a prepend.
    ScrollToOffset { offset: f64 },
    /// Leave the viewport alone and show the "new messages" affordance.
    ShowJumpToLatest { unseen: usize },
}

/// Events published by the sync engine to whoever renders conversations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EngineEvent {
    /// The message window changed; re-derive threads.
    StoreChanged {
        conversation_id: Uuid,
        signature: String,
        message_count: usize,
    },

    /// The viewport should move (or the affordance should appear).
    Scroll {
        conversation_id: Uuid,
        command: ScrollCommand,
    },

    /// The composer should be enabled or disabled.
    TurnGateChanged {
        conversation_id: Uuid,
        can_send: bool,
        reason: Option<String>,
    },

    /// The parent post ran out of time; the conversation is read-only.
    ConversationExpired { conversation_id: Uuid },

    /// The session was closed and its state discarded.
    SessionClosed { conversation_id: Uuid },
}

impl EngineEvent {
    pub fn conversation_id(&self) -> Uuid {
        match self {
            Self::StoreChanged { conversation_id, .. }
            | Self::Scroll { conversation_id, .. }
            | Self::TurnGateChanged { conversation_id, .. }
            | Self::ConversationExpired { conversation_id }
            | Self::SessionClosed { conversation_id } => *conversation_id,
        }
    }
}
