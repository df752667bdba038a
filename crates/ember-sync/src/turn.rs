//! Channel turn policy: a participant waits for the owner's answer before
//! sending again. Derived purely from message content and order.

use ember_types::models::{Conversation, ConversationKind, Message, Viewer};

use crate::thread::split_address;

const AWAITING_REPLY: &str = "Wait for the creator to reply before sending another message.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnDecision {
    Open,
    /// The viewer's message `since_id` has not been answered yet.
    AwaitingReply { since_id: i64 },
}

impl TurnDecision {
    pub fn can_send(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Explanation shown next to the disabled composer.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Self::Open => None,
            Self::AwaitingReply { .. } => Some(AWAITING_REPLY),
        }
    }
}

pub fn evaluate(conversation: &Conversation, viewer: &Viewer, messages: &[Message]) -> TurnDecision {
    if conversation.kind != ConversationKind::Channel || conversation.is_owner(&viewer.user_id) {
        return TurnDecision::Open;
    }

    let Some(last_own) = messages
        .iter()
        .filter(|m| m.sender_id == viewer.user_id)
        .filter_map(|m| m.id)
        .max()
    else {
        return TurnDecision::Open;
    };

    let handles = viewer.handles();
    let answered = messages
        .iter()
        .filter(|m| m.id.is_some_and(|id| id > last_own))
        .filter(|m| conversation.is_owner(&m.sender_id))
        .filter_map(|m| m.text().and_then(split_address))
        .any(|(handle, _)| handles.contains(&handle));

    if answered {
        TurnDecision::Open
    } else {
        TurnDecision::AwaitingReply { since_id: last_own }
    }
}
