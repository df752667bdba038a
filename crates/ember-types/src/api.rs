use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{MentionProfile, Message};

// -- Messages --

/// Message as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(default)]
    pub id: Option<i64>,
    pub sender_id: String,
    #[serde(default)]
    pub display_handle: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub reply_to_id: Option<i64>,
    #[serde(default)]
    pub hidden: bool,
}

/// Accepted page shapes: `{ messages, hasMore }` or a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PagePayload {
    Envelope {
        messages: Vec<WireMessage>,
        #[serde(rename = "hasMore", default)]
        has_more: Option<bool>,
    },
    Bare(Vec<WireMessage>),
}

/// One decoded page of history.
///
/// `has_more` is `None` only for malformed payloads; callers must then leave
/// their "more older" bookkeeping untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub messages: Vec<Message>,
    pub has_more: Option<bool>,
}

impl Page {
    pub fn new(messages: Vec<Message>, has_more: bool) -> Self {
        Self {
            messages,
            has_more: Some(has_more),
        }
    }

    /// Empty page standing in for a payload that could not be decoded.
    pub fn malformed() -> Self {
        Self::default()
    }

    pub fn is_malformed(&self) -> bool {
        self.has_more.is_none()
    }

    /// Decode a page body requested with `limit`. A bare array (or an envelope
    /// without `hasMore`) is considered to have more when it is full.
    pub fn decode(value: serde_json::Value, limit: usize) -> Self {
        match serde_json::from_value::<PagePayload>(value) {
            Ok(PagePayload::Envelope { messages, has_more }) => {
                let has_more = has_more.unwrap_or(messages.len() >= limit);
                Self::new(messages.into_iter().map(Message::from).collect(), has_more)
            }
            Ok(PagePayload::Bare(messages)) => {
                let has_more = messages.len() >= limit;
                Self::new(messages.into_iter().map(Message::from).collect(), has_more)
            }
            Err(_) => Self::malformed(),
        }
    }

    /// Smallest server id on the page.
    pub fn oldest_id(&self) -> Option<i64> {
        self.messages.iter().filter_map(|m| m.id).min()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<i64>,
}

// -- Visibility --

#[derive(Debug, Clone, Serialize)]
pub struct VisibilityRequest {
    pub hidden: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisibilityResponse {
    pub hidden: bool,
}

// -- Profiles --

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    #[serde(default)]
    pub photo_uri: Option<String>,
    #[serde(default)]
    pub socials: BTreeMap<String, String>,
}

impl From<ProfileResponse> for MentionProfile {
    fn from(resp: ProfileResponse) -> Self {
        Self {
            photo_uri: resp.photo_uri,
            socials: resp.socials,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::MessageContent;
    use serde_json::json;

    fn wire(id: i64) -> serde_json::Value {
        json!({
            "id": id,
            "senderId": "u1",
            "displayHandle": "jane",
            "body": "hello",
            "createdAt": "2026-01-01T00:00:00Z",
        })
    }

    #[test]
    fn envelope_uses_explicit_has_more() {
        let page = Page::decode(json!({ "messages": [wire(1), wire(2)], "hasMore": true }), 40);
        assert_eq!(page.len(), 2);
        assert_eq!(page.has_more, Some(true));
        assert_eq!(page.oldest_id(), Some(1));
        assert!(!page.messages[0].hidden);
        assert_eq!(page.messages[0].content, MessageContent::Text("hello".into()));
    }

    #[test]
    fn bare_array_infers_has_more_from_limit() {
        let page = Page::decode(json!([wire(1), wire(2)]), 2);
        assert_eq!(page.has_more, Some(true));

        let page = Page::decode(json!([wire(1)]), 2);
        assert_eq!(page.has_more, Some(false));
    }

    #[test]
    fn malformed_payload_is_empty_and_unknown() {
        let page = Page::decode(json!({ "error": "nope" }), 40);
        assert!(page.is_empty());
        assert!(page.is_malformed());

        let missing_field = json!([{ "id": 3, "body": "no sender" }]);
        assert!(Page::decode(missing_field, 40).is_malformed());
    }

    #[test]
    fn send_request_omits_missing_parent() {
        let body = serde_json::to_value(SendMessageRequest {
            message: "hi".into(),
            reply_to_id: None,
        })
        .unwrap();
        assert_eq!(body, json!({ "message": "hi" }));

        let body = serde_json::to_value(SendMessageRequest {
            message: "hi".into(),
            reply_to_id: Some(7),
        })
        .unwrap();
        assert_eq!(body, json!({ "message": "hi", "replyToId": 7 }));
    }
}
