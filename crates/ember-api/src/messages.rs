use tracing::{debug, warn};

use ember_types::api::{Page, SendMessageRequest, WireMessage};
use ember_types::models::{ConversationRef, Message};

use crate::HttpChatApi;
use crate::error::ApiError;
use crate::middleware::{authorize, check_status};

/// `{base}/{channels|groups}/{id}/messages`
pub fn messages_url(base_url: &str, conversation: ConversationRef) -> String {
    format!(
        "{}/{}/{}/messages",
        base_url,
        conversation.kind.path_segment(),
        conversation.id
    )
}

/// Query string for a page request. `beforeId` is omitted for the newest page.
pub fn page_query(limit: usize, before_id: Option<i64>) -> Vec<(&'static str, String)> {
    let mut query = vec![("limit", limit.to_string())];
    if let Some(before_id) = before_id {
        query.push(("beforeId", before_id.to_string()));
    }
    query
}

impl HttpChatApi {
    /// GET a page of messages. Bodies that are not a page (bad JSON, wrong
    /// shape, missing fields) decode to an empty malformed page instead of an
    /// error, so the caller keeps its current state.
    pub async fn get_messages(
        &self,
        conversation: ConversationRef,
        limit: usize,
        before_id: Option<i64>,
    ) -> Result<Page, ApiError> {
        let url = messages_url(&self.base_url, conversation);
        let req = self.client.get(&url).query(&page_query(limit, before_id));

        let resp = check_status(authorize(req, &self.credentials).send().await?).await?;
        let text = resp.text().await?;

        let page = match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => Page::decode(value, limit),
            Err(e) => {
                warn!("Non-JSON page body from {}: {}", url, e);
                Page::malformed()
            }
        };

        if page.is_malformed() {
            warn!("Malformed page payload from {}, treating as empty", url);
        } else {
            debug!("Fetched {} messages from {} (before {:?})", page.len(), url, before_id);
        }
        Ok(page)
    }

    pub async fn post_message(
        &self,
        conversation: ConversationRef,
        body: String,
        reply_to_id: Option<i64>,
    ) -> Result<Message, ApiError> {
        let url = messages_url(&self.base_url, conversation);
        let req = self.client.post(&url).json(&SendMessageRequest {
            message: body,
            reply_to_id,
        });

        let resp = check_status(authorize(req, &self.credentials).send().await?).await?;
        let created: WireMessage = resp
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("created message: {}", e)))?;

        Ok(Message::from(created))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_types::models::ConversationKind;
    use uuid::Uuid;

    #[test]
    fn url_uses_kind_segment() {
        let id = Uuid::nil();
        let channel = ConversationRef {
            kind: ConversationKind::Channel,
            id,
        };
        assert_eq!(
            messages_url("https://api.example", channel),
            "https://api.example/channels/00000000-0000-0000-0000-000000000000/messages"
        );

        let group = ConversationRef {
            kind: ConversationKind::Group,
            id,
        };
        assert!(messages_url("https://api.example", group).contains("/groups/"));
    }

    #[test]
    fn before_id_only_when_paging() {
        assert_eq!(page_query(40, None), vec![("limit", "40".to_string())]);
        assert_eq!(
            page_query(40, Some(120)),
            vec![("limit", "40".to_string()), ("beforeId", "120".to_string())]
        );
    }
}
