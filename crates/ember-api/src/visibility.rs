use ember_types::api::{VisibilityRequest, VisibilityResponse};
use ember_types::models::ConversationRef;

use crate::HttpChatApi;
use crate::error::ApiError;
use crate::messages::messages_url;
use crate::middleware::{authorize, check_status};

pub fn visibility_url(base_url: &str, conversation: ConversationRef, message_id: i64) -> String {
    format!("{}/{}/visibility", messages_url(base_url, conversation), message_id)
}

impl HttpChatApi {
    /// PATCH the hidden flag of a message. Only the owner may do this; the
    /// server answers 403 otherwise.
    pub async fn patch_visibility(
        &self,
        conversation: ConversationRef,
        message_id: i64,
        hidden: bool,
    ) -> Result<bool, ApiError> {
        let url = visibility_url(&self.base_url, conversation, message_id);
        let req = self.client.patch(&url).json(&VisibilityRequest { hidden });

        let resp = check_status(authorize(req, &self.credentials).send().await?).await?;
        let body: VisibilityResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("visibility: {}", e)))?;

        Ok(body.hidden)
    }
}
