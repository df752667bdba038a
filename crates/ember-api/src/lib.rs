//! HTTP client for the conversation endpoints.
//!
//! The sync engine talks to the server only through [`ChatApi`], so tests can
//! swap the real client for an in-memory fake.

pub mod auth;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod profiles;
pub mod visibility;

use std::future::Future;
use std::time::Duration;

use reqwest::Client;

use ember_types::api::Page;
use ember_types::models::{ConversationRef, MentionProfile, Message};

pub use auth::Credentials;
pub use error::ApiError;

/// Remote operations the sync engine depends on.
pub trait ChatApi: Send + Sync + 'static {
    /// Fetch up to `limit` messages older than `before_id` (newest page when `None`).
    fn fetch_messages(
        &self,
        conversation: ConversationRef,
        limit: usize,
        before_id: Option<i64>,
    ) -> impl Future<Output = Result<Page, ApiError>> + Send;

    /// Post a message; resolves to the message as the server stored it.
    fn send_message(
        &self,
        conversation: ConversationRef,
        body: String,
        reply_to_id: Option<i64>,
    ) -> impl Future<Output = Result<Message, ApiError>> + Send;

    /// Owner-only visibility toggle; resolves to the stored flag.
    fn set_visibility(
        &self,
        conversation: ConversationRef,
        message_id: i64,
        hidden: bool,
    ) -> impl Future<Output = Result<bool, ApiError>> + Send;

    fn fetch_profile(
        &self,
        handle: &str,
    ) -> impl Future<Output = Result<MentionProfile, ApiError>> + Send;
}

/// Request timeout; a stuck request only delays the next poll tick.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// `reqwest`-backed implementation of [`ChatApi`].
#[derive(Clone)]
pub struct HttpChatApi {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl HttpChatApi {
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

impl ChatApi for HttpChatApi {
    async fn fetch_messages(
        &self,
        conversation: ConversationRef,
        limit: usize,
        before_id: Option<i64>,
    ) -> Result<Page, ApiError> {
        self.get_messages(conversation, limit, before_id).await
    }

    async fn send_message(
        &self,
        conversation: ConversationRef,
        body: String,
        reply_to_id: Option<i64>,
    ) -> Result<Message, ApiError> {
        self.post_message(conversation, body, reply_to_id).await
    }

    async fn set_visibility(
        &self,
        conversation: ConversationRef,
        message_id: i64,
        hidden: bool,
    ) -> Result<bool, ApiError> {
        self.patch_visibility(conversation, message_id, hidden).await
    }

    async fn fetch_profile(&self, handle: &str) -> Result<MentionProfile, ApiError> {
        self.get_profile(handle).await
    }
}
