use std::collections::HashMap;

use futures_util::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use ember_api::ChatApi;
use ember_types::models::{MentionProfile, Message, normalize_handle};

use crate::error::SyncError;

/// Process-wide cache of profiles shown next to `@mentions`.
/// Entries live for the whole session; failed lookups are not cached.
#[derive(Default)]
pub struct MentionProfileCache {
    profiles: RwLock<HashMap<String, MentionProfile>>,
}

impl MentionProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, handle: &str) -> Option<MentionProfile> {
        self.profiles.read().await.get(&normalize_handle(handle)).cloned()
    }

    pub async fn len(&self) -> usize {
        self.profiles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.profiles.read().await.is_empty()
    }

    /// Cached profile, fetched on first use.
    pub async fn resolve<A: ChatApi>(&self, api: &A, handle: &str) -> Result<MentionProfile, SyncError> {
        let key = normalize_handle(handle);
        if key.is_empty() {
            return Ok(MentionProfile::default());
        }
        if let Some(profile) = self.profiles.read().await.get(&key) {
            return Ok(profile.clone());
        }

        let profile = api.fetch_profile(&key).await?;
        debug!("Cached mention profile for {}", key);
        // Concurrent resolves of the same handle store the same data.
        self.profiles.write().await.insert(key, profile.clone());
        Ok(profile)
    }

    /// Fetch every uncached handle mentioned in `messages` concurrently.
    /// Returns how many profiles were added.
    pub async fn warm<A: ChatApi>(&self, api: &A, messages: &[Message]) -> usize {
        let mut wanted: Vec<String> = Vec::new();
        {
            let cached = self.profiles.read().await;
            for handle in messages.iter().filter_map(Message::text).flat_map(mentions) {
                if !cached.contains_key(&handle) && !wanted.contains(&handle) {
                    wanted.push(handle);
                }
            }
        }
        if wanted.is_empty() {
            return 0;
        }

        let results = join_all(wanted.iter().map(|handle| self.resolve(api, handle))).await;
        let mut added = 0;
        for (handle, result) in wanted.iter().zip(results) {
            match result {
                Ok(_) => added += 1,
                Err(e) => warn!("Profile lookup for {} failed: {}", handle, e),
            }
        }
        added
    }
}

/// Normalized `@handle` tokens in a text body, in order of appearance.
pub fn mentions(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for word in text.split_whitespace() {
        let Some(rest) = word.strip_prefix('@') else {
            continue;
        };
        let token = rest.trim_end_matches(|c: char| !(c.is_alphanumeric() || c == '_'));
        let handle = normalize_handle(token);
        if !handle.is_empty() && !found.contains(&handle) {
            found.push(handle);
        }
    }
    found
}
