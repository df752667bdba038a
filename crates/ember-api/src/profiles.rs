use ember_types::api::ProfileResponse;
use ember_types::models::{MentionProfile, normalize_handle};

use crate::HttpChatApi;
use crate::error::ApiError;
use crate::middleware::{authorize, check_status};

/// Profiles are addressed by the bare handle, without the leading `@`.
/// The handle is a single percent-encoded path segment.
pub fn profile_url(base_url: &str, handle: &str) -> Result<reqwest::Url, ApiError> {
    let normalized = normalize_handle(handle);
    let mut url = reqwest::Url::parse(base_url).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base_url, e)))?;
    url.path_segments_mut()
        .map_err(|_| ApiError::InvalidUrl(base_url.to_string()))?
        .pop_if_empty()
        .extend(["users", "profile", normalized.trim_start_matches('@')]);
    Ok(url)
}

impl HttpChatApi {
    pub async fn get_profile(&self, handle: &str) -> Result<MentionProfile, ApiError> {
        let url = profile_url(&self.base_url, handle)?;
        let req = self.client.get(url);

        let resp = check_status(authorize(req, &self.credentials).send().await?).await?;
        let profile: ProfileResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("profile: {}", e)))?;

        Ok(profile.into())
    }
}
