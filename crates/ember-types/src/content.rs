use serde::{Deserialize, Serialize};

/// Marker that turns a plain-text body into an image attachment.
/// Everything after the marker is a JSON object `{ url, caption }`.
pub const IMAGE_PREFIX: &str = "[[image]]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub url: String,
    #[serde(default)]
    pub caption: String,
}

/// Message body, decoded once when the message leaves the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Image(ImagePayload),
}

impl MessageContent {
    /// Decode a raw body. Bodies that carry the image marker but no usable
    /// payload stay text, untouched.
    pub fn decode(body: &str) -> Self {
        if let Some(json) = body.strip_prefix(IMAGE_PREFIX) {
            if let Ok(payload) = serde_json::from_str::<ImagePayload>(json) {
                if !payload.url.trim().is_empty() {
                    return Self::Image(payload);
                }
            }
        }
        Self::Text(body.to_string())
    }

    /// Encode back into the wire body.
    pub fn encode(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Image(payload) => {
                // ImagePayload only holds strings, serialization cannot fail.
                let json = serde_json::to_string(payload).unwrap_or_default();
                format!("{}{}", IMAGE_PREFIX, json)
            }
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Image(_) => None,
        }
    }

    pub fn as_image(&self) -> Option<&ImagePayload> {
        match self {
            Self::Image(payload) => Some(payload),
            Self::Text(_) => None,
        }
    }

    /// Short human-readable form for logs and headless rendering.
    pub fn preview(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Image(payload) if payload.caption.is_empty() => "[image]".to_string(),
            Self::Image(payload) => format!("[image] {}", payload.caption),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_untouched() {
        let content = MessageContent::decode("hello {\"url\":\"x\"}");
        assert_eq!(content, MessageContent::Text("hello {\"url\":\"x\"}".into()));
    }

    #[test]
    fn image_prefix_decodes_payload() {
        let body = r#"[[image]]{"url":"https://cdn.example/a.jpg","caption":"sunset"}"#;
        let content = MessageContent::decode(body);
        assert_eq!(
            content,
            MessageContent::Image(ImagePayload {
                url: "https://cdn.example/a.jpg".into(),
                caption: "sunset".into(),
            })
        );
        assert_eq!(content.encode(), body);
    }

    #[test]
    fn broken_payload_stays_text() {
        let body = "[[image]]{not json";
        assert_eq!(MessageContent::decode(body), MessageContent::Text(body.into()));

        let empty_url = r#"[[image]]{"url":"  "}"#;
        assert!(MessageContent::decode(empty_url).as_text().is_some());
    }

    #[test]
    fn missing_caption_defaults_to_empty() {
        let content = MessageContent::decode(r#"[[image]]{"url":"u"}"#);
        assert_eq!(content.preview(), "[image]");
    }
}
