use ember_types::models::Viewer;

/// Bearer token plus the identity it was issued for.
/// Issuing the token is out of scope; the client only carries it.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub token: String,
    pub viewer: Viewer,
}

impl Credentials {
    pub fn new(token: impl Into<String>, viewer: Viewer) -> Self {
        Self {
            token: token.into(),
            viewer,
        }
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}
