//! Row types for the registry table, kept apart from the ember-types models.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockRow {
    pub user_id: String,
    pub conversation_id: String,
    pub message_key: String,
    pub media_fingerprint: String,
    pub unlocked: bool,
    pub created_at: String,
    pub unlocked_at: Option<String>,
}
