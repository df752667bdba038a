//! Ordered, deduplicated message window of one conversation.
//!
//! The window only changes through three operations: replace with the
//! latest page, prepend an older page, merge a poll page. Each one computes a
//! signature so callers can skip re-deriving threads when nothing moved.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

use sha2::{Digest, Sha256};

use ember_types::models::{Message, MessageKey};

/// Ordered key list with visibility flags and a short content digest, e.g.
/// `"12:1a2b3c4d,13h:5e6f7a8b"`. Server-side hide/unhide and body edits both
/// change it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    pub fn of(messages: &[Message]) -> Self {
        let parts: Vec<String> = messages
            .iter()
            .map(|m| {
                let key = match m.key() {
                    MessageKey::Id(id) => id.to_string(),
                    MessageKey::Local(local) => format!("~{}", local),
                };
                let flag = if m.hidden { "h" } else { "" };
                format!("{}{}:{}", key, flag, content_digest(m))
            })
            .collect();
        Self(parts.join(","))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn content_digest(message: &Message) -> String {
    let digest = Sha256::digest(message.content.encode().as_bytes());
    hex::encode(&digest[..4])
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of merging a poll page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Whether the window was committed (signature changed).
    pub changed: bool,
    /// Messages that were not in the window before.
    pub added: usize,
}

/// Ordering used everywhere: id first, `created_at` as tiebreak and as the
/// only key for id-less messages, which sort after server messages.
pub fn message_order(a: &Message, b: &Message) -> Ordering {
    match (a.id, b.id) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.created_at.cmp(&b.created_at)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.created_at.cmp(&b.created_at),
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    signature: Signature,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// `{count}:{firstId}:{lastId}`, for logs.
    pub fn summary(&self) -> String {
        let first = self.messages.first().and_then(|m| m.id);
        let last = self.messages.last().and_then(|m| m.id);
        format!(
            "{}:{}:{}",
            self.messages.len(),
            first.map(|id| id.to_string()).unwrap_or_default(),
            last.map(|id| id.to_string()).unwrap_or_default()
        )
    }

    pub fn get(&self, id: i64) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == Some(id))
    }

    pub fn oldest_id(&self) -> Option<i64> {
        self.messages.iter().filter_map(|m| m.id).min()
    }

    /// Replace the whole window with the newest page.
    /// Returns whether the signature changed.
    pub fn replace_with_latest(&mut self, page: Vec<Message>) -> bool {
        let messages = normalize(page);
        self.commit(messages)
    }

    /// Prepend an older page, skipping anything already held.
    /// Returns how many messages were added; zero means nothing changed.
    pub fn prepend_older(&mut self, page: Vec<Message>) -> usize {
        let held: HashSet<MessageKey> = self.messages.iter().map(Message::key).collect();
        let mut incoming: Vec<Message> = normalize(page)
            .into_iter()
            .filter(|m| !held.contains(&m.key()))
            .collect();

        if incoming.is_empty() {
            return 0;
        }

        let added = incoming.len();
        incoming.append(&mut self.messages);
        // Stable sort; a page that is not strictly older still lands in order.
        incoming.sort_by(message_order);
        self.commit(incoming);
        added
    }

    /// Union of the window and a poll page; the incoming copy wins on a key
    /// collision. Only commits when the signature differs. Never drops
    /// messages already held.
    pub fn merge_poll(&mut self, page: Vec<Message>) -> MergeOutcome {
        let mut merged: HashMap<MessageKey, Message> = self
            .messages
            .iter()
            .map(|m| (m.key(), m.clone()))
            .collect();

        let mut added = 0;
        for message in page {
            if merged.insert(message.key(), message).is_none() {
                added += 1;
            }
        }

        let mut messages: Vec<Message> = merged.into_values().collect();
        messages.sort_by(message_order);

        if Signature::of(&messages) == self.signature {
            return MergeOutcome::default();
        }

        self.commit(messages);
        MergeOutcome {
            changed: true,
            added,
        }
    }

    fn commit(&mut self, messages: Vec<Message>) -> bool {
        let signature = Signature::of(&messages);
        let changed = signature != self.signature;
        self.messages = messages;
        self.signature = signature;
        changed
    }
}

/// Dedupe a page by key (last copy wins) and sort it.
fn normalize(page: Vec<Message>) -> Vec<Message> {
    let mut by_key: HashMap<MessageKey, Message> = HashMap::with_capacity(page.len());
    for message in page {
        by_key.insert(message.key(), message);
    }
    let mut messages: Vec<Message> = by_key.into_values().collect();
    messages.sort_by(message_order);
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn msg(id: i64) -> Message {
        Message {
            id: Some(id),
            sender_id: "u1".into(),
            display_handle: "jane".into(),
            content: format!("m{}", id).as_str().into(),
            created_at: at(id),
            reply_to_id: None,
            hidden: false,
        }
    }

    fn ids(store: &MessageStore) -> Vec<i64> {
        store.messages().iter().filter_map(|m| m.id).collect()
    }

    #[test]
    fn replace_sorts_and_dedupes() {
        let mut store = MessageStore::new();
        assert!(store.replace_with_latest(vec![msg(3), msg(1), msg(2), msg(3)]));
        assert_eq!(ids(&store), vec![1, 2, 3]);
        assert!(store.signature().as_str().starts_with("1:"));
        assert_eq!(store.signature().as_str().split(',').count(), 3);
        assert_eq!(store.summary(), "3:1:3");

        assert!(!store.replace_with_latest(vec![msg(1), msg(2), msg(3)]));
    }

    #[test]
    fn prepend_of_known_messages_is_noop() {
        let mut store = MessageStore::new();
        store.replace_with_latest(vec![msg(5), msg(6)]);
        let before = store.signature().clone();

        assert_eq!(store.prepend_older(vec![msg(5), msg(6)]), 0);
        assert_eq!(store.signature(), &before);
    }

    #[test]
    fn prepend_adds_only_new_history() {
        let mut store = MessageStore::new();
        store.replace_with_latest(vec![msg(5), msg(6)]);

        assert_eq!(store.prepend_older(vec![msg(3), msg(4), msg(5)]), 2);
        assert_eq!(ids(&store), vec![3, 4, 5, 6]);
    }

    #[test]
    fn merge_is_idempotent() {
        let mut store = MessageStore::new();
        store.replace_with_latest(vec![msg(1), msg(2)]);

        let page = vec![msg(2), msg(3)];
        let first = store.merge_poll(page.clone());
        assert_eq!(first, MergeOutcome { changed: true, added: 1 });
        let signature = store.signature().clone();

        let second = store.merge_poll(page);
        assert_eq!(second, MergeOutcome::default());
        assert_eq!(store.signature(), &signature);
        assert_eq!(ids(&store), vec![1, 2, 3]);
    }

    #[test]
    fn merge_keeps_older_history() {
        let mut store = MessageStore::new();
        store.replace_with_latest((1..=60).map(msg).collect());

        // A poll only returns the newest page.
        store.merge_poll((30..=61).map(msg).collect());
        assert_eq!(store.len(), 61);
        assert_eq!(store.oldest_id(), Some(1));
    }

    #[test]
    fn merge_picks_up_visibility_toggle() {
        let mut store = MessageStore::new();
        store.replace_with_latest(vec![msg(1), msg(2)]);

        let mut hidden = msg(2);
        hidden.hidden = true;
        let outcome = store.merge_poll(vec![hidden]);
        assert_eq!(outcome, MergeOutcome { changed: true, added: 0 });
        assert!(store.get(2).unwrap().hidden);
        assert!(store.signature().as_str().contains(",2h:"));
    }

    #[test]
    fn merge_picks_up_body_edit() {
        let mut store = MessageStore::new();
        store.replace_with_latest(vec![msg(1), msg(2)]);
        let before = store.signature().clone();

        let mut edited = msg(2);
        edited.content = "edited".into();
        let outcome = store.merge_poll(vec![edited]);
        assert_eq!(outcome, MergeOutcome { changed: true, added: 0 });
        assert_ne!(store.signature(), &before);
        assert_eq!(store.get(2).unwrap().content.as_text(), Some("edited"));
    }

    #[test]
    fn idless_messages_sort_after_server_messages() {
        let mut store = MessageStore::new();
        let mut local = msg(0);
        local.id = None;
        local.created_at = at(0) - Duration::days(1);

        store.replace_with_latest(vec![local.clone(), msg(2), msg(1)]);
        assert_eq!(store.messages()[2].key(), local.key());
        let keys: Vec<&str> = store
            .signature()
            .as_str()
            .split(',')
            .map(|part| part.split(':').next().unwrap())
            .collect();
        assert_eq!(keys[..2], ["1", "2"]);
        assert!(keys[2].starts_with('~'));
    }

    #[test]
    fn equal_ids_fall_back_to_created_at() {
        let a = msg(1);
        let mut b = msg(1);
        b.created_at = at(10);
        assert_eq!(message_order(&a, &b), Ordering::Less);
    }
}
