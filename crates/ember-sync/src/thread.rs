//! Reply threads derived from the flat message window.
//!
//! Threads are never stored; they are rebuilt from the store on every read.
//! The addressing convention depends on the conversation kind:
//! groups carry an explicit parent id, channels address replies with a
//! leading `@handle ` written by the owner.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use ember_types::content::MessageContent;
use ember_types::models::{Conversation, ConversationKind, Message, normalize_handle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyAuthor {
    Owner,
    Participant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub author: ReplyAuthor,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
    pub id: Option<i64>,
    pub sender_id: String,
    pub hidden: bool,
}

impl Reply {
    fn from_message(message: &Message, author: ReplyAuthor, content: MessageContent) -> Self {
        Self {
            author,
            content,
            created_at: message.created_at,
            id: message.id,
            sender_id: message.sender_id.clone(),
            hidden: message.hidden,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThreadRoot {
    Loaded(Message),
    /// Parent outside the loaded window; only its id is known.
    Unloaded { id: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    pub root_key: String,
    pub root: ThreadRoot,
    pub replies: Vec<Reply>,
}

impl Thread {
    fn new(root_key: String, root: ThreadRoot) -> Self {
        Self {
            root_key,
            root,
            replies: Vec::new(),
        }
    }

    pub fn root_message(&self) -> Option<&Message> {
        match &self.root {
            ThreadRoot::Loaded(message) => Some(message),
            ThreadRoot::Unloaded { .. } => None,
        }
    }

    pub fn root_id(&self) -> Option<i64> {
        match &self.root {
            ThreadRoot::Loaded(message) => message.id,
            ThreadRoot::Unloaded { id } => Some(*id),
        }
    }

    pub fn has_owner_reply(&self) -> bool {
        self.replies.iter().any(|r| r.author == ReplyAuthor::Owner)
    }

    /// Highest loaded id anywhere in the thread.
    pub fn latest_loaded_id(&self) -> Option<i64> {
        let root = self.root_message().and_then(|m| m.id);
        self.replies.iter().filter_map(|r| r.id).chain(root).max()
    }
}

/// Thread addressing convention, chosen per conversation kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addressing {
    /// Groups: `reply_to_id` links, walked up to `max_hops` parents.
    ExplicitParent { owner_id: String, max_hops: usize },
    /// Channels: the owner's leading `@handle ` addresses a reply.
    MentionHeuristic { owner_id: String },
}

impl Addressing {
    pub fn for_conversation(conversation: &Conversation, max_hops: usize) -> Self {
        let owner_id = conversation.owner_id.clone();
        match conversation.kind {
            ConversationKind::Group => Self::ExplicitParent { owner_id, max_hops },
            ConversationKind::Channel => Self::MentionHeuristic { owner_id },
        }
    }

    /// Build the thread forest. `messages` must be in store order.
    pub fn reconstruct(&self, messages: &[Message]) -> Vec<Thread> {
        match self {
            Self::ExplicitParent { owner_id, max_hops } => {
                explicit_parent_threads(messages, owner_id, *max_hops)
            }
            Self::MentionHeuristic { owner_id } => mention_threads(messages, owner_id),
        }
    }
}

/// The owner's "replies" view: only threads the owner has answered.
pub fn owner_answered(threads: Vec<Thread>) -> Vec<Thread> {
    threads.into_iter().filter(Thread::has_owner_reply).collect()
}

/// Split `@handle rest` into the normalized handle and `rest`.
/// Anything not starting with `@token ` is not an address.
pub fn split_address(text: &str) -> Option<(String, &str)> {
    let rest = text.strip_prefix('@')?;
    let (token, remainder) = rest.split_once(' ')?;
    if token.is_empty() {
        return None;
    }
    Some((normalize_handle(token), remainder))
}

fn author_of(message: &Message, owner_id: &str) -> ReplyAuthor {
    if message.sender_id == owner_id {
        ReplyAuthor::Owner
    } else {
        ReplyAuthor::Participant
    }
}

// -- Groups --

enum Placement {
    Root,
    Under(i64),
}

fn place(message: &Message, by_id: &HashMap<i64, &Message>, max_hops: usize) -> Placement {
    let Some(mut parent) = message.reply_to_id else {
        return Placement::Root;
    };
    if message.id == Some(parent) {
        return Placement::Root;
    }

    for _ in 0..max_hops {
        match by_id.get(&parent) {
            // Broken chain: the missing target is the best-effort root.
            None => return Placement::Under(parent),
            Some(p) => match p.reply_to_id {
                None => return Placement::Under(parent),
                Some(next) => parent = next,
            },
        }
    }

    // Cycle or overly deep chain.
    Placement::Root
}

fn explicit_parent_threads(messages: &[Message], owner_id: &str, max_hops: usize) -> Vec<Thread> {
    let by_id: HashMap<i64, &Message> = messages
        .iter()
        .filter_map(|m| m.id.map(|id| (id, m)))
        .collect();

    let mut threads: Vec<Thread> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut replies: Vec<(i64, &Message)> = Vec::new();

    for message in messages {
        match place(message, &by_id, max_hops) {
            Placement::Root => {
                let key = message.key().to_string();
                index.insert(key.clone(), threads.len());
                threads.push(Thread::new(key, ThreadRoot::Loaded(message.clone())));
            }
            Placement::Under(root_id) => replies.push((root_id, message)),
        }
    }

    for (root_id, message) in replies {
        let key = root_id.to_string();
        let slot = match index.get(&key) {
            Some(slot) => *slot,
            None => {
                let root = match by_id.get(&root_id) {
                    Some(m) => ThreadRoot::Loaded((*m).clone()),
                    None => ThreadRoot::Unloaded { id: root_id },
                };
                index.insert(key.clone(), threads.len());
                threads.push(Thread::new(key, root));
                threads.len() - 1
            }
        };
        threads[slot].replies.push(Reply::from_message(
            message,
            author_of(message, owner_id),
            message.content.clone(),
        ));
    }

    for thread in &mut threads {
        thread.replies.sort_by(reply_order);
    }

    // Most recently active conversation last. Stable sort keeps store order
    // for threads without any loaded id.
    threads.sort_by_key(|t| t.latest_loaded_id().unwrap_or(i64::MIN));
    threads
}

fn reply_order(a: &Reply, b: &Reply) -> Ordering {
    let by_id = match (a.id, b.id) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_id.then_with(|| a.created_at.cmp(&b.created_at))
}

// -- Channels --

fn mention_threads(messages: &[Message], owner_id: &str) -> Vec<Thread> {
    let mut threads: Vec<Thread> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    // Most recent root-level message per non-owner handle.
    let mut last_by_handle: HashMap<String, String> = HashMap::new();
    // Thread a handle is locked into once the owner answered it.
    let mut active_by_handle: HashMap<String, String> = HashMap::new();

    for message in messages {
        let is_owner = message.sender_id == owner_id;

        if !is_owner {
            if let Some(slot) = active_by_handle.get(&message.handle()).and_then(|k| index.get(k)) {
                threads[*slot].replies.push(Reply::from_message(
                    message,
                    ReplyAuthor::Participant,
                    message.content.clone(),
                ));
                continue;
            }
        }

        if is_owner {
            if let Some((handle, body)) = message.text().and_then(split_address) {
                let target = active_by_handle
                    .get(&handle)
                    .or_else(|| last_by_handle.get(&handle))
                    .cloned();
                if let Some(root_key) = target {
                    if let Some(slot) = index.get(&root_key) {
                        threads[*slot].replies.push(Reply::from_message(
                            message,
                            ReplyAuthor::Owner,
                            MessageContent::Text(body.to_string()),
                        ));
                        active_by_handle.insert(handle, root_key);
                        continue;
                    }
                }
            }
        }

        let key = message.key().to_string();
        index.insert(key.clone(), threads.len());
        threads.push(Thread::new(key.clone(), ThreadRoot::Loaded(message.clone())));
        if !is_owner {
            last_by_handle.insert(message.handle(), key);
        }
    }

    threads
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const OWNER: &str = "owner";

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
    }

    fn msg(id: i64, sender: &str, body: &str) -> Message {
        Message {
            id: Some(id),
            sender_id: sender.into(),
            display_handle: sender.into(),
            content: body.into(),
            created_at: at(id),
            reply_to_id: None,
            hidden: false,
        }
    }

    fn reply(id: i64, sender: &str, parent: i64) -> Message {
        Message {
            reply_to_id: Some(parent),
            ..msg(id, sender, "re")
        }
    }

    fn group() -> Addressing {
        Addressing::ExplicitParent {
            owner_id: OWNER.into(),
            max_hops: 25,
        }
    }

    fn channel() -> Addressing {
        Addressing::MentionHeuristic {
            owner_id: OWNER.into(),
        }
    }

    fn reply_ids(thread: &Thread) -> Vec<i64> {
        thread.replies.iter().filter_map(|r| r.id).collect()
    }

    #[test]
    fn channel_mention_threading() {
        let messages = vec![
            msg(1, "alice", "hi"),
            msg(2, OWNER, "@alice welcome"),
            msg(3, "alice", "thanks"),
        ];
        let threads = channel().reconstruct(&messages);

        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].root_id(), Some(1));
        let replies = &threads[0].replies;
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].author, ReplyAuthor::Owner);
        assert_eq!(replies[0].content, MessageContent::Text("welcome".into()));
        assert_eq!(replies[0].id, Some(2));
        assert_eq!(replies[1].author, ReplyAuthor::Participant);
        assert_eq!(replies[1].content, MessageContent::Text("thanks".into()));
        assert_eq!(replies[1].id, Some(3));
    }

    #[test]
    fn channel_owner_reply_targets_latest_root_of_handle() {
        let messages = vec![
            msg(1, "alice", "first"),
            msg(2, "bob", "yo"),
            msg(3, "alice", "second"),
            msg(4, OWNER, "@Alice hello"),
        ];
        let threads = channel().reconstruct(&messages);

        assert_eq!(threads.len(), 3);
        let second = threads.iter().find(|t| t.root_id() == Some(3)).unwrap();
        assert_eq!(reply_ids(second), vec![4]);
        assert!(threads.iter().filter(|t| t.root_id() != Some(3)).all(|t| t.replies.is_empty()));
    }

    #[test]
    fn channel_unmatched_owner_mention_is_a_root() {
        let messages = vec![msg(1, OWNER, "@nobody look at this"), msg(2, OWNER, "@ spaced")];
        let threads = channel().reconstruct(&messages);
        assert_eq!(threads.len(), 2);
        assert!(threads.iter().all(|t| t.replies.is_empty()));
    }

    #[test]
    fn channel_locked_participant_never_starts_new_root() {
        let messages = vec![
            msg(1, "alice", "q1"),
            msg(2, OWNER, "@alice a1"),
            msg(3, "alice", "q2"),
            msg(4, "alice", "q3"),
            msg(5, OWNER, "@alice a2"),
        ];
        let threads = channel().reconstruct(&messages);
        assert_eq!(threads.len(), 1);
        assert_eq!(reply_ids(&threads[0]), vec![2, 3, 4, 5]);
    }

    #[test]
    fn owner_answered_filters_unanswered_roots() {
        let messages = vec![
            msg(1, "alice", "hi"),
            msg(2, "bob", "hey"),
            msg(3, OWNER, "@bob hello"),
        ];
        let answered = owner_answered(channel().reconstruct(&messages));
        assert_eq!(answered.len(), 1);
        assert_eq!(answered[0].root_id(), Some(2));
    }

    #[test]
    fn group_replies_group_under_root_by_id() {
        let messages = vec![
            msg(1, "alice", "root"),
            reply(2, "bob", 1),
            reply(3, OWNER, 2),
            msg(4, "carol", "other root"),
        ];
        let threads = group().reconstruct(&messages);

        assert_eq!(threads.len(), 2);
        // Root 1 was last active at id 3, root 4 at id 4.
        assert_eq!(threads[0].root_id(), Some(1));
        assert_eq!(reply_ids(&threads[0]), vec![2, 3]);
        assert_eq!(threads[0].replies[1].author, ReplyAuthor::Owner);
        assert_eq!(threads[1].root_id(), Some(4));
    }

    #[test]
    fn group_thread_with_new_reply_moves_to_bottom() {
        let messages = vec![msg(1, "alice", "a"), msg(2, "bob", "b"), reply(3, "carol", 1)];
        let threads = group().reconstruct(&messages);
        let order: Vec<Option<i64>> = threads.iter().map(Thread::root_id).collect();
        assert_eq!(order, vec![Some(2), Some(1)]);
    }

    #[test]
    fn group_missing_parent_becomes_synthetic_root() {
        let messages = vec![reply(5, "alice", 999)];
        let threads = group().reconstruct(&messages);

        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].root, ThreadRoot::Unloaded { id: 999 });
        assert_eq!(threads[0].root_key, "999");
        assert_eq!(reply_ids(&threads[0]), vec![5]);
    }

    #[test]
    fn group_broken_chain_groups_under_missing_target() {
        let messages = vec![reply(7, "bob", 999), reply(8, "carol", 7)];
        let threads = group().reconstruct(&messages);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].root_id(), Some(999));
        assert_eq!(reply_ids(&threads[0]), vec![7, 8]);
    }

    #[test]
    fn group_cycles_terminate() {
        let self_ref = vec![reply(5, "alice", 5)];
        let threads = group().reconstruct(&self_ref);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].root_id(), Some(5));
        assert!(threads[0].replies.is_empty());

        let loop_of_two = vec![reply(5, "alice", 6), reply(6, "bob", 5)];
        let threads = group().reconstruct(&loop_of_two);
        assert_eq!(threads.len(), 2);
        assert!(threads.iter().all(|t| t.replies.is_empty()));
    }

    #[test]
    fn split_address_requires_token_and_space() {
        assert_eq!(split_address("@Jane hi there"), Some(("@jane".into(), "hi there")));
        assert_eq!(split_address("@jane"), None);
        assert_eq!(split_address("hi @jane x"), None);
        assert_eq!(split_address("@ jane"), None);
    }
}
