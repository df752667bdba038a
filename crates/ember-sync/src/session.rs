//! One open conversation: its cursor, message window, scroll anchor and
//! poll subscription.
//!
//! All state lives in a [`SessionState`] record mutated by pure reducers.
//! Network awaits happen outside the lock; every result is checked against
//! the [`FetchSequencer`] before it is reduced into the state.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ember_api::ChatApi;
use ember_types::api::Page;
use ember_types::content::MessageContent;
use ember_types::events::{EngineEvent, ScrollCommand};
use ember_types::models::{Conversation, Message, Viewer};

use crate::config::SyncConfig;
use crate::cursor::Cursor;
use crate::error::SyncError;
use crate::poll::{PollSubscription, PollTarget};
use crate::scroll::{ScrollAnchor, ScrollObservation, Viewport};
use crate::sequencer::FetchSequencer;
use crate::store::MessageStore;
use crate::thread::{Addressing, Thread, owner_answered};
use crate::turn::{self, TurnDecision};

/// What a reducer did to the state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    pub store_changed: bool,
    /// Messages new to the window.
    pub added: usize,
    pub scroll: Option<ScrollCommand>,
}

/// Per-conversation state record.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub cursor: Cursor,
    pub store: MessageStore,
    pub anchor: ScrollAnchor,
    pub turn: TurnDecision,
    /// Set once a newest page has been accepted into the window.
    pub latest_loaded: bool,
    pub expired: bool,
    pub closed: bool,
}

impl SessionState {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            cursor: Cursor::new(),
            store: MessageStore::new(),
            anchor: ScrollAnchor::new(config.near_bottom_px, config.near_top_px),
            turn: TurnDecision::Open,
            latest_loaded: false,
            expired: false,
            closed: false,
        }
    }

    /// Newest page from open or refresh. The bookmark is replaced only here,
    /// once the page is accepted. A malformed page changes nothing.
    pub fn apply_latest(&mut self, page: Page) -> Delta {
        if page.is_malformed() {
            return Delta::default();
        }
        self.cursor.apply_latest(&page);
        self.latest_loaded = true;
        let store_changed = self.store.replace_with_latest(page.messages);
        Delta {
            store_changed,
            added: 0,
            scroll: None,
        }
    }

    /// Older page fetched with `before_id`. Only strictly older messages are
    /// kept; the viewport correction is armed only if something was added.
    pub fn apply_older(&mut self, before_id: i64, page: Page) -> Delta {
        self.cursor.apply_older(before_id, &page);

        let older: Vec<Message> = page
            .messages
            .into_iter()
            .filter(|m| m.id.is_some_and(|id| id < before_id))
            .collect();

        self.anchor.capture_before_prepend();
        let added = self.store.prepend_older(older);
        if added == 0 {
            self.anchor.cancel_prepend_adjust();
        }

        Delta {
            store_changed: added > 0,
            added,
            scroll: None,
        }
    }

    /// Newest page from the poll scheduler, merged into the window.
    pub fn apply_poll(&mut self, page: Page) -> Delta {
        // A session whose first fetch failed gets its bookmark from the poll.
        if !self.latest_loaded && !page.is_malformed() {
            self.cursor.apply_latest(&page);
            self.latest_loaded = true;
        }
        self.merge(page.messages)
    }

    /// The server's copy of a message this client just sent.
    pub fn apply_sent(&mut self, message: Message) -> Delta {
        self.merge(vec![message])
    }

    /// Visibility flag confirmed by the server.
    pub fn apply_visibility(&mut self, message_id: i64, hidden: bool) -> Delta {
        let Some(held) = self.store.get(message_id) else {
            return Delta::default();
        };
        let updated = Message {
            hidden,
            ..held.clone()
        };
        self.merge(vec![updated])
    }

    fn merge(&mut self, messages: Vec<Message>) -> Delta {
        let outcome = self.store.merge_poll(messages);
        Delta {
            store_changed: outcome.changed,
            added: outcome.added,
            scroll: self.anchor.on_messages_appended(outcome.added),
        }
    }

    /// Re-evaluate the turn gate. Returns the new decision if it flipped.
    pub fn refresh_turn(&mut self, conversation: &Conversation, viewer: &Viewer) -> Option<TurnDecision> {
        let decision = turn::evaluate(conversation, viewer, self.store.messages());
        if decision.can_send() == self.turn.can_send() {
            self.turn = decision;
            return None;
        }
        self.turn = decision.clone();
        Some(decision)
    }
}

/// Handle to an open conversation, cheap to clone.
pub struct Session<A: ChatApi> {
    inner: Arc<SessionInner<A>>,
}

impl<A: ChatApi> Clone for Session<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct SessionInner<A: ChatApi> {
    conversation: Conversation,
    viewer: Viewer,
    api: Arc<A>,
    sequencer: FetchSequencer,
    config: SyncConfig,
    addressing: Addressing,
    state: Mutex<SessionState>,
    poller: Mutex<PollSubscription>,
    events: broadcast::Sender<EngineEvent>,
}

impl<A: ChatApi> Session<A> {
    pub fn new(
        conversation: Conversation,
        viewer: Viewer,
        api: Arc<A>,
        sequencer: FetchSequencer,
        config: SyncConfig,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let addressing = Addressing::for_conversation(&conversation, config.max_parent_hops);
        let state = SessionState::new(&config);
        let poller = PollSubscription::new(config.poll_interval);
        Self {
            inner: Arc::new(SessionInner {
                conversation,
                viewer,
                api,
                sequencer,
                config,
                addressing,
                state: Mutex::new(state),
                poller: Mutex::new(poller),
                events,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.conversation.id
    }

    pub fn conversation(&self) -> &Conversation {
        &self.inner.conversation
    }

    pub fn viewer(&self) -> &Viewer {
        &self.inner.viewer
    }

    pub fn is_owner_view(&self) -> bool {
        self.inner.conversation.is_owner(&self.inner.viewer.user_id)
    }

    /// Snapshot of the whole state record.
    pub fn snapshot(&self) -> SessionState {
        self.inner.state().clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.state().store.messages().to_vec()
    }

    pub fn cursor(&self) -> Cursor {
        self.inner.state().cursor.clone()
    }

    // -- Loading --

    /// Load the newest page and arm the jump to the latest message.
    pub async fn open(&self) -> Result<bool, SyncError> {
        info!(
            "Opening {:?} conversation {}",
            self.inner.conversation.kind, self.inner.conversation.id
        );
        self.inner.state().anchor.arm_scroll_to_latest();
        self.inner.request_latest().await
    }

    /// Pull-to-refresh: reload the newest page. The bookmark is replaced
    /// when the page lands; a failed or stale refresh keeps the old one.
    pub async fn refresh(&self) -> Result<bool, SyncError> {
        self.inner.state().anchor.arm_scroll_to_latest();
        self.inner.request_latest().await
    }

    /// Returns whether a page was applied; `false` for stale responses.
    pub async fn request_latest(&self) -> Result<bool, SyncError> {
        self.inner.request_latest().await
    }

    /// Load the next older page. `Ok(false)` when there is nothing to do
    /// (no more history, same request already in flight, stale response).
    pub async fn request_older(&self) -> Result<bool, SyncError> {
        self.inner.request_older().await
    }

    pub async fn request_poll(&self) -> Result<bool, SyncError> {
        self.inner.request_poll().await
    }

    // -- Writing --

    /// Send a message. The turn gate and expiry are checked before any
    /// request goes out; the created message is merged like a poll result.
    pub async fn send(&self, content: MessageContent, reply_to_id: Option<i64>) -> Result<Message, SyncError> {
        let inner = &self.inner;
        inner.ensure_open()?;
        if inner.expire_if_due() {
            return Err(SyncError::Expired(inner.conversation.id));
        }

        let decision = {
            let state = inner.state();
            turn::evaluate(&inner.conversation, &inner.viewer, state.store.messages())
        };
        if let Some(reason) = decision.reason() {
            debug!("Send rejected by turn gate in {}", inner.conversation.id);
            return Err(SyncError::TurnViolation {
                reason: reason.to_string(),
            });
        }

        let message = inner
            .api
            .send_message(inner.conversation.reference(), content.encode(), reply_to_id)
            .await?;
        info!(
            "Sent message {:?} to {}",
            message.id, inner.conversation.id
        );

        inner.commit(|state| state.apply_sent(message.clone()));
        Ok(message)
    }

    /// Owner-only hide/unhide of a loaded message.
    pub async fn set_hidden(&self, message_id: i64, hidden: bool) -> Result<bool, SyncError> {
        let inner = &self.inner;
        inner.ensure_open()?;
        if !self.is_owner_view() {
            return Err(SyncError::NotOwner);
        }
        if inner.state().store.get(message_id).is_none() {
            return Err(SyncError::UnknownMessage(message_id));
        }

        let stored = inner
            .api
            .set_visibility(inner.conversation.reference(), message_id, hidden)
            .await?;
        inner.commit(|state| state.apply_visibility(message_id, stored));
        Ok(stored)
    }

    // -- Derived views --

    /// Thread forest for rendering. Hidden messages are dropped for
    /// everyone but the owner, who sees them flagged.
    pub fn threads(&self) -> Vec<Thread> {
        let mut messages = self.messages();
        if !self.is_owner_view() {
            messages.retain(|m| !m.hidden);
        }
        self.inner.addressing.reconstruct(&messages)
    }

    /// The owner's replies view.
    pub fn owner_replies(&self) -> Vec<Thread> {
        owner_answered(self.threads())
    }

    pub fn turn(&self) -> TurnDecision {
        self.inner.state().turn.clone()
    }

    pub fn can_send(&self) -> bool {
        let state = self.inner.state();
        !state.expired && state.turn.can_send()
    }

    // -- Viewport --

    /// Report a scroll. Near the top the caller should request an older page.
    pub fn on_scroll(&self, viewport: Viewport) -> ScrollObservation {
        self.inner.state().anchor.on_scroll(viewport)
    }

    /// Report a finished layout pass.
    pub fn on_content_size_changed(&self, content_height: f64) -> Option<ScrollCommand> {
        let command = self.inner.state().anchor.on_content_size_changed(content_height);
        if let Some(command) = command {
            self.inner.emit_scroll(command);
        }
        command
    }

    pub fn jump_to_latest(&self) -> ScrollCommand {
        let command = self.inner.state().anchor.jump_to_latest();
        self.inner.emit_scroll(command);
        command
    }

    // -- Lifecycle --

    pub fn start_polling(&self) -> bool {
        if self.inner.state().expired {
            return false;
        }
        let started = self.inner.poller().start(Arc::downgrade(&self.inner));
        if started {
            info!(
                "Polling {} every {:?}",
                self.inner.conversation.id, self.inner.config.poll_interval
            );
        }
        started
    }

    pub fn stop_polling(&self) -> bool {
        let stopped = self.inner.poller().stop();
        if stopped {
            info!("Stopped polling {}", self.inner.conversation.id);
        }
        stopped
    }

    pub fn is_polling(&self) -> bool {
        self.inner.poller().is_running()
    }

    /// Mark the conversation read-only. Returns `false` if it already was.
    pub fn expire(&self) -> bool {
        self.inner.mark_expired()
    }

    pub fn is_expired(&self) -> bool {
        self.inner.state().expired
    }

    /// Drop everything in flight and stop polling.
    pub fn close(&self) {
        self.inner.sequencer.invalidate(self.inner.conversation.id);
        self.stop_polling();
        {
            let mut state = self.inner.state();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        info!("Closed conversation {}", self.inner.conversation.id);
        self.inner.emit(EngineEvent::SessionClosed {
            conversation_id: self.inner.conversation.id,
        });
    }
}

impl<A: ChatApi> SessionInner<A> {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn poller(&self) -> MutexGuard<'_, PollSubscription> {
        self.poller.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    fn emit_scroll(&self, command: ScrollCommand) {
        self.emit(EngineEvent::Scroll {
            conversation_id: self.conversation.id,
            command,
        });
    }

    async fn fetch(&self, before_id: Option<i64>) -> Result<Page, SyncError> {
        let page = self
            .api
            .fetch_messages(self.conversation.reference(), self.config.page_size, before_id)
            .await
            .inspect_err(|e| warn!("Fetch for {} failed: {}", self.conversation.id, e))?;
        if page.is_malformed() {
            warn!("Malformed page for {}, treating as empty", self.conversation.id);
        }
        Ok(page)
    }

    async fn request_latest(&self) -> Result<bool, SyncError> {
        let id = self.conversation.id;
        let token = self.sequencer.begin_fetch(id);
        let page = self.fetch(None).await?;
        if self.sequencer.is_stale(id, token) {
            debug!("Dropping stale latest page for {} (seq {})", id, token.seq());
            return Ok(false);
        }
        self.commit(|state| state.apply_latest(page));
        Ok(true)
    }

    async fn request_older(&self) -> Result<bool, SyncError> {
        let id = self.conversation.id;
        let claim = self.state().cursor.begin_older();
        let Some(before_id) = claim else {
            return Ok(false);
        };

        let token = self.sequencer.begin_fetch(id);
        let page = match self.fetch(Some(before_id)).await {
            Ok(page) => page,
            Err(e) => {
                self.state().cursor.release(before_id);
                return Err(e);
            }
        };
        if self.sequencer.is_stale(id, token) {
            debug!("Dropping stale older page for {} before {}", id, before_id);
            self.state().cursor.release(before_id);
            return Ok(false);
        }

        self.commit(|state| state.apply_older(before_id, page));
        Ok(true)
    }

    async fn request_poll(&self) -> Result<bool, SyncError> {
        let id = self.conversation.id;
        if self.expire_if_due() {
            return Err(SyncError::Expired(id));
        }

        let token = self.sequencer.begin_fetch(id);
        let page = self.fetch(None).await?;
        if self.sequencer.is_stale(id, token) {
            debug!("Dropping stale poll for {} (seq {})", id, token.seq());
            return Ok(false);
        }
        self.commit(|state| state.apply_poll(page));
        Ok(true)
    }

    fn ensure_open(&self) -> Result<(), SyncError> {
        if self.state().closed {
            return Err(SyncError::NotOpen(self.conversation.id));
        }
        Ok(())
    }

    /// Run a reducer and publish what changed once the lock is released.
    fn commit(&self, reduce: impl FnOnce(&mut SessionState) -> Delta) -> Delta {
        let (delta, signature, count, summary, turn) = {
            let mut state = self.state();
            if state.closed {
                return Delta::default();
            }
            let delta = reduce(&mut state);
            let turn = if delta.store_changed {
                state.refresh_turn(&self.conversation, &self.viewer)
            } else {
                None
            };
            (
                delta,
                state.store.signature().to_string(),
                state.store.len(),
                state.store.summary(),
                turn,
            )
        };

        let conversation_id = self.conversation.id;
        if delta.store_changed {
            debug!("Store {} now {}", conversation_id, summary);
            self.emit(EngineEvent::StoreChanged {
                conversation_id,
                signature,
                message_count: count,
            });
        } else {
            debug!("Store {} unchanged at {}", conversation_id, summary);
        }
        if let Some(command) = delta.scroll {
            self.emit_scroll(command);
        }
        if let Some(decision) = turn {
            self.emit(EngineEvent::TurnGateChanged {
                conversation_id,
                can_send: decision.can_send(),
                reason: decision.reason().map(str::to_string),
            });
        }
        delta
    }

    fn expire_if_due(&self) -> bool {
        if self.state().expired {
            return true;
        }
        if self.conversation.is_expired(Utc::now()) {
            self.mark_expired();
            return true;
        }
        false
    }

    fn mark_expired(&self) -> bool {
        {
            let mut state = self.state();
            if state.expired {
                return false;
            }
            state.expired = true;
        }
        self.poller().stop();
        info!("Conversation {} expired", self.conversation.id);
        self.emit(EngineEvent::ConversationExpired {
            conversation_id: self.conversation.id,
        });
        true
    }
}

impl<A: ChatApi> PollTarget for SessionInner<A> {
    /// Poll only while the conversation is live and the viewport sits at the
    /// newest message.
    fn wants_poll(&self) -> bool {
        let state = self.state();
        !state.closed && !state.expired && state.anchor.is_pinned()
    }

    async fn poll(&self) {
        match self.request_poll().await {
            Ok(_) => {}
            Err(e) if e.is_transient() => debug!("Poll for {} failed, retrying next tick: {}", self.conversation.id, e),
            Err(e) => warn!("Poll for {} failed: {}", self.conversation.id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn msg(id: i64) -> Message {
        Message {
            id: Some(id),
            sender_id: "u1".into(),
            display_handle: "jane".into(),
            content: "x".into(),
            created_at: DateTime::from_timestamp(1_700_000_000 + id, 0).unwrap(),
            reply_to_id: None,
            hidden: false,
        }
    }

    fn page(ids: std::ops::RangeInclusive<i64>, has_more: bool) -> Page {
        Page::new(ids.map(msg).collect(), has_more)
    }

    fn state() -> SessionState {
        SessionState::new(&SyncConfig::default())
    }

    #[test]
    fn latest_then_older_then_poll() {
        let mut state = state();
        let delta = state.apply_latest(page(41..=80, true));
        assert!(delta.store_changed);
        assert_eq!(state.cursor.oldest_loaded_id, Some(41));

        let before = state.cursor.begin_older().unwrap();
        let delta = state.apply_older(before, page(1..=41, false));
        assert_eq!(delta.added, 40);
        assert!(state.anchor.has_pending_prepend_adjust());
        assert_eq!(state.cursor.oldest_loaded_id, Some(1));

        let delta = state.apply_poll(page(42..=81, false));
        assert_eq!(delta.added, 1);
        assert_eq!(delta.scroll, Some(ScrollCommand::ScrollToEnd));
        assert_eq!(state.store.len(), 81);
        // A poll never touches the bookmark once it exists.
        assert_eq!(state.cursor.oldest_loaded_id, Some(1));
    }

    #[test]
    fn duplicate_older_page_schedules_no_adjustment() {
        let mut state = state();
        state.apply_latest(page(1..=40, true));
        let before = state.cursor.begin_older().unwrap();

        let delta = state.apply_older(before, page(1..=40, false));
        assert_eq!(delta, Delta::default());
        assert!(!state.anchor.has_pending_prepend_adjust());
    }

    #[test]
    fn malformed_pages_are_ignored() {
        let mut state = state();
        state.apply_latest(page(1..=40, true));
        let signature = state.store.signature().clone();

        assert_eq!(state.apply_latest(Page::malformed()), Delta::default());
        assert_eq!(state.apply_poll(Page::malformed()), Delta::default());
        assert_eq!(state.store.signature(), &signature);
        assert!(state.cursor.has_more_older);
    }

    #[test]
    fn malformed_older_page_keeps_bookmark() {
        let mut state = state();
        state.apply_latest(page(41..=80, true));
        let before = state.cursor.begin_older().unwrap();

        assert_eq!(state.apply_older(before, Page::malformed()), Delta::default());
        assert_eq!(state.cursor.oldest_loaded_id, Some(41));
        assert!(state.cursor.has_more_older);
        assert_eq!(state.cursor.fetch_in_flight_for, None);
        assert!(!state.anchor.has_pending_prepend_adjust());
    }

    #[test]
    fn out_of_order_poll_renders_ascending() {
        fn from(id: i64, sender: &str, body: &str) -> Message {
            Message {
                sender_id: sender.into(),
                display_handle: sender.into(),
                content: body.into(),
                ..msg(id)
            }
        }

        let mut state = state();
        state.apply_latest(Page::new(
            vec![from(1, "alice", "hi"), from(2, "bob", "yo"), from(5, "bob", "again")],
            false,
        ));
        state.apply_poll(Page::new(
            vec![
                from(6, "owner", "@bob ok"),
                from(3, "owner", "@alice welcome"),
                from(4, "alice", "thanks"),
                from(5, "bob", "again"),
            ],
            false,
        ));

        let ids: Vec<i64> = state.store.messages().iter().filter_map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);

        let addressing = Addressing::MentionHeuristic {
            owner_id: "owner".into(),
        };
        let threads = addressing.reconstruct(state.store.messages());
        for thread in &threads {
            let root = thread.root_id().unwrap();
            let replies: Vec<i64> = thread.replies.iter().filter_map(|r| r.id).collect();
            assert!(replies.windows(2).all(|w| w[0] < w[1]));
            assert!(replies.iter().all(|id| *id > root));
        }
        let roots: Vec<i64> = threads.iter().filter_map(|t| t.root_id()).collect();
        assert_eq!(roots, vec![1, 2, 5]);

        let alice = threads.iter().find(|t| t.root_id() == Some(1)).unwrap();
        let replies: Vec<i64> = alice.replies.iter().filter_map(|r| r.id).collect();
        assert_eq!(replies, vec![3, 4]);
    }

    #[test]
    fn visibility_change_is_a_store_change() {
        let mut state = state();
        state.apply_latest(page(1..=3, false));

        let delta = state.apply_visibility(2, true);
        assert!(delta.store_changed);
        assert_eq!(delta.added, 0);
        assert!(state.store.get(2).unwrap().hidden);
        assert_eq!(state.apply_visibility(99, true), Delta::default());
    }

    #[test]
    fn poll_never_moves_an_accepted_bookmark() {
        let mut state = state();
        state.apply_latest(page(61..=100, true));
        let before = state.cursor.begin_older().unwrap();
        state.apply_older(before, page(21..=60, true));

        state.apply_poll(page(62..=101, true));
        assert_eq!(state.cursor.oldest_loaded_id, Some(21));
        assert!(state.cursor.has_more_older);
    }

    #[test]
    fn poll_bootstraps_missing_bookmark() {
        let mut state = state();
        state.apply_poll(page(5..=44, true));
        assert_eq!(state.cursor.oldest_loaded_id, Some(5));
        assert!(state.cursor.has_more_older);
    }
}
