use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, broadcast};
use tracing::{info, warn};
use uuid::Uuid;

use ember_api::ChatApi;
use ember_types::events::EngineEvent;
use ember_types::models::{Conversation, MentionProfile, Message, Viewer};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::profiles::MentionProfileCache;
use crate::sequencer::FetchSequencer;
use crate::session::Session;
use crate::unlock::{self, MediaAccess, RewardGate, UnlockKey};

/// Registry of open conversations for one authenticated viewer.
pub struct Engine<A: ChatApi> {
    inner: Arc<EngineInner<A>>,
}

impl<A: ChatApi> Clone for Engine<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct EngineInner<A: ChatApi> {
    api: Arc<A>,
    viewer: Viewer,
    config: SyncConfig,
    sequencer: FetchSequencer,

    /// Open sessions: conversation_id -> session
    sessions: RwLock<HashMap<Uuid, Session<A>>>,

    /// Engine events for the view layer
    events: broadcast::Sender<EngineEvent>,

    profiles: MentionProfileCache,
    rewards: Arc<dyn RewardGate>,
}

impl<A: ChatApi> Engine<A> {
    pub fn new(api: A, viewer: Viewer, config: SyncConfig, rewards: Arc<dyn RewardGate>) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(EngineInner {
                api: Arc::new(api),
                viewer,
                config,
                sequencer: FetchSequencer::new(),
                sessions: RwLock::new(HashMap::new()),
                events,
                profiles: MentionProfileCache::new(),
                rewards,
            }),
        }
    }

    pub fn viewer(&self) -> &Viewer {
        &self.inner.viewer
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Subscribe to engine events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Conversation currently on screen.
    pub fn active(&self) -> Option<Uuid> {
        self.inner.sequencer.active()
    }

    pub async fn session(&self, conversation_id: Uuid) -> Option<Session<A>> {
        self.inner.sessions.read().await.get(&conversation_id).cloned()
    }

    pub async fn open_sessions(&self) -> Vec<Uuid> {
        self.inner.sessions.read().await.keys().copied().collect()
    }

    /// Show a conversation: make it active, pause every other poller, load
    /// the newest page and start polling. Reopening an existing session
    /// refreshes it.
    ///
    /// A transient failure of the first fetch is not an error; the poller
    /// picks the conversation up on its next tick.
    pub async fn open(&self, conversation: Conversation) -> Result<Session<A>, SyncError> {
        let id = conversation.id;
        if conversation.is_expired(Utc::now()) {
            return Err(SyncError::Expired(id));
        }

        self.inner.sequencer.activate(id);

        let (session, existing) = {
            let mut sessions = self.inner.sessions.write().await;
            for (other_id, other) in sessions.iter() {
                if *other_id != id {
                    other.stop_polling();
                }
            }
            match sessions.get(&id) {
                Some(session) => (session.clone(), true),
                None => {
                    let session = Session::new(
                        conversation,
                        self.inner.viewer.clone(),
                        Arc::clone(&self.inner.api),
                        self.inner.sequencer.clone(),
                        self.inner.config.clone(),
                        self.inner.events.clone(),
                    );
                    sessions.insert(id, session.clone());
                    (session, false)
                }
            }
        };

        let loaded = if existing {
            session.refresh().await
        } else {
            session.open().await
        };
        match loaded {
            Ok(_) => {}
            Err(e) if e.is_transient() => {
                warn!("Initial load of {} failed, polling will retry: {}", id, e);
            }
            Err(e) => {
                self.close(id).await;
                return Err(e);
            }
        }

        session.start_polling();
        self.inner
            .profiles
            .warm(self.inner.api.as_ref(), &session.messages())
            .await;
        Ok(session)
    }

    /// Discard a session and everything it holds.
    pub async fn close(&self, conversation_id: Uuid) -> bool {
        let removed = self.inner.sessions.write().await.remove(&conversation_id);
        match removed {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// App went to the background: stop every poller.
    pub async fn background(&self) {
        let sessions = self.inner.sessions.read().await;
        for session in sessions.values() {
            session.stop_polling();
        }
        info!("Engine backgrounded, {} sessions paused", sessions.len());
    }

    /// App came back: reload the active conversation from the newest page
    /// and resume its poller.
    pub async fn foreground(&self) -> Result<(), SyncError> {
        let Some(id) = self.active() else {
            return Ok(());
        };
        let Some(session) = self.session(id).await else {
            return Ok(());
        };
        if session.is_expired() {
            return Ok(());
        }

        info!("Engine foregrounded, refreshing {}", id);
        match session.refresh().await {
            Ok(_) => {}
            Err(e) if e.is_transient() => warn!("Refresh of {} failed: {}", id, e),
            Err(e) => return Err(e),
        }
        session.start_polling();
        Ok(())
    }

    /// Expire and drop every session whose parent post ran out at `now`.
    /// Returns the evicted conversation ids.
    pub async fn evict_expired(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let expired: Vec<Session<A>> = {
            let mut sessions = self.inner.sessions.write().await;
            let ids: Vec<Uuid> = sessions
                .values()
                .filter(|s| s.conversation().is_expired(now))
                .map(Session::id)
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &expired {
            session.expire();
            session.close();
        }
        if !expired.is_empty() {
            info!("Evicted {} expired conversations", expired.len());
        }
        expired.iter().map(Session::id).collect()
    }

    // -- Mentions --

    pub fn profiles(&self) -> &MentionProfileCache {
        &self.inner.profiles
    }

    pub async fn mention_profile(&self, handle: &str) -> Result<MentionProfile, SyncError> {
        self.inner.profiles.resolve(self.inner.api.as_ref(), handle).await
    }

    // -- Media --

    pub fn media_access(&self, conversation: &Conversation, message: &Message) -> Result<MediaAccess, SyncError> {
        unlock::media_access(self.inner.rewards.as_ref(), conversation, &self.inner.viewer, message)
    }

    /// Record a completed reward event for `key`.
    pub fn unlock_media(&self, key: &UnlockKey) -> Result<bool, SyncError> {
        self.inner.rewards.unlock(key)
    }
}
