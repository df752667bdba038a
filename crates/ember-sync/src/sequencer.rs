//! Out-of-order response protection.
//!
//! Every fetch takes a token before it suspends and checks it after. A token
//! goes stale when a newer fetch starts for the same conversation or when the
//! user switches away from it. In-flight requests are never cancelled; their
//! results are just ignored.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceToken {
    conversation_id: Uuid,
    seq: u64,
}

impl SequenceToken {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// Process-wide sequencer, cheap to clone.
#[derive(Clone, Default)]
pub struct FetchSequencer {
    inner: Arc<Mutex<SequencerState>>,
}

#[derive(Default)]
struct SequencerState {
    counters: HashMap<Uuid, u64>,
    active: Option<Uuid>,
}

impl FetchSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SequencerState> {
        // The state is a counter map; a poisoned lock still holds usable data.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a fetch. Invalidates every earlier token for the conversation.
    pub fn begin_fetch(&self, conversation_id: Uuid) -> SequenceToken {
        let mut state = self.state();
        let counter = state.counters.entry(conversation_id).or_insert(0);
        *counter += 1;
        SequenceToken {
            conversation_id,
            seq: *counter,
        }
    }

    pub fn is_stale(&self, conversation_id: Uuid, token: SequenceToken) -> bool {
        if token.conversation_id != conversation_id {
            return true;
        }
        let state = self.state();
        state.counters.get(&conversation_id).copied() != Some(token.seq)
    }

    /// Make `conversation_id` the visible conversation. Fetches still in
    /// flight for the previously visible one become stale.
    pub fn activate(&self, conversation_id: Uuid) {
        let mut state = self.state();
        if let Some(previous) = state.active.replace(conversation_id) {
            if previous != conversation_id {
                *state.counters.entry(previous).or_insert(0) += 1;
            }
        }
    }

    /// Invalidate everything in flight for a conversation.
    pub fn invalidate(&self, conversation_id: Uuid) {
        let mut state = self.state();
        *state.counters.entry(conversation_id).or_insert(0) += 1;
        if state.active == Some(conversation_id) {
            state.active = None;
        }
    }

    pub fn active(&self) -> Option<Uuid> {
        self.state().active
    }
}
