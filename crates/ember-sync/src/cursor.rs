//! Backward pagination bookmark for one open conversation.

use ember_types::api::Page;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
    pub oldest_loaded_id: Option<i64>,
    pub has_more_older: bool,
    /// `beforeId` of the older-page request currently in flight.
    pub fetch_in_flight_for: Option<i64>,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the newest page, as on open or refresh-to-latest. The bookmark
    /// always moves to the page's first id and any older claim is dropped.
    /// A malformed page leaves the cursor as it was.
    pub fn apply_latest(&mut self, page: &Page) {
        let Some(has_more) = page.has_more else {
            return;
        };
        self.oldest_loaded_id = page.oldest_id();
        self.has_more_older = has_more;
        self.fetch_in_flight_for = None;
    }

    /// Claim the next older-page request. Returns the `beforeId` to send, or
    /// `None` when there is nothing older or the same request is in flight.
    ///
    /// The guard is keyed by the id: after the bookmark moved, a request for
    /// the new oldest id goes out even if the previous one has not landed.
    pub fn begin_older(&mut self) -> Option<i64> {
        if !self.has_more_older {
            return None;
        }
        let oldest = self.oldest_loaded_id?;
        if self.fetch_in_flight_for == Some(oldest) {
            return None;
        }
        self.fetch_in_flight_for = Some(oldest);
        Some(oldest)
    }

    /// Record an older page fetched with `before_id`.
    pub fn apply_older(&mut self, before_id: i64, page: &Page) {
        self.release(before_id);
        if let Some(has_more) = page.has_more {
            self.has_more_older = has_more;
        }
        let page_oldest = page.messages.iter().filter_map(|m| m.id).filter(|id| *id < before_id).min();
        self.oldest_loaded_id = match (self.oldest_loaded_id, page_oldest) {
            (Some(current), Some(new)) => Some(current.min(new)),
            (current, new) => current.or(new),
        };
    }

    /// Drop the in-flight claim after a failed or stale older fetch.
    pub fn release(&mut self, before_id: i64) {
        if self.fetch_in_flight_for == Some(before_id) {
            self.fetch_in_flight_for = None;
        }
    }
}
