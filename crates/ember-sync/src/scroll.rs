//! Scroll position bookkeeping across asynchronous inserts.
//!
//! Prepending history must not move what the user is looking at; new
//! messages follow the user only while they sit at the bottom.

use ember_types::events::ScrollCommand;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Viewport {
    pub content_height: f64,
    pub scroll_offset: f64,
    pub viewport_height: f64,
}

impl Viewport {
    pub fn distance_from_bottom(&self) -> f64 {
        self.content_height - (self.scroll_offset + self.viewport_height)
    }
}

/// What a scroll event implies for loading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrollObservation {
    pub near_top: bool,
    pub near_bottom: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PrependAdjust {
    previous_content_height: f64,
    previous_scroll_offset: f64,
}

#[derive(Debug, Clone)]
pub struct ScrollAnchor {
    pinned_to_latest: bool,
    pending_scroll_to_latest: bool,
    pending_prepend_adjust: Option<PrependAdjust>,
    unseen: usize,
    viewport: Viewport,
    near_bottom_px: f64,
    near_top_px: f64,
}

impl ScrollAnchor {
    pub fn new(near_bottom_px: f64, near_top_px: f64) -> Self {
        Self {
            pinned_to_latest: true,
            pending_scroll_to_latest: false,
            pending_prepend_adjust: None,
            unseen: 0,
            viewport: Viewport::default(),
            near_bottom_px,
            near_top_px,
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned_to_latest
    }

    pub fn unseen(&self) -> usize {
        self.unseen
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn has_pending_prepend_adjust(&self) -> bool {
        self.pending_prepend_adjust.is_some()
    }

    pub fn has_pending_scroll_to_latest(&self) -> bool {
        self.pending_scroll_to_latest
    }

    /// Arm the one-shot jump to the newest message (open / refresh).
    pub fn arm_scroll_to_latest(&mut self) {
        self.pending_scroll_to_latest = true;
        self.pinned_to_latest = true;
        self.unseen = 0;
    }

    /// Track a user or layout scroll.
    pub fn on_scroll(&mut self, viewport: Viewport) -> ScrollObservation {
        self.viewport = viewport;
        let observation = ScrollObservation {
            near_top: viewport.scroll_offset <= self.near_top_px,
            near_bottom: viewport.distance_from_bottom() <= self.near_bottom_px,
        };
        self.pinned_to_latest = observation.near_bottom;
        if self.pinned_to_latest {
            self.unseen = 0;
        }
        observation
    }

    /// Remember the geometry right before an older page is prepended.
    pub fn capture_before_prepend(&mut self) {
        self.pending_prepend_adjust = Some(PrependAdjust {
            previous_content_height: self.viewport.content_height,
            previous_scroll_offset: self.viewport.scroll_offset,
        });
    }

    /// The prepend turned out to add nothing.
    pub fn cancel_prepend_adjust(&mut self) {
        self.pending_prepend_adjust = None;
    }

    /// New messages landed at the tail (poll or own send).
    pub fn on_messages_appended(&mut self, added: usize) -> Option<ScrollCommand> {
        if added == 0 {
            return None;
        }
        if self.pinned_to_latest {
            return Some(ScrollCommand::ScrollToEnd);
        }
        self.unseen += added;
        Some(ScrollCommand::ShowJumpToLatest {
            unseen: self.unseen,
        })
    }

    /// Layout finished with a new content height.
    pub fn on_content_size_changed(&mut self, new_height: f64) -> Option<ScrollCommand> {
        let previous = self.viewport;
        self.viewport.content_height = new_height;

        if let Some(adjust) = self.pending_prepend_adjust.take() {
            let delta = new_height - adjust.previous_content_height;
            if delta > 0.0 {
                let offset = adjust.previous_scroll_offset + delta;
                self.viewport.scroll_offset = offset;
                return Some(ScrollCommand::ScrollToOffset { offset });
            }
            self.viewport = Viewport {
                content_height: new_height,
                ..previous
            };
            return None;
        }

        if self.pending_scroll_to_latest && new_height > 0.0 {
            self.pending_scroll_to_latest = false;
            self.pinned_to_latest = true;
            return Some(ScrollCommand::ScrollToEnd);
        }

        None
    }

    /// The user tapped the "new messages" affordance.
    pub fn jump_to_latest(&mut self) -> ScrollCommand {
        self.pinned_to_latest = true;
        self.unseen = 0;
        ScrollCommand::ScrollToEnd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor() -> ScrollAnchor {
        ScrollAnchor::new(40.0, 100.0)
    }

    #[test]
    fn prepend_preserves_viewport() {
        let mut anchor = anchor();
        anchor.on_scroll(Viewport {
            content_height: 4000.0,
            scroll_offset: 0.0,
            viewport_height: 800.0,
        });

        anchor.capture_before_prepend();
        assert!(anchor.has_pending_prepend_adjust());
        let command = anchor.on_content_size_changed(4900.0);
        assert_eq!(command, Some(ScrollCommand::ScrollToOffset { offset: 900.0 }));
        assert!(!anchor.has_pending_prepend_adjust());
        assert_eq!(anchor.viewport().scroll_offset, 900.0);
    }

    #[test]
    fn prepend_without_growth_does_not_move() {
        let mut anchor = anchor();
        anchor.on_scroll(Viewport {
            content_height: 4000.0,
            scroll_offset: 50.0,
            viewport_height: 800.0,
        });
        anchor.capture_before_prepend();
        assert_eq!(anchor.on_content_size_changed(4000.0), None);
        assert_eq!(anchor.viewport().scroll_offset, 50.0);
    }

    #[test]
    fn near_edges() {
        let mut anchor = anchor();
        let observation = anchor.on_scroll(Viewport {
            content_height: 1000.0,
            scroll_offset: 170.0,
            viewport_height: 800.0,
        });
        assert_eq!(observation, ScrollObservation { near_top: false, near_bottom: true });
        assert!(anchor.is_pinned());

        let observation = anchor.on_scroll(Viewport {
            content_height: 1000.0,
            scroll_offset: 100.0,
            viewport_height: 800.0,
        });
        assert_eq!(observation, ScrollObservation { near_top: true, near_bottom: false });
        assert!(!anchor.is_pinned());
    }

    #[test]
    fn appended_messages_follow_only_when_pinned() {
        let mut anchor = anchor();
        assert_eq!(anchor.on_messages_appended(2), Some(ScrollCommand::ScrollToEnd));

        anchor.on_scroll(Viewport {
            content_height: 3000.0,
            scroll_offset: 0.0,
            viewport_height: 800.0,
        });
        assert_eq!(
            anchor.on_messages_appended(2),
            Some(ScrollCommand::ShowJumpToLatest { unseen: 2 })
        );
        assert_eq!(
            anchor.on_messages_appended(1),
            Some(ScrollCommand::ShowJumpToLatest { unseen: 3 })
        );
        assert_eq!(anchor.on_messages_appended(0), None);

        assert_eq!(anchor.jump_to_latest(), ScrollCommand::ScrollToEnd);
        assert_eq!(anchor.unseen(), 0);
        assert!(anchor.is_pinned());
    }

    #[test]
    fn armed_scroll_fires_once_on_first_layout() {
        let mut anchor = anchor();
        anchor.arm_scroll_to_latest();
        assert_eq!(anchor.on_content_size_changed(0.0), None);
        assert_eq!(anchor.on_content_size_changed(2000.0), Some(ScrollCommand::ScrollToEnd));
        assert_eq!(anchor.on_content_size_changed(2400.0), None);
    }
}
