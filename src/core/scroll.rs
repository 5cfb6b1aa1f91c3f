//! # Scroll Follow
//!
//! Decides whether new messages move the viewport.
//!
//! ```text
//!            scrolled > threshold from bottom
//!  Following ───────────────────────────────► Detached
//!      ▲                                          │
//!      └──── jump_to_latest() / back near bottom ─┘
//! ```
//!
//! Mode changes come only from scroll observations and the jump affordance.
//! Message arrival never changes the mode: in Following it requests a
//! scroll to the bottom, in Detached it bumps the unseen counter.

use log::debug;

pub const DEFAULT_THRESHOLD_PX: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrollMode {
    #[default]
    Following,
    Detached,
}

/// Viewport geometry reported by the renderer, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollMetrics {
    /// Distance from the top of the content to the top of the viewport.
    pub offset: f64,
    pub viewport_height: f64,
    pub content_height: f64,
}

impl ScrollMetrics {
    pub fn distance_from_bottom(&self) -> f64 {
        (self.content_height - (self.offset + self.viewport_height)).max(0.0)
    }
}

/// What the renderer should do after an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirective {
    /// Nothing to do.
    Stay,
    /// Scroll to the newest entry.
    ScrollToBottom,
    /// Leave the viewport alone; show (or update) the jump-to-latest affordance.
    ShowJumpToLatest { unseen: usize },
}

/// Created fresh per mounted conversation view.
pub struct ScrollFollowController {
    mode: ScrollMode,
    threshold: f64,
    unseen: usize,
}

impl Default for ScrollFollowController {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_PX)
    }
}

impl ScrollFollowController {
    pub fn new(threshold: f64) -> Self {
        Self {
            mode: ScrollMode::Following,
            threshold,
            unseen: 0,
        }
    }

    pub fn mode(&self) -> ScrollMode {
        self.mode
    }

    /// Messages that arrived while Detached.
    pub fn unseen(&self) -> usize {
        self.unseen
    }

    pub fn jump_to_latest_visible(&self) -> bool {
        self.mode == ScrollMode::Detached
    }

    /// Feeds a viewport observation. The only path from Following to Detached.
    pub fn observe(&mut self, metrics: ScrollMetrics) -> Option<ScrollMode> {
        let next = if metrics.distance_from_bottom() > self.threshold {
            ScrollMode::Detached
        } else {
            ScrollMode::Following
        };
        if next == self.mode {
            return None;
        }
        debug!(
            "Scroll mode {:?} -> {:?} (distance {:.0}px)",
            self.mode,
            next,
            metrics.distance_from_bottom()
        );
        self.mode = next;
        if next == ScrollMode::Following {
            self.unseen = 0;
        }
        Some(next)
    }

    /// Called after `count` messages were added to the stream.
    pub fn on_messages_added(&mut self, count: usize) -> ScrollDirective {
        if count == 0 {
            return ScrollDirective::Stay;
        }
        match self.mode {
            ScrollMode::Following => ScrollDirective::ScrollToBottom,
            ScrollMode::Detached => {
                self.unseen += count;
                ScrollDirective::ShowJumpToLatest {
                    unseen: self.unseen,
                }
            }
        }
    }

    /// User activated "jump to latest".
    pub fn jump_to_latest(&mut self) -> ScrollDirective {
        self.mode = ScrollMode::Following;
        self.unseen = 0;
        ScrollDirective::ScrollToBottom
    }
}
