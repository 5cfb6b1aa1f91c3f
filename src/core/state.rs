//! # Conversation View State
//!
//! Everything one mounted chat view owns. Nothing here is shared between
//! views; the connection lives outside (see `client::connection`).
//!
//! ```text
//! ChatState
//! ├── local_id: ParticipantId          // who we are
//! ├── stream: MessageStream            // ordered messages of the active conversation
//! ├── typing: TypingCoordinator        // local bursts + peer typing state
//! ├── scroll: ScrollFollowController   // follow vs. jump-to-latest
//! ├── notice: Option<String>           // transient user-facing error
//! └── settings: ChatSettings           // tunables from config
//! ```
//!
//! State changes only happen through `update(state, action)` in action.rs.

use std::time::Duration;

use crate::core::conversation::{ConversationKey, ParticipantId};
use crate::core::scroll::{DEFAULT_THRESHOLD_PX, ScrollFollowController};
use crate::core::stream::MessageStream;
use crate::core::typing::{DEFAULT_DEBOUNCE, DEFAULT_REMOTE_EXPIRY, TypingCoordinator};

/// Tunable constants of a chat view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatSettings {
    pub typing_debounce: Duration,
    pub typing_expiry: Duration,
    pub scroll_threshold_px: f64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            typing_debounce: DEFAULT_DEBOUNCE,
            typing_expiry: DEFAULT_REMOTE_EXPIRY,
            scroll_threshold_px: DEFAULT_THRESHOLD_PX,
        }
    }
}

pub struct ChatState {
    pub local_id: ParticipantId,
    pub stream: MessageStream,
    pub typing: TypingCoordinator,
    pub scroll: ScrollFollowController,
    pub notice: Option<String>,
    pub settings: ChatSettings,
}

impl ChatState {
    pub fn new(local_id: ParticipantId, settings: ChatSettings) -> Self {
        Self {
            stream: MessageStream::new(local_id.clone()),
            typing: TypingCoordinator::new(
                local_id.clone(),
                settings.typing_debounce,
                settings.typing_expiry,
            ),
            scroll: ScrollFollowController::new(settings.scroll_threshold_px),
            notice: None,
            local_id,
            settings,
        }
    }

    pub fn peer(&self) -> Option<&ParticipantId> {
        self.stream.peer()
    }

    pub fn key(&self) -> Option<&ConversationKey> {
        self.stream.key()
    }

    /// Fresh per-view scroll state (a newly mounted conversation).
    pub(crate) fn reset_scroll(&mut self) {
        self.scroll = ScrollFollowController::new(self.settings.scroll_threshold_px);
    }
}
