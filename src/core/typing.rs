//! # Typing Presence
//!
//! Edge-triggered, debounced typing signals.
//!
//! Local side: the first keystroke of a burst emits `Start`; every keystroke
//! pushes a single trailing deadline forward; when the deadline passes with
//! no further input, `Stop` is emitted. A burst of N rapid keystrokes
//! therefore costs exactly two signals.
//!
//! ```text
//! keys:     x x x x x            x x
//! signals:  Start      ...Stop   Start   ...Stop
//!                     └debounce┘
//! ```
//!
//! Remote side: the peer's state is kept only for the active conversation
//! and expires on its own if a `Stop` never arrives.
//!
//! No timers live here. Callers pass `now`, ask `next_deadline()`, and call
//! `poll(now)` once it has passed.

use log::debug;
use std::time::{Duration, Instant};

use crate::core::conversation::{ConversationKey, ParticipantId};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1500);
pub const DEFAULT_REMOTE_EXPIRY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingKind {
    Start,
    Stop,
}

/// A signal the caller should put on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingSignal {
    pub kind: TypingKind,
    pub conversation_key: ConversationKey,
    pub sender_id: ParticipantId,
    pub receiver_id: ParticipantId,
}

/// Ephemeral state of the peer in the active conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingState {
    pub peer: ParticipantId,
    pub is_typing: bool,
    pub last_signal_at: Instant,
}

/// An in-progress local burst.
#[derive(Debug, Clone)]
struct Burst {
    key: ConversationKey,
    peer: ParticipantId,
    deadline: Instant,
}

pub struct TypingCoordinator {
    local_id: ParticipantId,
    debounce: Duration,
    remote_expiry: Duration,
    active: Option<(ConversationKey, ParticipantId)>,
    burst: Option<Burst>,
    remote: Option<TypingState>,
}

impl TypingCoordinator {
    pub fn new(local_id: ParticipantId, debounce: Duration, remote_expiry: Duration) -> Self {
        Self {
            local_id,
            debounce,
            remote_expiry,
            active: None,
            burst: None,
            remote: None,
        }
    }

    /// Switches the active conversation. Ends any local burst first.
    pub fn set_conversation(&mut self, key: ConversationKey, peer: ParticipantId) -> Vec<TypingSignal> {
        let signals = self.close();
        self.active = Some((key, peer));
        signals
    }

    /// Call on every local input change.
    pub fn notify_local_activity(
        &mut self,
        key: &ConversationKey,
        peer: &ParticipantId,
        now: Instant,
    ) -> Vec<TypingSignal> {
        let mut signals = Vec::new();
        let deadline = now + self.debounce;

        if let Some(burst) = self.burst.as_mut()
            && &burst.key == key
        {
            burst.deadline = deadline;
            return signals;
        }
        // Burst for another conversation: close it before starting this one.
        signals.extend(self.finish());

        self.burst = Some(Burst {
            key: key.clone(),
            peer: peer.clone(),
            deadline,
        });
        signals.push(self.signal(TypingKind::Start, key, peer));
        signals
    }

    /// Ends the current burst immediately (e.g. the message was sent).
    pub fn finish(&mut self) -> Option<TypingSignal> {
        let burst = self.burst.take()?;
        Some(self.signal(TypingKind::Stop, &burst.key, &burst.peer))
    }

    /// Handles a remote `typing`/`stopTyping`. Returns true if the visible
    /// state changed. Signals for other conversations or senders are ignored.
    pub fn on_remote_signal(
        &mut self,
        key: &ConversationKey,
        sender: &ParticipantId,
        is_typing: bool,
        now: Instant,
    ) -> bool {
        let Some((active_key, peer)) = &self.active else {
            return false;
        };
        if active_key != key || peer != sender {
            debug!("Ignoring typing signal from {} on {}", sender, key);
            return false;
        }

        let was_typing = self.remote.is_some();
        if is_typing {
            self.remote = Some(TypingState {
                peer: peer.clone(),
                is_typing: true,
                last_signal_at: now,
            });
        } else {
            self.remote = None;
        }
        was_typing != is_typing
    }

    /// Fires whatever deadlines have passed: the local stop and remote expiry.
    pub fn poll(&mut self, now: Instant) -> Vec<TypingSignal> {
        let mut signals = Vec::new();
        if self.burst.as_ref().is_some_and(|b| now >= b.deadline) {
            signals.extend(self.finish());
        }
        if self
            .remote
            .as_ref()
            .is_some_and(|r| now >= r.last_signal_at + self.remote_expiry)
        {
            debug!("Remote typing state expired");
            self.remote = None;
        }
        signals
    }

    /// Earliest instant at which `poll` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let local = self.burst.as_ref().map(|b| b.deadline);
        let remote = self
            .remote
            .as_ref()
            .map(|r| r.last_signal_at + self.remote_expiry);
        match (local, remote) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Conversation change or unmount: cancels the timer, emits a
    /// best-effort stop if a burst was in progress, forgets the peer state.
    pub fn close(&mut self) -> Vec<TypingSignal> {
        let signals = self.finish().into_iter().collect();
        self.remote = None;
        self.active = None;
        signals
    }

    pub fn is_local_typing(&self) -> bool {
        self.burst.is_some()
    }

    pub fn is_peer_typing(&self) -> bool {
        self.remote.as_ref().is_some_and(|r| r.is_typing)
    }

    pub fn remote_state(&self) -> Option<&TypingState> {
        self.remote.as_ref()
    }

    fn signal(&self, kind: TypingKind, key: &ConversationKey, peer: &ParticipantId) -> TypingSignal {
        TypingSignal {
            kind,
            conversation_key: key.clone(),
            sender_id: self.local_id.clone(),
            receiver_id: peer.clone(),
        }
    }
}
