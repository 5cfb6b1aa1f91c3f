//! # Message Stream
//!
//! Ordered, de-duplicated messages of the active conversation.
//!
//! Two sources feed it: a history pull (hydration) and live pushes from the
//! channel. Both go through `insert()`, the only code path that adds to the
//! sequence, so ordering and de-duplication live in one place.
//!
//! ```text
//! hydrate(key) ──► token ──► ... ──► complete_hydration(token, history)
//!                                          │ stale token? ignored
//!                                          ▼
//!                           reset, insert(history…), insert(live-while-pending…)
//!
//! ingest_live(msg) ──► foreign? discard ──► insert(msg)
//! ```
//!
//! Order is ascending `created_at`; equal timestamps keep arrival order.

use log::debug;
use std::collections::HashSet;

use crate::core::conversation::{ConversationKey, ParticipantId};
use crate::core::message::{Message, MessageId};

/// Identifies one history pull. Results carrying an older token are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HydrationToken(u64);

/// What happened to a message offered to the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// Inserted at `index` of the ordered sequence.
    Inserted { index: usize },
    /// Same id already present.
    Duplicate,
    /// Not part of the active `{local, peer}` pair.
    Foreign,
    /// No conversation is active.
    Inactive,
}

/// Result of completing a hydration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hydration {
    /// History applied; the sequence now holds `len` messages.
    Applied { len: usize },
    /// The token was superseded or the conversation changed.
    Stale,
}

pub struct MessageStream {
    local_id: ParticipantId,
    peer: Option<ParticipantId>,
    key: Option<ConversationKey>,
    messages: Vec<Message>,
    seen: HashSet<MessageId>,
    next_token: u64,
    pending: Option<HydrationToken>,
    /// Live messages accepted while a hydration was in flight.
    live_while_pending: Vec<Message>,
}

impl MessageStream {
    pub fn new(local_id: ParticipantId) -> Self {
        Self {
            local_id,
            peer: None,
            key: None,
            messages: Vec::new(),
            seen: HashSet::new(),
            next_token: 0,
            pending: None,
            live_while_pending: Vec::new(),
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub fn peer(&self) -> Option<&ParticipantId> {
        self.peer.as_ref()
    }

    pub fn key(&self) -> Option<&ConversationKey> {
        self.key.as_ref()
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

    pub fn is_hydrating(&self) -> bool {
        self.pending.is_some()
    }

    /// Switches to the conversation with `peer`. Drops all messages and any
    /// in-flight hydration of the previous conversation.
    pub fn activate(&mut self, peer: ParticipantId) -> ConversationKey {
        let key = ConversationKey::between(&self.local_id, &peer);
        debug!("Stream activated for {}", key);
        self.clear();
        self.peer = Some(peer);
        self.key = Some(key.clone());
        key
    }

    /// Leaves the active conversation (view unmount).
    pub fn deactivate(&mut self) {
        self.clear();
        self.peer = None;
        self.key = None;
    }

    fn clear(&mut self) {
        self.messages.clear();
        self.seen.clear();
        self.pending = None;
        self.live_while_pending.clear();
    }

    /// Starts a history pull for `key`. Returns `None` if `key` is not the
    /// active conversation. A newer call supersedes an older pending one.
    pub fn hydrate(&mut self, key: &ConversationKey) -> Option<HydrationToken> {
        if self.key.as_ref() != Some(key) {
            debug!("Ignoring hydrate for inactive conversation {}", key);
            return None;
        }
        self.next_token += 1;
        let token = HydrationToken(self.next_token);
        self.pending = Some(token);
        Some(token)
    }

    /// Applies a history backlog. Replaces the sequence, then re-applies
    /// live messages that arrived while the pull was in flight.
    pub fn complete_hydration(&mut self, token: HydrationToken, history: Vec<Message>) -> Hydration {
        if self.pending != Some(token) {
            debug!("Discarding stale hydration {:?}", token);
            return Hydration::Stale;
        }
        self.pending = None;
        self.messages.clear();
        self.seen.clear();

        let live = std::mem::take(&mut self.live_while_pending);
        for message in history.into_iter().chain(live) {
            self.accept(message);
        }
        Hydration::Applied {
            len: self.messages.len(),
        }
    }

    /// Abandons a failed pull. Returns false when the token was already stale.
    pub fn fail_hydration(&mut self, token: HydrationToken) -> bool {
        if self.pending != Some(token) {
            return false;
        }
        // Live messages are already in the sequence; the previous view stays.
        self.pending = None;
        self.live_while_pending.clear();
        true
    }

    /// Accepts a pushed message for the active conversation.
    pub fn ingest_live(&mut self, message: Message) -> Ingest {
        if self.pending.is_some() {
            let outcome = self.accept(message.clone());
            if matches!(outcome, Ingest::Inserted { .. }) {
                self.live_while_pending.push(message);
            }
            return outcome;
        }
        self.accept(message)
    }

    fn accept(&mut self, message: Message) -> Ingest {
        let (Some(peer), Some(key)) = (&self.peer, &self.key) else {
            return Ingest::Inactive;
        };
        if !message.belongs_to(&self.local_id, peer) {
            debug!(
                "Discarding message {} for {} (active: {})",
                message.id,
                message.conversation_key(),
                key
            );
            return Ingest::Foreign;
        }
        self.insert(message)
    }

    /// The single writer of the ordered sequence.
    fn insert(&mut self, message: Message) -> Ingest {
        if self.seen.contains(&message.id) {
            return Ingest::Duplicate;
        }
        let index = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.seen.insert(message.id.clone());
        self.messages.insert(index, message);
        Ingest::Inserted { index }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::message;

    fn stream() -> MessageStream {
        let mut s = MessageStream::new("p1".into());
        s.activate("d1".into());
        s
    }

    fn ids(s: &MessageStream) -> Vec<String> {
        s.messages().iter().map(|m| m.id.to_string()).collect()
    }

    #[test]
    fn test_duplicate_delivery_is_idempotent() {
        let mut s = stream();
        let msg = message("m1", "p1", "d1", 1);
        assert_eq!(s.ingest_live(msg.clone()), Ingest::Inserted { index: 0 });
        assert_eq!(s.ingest_live(msg), Ingest::Duplicate);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_out_of_order_arrival_is_sorted() {
        let mut s = stream();
        s.ingest_live(message("c", "p1", "d1", 3));
        s.ingest_live(message("a", "d1", "p1", 1));
        s.ingest_live(message("b", "p1", "d1", 2));
        let times: Vec<i64> = s.messages().iter().map(|m| m.created_at.timestamp()).collect();
        assert_eq!(times, vec![1, 2, 3]);
    }

    #[test]
    fn test_equal_timestamps_keep_arrival_order() {
        let mut s = stream();
        s.ingest_live(message("first", "p1", "d1", 5));
        s.ingest_live(message("second", "d1", "p1", 5));
        s.ingest_live(message("early", "d1", "p1", 4));
        assert_eq!(ids(&s), vec!["early", "first", "second"]);
    }

    #[test]
    fn test_foreign_message_never_appears() {
        let mut s = stream();
        assert_eq!(s.ingest_live(message("x", "p2", "d1", 1)), Ingest::Foreign);
        assert_eq!(s.ingest_live(message("y", "p1", "d2", 1)), Ingest::Foreign);
        assert!(s.is_empty());
    }

    #[test]
    fn test_inactive_stream_rejects_everything() {
        let mut s = MessageStream::new("p1".into());
        assert_eq!(s.ingest_live(message("m", "p1", "d1", 1)), Ingest::Inactive);
    }

    #[test]
    fn test_hydration_replaces_sequence() {
        let mut s = stream();
        s.ingest_live(message("old", "p1", "d1", 1));
        let key = s.key().cloned().unwrap();
        let token = s.hydrate(&key).unwrap();
        let history = vec![message("h1", "p1", "d1", 2), message("h2", "d1", "p1", 3)];
        assert_eq!(s.complete_hydration(token, history), Hydration::Applied { len: 2 });
        assert_eq!(ids(&s), vec!["h1", "h2"]);
    }

    #[test]
    fn test_live_during_hydration_survives_merge() {
        let mut s = stream();
        let key = s.key().cloned().unwrap();
        let token = s.hydrate(&key).unwrap();

        // Arrives after the pull started, before it resolved.
        s.ingest_live(message("live", "d1", "p1", 10));

        let history = vec![message("h1", "p1", "d1", 1), message("h2", "d1", "p1", 2)];
        s.complete_hydration(token, history);
        assert_eq!(ids(&s), vec!["h1", "h2", "live"]);
    }

    #[test]
    fn test_live_already_in_history_not_duplicated() {
        let mut s = stream();
        let key = s.key().cloned().unwrap();
        let token = s.hydrate(&key).unwrap();
        s.ingest_live(message("h2", "d1", "p1", 2));
        s.complete_hydration(
            token,
            vec![message("h1", "p1", "d1", 1), message("h2", "d1", "p1", 2)],
        );
        assert_eq!(ids(&s), vec!["h1", "h2"]);
    }

    #[test]
    fn test_stale_hydration_after_conversation_switch_is_ignored() {
        let mut s = stream();
        let key = s.key().cloned().unwrap();
        let stale = s.hydrate(&key).unwrap();

        s.activate("d2".into());
        s.ingest_live(message("new", "d2", "p1", 5));

        let late = vec![message("h1", "p1", "d1", 1)];
        assert_eq!(s.complete_hydration(stale, late), Hydration::Stale);
        assert_eq!(ids(&s), vec!["new"]);
    }

    #[test]
    fn test_superseded_hydration_is_ignored() {
        let mut s = stream();
        let key = s.key().cloned().unwrap();
        let first = s.hydrate(&key).unwrap();
        let second = s.hydrate(&key).unwrap();
        assert_eq!(s.complete_hydration(first, vec![]), Hydration::Stale);
        assert!(s.is_hydrating());
        assert_eq!(
            s.complete_hydration(second, vec![message("h", "p1", "d1", 1)]),
            Hydration::Applied { len: 1 }
        );
    }

    #[test]
    fn test_hydrate_for_other_key_refused() {
        let mut s = stream();
        let other = ConversationKey::between(&"p1".into(), &"d9".into());
        assert!(s.hydrate(&other).is_none());
    }

    #[test]
    fn test_history_filters_foreign_entries() {
        let mut s = stream();
        let key = s.key().cloned().unwrap();
        let token = s.hydrate(&key).unwrap();
        s.complete_hydration(
            token,
            vec![message("ok", "p1", "d1", 1), message("bad", "p3", "d3", 2)],
        );
        assert_eq!(ids(&s), vec!["ok"]);
    }

    #[test]
    fn test_failed_hydration_keeps_live_messages() {
        let mut s = stream();
        let key = s.key().cloned().unwrap();
        let token = s.hydrate(&key).unwrap();
        s.ingest_live(message("live", "d1", "p1", 1));
        assert!(s.fail_hydration(token));
        assert!(!s.is_hydrating());
        assert_eq!(ids(&s), vec!["live"]);
    }
}
