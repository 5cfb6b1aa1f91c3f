//! # Messages
//!
//! One chat utterance. Text, an image reference, or both.
//!
//! Ids come from the server. When the transport delivers a message without
//! one, a client-local UUID is substituted. `MessageId::Local` and
//! `MessageId::Server` never compare equal, so the two can't be conflated.

use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

use crate::core::conversation::{ConversationKey, ParticipantId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Assigned by the backend.
    Server(String),
    /// Substituted on this client because the transport sent no id.
    Local(Uuid),
}

impl MessageId {
    /// Server id when present, otherwise a fresh local one.
    pub fn from_wire(id: Option<String>) -> Self {
        match id {
            Some(id) if !id.trim().is_empty() => MessageId::Server(id),
            _ => MessageId::Local(Uuid::new_v4()),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, MessageId::Local(_))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Server(id) => f.write_str(id),
            MessageId::Local(id) => write!(f, "local-{id}"),
        }
    }
}

/// Reasons a message is rejected before it reaches a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// Neither text nor image present.
    Empty,
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::Empty => write!(f, "message has neither text nor image"),
        }
    }
}

impl std::error::Error for MessageError {}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: ParticipantId,
    pub receiver_id: ParticipantId,
    pub text: Option<String>,
    pub image_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Builds a message, normalizing blank text/image to `None`.
    pub fn new(
        id: MessageId,
        sender_id: ParticipantId,
        receiver_id: ParticipantId,
        text: Option<String>,
        image_ref: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, MessageError> {
        let text = non_blank(text);
        let image_ref = non_blank(image_ref);
        if text.is_none() && image_ref.is_none() {
            return Err(MessageError::Empty);
        }
        Ok(Self {
            id,
            sender_id,
            receiver_id,
            text,
            image_ref,
            created_at,
        })
    }

    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::between(&self.sender_id, &self.receiver_id)
    }

    /// True iff `{sender, receiver} == {local, peer}` as a set.
    pub fn belongs_to(&self, local: &ParticipantId, peer: &ParticipantId) -> bool {
        (&self.sender_id == local && &self.receiver_id == peer)
            || (&self.sender_id == peer && &self.receiver_id == local)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
