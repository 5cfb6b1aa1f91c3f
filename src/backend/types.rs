//! Wire types for the channel and the REST collaborators.
//!
//! Channel frames are JSON envelopes `{"event": "<name>", "data": {...}}`.
//! Field names are camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::action::ChannelEvent;
use crate::core::conversation::{ConversationKey, ParticipantId};
use crate::core::message::{Message, MessageError, MessageId};
use crate::core::typing::{TypingKind, TypingSignal};

// ============================================================================
// Payloads
// ============================================================================

/// A message as the backend serializes it (history items and live pushes).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(default, alias = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, alias = "imageRef", skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<MessagePayload> for Message {
    type Error = MessageError;

    fn try_from(payload: MessagePayload) -> Result<Self, Self::Error> {
        Message::new(
            MessageId::from_wire(payload.id),
            ParticipantId::new(payload.sender_id),
            ParticipantId::new(payload.receiver_id),
            payload.text,
            payload.image,
            payload.created_at,
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IdentityPayload {
    pub user_id: ParticipantId,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomPayload {
    pub conversation_key: ConversationKey,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub sender_id: ParticipantId,
    pub receiver_id: ParticipantId,
    pub conversation_key: ConversationKey,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerTypingPayload {
    pub conversation_key: ConversationKey,
    pub sender_id: ParticipantId,
    pub is_typing: bool,
}

/// Body of the send-message request.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SendMessageRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Response of the attachment upload.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct UploadResponse {
    pub url: String,
}

// ============================================================================
// Channel Events
// ============================================================================

/// Client → backend. Fire-and-forget.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum OutboundSignal {
    Join(IdentityPayload),
    JoinConversation(RoomPayload),
    AnnouncePresence(IdentityPayload),
    Typing(TypingPayload),
    StopTyping(TypingPayload),
}

impl OutboundSignal {
    pub fn join(user_id: &ParticipantId) -> Self {
        OutboundSignal::Join(IdentityPayload {
            user_id: user_id.clone(),
        })
    }

    pub fn join_conversation(key: &ConversationKey) -> Self {
        OutboundSignal::JoinConversation(RoomPayload {
            conversation_key: key.clone(),
        })
    }

    pub fn announce_presence(user_id: &ParticipantId) -> Self {
        OutboundSignal::AnnouncePresence(IdentityPayload {
            user_id: user_id.clone(),
        })
    }

    /// Event name as it appears on the wire (for logging).
    pub fn name(&self) -> &'static str {
        match self {
            OutboundSignal::Join(_) => "join",
            OutboundSignal::JoinConversation(_) => "joinConversation",
            OutboundSignal::AnnouncePresence(_) => "announcePresence",
            OutboundSignal::Typing(_) => "typing",
            OutboundSignal::StopTyping(_) => "stopTyping",
        }
    }
}

impl From<TypingSignal> for OutboundSignal {
    fn from(signal: TypingSignal) -> Self {
        let payload = TypingPayload {
            sender_id: signal.sender_id,
            receiver_id: signal.receiver_id,
            conversation_key: signal.conversation_key,
        };
        match signal.kind {
            TypingKind::Start => OutboundSignal::Typing(payload),
            TypingKind::Stop => OutboundSignal::StopTyping(payload),
        }
    }
}

/// Backend → client, as decoded from a frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum InboundEvent {
    MessageReceived(MessagePayload),
    PeerTyping(PeerTypingPayload),
}

impl InboundEvent {
    /// Converts to a subscriber event plus the conversation it is routed to.
    pub fn into_routed(self) -> Result<(ConversationKey, ChannelEvent), MessageError> {
        match self {
            InboundEvent::MessageReceived(payload) => {
                let message = Message::try_from(payload)?;
                Ok((message.conversation_key(), ChannelEvent::Message(message)))
            }
            InboundEvent::PeerTyping(payload) => Ok((
                payload.conversation_key.clone(),
                ChannelEvent::Typing {
                    conversation_key: payload.conversation_key,
                    sender_id: payload.sender_id,
                    is_typing: payload.is_typing,
                },
            )),
        }
    }
}
