//! # Actions
//!
//! Everything that can happen to a chat view becomes an `Action`.
//! User types a key? That's `Action::LocalInput`.
//! A message arrives on the channel? That's `Action::Live(ChannelEvent::Message(..))`.
//!
//! `update()` applies the action to `ChatState` and returns the `Effect`s
//! the caller must perform: requests, channel signals, scroll commands.
//! No I/O here.
//!
//! ```text
//! State + Action  →  update()  →  State' + [Effect]
//! ```

use std::time::Instant;

use log::{debug, warn};

use crate::core::conversation::{ConversationKey, ParticipantId};
use crate::core::message::Message;
use crate::core::scroll::{ScrollDirective, ScrollMetrics, ScrollMode};
use crate::core::state::ChatState;
use crate::core::stream::{Hydration, HydrationToken, Ingest};
use crate::core::typing::TypingSignal;

/// Event delivered to a conversation subscriber by the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Message(Message),
    Typing {
        conversation_key: ConversationKey,
        sender_id: ParticipantId,
        is_typing: bool,
    },
    /// The channel came back after a drop; live delivery may have gaps.
    Reconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Mount a conversation with `peer` (or switch to it).
    Open { peer: ParticipantId, now: Instant },
    /// Unmount the view.
    Close { now: Instant },
    HistoryLoaded {
        token: HydrationToken,
        messages: Vec<Message>,
    },
    HistoryFailed { token: HydrationToken, reason: String },
    Live { event: ChannelEvent, now: Instant },
    /// The local input box changed.
    LocalInput { now: Instant },
    Submit {
        text: Option<String>,
        image_ref: Option<String>,
        now: Instant,
    },
    /// A send or upload failed; `reason` is user-facing.
    RequestFailed { reason: String },
    /// A typing deadline may have passed.
    Tick { now: Instant },
    Scrolled(ScrollMetrics),
    JumpToLatest,
    DismissNotice,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Join the room and route its events to this view (replacing any
    /// previous subscription).
    JoinConversation(ConversationKey),
    FetchHistory {
        token: HydrationToken,
        peer: ParticipantId,
    },
    SendMessage {
        peer: ParticipantId,
        text: Option<String>,
        image_ref: Option<String>,
    },
    /// Typing start/stop for the channel.
    Signal(TypingSignal),
    ScrollToBottom,
    Notify(String),
}

pub fn update(state: &mut ChatState, action: Action) -> Vec<Effect> {
    match action {
        Action::Open { peer, now: _ } => {
            if state.peer() == Some(&peer) {
                return Vec::new();
            }
            let key = ConversationKey::between(&state.local_id, &peer);
            let mut effects = signals(state.typing.set_conversation(key.clone(), peer.clone()));

            state.stream.activate(peer.clone());
            state.reset_scroll();
            state.notice = None;

            effects.push(Effect::JoinConversation(key.clone()));
            if let Some(token) = state.stream.hydrate(&key) {
                effects.push(Effect::FetchHistory { token, peer });
            }
            effects
        }

        Action::Close { now: _ } => {
            let effects = signals(state.typing.close());
            state.stream.deactivate();
            state.notice = None;
            effects
        }

        Action::HistoryLoaded { token, messages } => {
            let before = state.stream.len();
            match state.stream.complete_hydration(token, messages) {
                Hydration::Stale => Vec::new(),
                Hydration::Applied { len } => match state.scroll.mode() {
                    ScrollMode::Following => vec![Effect::ScrollToBottom],
                    ScrollMode::Detached => {
                        scroll_effects(state.scroll.on_messages_added(len.saturating_sub(before)))
                    }
                },
            }
        }

        Action::HistoryFailed { token, reason } => {
            if !state.stream.fail_hydration(token) {
                return Vec::new();
            }
            notify(state, reason)
        }

        Action::Live { event, now } => match event {
            ChannelEvent::Message(message) => match state.stream.ingest_live(message) {
                Ingest::Inserted { .. } => scroll_effects(state.scroll.on_messages_added(1)),
                outcome => {
                    debug!("Live message not added: {:?}", outcome);
                    Vec::new()
                }
            },
            ChannelEvent::Typing {
                conversation_key,
                sender_id,
                is_typing,
            } => {
                state
                    .typing
                    .on_remote_signal(&conversation_key, &sender_id, is_typing, now);
                Vec::new()
            }
            ChannelEvent::Reconnected => {
                let (Some(key), Some(peer)) = (state.key().cloned(), state.peer().cloned()) else {
                    return Vec::new();
                };
                // The pending pull's result already covers the gap.
                if state.stream.is_hydrating() {
                    debug!("Reconnected while {} is hydrating; not pulling again", key);
                    return Vec::new();
                }
                debug!("Re-hydrating {} after reconnect", key);
                state
                    .stream
                    .hydrate(&key)
                    .map(|token| vec![Effect::FetchHistory { token, peer }])
                    .unwrap_or_default()
            }
        },

        Action::LocalInput { now } => {
            let (Some(key), Some(peer)) = (state.key().cloned(), state.peer().cloned()) else {
                return Vec::new();
            };
            signals(state.typing.notify_local_activity(&key, &peer, now))
        }

        Action::Submit {
            text,
            image_ref,
            now: _,
        } => {
            let Some(peer) = state.peer().cloned() else {
                warn!("Submit with no open conversation");
                return Vec::new();
            };
            // Whitespace-only counts as empty; anything else is sent as typed.
            let text = text.filter(|t| !t.trim().is_empty());
            let image_ref = image_ref.filter(|i| !i.trim().is_empty());
            if text.is_none() && image_ref.is_none() {
                return notify(state, "Message is empty".to_string());
            }

            let mut effects = signals(state.typing.finish());
            // No local echo: the message shows up when the channel echoes it back.
            effects.push(Effect::SendMessage {
                peer,
                text,
                image_ref,
            });
            effects
        }

        Action::RequestFailed { reason } => notify(state, reason),

        Action::Tick { now } => signals(state.typing.poll(now)),

        Action::Scrolled(metrics) => {
            state.scroll.observe(metrics);
            Vec::new()
        }

        Action::JumpToLatest => scroll_effects(state.scroll.jump_to_latest()),

        Action::DismissNotice => {
            state.notice = None;
            Vec::new()
        }
    }
}

fn signals(signals: impl IntoIterator<Item = TypingSignal>) -> Vec<Effect> {
    signals.into_iter().map(Effect::Signal).collect()
}

fn scroll_effects(directive: ScrollDirective) -> Vec<Effect> {
    match directive {
        ScrollDirective::ScrollToBottom => vec![Effect::ScrollToBottom],
        ScrollDirective::Stay | ScrollDirective::ShowJumpToLatest { .. } => Vec::new(),
    }
}

fn notify(state: &mut ChatState, reason: String) -> Vec<Effect> {
    state.notice = Some(reason.clone());
    vec![Effect::Notify(reason)]
}
