//! # Chat View Driver
//!
//! Binds one `ChatState` to the outside world. Effects returned by
//! `core::action::update` are performed here: REST calls run as background
//! tasks that report back as `Action`s, channel signals go through the
//! shared `ConnectionManager`, and the typing timer is armed from
//! `TypingCoordinator::next_deadline`.
//!
//! ```text
//!  caller ──► ChatView::open / submit / input_changed ──► update()
//!                   ▲                                        │
//!                   │  Subscription / task results / timer   ▼
//!                   └──────────────── next() ◄──────── Effect handling
//! ```

use std::sync::Arc;
use std::time::Instant;

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::backend::api::{Attachment, ChatApi};
use crate::backend::types::OutboundSignal;
use crate::client::connection::{ConnectionManager, Subscription};
use crate::core::action::{Action, ChannelEvent, Effect, update};
use crate::core::conversation::ParticipantId;
use crate::core::scroll::ScrollMetrics;
use crate::core::state::{ChatSettings, ChatState};

/// What the presentation layer must do after an action.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    ScrollToBottom,
    Notice(String),
}

pub struct ChatView {
    state: ChatState,
    connection: ConnectionManager,
    api: Arc<dyn ChatApi>,
    subscription: Option<Subscription>,
    // Results of background requests
    results_tx: mpsc::UnboundedSender<Action>,
    results: mpsc::UnboundedReceiver<Action>,
}

impl ChatView {
    /// Mounts a view for `local_id`, binding the shared channel to it.
    pub fn new(
        local_id: ParticipantId,
        settings: ChatSettings,
        connection: ConnectionManager,
        api: Arc<dyn ChatApi>,
    ) -> Self {
        connection.ensure_connected(&local_id);
        let (results_tx, results) = mpsc::unbounded_channel();
        Self {
            state: ChatState::new(local_id, settings),
            connection,
            api,
            subscription: None,
            results_tx,
            results,
        }
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn open(&mut self, peer: ParticipantId) -> Vec<ViewEvent> {
        self.dispatch(Action::Open {
            peer,
            now: Instant::now(),
        })
    }

    pub fn close(&mut self) -> Vec<ViewEvent> {
        let events = self.dispatch(Action::Close {
            now: Instant::now(),
        });
        self.subscription = None;
        events
    }

    pub fn input_changed(&mut self) -> Vec<ViewEvent> {
        self.dispatch(Action::LocalInput {
            now: Instant::now(),
        })
    }

    /// A line composed in one go: counts as typing activity, then submits.
    pub fn send_text(&mut self, text: &str) -> Vec<ViewEvent> {
        let mut events = self.input_changed();
        events.extend(self.submit(text));
        events
    }

    pub fn submit(&mut self, text: &str) -> Vec<ViewEvent> {
        self.dispatch(Action::Submit {
            text: Some(text.to_string()),
            image_ref: None,
            now: Instant::now(),
        })
    }

    /// Uploads `attachment`, then sends it with an optional caption.
    pub async fn attach(&mut self, attachment: Attachment, caption: Option<String>) -> Vec<ViewEvent> {
        match self.api.upload_attachment(attachment).await {
            Ok(url) => self.dispatch(Action::Submit {
                text: caption,
                image_ref: Some(url),
                now: Instant::now(),
            }),
            Err(e) => {
                warn!("Upload failed: {}", e);
                self.dispatch(Action::RequestFailed {
                    reason: e.user_message(),
                })
            }
        }
    }

    pub fn scrolled(&mut self, metrics: ScrollMetrics) -> Vec<ViewEvent> {
        self.dispatch(Action::Scrolled(metrics))
    }

    pub fn jump_to_latest(&mut self) -> Vec<ViewEvent> {
        self.dispatch(Action::JumpToLatest)
    }

    pub fn dismiss_notice(&mut self) -> Vec<ViewEvent> {
        self.dispatch(Action::DismissNotice)
    }

    /// Waits for the next live event, request result or typing deadline
    /// and applies it. Cancel-safe.
    pub async fn next(&mut self) -> Vec<ViewEvent> {
        let deadline = self
            .state
            .typing
            .next_deadline()
            .map(tokio::time::Instant::from_std);

        let action = tokio::select! {
            event = next_live(&mut self.subscription) => match event {
                Some(event) => Action::Live { event, now: Instant::now() },
                None => {
                    debug!("Subscription ended");
                    self.subscription = None;
                    return Vec::new();
                }
            },
            Some(action) = self.results.recv() => action,
            _ = sleep_until(deadline) => Action::Tick { now: Instant::now() },
        };
        self.dispatch(action)
    }

    pub fn dispatch(&mut self, action: Action) -> Vec<ViewEvent> {
        let effects = update(&mut self.state, action);
        let mut events = Vec::new();
        for effect in effects {
            match effect {
                Effect::JoinConversation(key) => {
                    self.connection.join_conversation(&key);
                    self.subscription = Some(self.connection.subscribe(&key));
                }
                Effect::FetchHistory { token, peer } => {
                    let api = Arc::clone(&self.api);
                    let tx = self.results_tx.clone();
                    tokio::spawn(async move {
                        let action = match api.fetch_history(&peer).await {
                            Ok(messages) => Action::HistoryLoaded { token, messages },
                            Err(e) => {
                                warn!("History fetch for {} failed: {}", peer, e);
                                Action::HistoryFailed {
                                    token,
                                    reason: e.user_message(),
                                }
                            }
                        };
                        let _ = tx.send(action);
                    });
                }
                Effect::SendMessage {
                    peer,
                    text,
                    image_ref,
                } => {
                    let api = Arc::clone(&self.api);
                    let tx = self.results_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = api
                            .send_message(&peer, text.as_deref(), image_ref.as_deref())
                            .await
                        {
                            warn!("Send to {} failed: {}", peer, e);
                            let _ = tx.send(Action::RequestFailed {
                                reason: e.user_message(),
                            });
                        }
                    });
                }
                Effect::Signal(signal) => self.connection.emit(OutboundSignal::from(signal)),
                Effect::ScrollToBottom => events.push(ViewEvent::ScrollToBottom),
                Effect::Notify(reason) => events.push(ViewEvent::Notice(reason)),
            }
        }
        events
    }
}

async fn next_live(subscription: &mut Option<Subscription>) -> Option<ChannelEvent> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::api::ApiError;
    use crate::backend::types::{InboundEvent, PeerTypingPayload};
    use crate::core::conversation::ConversationKey;
    use crate::core::reconnect::ReconnectPolicy;
    use crate::test_support::{FakeApi, MemoryTransport, ServerEnd, message, payload, within};
    use std::time::Duration;

    struct Harness {
        view: ChatView,
        api: Arc<FakeApi>,
        server: ServerEnd,
        accepted: mpsc::UnboundedReceiver<ServerEnd>,
    }

    fn settings() -> ChatSettings {
        ChatSettings {
            typing_debounce: Duration::from_millis(50),
            typing_expiry: Duration::from_millis(80),
            ..ChatSettings::default()
        }
    }

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..ReconnectPolicy::default()
        }
    }

    fn key() -> ConversationKey {
        ConversationKey::between(&"p1".into(), &"d1".into())
    }

    /// A view for p1 with d1 open, history applied, channel handshake done.
    async fn mounted(history: Vec<crate::core::message::Message>) -> Harness {
        let (transport, mut accepted) = MemoryTransport::new(0);
        let connection = ConnectionManager::spawn(transport, fast_policy());
        let api = FakeApi::new();
        api.push_history(Ok(history));

        let mut view = ChatView::new("p1".into(), settings(), connection, api.clone());
        view.open("d1".into());

        let mut server = within(accepted.recv()).await.expect("connection");
        assert_eq!(server.next_signal().await, OutboundSignal::join(&"p1".into()));
        assert_eq!(
            server.next_signal().await,
            OutboundSignal::announce_presence(&"p1".into())
        );
        assert_eq!(server.next_signal().await, OutboundSignal::join_conversation(&key()));

        // History result
        within(view.next()).await;
        assert!(!view.state().stream.is_hydrating());
        Harness {
            view,
            api,
            server,
            accepted,
        }
    }

    #[tokio::test]
    async fn test_open_hydrates_from_history() {
        let harness = mounted(vec![message("h2", "p1", "d1", 2), message("h1", "d1", "p1", 1)]).await;
        let ids: Vec<_> = harness
            .view
            .state()
            .stream
            .messages()
            .iter()
            .map(|m| m.id.to_string())
            .collect();
        assert_eq!(ids, vec!["h1", "h2"]);
        assert_eq!(harness.api.history_calls(), 1);
    }

    #[tokio::test]
    async fn test_live_message_appends_and_scrolls() {
        let mut harness = mounted(Vec::new()).await;
        harness
            .server
            .push(InboundEvent::MessageReceived(payload("m1", "d1", "p1", 5, "hi")));
        let events = within(harness.view.next()).await;
        assert_eq!(events, vec![ViewEvent::ScrollToBottom]);
        assert_eq!(harness.view.state().stream.len(), 1);
    }

    #[tokio::test]
    async fn test_submit_goes_through_rest_not_local_echo() {
        let mut harness = mounted(Vec::new()).await;
        harness.view.submit("hello doctor");
        assert!(harness.view.state().stream.is_empty());

        within(async {
            while harness.api.sent().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await;
        let sent = harness.api.sent();
        assert_eq!(sent[0].peer, "d1".into());
        assert_eq!(sent[0].text.as_deref(), Some("hello doctor"));
    }

    #[tokio::test]
    async fn test_send_failure_becomes_notice() {
        let mut harness = mounted(Vec::new()).await;
        harness.api.fail_sends_with(ApiError::Api {
            status: 403,
            message: "You are not part of this consultation".into(),
        });
        harness.view.submit("hello");
        let events = within(harness.view.next()).await;
        assert_eq!(
            events,
            vec![ViewEvent::Notice("You are not part of this consultation".into())]
        );
        assert_eq!(
            harness.view.state().notice.as_deref(),
            Some("You are not part of this consultation")
        );
    }

    #[tokio::test]
    async fn test_typing_burst_emits_start_then_stop() {
        let mut harness = mounted(Vec::new()).await;
        for _ in 0..5 {
            harness.view.input_changed();
        }
        assert!(matches!(
            harness.server.next_signal().await,
            OutboundSignal::Typing(_)
        ));

        // Debounce elapses
        within(harness.view.next()).await;
        assert!(matches!(
            harness.server.next_signal().await,
            OutboundSignal::StopTyping(_)
        ));
        assert!(harness.server.try_next_signal().is_none());
        assert!(!harness.view.state().typing.is_local_typing());
    }

    #[tokio::test]
    async fn test_peer_typing_indicator() {
        let mut harness = mounted(Vec::new()).await;
        harness.server.push(InboundEvent::PeerTyping(PeerTypingPayload {
            conversation_key: key(),
            sender_id: "d1".into(),
            is_typing: true,
        }));
        within(harness.view.next()).await;
        assert!(harness.view.state().typing.is_peer_typing());
    }

    #[tokio::test]
    async fn test_attach_uploads_then_sends_image() {
        let mut harness = mounted(Vec::new()).await;
        let attachment = Attachment {
            file_name: "rash.png".into(),
            mime: "image/png".into(),
            bytes: vec![1, 2, 3],
        };
        harness.view.attach(attachment, None).await;
        assert_eq!(harness.api.uploads().len(), 1);

        within(async {
            while harness.api.sent().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert_eq!(
            harness.api.sent()[0].image_ref.as_deref(),
            Some("https://cdn.test/rash.png")
        );
    }

    #[tokio::test]
    async fn test_close_drops_subscription() {
        let mut harness = mounted(Vec::new()).await;
        harness.view.close();
        assert!(harness.view.subscription.is_none());
        assert!(harness.view.state().key().is_none());
    }

    #[tokio::test]
    async fn test_send_text_signals_typing_around_the_send() {
        let mut harness = mounted(Vec::new()).await;
        harness.view.send_text("hello");
        assert!(matches!(
            harness.server.next_signal().await,
            OutboundSignal::Typing(_)
        ));
        assert!(matches!(
            harness.server.next_signal().await,
            OutboundSignal::StopTyping(_)
        ));
        assert!(!harness.view.state().typing.is_local_typing());

        within(async {
            while harness.api.sent().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert_eq!(harness.api.sent()[0].text.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_peer_typing_expires_without_stop() {
        let mut harness = mounted(Vec::new()).await;
        harness.server.push(InboundEvent::PeerTyping(PeerTypingPayload {
            conversation_key: key(),
            sender_id: "d1".into(),
            is_typing: true,
        }));
        within(harness.view.next()).await;
        assert!(harness.view.state().typing.is_peer_typing());

        // No stop ever arrives; the expiry timer clears it.
        within(harness.view.next()).await;
        assert!(!harness.view.state().typing.is_peer_typing());
    }

    #[tokio::test]
    async fn test_reconnect_rehydrates_and_keeps_messages_from_the_gap() {
        let Harness {
            mut view,
            api,
            server,
            mut accepted,
        } = mounted(vec![message("h1", "d1", "p1", 1)]).await;
        api.push_history(Ok(vec![
            message("h1", "d1", "p1", 1),
            message("h2", "d1", "p1", 2),
        ]));
        let release = api.hold_next_history();

        drop(server);
        let server = within(accepted.recv()).await.expect("reconnection");

        // Reconnected → second history pull, held open
        within(view.next()).await;
        assert!(view.state().stream.is_hydrating());

        server.push(InboundEvent::MessageReceived(payload("m3", "p1", "d1", 3, "still there?")));
        within(view.next()).await;

        let _ = release.send(());
        within(view.next()).await;

        assert!(!view.state().stream.is_hydrating());
        assert_eq!(api.history_calls(), 2);
        let ids: Vec<_> = view
            .state()
            .stream
            .messages()
            .iter()
            .map(|m| m.id.to_string())
            .collect();
        assert_eq!(ids, vec!["h1", "h2", "m3"]);
    }
}
