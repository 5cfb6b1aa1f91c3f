//! # Connection Manager
//!
//! One persistent channel per authenticated session, shared by every view.
//!
//! `ConnectionManager` is a cheap cloneable handle. All work happens in a
//! single background worker that owns the link and is the only writer of
//! `ConnectionState`; handles talk to it over an unbounded command channel
//! and observe state through a `watch` channel.
//!
//! ```text
//!  view ─┐                      ┌──────────── Worker ────────────┐
//!  view ─┼── Command ──────────►│ identity, rooms, subscribers   │◄──► Link
//!  view ─┘                      │ state (watch) ─────────────────┼──► handles
//!     ▲                         └───────────────┬────────────────┘
//!     └──────── ChannelEvent (per-key) ─────────┘
//! ```
//!
//! On every connect the worker sends `join`, `announcePresence`, then
//! `joinConversation` for each room that still has a subscriber. Drops are
//! retried with exponential backoff for as long as an identity is bound;
//! the backoff only resets after a link has stayed up for
//! `ReconnectPolicy::stable_after`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use futures::future::BoxFuture;
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};

use crate::backend::socket::{Link, Transport, TransportError};
use crate::backend::types::{InboundEvent, OutboundSignal};
use crate::core::action::ChannelEvent;
use crate::core::conversation::{ConversationKey, ParticipantId};
use crate::core::reconnect::ReconnectPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Identity the channel is bound to; `None` when Disconnected.
    pub bound_identity: Option<ParticipantId>,
}

impl ConnectionState {
    fn disconnected() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            bound_identity: None,
        }
    }
}

enum Command {
    EnsureConnected(ParticipantId),
    JoinConversation(ConversationKey),
    AnnouncePresence(ParticipantId),
    Emit(OutboundSignal),
    Subscribe {
        id: u64,
        key: ConversationKey,
        sender: mpsc::UnboundedSender<ChannelEvent>,
    },
    Unsubscribe(u64),
    Teardown,
}

#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    next_subscription: Arc<AtomicU64>,
}

impl ConnectionManager {
    /// Starts the worker on the current tokio runtime. Nothing connects
    /// until `ensure_connected` supplies an identity.
    pub fn spawn(transport: Arc<dyn Transport>, policy: ReconnectPolicy) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::disconnected());
        let worker = Worker {
            transport,
            policy,
            state: state_tx,
            identity: None,
            rooms: Vec::new(),
            subscribers: HashMap::new(),
            link: None,
            connected_at: None,
            attempt: 0,
            has_connected: false,
        };
        tokio::spawn(worker.run(command_rx));
        Self {
            commands,
            state,
            next_subscription: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Idempotent. Connects and binds `local_id`, or does nothing if the
    /// channel is already bound to it (connected or still connecting).
    pub fn ensure_connected(&self, local_id: &ParticipantId) {
        self.send(Command::EnsureConnected(local_id.clone()));
    }

    /// Joins a room. Queued if the channel isn't up yet, and re-issued after
    /// every reconnect.
    pub fn join_conversation(&self, key: &ConversationKey) {
        self.send(Command::JoinConversation(key.clone()));
    }

    pub fn announce_presence(&self, local_id: &ParticipantId) {
        self.send(Command::AnnouncePresence(local_id.clone()));
    }

    /// Fire-and-forget. Dropped if the channel is not connected.
    pub fn emit(&self, signal: OutboundSignal) {
        self.send(Command::Emit(signal));
    }

    /// Live events for one conversation. Dropping the subscription unsubscribes.
    pub fn subscribe(&self, key: &ConversationKey) -> Subscription {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let (sender, events) = mpsc::unbounded_channel();
        self.send(Command::Subscribe {
            id,
            key: key.clone(),
            sender,
        });
        Subscription {
            id,
            key: key.clone(),
            events,
            commands: self.commands.clone(),
        }
    }

    /// Logout: closes the channel, clears the identity, ends all subscriptions.
    pub fn teardown(&self) {
        self.send(Command::Teardown);
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Resolves once the channel is Connected. False if the worker is gone.
    pub async fn wait_until_connected(&self) -> bool {
        let mut state = self.state.clone();
        state
            .wait_for(|s| s.status == ConnectionStatus::Connected)
            .await
            .is_ok()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Connection worker is gone; command dropped");
        }
    }
}

/// Receiver of `ChannelEvent`s for one conversation key.
pub struct Subscription {
    id: u64,
    key: ConversationKey,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    /// Next event. Cancel-safe. `None` after teardown.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Unsubscribe(self.id));
    }
}

struct Subscriber {
    key: ConversationKey,
    sender: mpsc::UnboundedSender<ChannelEvent>,
}

type Connecting = BoxFuture<'static, Result<Box<dyn Link>, TransportError>>;

struct Worker {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
    identity: Option<ParticipantId>,
    /// Rooms joined under the current binding, in join order. A room is
    /// forgotten when its last subscriber goes away.
    rooms: Vec<ConversationKey>,
    subscribers: HashMap<u64, Subscriber>,
    link: Option<Box<dyn Link>>,
    connected_at: Option<Instant>,
    attempt: u32,
    /// Whether this binding has been connected before (next connect is a reconnect).
    has_connected: bool,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut connecting: Option<Connecting> = None;

        loop {
            if self.identity.is_some() && self.link.is_none() && connecting.is_none() {
                connecting = Some(self.start_attempt());
            }

            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if self.handle(command).await {
                        connecting = None;
                    }
                }
                result = await_connecting(&mut connecting) => {
                    connecting = None;
                    self.on_connect_result(result).await;
                }
                event = next_event(&mut self.link) => {
                    self.on_inbound(event).await;
                }
            }
        }

        debug!("All connection handles dropped; worker exiting");
        self.close_link().await;
    }

    fn start_attempt(&mut self) -> Connecting {
        let delay = self.policy.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.publish(ConnectionStatus::Connecting);
        if !delay.is_zero() {
            debug!("Reconnecting in {:?} (attempt {})", delay, self.attempt);
        }
        let transport = Arc::clone(&self.transport);
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            transport.connect().await
        })
    }

    /// Returns true when a pending connection attempt must be abandoned.
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::EnsureConnected(id) => {
                if self.identity.as_ref() == Some(&id) {
                    return false;
                }
                if let Some(previous) = &self.identity {
                    info!("Rebinding channel from {} to {}", previous, id);
                    self.reset().await;
                } else {
                    info!("Binding channel to {}", id);
                }
                self.identity = Some(id);
                self.attempt = 0;
                true
            }
            Command::JoinConversation(key) => {
                if self.rooms.contains(&key) {
                    return false;
                }
                self.rooms.push(key.clone());
                if self.link.is_some() {
                    self.send(&OutboundSignal::join_conversation(&key)).await;
                } else {
                    debug!("Queued joinConversation {}", key);
                }
                false
            }
            Command::AnnouncePresence(id) => {
                if self.link.is_some() {
                    self.send(&OutboundSignal::announce_presence(&id)).await;
                }
                false
            }
            Command::Emit(signal) => {
                if self.link.is_some() {
                    self.send(&signal).await;
                } else {
                    debug!("Dropping {} while disconnected", signal.name());
                }
                false
            }
            Command::Subscribe { id, key, sender } => {
                self.subscribers.insert(id, Subscriber { key, sender });
                false
            }
            Command::Unsubscribe(id) => {
                if let Some(gone) = self.subscribers.remove(&id) {
                    self.forget_room_if_unwatched(&gone.key);
                }
                false
            }
            Command::Teardown => {
                info!("Tearing down channel");
                self.reset().await;
                self.identity = None;
                self.publish(ConnectionStatus::Disconnected);
                true
            }
        }
    }

    /// Forgets everything tied to the current binding.
    async fn reset(&mut self) {
        self.close_link().await;
        self.rooms.clear();
        self.subscribers.clear();
        self.has_connected = false;
        self.attempt = 0;
    }

    async fn on_connect_result(&mut self, result: Result<Box<dyn Link>, TransportError>) {
        let link = match result {
            Ok(link) => link,
            Err(e) => {
                warn!("Channel connect attempt {} failed: {}", self.attempt, e);
                return;
            }
        };
        let Some(identity) = self.identity.clone() else {
            return;
        };

        self.link = Some(link);
        self.connected_at = Some(Instant::now());

        let mut handshake = vec![
            OutboundSignal::join(&identity),
            OutboundSignal::announce_presence(&identity),
        ];
        handshake.extend(self.rooms.iter().map(OutboundSignal::join_conversation));
        for signal in &handshake {
            if !self.send(signal).await && self.link.is_none() {
                return;
            }
        }

        self.publish(ConnectionStatus::Connected);
        info!(
            "Channel connected as {} ({} rooms)",
            identity,
            self.rooms.len()
        );

        if self.has_connected {
            self.broadcast_reconnected();
        }
        self.has_connected = true;
    }

    async fn on_inbound(&mut self, event: Option<Result<InboundEvent, TransportError>>) {
        match event {
            None => {
                warn!("Channel closed by remote");
                self.drop_link();
            }
            Some(Err(e)) if e.is_fatal_to_link() => {
                warn!("Channel failed: {}", e);
                self.drop_link();
            }
            Some(Err(e)) => debug!("Discarding frame: {}", e),
            Some(Ok(event)) => match event.into_routed() {
                Ok((key, event)) => self.dispatch(&key, event),
                Err(e) => debug!("Discarding malformed event: {}", e),
            },
        }
    }

    fn forget_room_if_unwatched(&mut self, key: &ConversationKey) {
        if self.subscribers.values().any(|sub| &sub.key == key) {
            return;
        }
        if let Some(pos) = self.rooms.iter().position(|room| room == key) {
            debug!("No subscribers left for {}; not rejoining it", key);
            self.rooms.remove(pos);
        }
    }

    fn dispatch(&mut self, key: &ConversationKey, event: ChannelEvent) {
        let mut delivered = 0usize;
        self.subscribers.retain(|_, sub| {
            if &sub.key != key {
                return true;
            }
            delivered += 1;
            sub.sender.send(event.clone()).is_ok()
        });
        if delivered == 0 {
            debug!("No subscriber for {}", key);
        }
    }

    fn broadcast_reconnected(&mut self) {
        self.subscribers
            .retain(|_, sub| sub.sender.send(ChannelEvent::Reconnected).is_ok());
    }

    /// Sends on the link; a fatal failure drops the link. Returns success.
    async fn send(&mut self, signal: &OutboundSignal) -> bool {
        let Some(link) = self.link.as_mut() else {
            return false;
        };
        match link.send(signal).await {
            Ok(()) => {
                debug!("Sent {}", signal.name());
                true
            }
            Err(e) if e.is_fatal_to_link() => {
                warn!("Failed to send {}: {}", signal.name(), e);
                self.drop_link();
                false
            }
            Err(e) => {
                warn!("Skipping {}: {}", signal.name(), e);
                false
            }
        }
    }

    fn drop_link(&mut self) {
        self.link = None;
        if let Some(since) = self.connected_at.take() {
            if self.policy.is_stable(since.elapsed()) {
                self.attempt = 0;
            } else {
                debug!("Link lasted {:?}; keeping backoff at attempt {}", since.elapsed(), self.attempt);
            }
        }
        if self.identity.is_some() {
            self.publish(ConnectionStatus::Connecting);
        }
    }

    async fn close_link(&mut self) {
        self.connected_at = None;
        if let Some(mut link) = self.link.take() {
            link.close().await;
        }
    }

    fn publish(&self, status: ConnectionStatus) {
        let bound_identity = match status {
            ConnectionStatus::Disconnected => None,
            _ => self.identity.clone(),
        };
        self.state.send_replace(ConnectionState {
            status,
            bound_identity,
        });
    }
}

async fn await_connecting(
    connecting: &mut Option<Connecting>,
) -> Result<Box<dyn Link>, TransportError> {
    match connecting {
        Some(attempt) => attempt.await,
        None => std::future::pending().await,
    }
}

async fn next_event(
    link: &mut Option<Box<dyn Link>>,
) -> Option<Result<InboundEvent, TransportError>> {
    match link {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}
