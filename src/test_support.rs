//! Test utilities shared across the crate.
//!
//! This module is only compiled during tests (`#[cfg(test)]`).

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::backend::api::{ApiError, Attachment, ChatApi};
use crate::backend::socket::{Link, Transport, TransportError};
use crate::backend::types::{InboundEvent, MessagePayload, OutboundSignal};
use crate::core::conversation::ParticipantId;
use crate::core::message::{Message, MessageId};

/// Awaits `future`, failing the test if it takes longer than a second.
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(1), future)
        .await
        .expect("timed out")
}

/// A text message with a server id and a timestamp in whole seconds.
pub fn message(id: &str, sender: &str, receiver: &str, secs: i64) -> Message {
    Message::new(
        MessageId::Server(id.to_string()),
        sender.into(),
        receiver.into(),
        Some(format!("message {id}")),
        None,
        Utc.timestamp_opt(secs, 0).unwrap(),
    )
    .unwrap()
}

pub fn payload(id: &str, sender: &str, receiver: &str, secs: i64, text: &str) -> MessagePayload {
    MessagePayload {
        id: Some(id.to_string()),
        sender_id: sender.to_string(),
        receiver_id: receiver.to_string(),
        text: Some(text.to_string()),
        image: None,
        created_at: Utc.timestamp_opt(secs, 0).unwrap(),
    }
}

// ============================================================================
// In-memory channel
// ============================================================================

/// Transport whose connections are handed to the test as `ServerEnd`s.
pub struct MemoryTransport {
    accepted: mpsc::UnboundedSender<ServerEnd>,
    connects: AtomicUsize,
    failures_left: AtomicUsize,
}

impl MemoryTransport {
    /// The first `failures` connect attempts fail.
    pub fn new(failures: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, accepted_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            accepted,
            connects: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(failures),
        });
        (transport, accepted_rx)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<Box<dyn Link>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::Connect("refused".into()));
        }

        let (outbound, received) = mpsc::unbounded_channel();
        let (push, inbound) = mpsc::unbounded_channel();
        self.accepted
            .send(ServerEnd { received, push })
            .map_err(|_| TransportError::Connect("no listener".into()))?;
        Ok(Box::new(MemoryLink { outbound, inbound }))
    }
}

/// The backend's side of one in-memory connection. Dropping it closes the link.
pub struct ServerEnd {
    received: mpsc::UnboundedReceiver<OutboundSignal>,
    push: mpsc::UnboundedSender<Result<InboundEvent, TransportError>>,
}

impl ServerEnd {
    pub async fn next_signal(&mut self) -> OutboundSignal {
        within(self.received.recv()).await.expect("link closed")
    }

    pub fn try_next_signal(&mut self) -> Option<OutboundSignal> {
        self.received.try_recv().ok()
    }

    pub fn push(&self, event: InboundEvent) {
        let _ = self.push.send(Ok(event));
    }

    pub fn push_error(&self, error: TransportError) {
        let _ = self.push.send(Err(error));
    }
}

struct MemoryLink {
    outbound: mpsc::UnboundedSender<OutboundSignal>,
    inbound: mpsc::UnboundedReceiver<Result<InboundEvent, TransportError>>,
}

#[async_trait]
impl Link for MemoryLink {
    async fn send(&mut self, signal: &OutboundSignal) -> Result<(), TransportError> {
        self.outbound
            .send(signal.clone())
            .map_err(|_| TransportError::Io("server gone".into()))
    }

    async fn recv(&mut self) -> Option<Result<InboundEvent, TransportError>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

// ============================================================================
// Fake REST collaborators
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub peer: ParticipantId,
    pub text: Option<String>,
    pub image_ref: Option<String>,
}

/// Scripted `ChatApi`. History responses are served in order; once the
/// script runs out, history is empty.
#[derive(Default)]
pub struct FakeApi {
    history: Mutex<VecDeque<Result<Vec<Message>, ApiError>>>,
    send_error: Mutex<Option<ApiError>>,
    sent: Mutex<Vec<SentMessage>>,
    uploads: Mutex<Vec<Attachment>>,
    history_calls: AtomicUsize,
    history_gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_history(&self, response: Result<Vec<Message>, ApiError>) {
        self.history.lock().unwrap().push_back(response);
    }

    pub fn fail_sends_with(&self, error: ApiError) {
        *self.send_error.lock().unwrap() = Some(error);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<Attachment> {
        self.uploads.lock().unwrap().clone()
    }

    /// The next history pull waits until the returned sender fires (or drops).
    pub fn hold_next_history(&self) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        *self.history_gate.lock().unwrap() = Some(gate);
        release
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn fetch_history(&self, _peer: &ParticipantId) -> Result<Vec<Message>, ApiError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.history_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let next = self.history.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn send_message(
        &self,
        peer: &ParticipantId,
        text: Option<&str>,
        image_ref: Option<&str>,
    ) -> Result<(), ApiError> {
        if let Some(error) = self.send_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.sent.lock().unwrap().push(SentMessage {
            peer: peer.clone(),
            text: text.map(str::to_string),
            image_ref: image_ref.map(str::to_string),
        });
        Ok(())
    }

    async fn upload_attachment(&self, attachment: Attachment) -> Result<String, ApiError> {
        let url = format!("https://cdn.test/{}", attachment.file_name);
        self.uploads.lock().unwrap().push(attachment);
        Ok(url)
    }
}
