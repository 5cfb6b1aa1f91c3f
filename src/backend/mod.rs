//! # Backend
//!
//! Everything that crosses the process boundary: the persistent channel
//! (WebSocket) and the request/response collaborators (REST).

pub mod api;
pub mod rest;
pub mod socket;
pub mod types;

pub use api::{ApiError, Attachment, ChatApi, IdentityProvider, StaticIdentity};
pub use rest::RestApi;
pub use socket::{Link, Transport, TransportError, WebSocketTransport};
pub use types::{InboundEvent, OutboundSignal};
