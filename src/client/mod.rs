//! # Client
//!
//! The async side of a chat session: the shared channel, the per-view
//! driver, and the line-oriented terminal front end.

pub mod connection;
pub mod terminal;
pub mod view;

pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus, Subscription};
pub use view::{ChatView, ViewEvent};
