//! # Core Consultation Logic
//!
//! The chat view's business logic: conversation identity, the message
//! stream, typing coordination and scroll following.
//! It knows nothing about sockets, HTTP or terminals.
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │         CORE            │
//!                    │  (this module)          │
//!                    │                         │
//!                    │  • State (view data)    │
//!                    │  • Action (events)      │
//!                    │  • update() (reducer)   │
//!                    │                         │
//!                    │  No I/O. Time is passed │
//!                    │  in as `Instant`.       │
//!                    └───────────┬─────────────┘
//!                                │ Effect
//!            ┌───────────────────┴───────────────────┐
//!            ▼                                       ▼
//!     ┌────────────┐                          ┌────────────┐
//!     │  client::  │   ConnectionManager      │  backend:: │
//!     │  ChatView  │ ───────────────────────► │  REST / WS │
//!     └────────────┘                          └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`conversation`]: participant ids and the canonical conversation key
//! - [`message`]: the `Message` record
//! - [`stream`]: ordered, deduplicated messages of the active conversation
//! - [`typing`]: debounced local typing signals, expiring peer typing state
//! - [`scroll`]: follow-the-bottom vs. reading-history
//! - [`state`]: `ChatState`, everything one view owns
//! - [`action`]: `Action`, `Effect` and `update()`
//! - [`reconnect`]: backoff policy for the channel
//! - [`config`]: config file, env and CLI resolution

pub mod action;
pub mod config;
pub mod conversation;
pub mod message;
pub mod reconnect;
pub mod scroll;
pub mod state;
pub mod stream;
pub mod typing;
