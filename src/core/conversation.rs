//! # Conversation Identity
//!
//! A conversation between two participants is addressed by a canonical key
//! that both sides can compute without coordinating: the two ids sorted
//! lexicographically and joined with `_`.
//!
//! ```text
//! between("p1", "d1")  →  "d1_p1"
//! between("d1", "p1")  →  "d1_p1"
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between the two sorted participant ids.
pub const KEY_SEPARATOR: char = '_';

/// Stable identifier of a chat participant (patient or doctor).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Order-independent room key for a participant pair.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    /// Canonical key for the pair `{a, b}`. `between(a, b) == between(b, a)`.
    pub fn between(a: &ParticipantId, b: &ParticipantId) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{}{}{}", first, KEY_SEPARATOR, second))
    }

    /// Wraps a key received from the wire. No validation: foreign or garbage
    /// keys simply never match an active conversation.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
