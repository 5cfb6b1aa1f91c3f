use std::fmt;

use async_trait::async_trait;

use crate::core::conversation::ParticipantId;
use crate::core::message::Message;

/// Shown when a failed request carries no usable reason.
pub const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

/// Errors from the request/response collaborators.
/// None of these are retried automatically; the view surfaces them once.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiError {
    /// Misconfigured client (bad URL, unreadable attachment).
    Config(String),
    /// Network-level failure (timeout, DNS, connection refused).
    Network(String),
    /// The backend answered with a non-success status.
    Api { status: u16, message: String },
    /// The response body could not be decoded.
    Parse(String),
    /// Rejected locally before any request was made.
    Invalid(String),
}

impl ApiError {
    /// Text for a transient user-facing notice.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Api { message, .. } if !message.trim().is_empty() => message.clone(),
            ApiError::Invalid(reason) => reason.clone(),
            _ => GENERIC_FAILURE.to_string(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Config(msg) => write!(f, "config error: {msg}"),
            ApiError::Network(msg) => write!(f, "network error: {msg}"),
            ApiError::Api { status, message } => {
                write!(f, "API error (HTTP {status}): {message}")
            }
            ApiError::Parse(msg) => write!(f, "parse error: {msg}"),
            ApiError::Invalid(msg) => write!(f, "invalid request: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

/// A file picked for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Request/response backend the chat core depends on.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Ordered backlog of the conversation with `peer`.
    async fn fetch_history(&self, peer: &ParticipantId) -> Result<Vec<Message>, ApiError>;

    /// Sends a message. The echo arrives on the channel, not here.
    async fn send_message(
        &self,
        peer: &ParticipantId,
        text: Option<&str>,
        image_ref: Option<&str>,
    ) -> Result<(), ApiError>;

    /// Uploads an attachment and returns a durable URL usable as `image_ref`.
    async fn upload_attachment(&self, attachment: Attachment) -> Result<String, ApiError>;
}

/// Supplies who we are. Authentication itself happens elsewhere.
pub trait IdentityProvider: Send + Sync {
    fn local_id(&self) -> Option<ParticipantId>;
    fn auth_token(&self) -> Option<String>;
}

/// Identity fixed at startup (config file, env, or CLI).
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    pub user_id: Option<ParticipantId>,
    pub token: Option<String>,
}

impl IdentityProvider for StaticIdentity {
    fn local_id(&self) -> Option<ParticipantId> {
        self.user_id.clone()
    }

    fn auth_token(&self) -> Option<String> {
        self.token.clone()
    }
}
