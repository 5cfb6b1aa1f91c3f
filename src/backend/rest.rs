//! REST implementation of the chat collaborators.
//!
//! ```text
//! GET  {base}/messages/{peer}   → [MessagePayload]
//! POST {base}/messages/{peer}   ← {"text", "image"}
//! POST {base}/uploads           ← multipart "image"  → {"url"}
//! ```

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::backend::api::{ApiError, Attachment, ChatApi};
use crate::backend::types::{MessagePayload, SendMessageRequest, UploadResponse};
use crate::core::conversation::ParticipantId;
use crate::core::message::Message;

/// Error bodies look like `{"message": "..."}` or `{"error": "..."}`.
#[derive(Deserialize, Debug)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

pub struct RestApi {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl RestApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            token,
            client: reqwest::Client::new(),
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    /// Maps a non-success response to `ApiError::Api`, pulling a
    /// human-readable reason out of the body when there is one.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        warn!("Chat API error: {} - {}", status, body);
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message.or(b.error))
            .unwrap_or_default();
        Err(ApiError::Api { status, message })
    }
}

#[async_trait]
impl ChatApi for RestApi {
    async fn fetch_history(&self, peer: &ParticipantId) -> Result<Vec<Message>, ApiError> {
        let url = format!("{}/messages/{}", self.base_url, peer);
        debug!("Fetching history: {}", url);

        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let response = Self::check(response).await?;

        let payloads: Vec<MessagePayload> = response
            .json()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))?;
        let total = payloads.len();

        let messages: Vec<Message> = payloads
            .into_iter()
            .filter_map(|payload| match Message::try_from(payload) {
                Ok(message) => Some(message),
                Err(e) => {
                    debug!("Skipping history entry: {}", e);
                    None
                }
            })
            .collect();

        info!("History for {}: {} of {} entries usable", peer, messages.len(), total);
        Ok(messages)
    }

    async fn send_message(
        &self,
        peer: &ParticipantId,
        text: Option<&str>,
        image_ref: Option<&str>,
    ) -> Result<(), ApiError> {
        if text.is_none_or(|t| t.trim().is_empty()) && image_ref.is_none() {
            return Err(ApiError::Invalid("Message is empty".to_string()));
        }
        let body = SendMessageRequest {
            text: text.map(str::to_string),
            image: image_ref.map(str::to_string),
        };

        let response = self
            .authorized(self.client.post(format!("{}/messages/{}", self.base_url, peer)))
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::check(response).await?;
        debug!("Message to {} accepted", peer);
        Ok(())
    }

    async fn upload_attachment(&self, attachment: Attachment) -> Result<String, ApiError> {
        let size = attachment.bytes.len();
        let part = Part::bytes(attachment.bytes)
            .file_name(attachment.file_name.clone())
            .mime_str(&attachment.mime)
            .map_err(|e| ApiError::Config(e.to_string()))?;
        let form = Form::new().part("image", part);

        info!("Uploading {} ({} bytes)", attachment.file_name, size);
        let response = self
            .authorized(self.client.post(format!("{}/uploads", self.base_url)))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let response = Self::check(response).await?;

        let uploaded: UploadResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))?;
        Ok(uploaded.url)
    }
}
