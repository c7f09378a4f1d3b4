//! Outbound delivery to the chat platform.
//!
//! The engine never retries; a failed send is reported to the caller and
//! logged. Adapters:
//! - [`WebhookSender`] POSTs the notification as JSON to the gateway.
//! - [`LogSender`] only logs; used when no gateway URL is configured. Every
//!   send is reported as [`DeliveryError::NotConfigured`], so nothing is
//!   counted as delivered and reminders stay pending.

use std::time::Duration;

use agora_shared::protocol::{Destination, Notification};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected by gateway: HTTP {status}")]
    Rejected { status: u16 },

    #[error("rate limited by platform")]
    RateLimited,

    /// No outbound webhook is configured; the notification was only logged.
    #[error("no outbound webhook configured")]
    NotConfigured,

    /// The engine's concurrency pool was closed.
    #[error("delivery engine is shut down")]
    Closed,
}

#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(
        &self,
        destination: &Destination,
        notification: &Notification,
    ) -> Result<(), DeliveryError>;
}

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct OutboundPayload<'a> {
    destination: &'a Destination,
    notification: &'a Notification,
}

pub struct WebhookSender {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl WebhookSender {
    pub fn new(url: String, token: Option<String>) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        Ok(Self { client, url, token })
    }
}

#[async_trait]
impl Sender for WebhookSender {
    async fn send(
        &self,
        destination: &Destination,
        notification: &Notification,
    ) -> Result<(), DeliveryError> {
        let mut request = self.client.post(&self.url).json(&OutboundPayload {
            destination,
            notification,
        });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(DeliveryError::RateLimited);
        }
        if !status.is_success() {
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Log only
// ---------------------------------------------------------------------------

pub struct LogSender;

#[async_trait]
impl Sender for LogSender {
    async fn send(
        &self,
        destination: &Destination,
        notification: &Notification,
    ) -> Result<(), DeliveryError> {
        info!(
            room = %destination.room_id,
            channel = %destination.channel_external_id,
            title = %notification.title,
            "notification (no outbound webhook configured)"
        );
        Err(DeliveryError::NotConfigured)
    }
}
