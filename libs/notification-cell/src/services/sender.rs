use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_models::{NotificationRecord, NotificationType};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Worth retrying later: gateway unavailable, rate limited, timed out.
    #[error("Transient delivery failure: {0}")]
    Transient(String),

    /// Retrying cannot help: bad address, unsupported channel, rejected payload.
    #[error("Permanent delivery failure: {0}")]
    Permanent(String),
}

/// Channel delivery capability. Implementations must not mutate the record's queue state.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, record: &NotificationRecord) -> Result<(), SendError>;
}

/// Posts the record as JSON to a gateway URL that performs the actual email/SMS/push delivery.
pub struct WebhookSender {
    client: reqwest::Client,
    url: String,
}

impl WebhookSender {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

fn classify_status(status: StatusCode) -> Result<(), SendError> {
    if status.is_success() {
        return Ok(());
    }

    let detail = format!("gateway responded with {}", status);
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        Err(SendError::Transient(detail))
    } else {
        Err(SendError::Permanent(detail))
    }
}

#[async_trait]
impl Sender for WebhookSender {
    async fn send(&self, record: &NotificationRecord) -> Result<(), SendError> {
        let recipient = record.delivery_address().ok_or_else(|| {
            SendError::Permanent(format!(
                "no {} address for notification {}",
                record.notification_type, record.id
            ))
        })?;

        let payload = json!({
            "id": record.id,
            "channel": record.notification_type,
            "recipient": recipient,
            "recipient_type": record.recipient_type,
            "subject": record.subject,
            "message": record.message,
            "booking_id": record.booking_id,
        });

        debug!("Posting notification {} to {}", record.id, self.url);

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SendError::Transient(format!("gateway request failed: {}", e)))?;

        classify_status(response.status())
    }
}

/// The stored record is the in-app inbox entry, so delivery is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct InAppSender;

#[async_trait]
impl Sender for InAppSender {
    async fn send(&self, record: &NotificationRecord) -> Result<(), SendError> {
        debug!("In-app notification {} available to {:?}", record.id, record.recipient_id);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct SenderRegistry {
    senders: HashMap<NotificationType, Arc<dyn Sender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Webhook senders for every configured gateway plus the in-app sender.
    pub fn from_config(config: &AppConfig, client: reqwest::Client) -> Self {
        let mut registry = Self::new().with(NotificationType::InApp, Arc::new(InAppSender));

        let gateways = [
            (NotificationType::Email, &config.email_gateway_url),
            (NotificationType::Sms, &config.sms_gateway_url),
            (NotificationType::Push, &config.push_gateway_url),
        ];

        for (channel, url) in gateways {
            match url {
                Some(url) => {
                    info!("Delivering {} notifications through {}", channel, url);
                    registry.register(channel, Arc::new(WebhookSender::new(client.clone(), url)));
                }
                None => warn!("No gateway configured for {} notifications", channel),
            }
        }

        registry
    }

    pub fn register(&mut self, channel: NotificationType, sender: Arc<dyn Sender>) {
        self.senders.insert(channel, sender);
    }

    pub fn with(mut self, channel: NotificationType, sender: Arc<dyn Sender>) -> Self {
        self.register(channel, sender);
        self
    }

    pub fn get(&self, channel: NotificationType) -> Option<Arc<dyn Sender>> {
        self.senders.get(&channel).cloned()
    }
}
