//! Outbound push. The provider is opaque; all we need is "send this payload to
//! that device token" and to learn when a token has gone stale.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::db::{Notification, PushDestination};

#[derive(Debug, Error)]
pub enum DeliveryFailure {
    /// The destination no longer exists and should be forgotten.
    #[error("push destination is gone")]
    Gone,
    #[error("push provider refused delivery: {0}")]
    Rejected(String),
    #[error("push transport failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub notification_id: Uuid,
    pub title: String,
    pub body: String,
    pub kind: String,
    pub related_id: Option<Uuid>,
    pub related_type: Option<String>,
}

impl From<&Notification> for PushPayload {
    fn from(notification: &Notification) -> Self {
        PushPayload {
            notification_id: notification.id,
            title: notification.title.clone(),
            body: notification.body.clone(),
            kind: notification.kind.clone(),
            related_id: notification.related_id,
            related_type: notification.related_type.clone(),
        }
    }
}

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, destination: &PushDestination, payload: &PushPayload) -> Result<(), DeliveryFailure>;
}

/// Used when no provider is configured.
pub struct LogPushSender;

#[async_trait]
impl PushSender for LogPushSender {
    async fn send(&self, destination: &PushDestination, payload: &PushPayload) -> Result<(), DeliveryFailure> {
        tracing::info!(
            user_id = %destination.user_id,
            platform = %destination.platform,
            notification_id = %payload.notification_id,
            "push (log only)"
        );
        Ok(())
    }
}

/// Hands pushes to a relay over HTTP. 404 and 410 mean the token is stale.
pub struct WebhookPushSender {
    client: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    token: &'a str,
    platform: &'a str,
    payload: &'a PushPayload,
}

impl WebhookPushSender {
    pub fn new(url: impl Into<String>) -> Result<Self, DeliveryFailure> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(WebhookPushSender { client, url: url.into() })
    }
}

#[async_trait]
impl PushSender for WebhookPushSender {
    async fn send(&self, destination: &PushDestination, payload: &PushPayload) -> Result<(), DeliveryFailure> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookBody {
                token: &destination.token,
                platform: &destination.platform,
                payload,
            })
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(DeliveryFailure::Gone),
            status => Err(DeliveryFailure::Rejected(status.to_string())),
        }
    }
}
