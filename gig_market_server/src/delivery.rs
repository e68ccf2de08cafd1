//! Webhook delivery of queued notifications to the messaging front-end.
use std::sync::Arc;

use gig_market_engine::{
    db_types::Notification,
    traits::{DeliveryError, MessageDelivery},
};
use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
    Client,
};

use crate::{config::DeliveryConfig, errors::ServerError};

/// Pushes notifications to the messaging front-end as JSON webhook posts.
///
/// Any non-2xx response or transport error counts as a failed attempt; the dispatcher decides whether to retry
/// or dead-letter.
#[derive(Clone)]
pub struct WebhookDelivery {
    url: String,
    client: Arc<Client>,
}

impl WebhookDelivery {
    pub fn new(config: &DeliveryConfig) -> Result<Self, ServerError> {
        let mut headers = HeaderMap::with_capacity(2);
        let token = config.auth_token.reveal();
        if !token.is_empty() {
            let val = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ServerError::InitializeError(e.to_string()))?;
            headers.insert(AUTHORIZATION, val);
        }
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client =
            Client::builder().default_headers(headers).build().map_err(|e| ServerError::InitializeError(e.to_string()))?;
        Ok(Self { url: config.webhook_url.clone(), client: Arc::new(client) })
    }
}

impl MessageDelivery for WebhookDelivery {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let payload = serde_json::from_str::<serde_json::Value>(&notification.payload)
            .map_err(|e| DeliveryError(format!("Notification {} has an unreadable payload. {e}", notification.id)))?;
        let body = serde_json::json!({
            "user_id": notification.user_id,
            "kind": notification.kind,
            "payload": payload,
        });
        let response =
            self.client.post(&self.url).json(&body).send().await.map_err(|e| DeliveryError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DeliveryError(format!(
                "The messaging front-end answered {} for notification {}",
                response.status(),
                notification.id
            )));
        }
        trace!("📨️ Notification {} delivered to the front-end", notification.id);
        Ok(())
    }
}
