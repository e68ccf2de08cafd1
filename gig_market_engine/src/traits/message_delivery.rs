use thiserror::Error;

use crate::db_types::Notification;

/// The "deliver message" capability of the bot/messaging front-end.
///
/// The dispatcher is the only caller. The engine never depends on a specific chat protocol; anything that can
/// push a JSON payload to a user satisfies this trait.
#[allow(async_fn_in_trait)]
pub trait MessageDelivery: Clone + Send + Sync + 'static {
    /// Deliver one notification to its target user. Implementations should bound their own I/O with a timeout;
    /// the dispatcher handles retries and backoff.
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, Error)]
#[error("Delivery failed: {0}")]
pub struct DeliveryError(pub String);
