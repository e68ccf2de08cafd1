//! The notification dispatcher.
//!
//! Notifications are written as `Pending` rows inside the same transaction that applies their originating
//! domain event, which makes the table a durable at-least-once queue. The dispatcher drains it: claim a batch
//! under a lease, deliver concurrently, mark each row `Sent` or push its next attempt out with exponential
//! backoff until the retry budget runs out and the row is dead-lettered as `Failed`.
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use futures_util::stream::{self, StreamExt};
use log::*;
use tokio::sync::watch;

use crate::{
    db_types::Notification,
    traits::{MarketplaceDatabase, MessageDelivery},
};

pub const DEFAULT_POLL_INTERVAL: StdDuration = StdDuration::from_secs(2);
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_MAX_ATTEMPTS: i64 = 5;
/// Backoff never exceeds this, no matter the retry count.
pub const MAX_BACKOFF_SECS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub poll_interval: StdDuration,
    pub batch_size: usize,
    /// How many deliveries are in flight at once within a batch.
    pub workers: usize,
    /// Attempts before a notification is dead-lettered.
    pub max_attempts: i64,
    pub base_backoff: Duration,
    /// How long a claimed notification is invisible to other dispatcher instances.
    pub lease: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            workers: DEFAULT_WORKERS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: Duration::seconds(5),
            lease: Duration::seconds(60),
        }
    }
}

/// `base * 2^retry_count`, capped at [`MAX_BACKOFF_SECS`].
pub fn backoff_delay(base: Duration, retry_count: i64) -> Duration {
    let shift = retry_count.clamp(0, 30) as u32;
    let secs = base.num_seconds().saturating_mul(1i64 << shift).min(MAX_BACKOFF_SECS);
    Duration::seconds(secs)
}

pub struct NotificationDispatcher<B, D> {
    db: B,
    delivery: D,
    config: DispatchConfig,
}

impl<B: Clone, D: Clone> Clone for NotificationDispatcher<B, D> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), delivery: self.delivery.clone(), config: self.config.clone() }
    }
}

impl<B, D> NotificationDispatcher<B, D>
where
    B: MarketplaceDatabase,
    D: MessageDelivery,
{
    pub fn new(db: B, delivery: D, config: DispatchConfig) -> Self {
        Self { db, delivery, config }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Claim one batch of due notifications and attempt delivery for each. Returns the number of
    /// notifications that were delivered successfully.
    ///
    /// Delivery failures are absorbed here (retry or dead-letter); only claim-query trouble bubbles up.
    pub async fn run_once(&self) -> Result<usize, crate::traits::MarketplaceError> {
        let batch = self.db.claim_due_notifications(self.config.batch_size, self.config.lease).await?;
        if batch.is_empty() {
            return Ok(0);
        }
        debug!("📨️ Claimed {} notifications for delivery", batch.len());
        let sent = stream::iter(batch)
            .map(|notification| self.attempt_delivery(notification))
            .buffer_unordered(self.config.workers.max(1))
            .filter(|delivered| futures_util::future::ready(*delivered))
            .count()
            .await;
        Ok(sent)
    }

    /// One delivery attempt for one claimed notification. Returns `true` if the message went out.
    async fn attempt_delivery(&self, notification: Notification) -> bool {
        let id = notification.id;
        match self.delivery.deliver(&notification).await {
            Ok(()) => {
                trace!("📨️ Notification {id} delivered on attempt {}", notification.retry_count + 1);
                if let Err(e) = self.db.mark_notification_sent(id).await {
                    // The message went out but the row is still Pending; the lease expiry will cause a
                    // duplicate send, which at-least-once semantics permit.
                    warn!("📨️ Could not mark notification {id} as sent: {e}");
                }
                true
            },
            Err(e) => {
                let attempts = notification.retry_count + 1;
                let retry_at = if attempts >= self.config.max_attempts {
                    error!(
                        "📨️ Notification {id} failed its final attempt ({attempts}/{}) and is dead-lettered: {e}",
                        self.config.max_attempts
                    );
                    None
                } else {
                    let delay = backoff_delay(self.config.base_backoff, notification.retry_count);
                    debug!(
                        "📨️ Notification {id} failed attempt {attempts}/{}: {e}. Retrying in {}s.",
                        self.config.max_attempts,
                        delay.num_seconds()
                    );
                    Some(Utc::now() + delay)
                };
                if let Err(e) = self.db.record_delivery_failure(id, retry_at).await {
                    warn!("📨️ Could not record delivery failure for notification {id}: {e}");
                }
                false
            },
        }
    }

    /// Runs the dispatcher until the shutdown flag flips. The caller spawns this at a concrete type.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut timer = tokio::time::interval(self.config.poll_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("📨️ Notification dispatcher started with a {:?} poll interval", self.config.poll_interval);
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.run_once().await {
                        Ok(0) => {},
                        Ok(n) => debug!("📨️ Delivered {n} notifications"),
                        Err(e) => warn!("📨️ Dispatch pass failed: {e}. Will retry on the next tick."),
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("📨️ Notification dispatcher shutting down");
                        break;
                    }
                },
            }
        }
    }
}
