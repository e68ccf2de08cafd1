use chrono::{DateTime, Duration, Utc};
use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewNotification, Notification, NotificationStatus},
    traits::MarketplaceError,
};

/// Inserts a `Pending` notification, immediately due. Called from inside the event application transaction so
/// that the queue entry is exactly as durable as the state change that caused it.
pub async fn insert(
    notification: NewNotification,
    conn: &mut SqliteConnection,
) -> Result<Notification, MarketplaceError> {
    let payload = notification.payload.to_string();
    let notification = sqlx::query_as(
        "INSERT INTO notifications (user_id, kind, payload, status) VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(notification.user_id)
    .bind(notification.kind)
    .bind(payload)
    .bind(NotificationStatus::Pending)
    .fetch_one(conn)
    .await?;
    Ok(notification)
}

/// Claims up to `limit` due notifications by pushing their `next_attempt_at` out by `lease`. A concurrent
/// claimer sees the leased rows as not-yet-due, so a batch is delivered by exactly one dispatcher within the
/// lease window.
pub async fn claim_due(
    limit: usize,
    lease: Duration,
    conn: &mut SqliteConnection,
) -> Result<Vec<Notification>, sqlx::Error> {
    let leased_until = Utc::now() + lease;
    let claimed: Vec<Notification> = sqlx::query_as(
        r#"
            UPDATE notifications
            SET next_attempt_at = $1, updated_at = CURRENT_TIMESTAMP
            WHERE id IN (
                SELECT id FROM notifications
                WHERE status = $2 AND datetime(next_attempt_at) <= datetime('now')
                ORDER BY next_attempt_at ASC
                LIMIT $3
            )
            RETURNING *;
        "#,
    )
    .bind(leased_until)
    .bind(NotificationStatus::Pending)
    .bind(limit as i64)
    .fetch_all(conn)
    .await?;
    if !claimed.is_empty() {
        trace!("🗃️ {} notifications claimed until {leased_until}", claimed.len());
    }
    Ok(claimed)
}

pub async fn mark_sent(id: i64, conn: &mut SqliteConnection) -> Result<(), MarketplaceError> {
    let res = sqlx::query("UPDATE notifications SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2")
        .bind(NotificationStatus::Sent)
        .bind(id)
        .execute(conn)
        .await?;
    if res.rows_affected() == 0 {
        return Err(MarketplaceError::NotificationNotFound(id));
    }
    Ok(())
}

/// Bumps the retry counter. With a `retry_at` the row stays `Pending` and becomes due again at that time;
/// without one the row is dead-lettered as `Failed`.
pub async fn record_failure(
    id: i64,
    retry_at: Option<DateTime<Utc>>,
    conn: &mut SqliteConnection,
) -> Result<(), MarketplaceError> {
    let res = match retry_at {
        Some(retry_at) => {
            sqlx::query(
                r#"
                    UPDATE notifications
                    SET retry_count = retry_count + 1, next_attempt_at = $1, updated_at = CURRENT_TIMESTAMP
                    WHERE id = $2;
                "#,
            )
            .bind(retry_at)
            .bind(id)
            .execute(conn)
            .await?
        },
        None => {
            sqlx::query(
                r#"
                    UPDATE notifications
                    SET status = $1, retry_count = retry_count + 1, updated_at = CURRENT_TIMESTAMP
                    WHERE id = $2;
                "#,
            )
            .bind(NotificationStatus::Failed)
            .bind(id)
            .execute(conn)
            .await?
        },
    };
    if res.rows_affected() == 0 {
        return Err(MarketplaceError::NotificationNotFound(id));
    }
    Ok(())
}

pub async fn fetch(id: i64, conn: &mut SqliteConnection) -> Result<Option<Notification>, sqlx::Error> {
    let notification =
        sqlx::query_as("SELECT * FROM notifications WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(notification)
}
