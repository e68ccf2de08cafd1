use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{User, UserRole, WalletAddress},
    traits::MarketplaceError,
};

pub async fn fetch(id: i64, conn: &mut SqliteConnection) -> Result<Option<User>, sqlx::Error> {
    let user = sqlx::query_as("SELECT * FROM users WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(user)
}

pub async fn fetch_by_wallet(
    wallet: &WalletAddress,
    conn: &mut SqliteConnection,
) -> Result<Option<User>, sqlx::Error> {
    let user =
        sqlx::query_as("SELECT * FROM users WHERE wallet_address = $1").bind(wallet).fetch_optional(conn).await?;
    Ok(user)
}

/// Fetches the user owning `wallet`, creating a fresh record with the given role if none exists. An existing
/// user's role is never touched; the first event that mentions a wallet decides the initial role.
pub async fn fetch_or_create_by_wallet(
    wallet: &WalletAddress,
    role: UserRole,
    conn: &mut SqliteConnection,
) -> Result<User, MarketplaceError> {
    if let Some(user) = fetch_by_wallet(wallet, &mut *conn).await? {
        return Ok(user);
    }
    let user: User = sqlx::query_as("INSERT INTO users (wallet_address, role) VALUES ($1, $2) RETURNING *")
        .bind(wallet)
        .bind(role)
        .fetch_one(conn)
        .await?;
    debug!("🗃️ New {role} user {} created for wallet {wallet}", user.id);
    Ok(user)
}

pub async fn update_reputation(
    id: i64,
    score: f64,
    rating_count: i64,
    conn: &mut SqliteConnection,
) -> Result<User, MarketplaceError> {
    let user = sqlx::query_as(
        r#"
            UPDATE users SET reputation_score = $1, rating_count = $2, updated_at = CURRENT_TIMESTAMP
            WHERE id = $3
            RETURNING *;
        "#,
    )
    .bind(score)
    .bind(rating_count)
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or(MarketplaceError::UserNotFound(id))?;
    Ok(user)
}

pub async fn incr_jobs_posted(id: i64, conn: &mut SqliteConnection) -> Result<(), MarketplaceError> {
    let res = sqlx::query("UPDATE users SET jobs_posted = jobs_posted + 1, updated_at = CURRENT_TIMESTAMP WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await?;
    if res.rows_affected() == 0 {
        return Err(MarketplaceError::UserNotFound(id));
    }
    Ok(())
}

pub async fn incr_jobs_completed(id: i64, conn: &mut SqliteConnection) -> Result<(), MarketplaceError> {
    let res =
        sqlx::query("UPDATE users SET jobs_completed = jobs_completed + 1, updated_at = CURRENT_TIMESTAMP WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await?;
    if res.rows_affected() == 0 {
        return Err(MarketplaceError::UserNotFound(id));
    }
    Ok(())
}
