use sqlx::SqliteConnection;

use crate::{
    sync::{Effect, EventKey},
    traits::MarketplaceError,
};

/// Looks up the idempotency journal. `Some(effects)` means the key was applied before and the stored effect
/// list is returned for diagnostics; `None` means the event is new.
pub async fn fetch_applied(
    key: &EventKey,
    conn: &mut SqliteConnection,
) -> Result<Option<Vec<Effect>>, MarketplaceError> {
    let stored: Option<String> =
        sqlx::query_scalar("SELECT effects FROM applied_events WHERE contract = $1 AND tx_hash = $2")
            .bind(&key.contract)
            .bind(&key.tx_hash)
            .fetch_optional(conn)
            .await?;
    match stored {
        Some(json) => {
            let effects =
                serde_json::from_str(&json).map_err(|e| MarketplaceError::EffectSerialization(e.to_string()))?;
            Ok(Some(effects))
        },
        None => Ok(None),
    }
}

/// Journals the key with its serialized effects. Must run inside the same transaction as the entity mutations
/// so that a rollback erases both.
pub async fn record_applied(
    key: &EventKey,
    event_name: &str,
    effects: &[Effect],
    conn: &mut SqliteConnection,
) -> Result<(), MarketplaceError> {
    let json = serde_json::to_string(effects).map_err(|e| MarketplaceError::EffectSerialization(e.to_string()))?;
    sqlx::query("INSERT INTO applied_events (contract, tx_hash, event_name, effects) VALUES ($1, $2, $3, $4)")
        .bind(&key.contract)
        .bind(&key.tx_hash)
        .bind(event_name)
        .bind(json)
        .execute(conn)
        .await?;
    Ok(())
}
