use log::trace;
use sqlx::SqliteConnection;

use crate::db_types::{ContractAddress, Cursor};

pub async fn fetch(contract: &ContractAddress, conn: &mut SqliteConnection) -> Result<Option<Cursor>, sqlx::Error> {
    let cursor =
        sqlx::query_as("SELECT * FROM cursors WHERE contract = $1").bind(contract).fetch_optional(conn).await?;
    Ok(cursor)
}

/// Upserts the cursor for `contract`. Callers must only invoke this once the entity writes the new position
/// covers have committed.
pub async fn advance(
    contract: &ContractAddress,
    position: i64,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
            INSERT INTO cursors (contract, last_position) VALUES ($1, $2)
            ON CONFLICT (contract)
            DO UPDATE SET last_position = excluded.last_position, updated_at = CURRENT_TIMESTAMP;
        "#,
    )
    .bind(contract)
    .bind(position)
    .execute(conn)
    .await?;
    trace!("🗃️ Cursor for {contract} advanced to {position}");
    Ok(())
}
