use sqlx::SqliteConnection;

use crate::{
    db_types::{Escrow, EscrowStatus, LedgerId, NewEscrow},
    traits::{MarketplaceError, TransitionViolation},
};

pub async fn insert(escrow: NewEscrow, conn: &mut SqliteConnection) -> Result<Escrow, MarketplaceError> {
    let escrow = sqlx::query_as(
        r#"
            INSERT INTO escrows (ledger_id, job_id, employer_id, worker_id, amount, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(escrow.ledger_id)
    .bind(escrow.job_id)
    .bind(escrow.employer_id)
    .bind(escrow.worker_id)
    .bind(escrow.amount)
    .bind(EscrowStatus::Created)
    .fetch_one(conn)
    .await?;
    Ok(escrow)
}

pub async fn fetch_by_ledger_id(
    ledger_id: LedgerId,
    conn: &mut SqliteConnection,
) -> Result<Option<Escrow>, sqlx::Error> {
    let escrow =
        sqlx::query_as("SELECT * FROM escrows WHERE ledger_id = $1").bind(ledger_id).fetch_optional(conn).await?;
    Ok(escrow)
}

/// Returns the job's escrow that is still in play, if any. `Completed`, `Resolved` and `Refunded` escrows do
/// not count: a job may get a fresh escrow after a refund.
pub async fn live_escrow_for_job(job_id: i64, conn: &mut SqliteConnection) -> Result<Option<Escrow>, sqlx::Error> {
    let escrow = sqlx::query_as(
        "SELECT * FROM escrows WHERE job_id = $1 AND status NOT IN ($2, $3, $4) ORDER BY created_at DESC LIMIT 1",
    )
    .bind(job_id)
    .bind(EscrowStatus::Completed)
    .bind(EscrowStatus::Resolved)
    .bind(EscrowStatus::Refunded)
    .fetch_optional(conn)
    .await?;
    Ok(escrow)
}

/// Moves the escrow to `status`, stamping the matching transition timestamp. The caller is responsible for
/// state-machine validation; this function only writes.
pub async fn update_status(
    id: i64,
    status: EscrowStatus,
    conn: &mut SqliteConnection,
) -> Result<Escrow, MarketplaceError> {
    let timestamp_column = match status {
        EscrowStatus::Funded => ", funded_at = CURRENT_TIMESTAMP",
        EscrowStatus::Locked => ", locked_at = CURRENT_TIMESTAMP",
        EscrowStatus::Completed => ", completed_at = CURRENT_TIMESTAMP",
        _ => "",
    };
    let query = format!(
        "UPDATE escrows SET status = $1, updated_at = CURRENT_TIMESTAMP{timestamp_column} WHERE id = $2 RETURNING *"
    );
    let escrow = sqlx::query_as(&query)
        .bind(status)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| TransitionViolation::new("escrow", LedgerId(id), "escrow row vanished mid-transaction"))?;
    Ok(escrow)
}

/// Records the parties' confirmation flags together with completion.
pub async fn complete(
    id: i64,
    employer_confirmed: bool,
    worker_confirmed: bool,
    conn: &mut SqliteConnection,
) -> Result<Escrow, MarketplaceError> {
    let escrow = sqlx::query_as(
        r#"
            UPDATE escrows
            SET status = $1,
                employer_confirmed = $2,
                worker_confirmed = $3,
                completed_at = CURRENT_TIMESTAMP,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $4
            RETURNING *;
        "#,
    )
    .bind(EscrowStatus::Completed)
    .bind(employer_confirmed)
    .bind(worker_confirmed)
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| TransitionViolation::new("escrow", LedgerId(id), "escrow row vanished mid-transaction"))?;
    Ok(escrow)
}

pub async fn set_dispute(id: i64, reason: &str, conn: &mut SqliteConnection) -> Result<Escrow, MarketplaceError> {
    let escrow = sqlx::query_as(
        r#"
            UPDATE escrows
            SET status = $1, is_disputed = 1, dispute_reason = $2, updated_at = CURRENT_TIMESTAMP
            WHERE id = $3
            RETURNING *;
        "#,
    )
    .bind(EscrowStatus::Disputed)
    .bind(reason)
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| TransitionViolation::new("escrow", LedgerId(id), "escrow row vanished mid-transaction"))?;
    Ok(escrow)
}
