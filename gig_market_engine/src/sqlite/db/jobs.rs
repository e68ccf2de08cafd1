use log::trace;
use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{Job, JobStatus, LedgerId, NewJob},
    traits::MarketplaceError,
};

/// Inserts a ledger-confirmed job. Callers must have checked that the ledger id is unused; the UNIQUE
/// constraint is the backstop.
pub async fn insert(job: NewJob, conn: &mut SqliteConnection) -> Result<Job, MarketplaceError> {
    let job = sqlx::query_as(
        r#"
            INSERT INTO jobs (ledger_id, employer_id, wages, duration_hours, category, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(job.ledger_id)
    .bind(job.employer_id)
    .bind(job.wages)
    .bind(job.duration_hours)
    .bind(job.category)
    .bind(JobStatus::Posted)
    .fetch_one(conn)
    .await?;
    Ok(job)
}

pub async fn fetch_by_ledger_id(ledger_id: LedgerId, conn: &mut SqliteConnection) -> Result<Option<Job>, sqlx::Error> {
    let job = sqlx::query_as("SELECT * FROM jobs WHERE ledger_id = $1").bind(ledger_id).fetch_optional(conn).await?;
    Ok(job)
}

pub async fn fetch(id: i64, conn: &mut SqliteConnection) -> Result<Option<Job>, sqlx::Error> {
    let job = sqlx::query_as("SELECT * FROM jobs WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(job)
}

pub async fn update_status(id: i64, status: JobStatus, conn: &mut SqliteConnection) -> Result<Job, MarketplaceError> {
    let job = sqlx::query_as(
        "UPDATE jobs SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *",
    )
    .bind(status)
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or(MarketplaceError::JobIdNotFound(id))?;
    trace!("🗃️ Job #{id} status set to {status}");
    Ok(job)
}

pub async fn assign_worker(id: i64, worker_id: i64, conn: &mut SqliteConnection) -> Result<Job, MarketplaceError> {
    let job = sqlx::query_as(
        r#"
            UPDATE jobs SET worker_id = $1, status = $2, updated_at = CURRENT_TIMESTAMP
            WHERE id = $3
            RETURNING *;
        "#,
    )
    .bind(worker_id)
    .bind(JobStatus::Assigned)
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or(MarketplaceError::JobIdNotFound(id))?;
    Ok(job)
}

/// Fetches jobs filtered by status and/or category, ordered by `created_at` ascending.
pub async fn search(
    status: Option<JobStatus>,
    category: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Vec<Job>, sqlx::Error> {
    let mut builder = QueryBuilder::new("SELECT * FROM jobs ");
    if status.is_some() || category.is_some() {
        builder.push("WHERE ");
    }
    let mut where_clause = builder.separated(" AND ");
    if let Some(status) = status {
        where_clause.push("status = ");
        where_clause.push_bind_unseparated(status);
    }
    if let Some(category) = category {
        where_clause.push("category = ");
        where_clause.push_bind_unseparated(category.to_string());
    }
    builder.push(" ORDER BY created_at ASC");
    let jobs = builder.build_query_as().fetch_all(conn).await?;
    Ok(jobs)
}

/// The highest-paying open jobs.
pub async fn top_jobs(limit: usize, conn: &mut SqliteConnection) -> Result<Vec<Job>, sqlx::Error> {
    let jobs = sqlx::query_as("SELECT * FROM jobs WHERE status = $1 ORDER BY wages DESC, created_at ASC LIMIT $2")
        .bind(JobStatus::Posted)
        .bind(limit as i64)
        .fetch_all(conn)
        .await?;
    Ok(jobs)
}
