//! `SqliteDatabase` is a concrete implementation of a gig market engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements the [`MarketplaceDatabase`] trait. The heart
//! of it is [`MarketplaceDatabase::apply_event`], which runs the precondition check, the entity mutations, the
//! notification inserts and the idempotency journal entry in one transaction per domain event.
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use gmb_common::NanoCoin;
use log::*;
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};

use super::db::{applied_events, cursors, db_url, escrows, jobs, new_pool, notifications, ratings, users};
use crate::{
    db_types::{
        ContractAddress,
        Cursor,
        Escrow,
        EscrowStatus,
        Job,
        JobStatus,
        LedgerId,
        NewEscrow,
        NewJob,
        NewNotification,
        NewRating,
        Notification,
        NotificationKind,
        User,
        UserRole,
        WalletAddress,
    },
    sync::{escrow_state, reputation, CacheKey, DomainEvent, Effect, EventKey},
    traits::{EventOutcome, MarketplaceDatabase, MarketplaceError, TransitionViolation},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API attached to the URL in `GMB_DATABASE_URL` (or the default file store).
    pub async fn new(max_connections: u32) -> Result<Self, MarketplaceError> {
        let url = db_url();
        Self::new_with_url(&url, max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, MarketplaceError> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl MarketplaceDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn apply_event(&self, key: &EventKey, event: &DomainEvent) -> Result<EventOutcome, MarketplaceError> {
        let mut tx = self.pool.begin().await?;
        if let Some(effects) = applied_events::fetch_applied(key, &mut tx).await? {
            debug!("🗃️ Event {key} has been applied before. Absorbing the replay.");
            return Ok(EventOutcome::replayed(effects));
        }
        let effects = match event {
            DomainEvent::JobCreated { ledger_id, employer, wages, duration_hours, category } => {
                apply_job_created(*ledger_id, employer, *wages, *duration_hours, category, &mut tx).await?
            },
            DomainEvent::JobStatusChanged { ledger_id, new_status } => {
                apply_job_status_changed(*ledger_id, *new_status, &mut tx).await?
            },
            DomainEvent::WorkerAssigned { ledger_id, worker } => {
                apply_worker_assigned(*ledger_id, worker, &mut tx).await?
            },
            DomainEvent::EscrowCreated { ledger_id, job_ledger_id, amount } => {
                apply_escrow_created(*ledger_id, *job_ledger_id, *amount, &mut tx).await?
            },
            DomainEvent::EscrowFunded { ledger_id } => apply_escrow_funded(*ledger_id, &mut tx).await?,
            DomainEvent::EscrowLocked { ledger_id } => apply_escrow_locked(*ledger_id, &mut tx).await?,
            DomainEvent::EscrowCompleted { ledger_id, employer_confirmed, worker_confirmed } => {
                apply_escrow_completed(*ledger_id, *employer_confirmed, *worker_confirmed, &mut tx).await?
            },
            DomainEvent::EscrowDisputed { ledger_id, reason } => {
                apply_escrow_disputed(*ledger_id, reason, &mut tx).await?
            },
            DomainEvent::RatingSubmitted { job_ledger_id, rater, ratee, score, comment } => {
                apply_rating_submitted(*job_ledger_id, rater, ratee, *score, comment.as_deref(), &mut tx).await?
            },
        };
        // Queue entries ride in the same transaction as the state change that caused them.
        for effect in &effects {
            if let Effect::Notify { user_id, kind, payload } = effect {
                let new = NewNotification { user_id: *user_id, kind: *kind, payload: payload.clone() };
                notifications::insert(new, &mut tx).await?;
            }
        }
        applied_events::record_applied(key, event.name(), &effects, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Event {key} ({}) applied with {} effects", event.name(), effects.len());
        Ok(EventOutcome::applied(effects))
    }

    async fn fetch_job_by_ledger_id(&self, ledger_id: LedgerId) -> Result<Option<Job>, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        let job = jobs::fetch_by_ledger_id(ledger_id, &mut conn).await?;
        Ok(job)
    }

    async fn fetch_job(&self, id: i64) -> Result<Option<Job>, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        let job = jobs::fetch(id, &mut conn).await?;
        Ok(job)
    }

    async fn search_jobs(
        &self,
        status: Option<JobStatus>,
        category: Option<&str>,
    ) -> Result<Vec<Job>, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        let jobs = jobs::search(status, category, &mut conn).await?;
        Ok(jobs)
    }

    async fn fetch_top_jobs(&self, limit: usize) -> Result<Vec<Job>, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        let jobs = jobs::top_jobs(limit, &mut conn).await?;
        Ok(jobs)
    }

    async fn fetch_escrow_by_ledger_id(&self, ledger_id: LedgerId) -> Result<Option<Escrow>, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        let escrow = escrows::fetch_by_ledger_id(ledger_id, &mut conn).await?;
        Ok(escrow)
    }

    async fn fetch_user(&self, id: i64) -> Result<Option<User>, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        let user = users::fetch(id, &mut conn).await?;
        Ok(user)
    }

    async fn fetch_cursor(&self, contract: &ContractAddress) -> Result<Option<Cursor>, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        let cursor = cursors::fetch(contract, &mut conn).await?;
        Ok(cursor)
    }

    async fn advance_cursor(&self, contract: &ContractAddress, position: u64) -> Result<(), MarketplaceError> {
        let position = i64::try_from(position)
            .map_err(|_| MarketplaceError::DatabaseError(format!("cursor position {position} overflows i64")))?;
        let mut conn = self.pool.acquire().await?;
        cursors::advance(contract, position, &mut conn).await?;
        Ok(())
    }

    async fn claim_due_notifications(
        &self,
        limit: usize,
        lease: chrono::Duration,
    ) -> Result<Vec<Notification>, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        let claimed = notifications::claim_due(limit, lease, &mut conn).await?;
        Ok(claimed)
    }

    async fn mark_notification_sent(&self, id: i64) -> Result<(), MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        notifications::mark_sent(id, &mut conn).await
    }

    async fn record_delivery_failure(
        &self,
        id: i64,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        notifications::record_failure(id, retry_at, &mut conn).await
    }

    async fn fetch_notification(&self, id: i64) -> Result<Option<Notification>, MarketplaceError> {
        let mut conn = self.pool.acquire().await?;
        let notification = notifications::fetch(id, &mut conn).await?;
        Ok(notification)
    }

    async fn close(&mut self) -> Result<(), MarketplaceError> {
        self.pool.close().await;
        Ok(())
    }
}

//-------------------------------------- Event application    --------------------------------------------------------
// One helper per domain event. Each runs against the transaction connection, returns the effect list on
// success and a `TransitionViolation` when the precondition does not hold (rolling everything back).

async fn apply_job_created(
    ledger_id: LedgerId,
    employer: &WalletAddress,
    wages: NanoCoin,
    duration_hours: i64,
    category: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<Effect>, MarketplaceError> {
    if jobs::fetch_by_ledger_id(ledger_id, &mut *conn).await?.is_some() {
        return Err(TransitionViolation::new("job", ledger_id, "a job with this ledger id already exists").into());
    }
    let employer = users::fetch_or_create_by_wallet(employer, UserRole::Employer, &mut *conn).await?;
    let new_job =
        NewJob { ledger_id, employer_id: employer.id, wages, duration_hours, category: category.to_string() };
    let job = jobs::insert(new_job, &mut *conn).await?;
    users::incr_jobs_posted(employer.id, &mut *conn).await?;
    info!("🗃️ Job {ledger_id} posted by user {} for {wages} in '{category}'", employer.id);
    Ok(vec![
        Effect::invalidate(CacheKey::JobListByStatus(JobStatus::Posted)),
        Effect::invalidate(CacheKey::JobListByCategory(category.to_string())),
        Effect::invalidate(CacheKey::TopJobs),
        Effect::BroadcastJob(job),
    ])
}

async fn apply_job_status_changed(
    ledger_id: LedgerId,
    new_status: JobStatus,
    conn: &mut SqliteConnection,
) -> Result<Vec<Effect>, MarketplaceError> {
    let job = jobs::fetch_by_ledger_id(ledger_id, &mut *conn)
        .await?
        .ok_or_else(|| TransitionViolation::new("job", ledger_id, "no job with this ledger id"))?;
    let old_status = job.status;
    if !old_status.can_transition(new_status) {
        return Err(
            TransitionViolation::new("job", ledger_id, format!("cannot move from {old_status} to {new_status}"))
                .into(),
        );
    }
    let updated = jobs::update_status(job.id, new_status, &mut *conn).await?;
    let payload = json!({
        "job_id": job.id,
        "ledger_id": ledger_id.value(),
        "old_status": old_status.to_string(),
        "new_status": new_status.to_string(),
    });
    let mut effects = vec![
        Effect::invalidate(CacheKey::Job(job.id)),
        Effect::invalidate(CacheKey::JobListByStatus(old_status)),
        Effect::invalidate(CacheKey::JobListByStatus(new_status)),
        Effect::invalidate(CacheKey::JobListByCategory(job.category.clone())),
    ];
    if old_status == JobStatus::Posted {
        effects.push(Effect::invalidate(CacheKey::TopJobs));
    }
    effects.push(Effect::notify(job.employer_id, NotificationKind::JobStatusChanged, payload.clone()));
    if let Some(worker_id) = job.worker_id {
        effects.push(Effect::notify(worker_id, NotificationKind::JobStatusChanged, payload));
    }
    effects.push(Effect::BroadcastJob(updated));
    Ok(effects)
}

async fn apply_worker_assigned(
    ledger_id: LedgerId,
    worker: &WalletAddress,
    conn: &mut SqliteConnection,
) -> Result<Vec<Effect>, MarketplaceError> {
    let job = jobs::fetch_by_ledger_id(ledger_id, &mut *conn)
        .await?
        .ok_or_else(|| TransitionViolation::new("job", ledger_id, "no job with this ledger id"))?;
    if job.status != JobStatus::Posted {
        return Err(TransitionViolation::new(
            "job",
            ledger_id,
            format!("a worker can only be assigned to a Posted job, not a {} one", job.status),
        )
        .into());
    }
    let worker = users::fetch_or_create_by_wallet(worker, UserRole::Worker, &mut *conn).await?;
    let updated = jobs::assign_worker(job.id, worker.id, &mut *conn).await?;
    info!("🗃️ Worker {} assigned to job {ledger_id}", worker.id);
    let payload = json!({ "job_id": job.id, "ledger_id": ledger_id.value(), "worker_id": worker.id });
    Ok(vec![
        Effect::invalidate(CacheKey::Job(job.id)),
        Effect::invalidate(CacheKey::JobListByStatus(JobStatus::Posted)),
        Effect::invalidate(CacheKey::JobListByStatus(JobStatus::Assigned)),
        Effect::invalidate(CacheKey::JobListByCategory(job.category.clone())),
        Effect::invalidate(CacheKey::TopJobs),
        Effect::notify(job.employer_id, NotificationKind::WorkerAssigned, payload.clone()),
        Effect::notify(worker.id, NotificationKind::WorkerAssigned, payload),
        Effect::BroadcastJob(updated),
    ])
}

async fn apply_escrow_created(
    ledger_id: LedgerId,
    job_ledger_id: LedgerId,
    amount: NanoCoin,
    conn: &mut SqliteConnection,
) -> Result<Vec<Effect>, MarketplaceError> {
    let job = jobs::fetch_by_ledger_id(job_ledger_id, &mut *conn)
        .await?
        .ok_or_else(|| TransitionViolation::new("escrow", ledger_id, format!("job {job_ledger_id} does not exist")))?;
    if escrows::fetch_by_ledger_id(ledger_id, &mut *conn).await?.is_some() {
        return Err(
            TransitionViolation::new("escrow", ledger_id, "an escrow with this ledger id already exists").into()
        );
    }
    if let Some(live) = escrows::live_escrow_for_job(job.id, &mut *conn).await? {
        return Err(TransitionViolation::new(
            "escrow",
            ledger_id,
            format!("job {job_ledger_id} already has a live escrow ({})", live.ledger_id),
        )
        .into());
    }
    let new = NewEscrow { ledger_id, job_id: job.id, employer_id: job.employer_id, worker_id: job.worker_id, amount };
    let escrow = escrows::insert(new, &mut *conn).await?;
    info!("🗃️ Escrow {ledger_id} created for job {job_ledger_id} holding {amount}");
    Ok(vec![Effect::BroadcastEscrow(escrow)])
}

/// Loads the escrow and validates the state-machine transition, shared by all escrow lifecycle events.
async fn escrow_in_transition(
    ledger_id: LedgerId,
    to: EscrowStatus,
    conn: &mut SqliteConnection,
) -> Result<Escrow, MarketplaceError> {
    let escrow = escrows::fetch_by_ledger_id(ledger_id, &mut *conn)
        .await?
        .ok_or_else(|| TransitionViolation::new("escrow", ledger_id, "no escrow with this ledger id"))?;
    if !escrow_state::can_transition(escrow.status, to) {
        return Err(
            TransitionViolation::new("escrow", ledger_id, format!("cannot move from {} to {to}", escrow.status))
                .into(),
        );
    }
    Ok(escrow)
}

async fn apply_escrow_funded(
    ledger_id: LedgerId,
    conn: &mut SqliteConnection,
) -> Result<Vec<Effect>, MarketplaceError> {
    let escrow = escrow_in_transition(ledger_id, EscrowStatus::Funded, &mut *conn).await?;
    let updated = escrows::update_status(escrow.id, EscrowStatus::Funded, &mut *conn).await?;
    let payload = json!({ "escrow_id": ledger_id.value(), "job_id": escrow.job_id, "amount": escrow.amount.value() });
    let mut effects = vec![Effect::notify(escrow.employer_id, NotificationKind::EscrowFunded, payload.clone())];
    if let Some(worker_id) = escrow.worker_id {
        effects.push(Effect::notify(worker_id, NotificationKind::EscrowFunded, payload));
    }
    effects.push(Effect::BroadcastEscrow(updated));
    Ok(effects)
}

async fn apply_escrow_locked(
    ledger_id: LedgerId,
    conn: &mut SqliteConnection,
) -> Result<Vec<Effect>, MarketplaceError> {
    let escrow = escrow_in_transition(ledger_id, EscrowStatus::Locked, &mut *conn).await?;
    let updated = escrows::update_status(escrow.id, EscrowStatus::Locked, &mut *conn).await?;
    Ok(vec![Effect::BroadcastEscrow(updated)])
}

async fn apply_escrow_completed(
    ledger_id: LedgerId,
    employer_confirmed: bool,
    worker_confirmed: bool,
    conn: &mut SqliteConnection,
) -> Result<Vec<Effect>, MarketplaceError> {
    let escrow = escrow_in_transition(ledger_id, EscrowStatus::Completed, &mut *conn).await?;
    if !(employer_confirmed && worker_confirmed) {
        return Err(TransitionViolation::new(
            "escrow",
            ledger_id,
            "completion requires confirmation from both parties",
        )
        .into());
    }
    let job = jobs::fetch(escrow.job_id, &mut *conn).await?.ok_or(MarketplaceError::JobIdNotFound(escrow.job_id))?;
    let worker_id = job
        .worker_id
        .or(escrow.worker_id)
        .ok_or_else(|| TransitionViolation::new("escrow", ledger_id, "cannot complete without an assigned worker"))?;
    let updated_escrow = escrows::complete(escrow.id, employer_confirmed, worker_confirmed, &mut *conn).await?;
    let old_status = job.status;
    // The escrow contract is authoritative for completion. The job follows even if it lagged behind.
    let updated_job = jobs::update_status(job.id, JobStatus::Completed, &mut *conn).await?;
    users::incr_jobs_completed(job.employer_id, &mut *conn).await?;
    users::incr_jobs_completed(worker_id, &mut *conn).await?;
    info!("🗃️ Escrow {ledger_id} completed. {} released for job {}", escrow.amount, job.id);
    let payload = json!({ "escrow_id": ledger_id.value(), "job_id": job.id, "amount": escrow.amount.value() });
    let mut effects = vec![
        Effect::invalidate(CacheKey::Job(job.id)),
        Effect::invalidate(CacheKey::JobListByStatus(old_status)),
        Effect::invalidate(CacheKey::JobListByStatus(JobStatus::Completed)),
        Effect::invalidate(CacheKey::JobListByCategory(job.category.clone())),
    ];
    if old_status == JobStatus::Posted {
        effects.push(Effect::invalidate(CacheKey::TopJobs));
    }
    effects.push(Effect::notify(job.employer_id, NotificationKind::PaymentReleased, payload.clone()));
    effects.push(Effect::notify(worker_id, NotificationKind::PaymentReleased, payload));
    effects.push(Effect::BroadcastJob(updated_job));
    effects.push(Effect::BroadcastEscrow(updated_escrow));
    Ok(effects)
}

async fn apply_escrow_disputed(
    ledger_id: LedgerId,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<Effect>, MarketplaceError> {
    let escrow = escrow_in_transition(ledger_id, EscrowStatus::Disputed, &mut *conn).await?;
    let updated = escrows::set_dispute(escrow.id, reason, &mut *conn).await?;
    warn!("🗃️ Escrow {ledger_id} disputed: {reason}");
    let payload = json!({ "escrow_id": ledger_id.value(), "job_id": escrow.job_id, "reason": reason });
    let mut effects = vec![Effect::notify(escrow.employer_id, NotificationKind::EscrowDisputed, payload.clone())];
    if let Some(worker_id) = escrow.worker_id {
        effects.push(Effect::notify(worker_id, NotificationKind::EscrowDisputed, payload));
    }
    effects.push(Effect::BroadcastEscrow(updated));
    Ok(effects)
}

async fn apply_rating_submitted(
    job_ledger_id: LedgerId,
    rater: &WalletAddress,
    ratee: &WalletAddress,
    score: i64,
    comment: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Vec<Effect>, MarketplaceError> {
    let job = jobs::fetch_by_ledger_id(job_ledger_id, &mut *conn)
        .await?
        .ok_or_else(|| TransitionViolation::new("rating", job_ledger_id, "no job with this ledger id"))?;
    if job.status != JobStatus::Completed {
        return Err(TransitionViolation::new(
            "rating",
            job_ledger_id,
            format!("ratings are only accepted on Completed jobs, not {} ones", job.status),
        )
        .into());
    }
    // Both parties usually exist by now; unknown wallets get a fresh Worker record, and an existing user's
    // role is never overwritten.
    let rater = users::fetch_or_create_by_wallet(rater, UserRole::Worker, &mut *conn).await?;
    let ratee = users::fetch_or_create_by_wallet(ratee, UserRole::Worker, &mut *conn).await?;
    if ratings::exists(job.id, rater.id, &mut *conn).await? {
        return Err(TransitionViolation::new(
            "rating",
            job_ledger_id,
            format!("user {} has already rated this job", rater.id),
        )
        .into());
    }
    let new = NewRating {
        job_id: job.id,
        rater_id: rater.id,
        ratee_id: ratee.id,
        score,
        comment: comment.map(String::from),
    };
    ratings::insert(new, &mut *conn).await?;
    let (new_score, new_count) = reputation::apply_rating(ratee.reputation_score, ratee.rating_count, score);
    users::update_reputation(ratee.id, new_score, new_count, &mut *conn).await?;
    debug!("🗃️ User {} rated {score}/5 on job {job_ledger_id}. New score {new_score:.2} ({new_count})", ratee.id);
    Ok(vec![Effect::invalidate(CacheKey::UserReputation(ratee.id))])
}
