use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    db_types::{ContractAddress, Cursor, Escrow, Job, JobStatus, LedgerId, Notification, User},
    sync::{DomainEvent, Effect, EventKey},
};

/// This trait defines the highest level of behaviour for backends supporting the gig market engine.
///
/// This behaviour includes:
/// * Applying decoded domain events to the off-chain state, atomically and exactly once in effect.
/// * Managing sync cursors for the tracked contracts.
/// * Serving the read side (job lookups and searches) and the durable notification queue.
#[allow(async_fn_in_trait)]
pub trait MarketplaceDatabase: Clone {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Applies one domain event in a single atomic transaction.
    ///
    /// The idempotency journal is checked first: if `key` has been applied before, nothing is mutated and the
    /// previously recorded effects are returned with `applied == false`. Otherwise the event's precondition is
    /// verified, the state mutated, any notification effects stored as `Pending` rows, and the key journalled
    /// together with the serialized effects -- all in the same transaction, so a precondition violation leaves
    /// no partial rows behind.
    async fn apply_event(&self, key: &EventKey, event: &DomainEvent) -> Result<EventOutcome, MarketplaceError>;

    /// Fetches the job with the given ledger id, if one exists.
    async fn fetch_job_by_ledger_id(&self, ledger_id: LedgerId) -> Result<Option<Job>, MarketplaceError>;

    /// Fetches the job with the given internal id, if one exists.
    async fn fetch_job(&self, id: i64) -> Result<Option<Job>, MarketplaceError>;

    /// Fetches jobs filtered by status and/or category, ordered by creation time.
    async fn search_jobs(
        &self,
        status: Option<JobStatus>,
        category: Option<&str>,
    ) -> Result<Vec<Job>, MarketplaceError>;

    /// Fetches the highest-paying open jobs.
    async fn fetch_top_jobs(&self, limit: usize) -> Result<Vec<Job>, MarketplaceError>;

    /// Fetches the escrow with the given ledger id, if one exists.
    async fn fetch_escrow_by_ledger_id(&self, ledger_id: LedgerId) -> Result<Option<Escrow>, MarketplaceError>;

    /// Fetches a user by internal id.
    async fn fetch_user(&self, id: i64) -> Result<Option<User>, MarketplaceError>;

    /// Fetches the cursor for the given contract, or `None` if the contract has never been synced.
    async fn fetch_cursor(&self, contract: &ContractAddress) -> Result<Option<Cursor>, MarketplaceError>;

    /// Advances the cursor for the given contract. Must only be called after every entity write the batch
    /// enabled has committed.
    async fn advance_cursor(&self, contract: &ContractAddress, position: u64) -> Result<(), MarketplaceError>;

    /// Claims up to `limit` notifications that are due for delivery. Claimed rows have their `next_attempt_at`
    /// pushed out by `lease` so that concurrent dispatcher workers do not double-deliver within a lease window.
    async fn claim_due_notifications(
        &self,
        limit: usize,
        lease: chrono::Duration,
    ) -> Result<Vec<Notification>, MarketplaceError>;

    /// Marks a notification as delivered.
    async fn mark_notification_sent(&self, id: i64) -> Result<(), MarketplaceError>;

    /// Records a failed delivery attempt. When the retry budget is not yet exhausted the notification stays
    /// `Pending` with `next_attempt_at` set to `retry_at`; otherwise it is dead-lettered as `Failed`.
    async fn record_delivery_failure(
        &self,
        id: i64,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), MarketplaceError>;

    /// Fetches a notification by id. Mostly useful for tests and operator tooling.
    async fn fetch_notification(&self, id: i64) -> Result<Option<Notification>, MarketplaceError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), MarketplaceError> {
        Ok(())
    }
}

/// The result of [`MarketplaceDatabase::apply_event`].
#[derive(Debug, Clone)]
pub struct EventOutcome {
    /// `true` if this call mutated state; `false` for a replay that was absorbed by the idempotency journal.
    pub applied: bool,
    /// The effects produced by the application. For replays these are the previously recorded effects and are
    /// returned for diagnostics only -- they must not be re-executed.
    pub effects: Vec<Effect>,
}

impl EventOutcome {
    pub fn applied(effects: Vec<Effect>) -> Self {
        Self { applied: true, effects }
    }

    pub fn replayed(effects: Vec<Effect>) -> Self {
        Self { applied: false, effects }
    }
}

/// A domain event arrived whose precondition does not hold against current state. This is either out-of-order
/// delivery or schema drift between the contracts and the decoder; both need an operator, not a retry.
#[derive(Debug, Clone, Error)]
#[error("Illegal transition for {entity} {ledger_id}: {detail}")]
pub struct TransitionViolation {
    pub entity: &'static str,
    pub ledger_id: LedgerId,
    pub detail: String,
}

impl TransitionViolation {
    pub fn new(entity: &'static str, ledger_id: LedgerId, detail: impl Into<String>) -> Self {
        Self { entity, ledger_id, detail: detail.into() }
    }
}

#[derive(Debug, Clone, Error)]
pub enum MarketplaceError {
    #[error("We have an internal database engine (configuration/uptime etc.) : {0}")]
    DatabaseError(String),
    /// Precondition violated. Never retried automatically; surfaced for manual reconciliation.
    #[error("{0}")]
    InvalidTransition(#[from] TransitionViolation),
    #[error("The requested job (internal id {0}) does not exist")]
    JobIdNotFound(i64),
    #[error("The requested user {0} does not exist")]
    UserNotFound(i64),
    #[error("The requested notification {0} does not exist")]
    NotificationNotFound(i64),
    #[error("Could not serialize effects for the event journal: {0}")]
    EffectSerialization(String),
}

impl From<sqlx::Error> for MarketplaceError {
    fn from(e: sqlx::Error) -> Self {
        MarketplaceError::DatabaseError(e.to_string())
    }
}

impl MarketplaceError {
    /// Errors that mean "this event can never apply" as opposed to "the database hiccuped". The scheduler skips
    /// over the former (logging loudly) and aborts the contract's cycle on the latter so the batch is retried.
    pub fn is_rejection(&self) -> bool {
        matches!(self, MarketplaceError::InvalidTransition(_))
    }
}
