use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use gmb_common::NanoCoin;
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid conversion: {0}")]
pub struct ConversionError(pub String);

//--------------------------------------      LedgerId       ---------------------------------------------------------
/// The identity an entity carries on the external ledger. Assigned by the contracts, never by this backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct LedgerId(pub i64);

impl Display for LedgerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<i64> for LedgerId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl LedgerId {
    pub fn value(&self) -> i64 {
        self.0
    }
}

//--------------------------------------   ContractAddress    --------------------------------------------------------
/// A lightweight wrapper around a string representing a tracked contract's address on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct ContractAddress(pub String);

impl Display for ContractAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<S: Into<String>> From<S> for ContractAddress {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

impl ContractAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------    WalletAddress     --------------------------------------------------------
/// A user's wallet address on the ledger, hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct WalletAddress(pub String);

impl Display for WalletAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<S: Into<String>> From<S> for WalletAddress {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

impl WalletAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------      JobStatus       --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
pub enum JobStatus {
    /// The job has been submitted via the API but not yet confirmed by a ledger event.
    Draft,
    /// The job is live on the ledger and open for workers.
    Posted,
    /// A worker has been assigned to the job.
    Assigned,
    /// The worker has started the job.
    InProgress,
    /// The worker has reported the job as done and confirmation is pending.
    PendingConfirmation,
    /// The job is done and paid out. Terminal.
    Completed,
    /// The job was cancelled. Terminal.
    Cancelled,
    /// The job is under dispute. Terminal on the job side; resolution happens on the escrow.
    Disputed,
}

impl JobStatus {
    /// The states this status may legally move to. Lifecycle:
    /// `Posted → Assigned → InProgress → PendingConfirmation → Completed`, with `Cancelled` and `Disputed`
    /// reachable from any non-terminal state. `Draft` only ever becomes `Posted` (ledger confirmation) or
    /// `Cancelled`.
    pub fn next_states(self) -> &'static [JobStatus] {
        use JobStatus::*;
        match self {
            Draft => &[Posted, Cancelled],
            Posted => &[Assigned, Cancelled, Disputed],
            Assigned => &[InProgress, Cancelled, Disputed],
            InProgress => &[PendingConfirmation, Cancelled, Disputed],
            PendingConfirmation => &[Completed, Cancelled, Disputed],
            Completed | Cancelled | Disputed => &[],
        }
    }

    pub fn can_transition(self, to: JobStatus) -> bool {
        self.next_states().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        self.next_states().is_empty()
    }

    /// Whether a worker reference is permitted for a job in this status.
    pub fn allows_worker(self) -> bool {
        use JobStatus::*;
        matches!(self, Assigned | InProgress | PendingConfirmation | Completed)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Draft => "Draft",
            JobStatus::Posted => "Posted",
            JobStatus::Assigned => "Assigned",
            JobStatus::InProgress => "InProgress",
            JobStatus::PendingConfirmation => "PendingConfirmation",
            JobStatus::Completed => "Completed",
            JobStatus::Cancelled => "Cancelled",
            JobStatus::Disputed => "Disputed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for JobStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Draft" => Ok(Self::Draft),
            "Posted" => Ok(Self::Posted),
            "Assigned" => Ok(Self::Assigned),
            "InProgress" => Ok(Self::InProgress),
            "PendingConfirmation" => Ok(Self::PendingConfirmation),
            "Completed" => Ok(Self::Completed),
            "Cancelled" => Ok(Self::Cancelled),
            "Disputed" => Ok(Self::Disputed),
            s => Err(ConversionError(format!("Invalid job status: {s}"))),
        }
    }
}

impl From<String> for JobStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid job status: {value}. But this conversion cannot fail. Defaulting to Draft");
            JobStatus::Draft
        })
    }
}

//--------------------------------------     EscrowStatus     --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
pub enum EscrowStatus {
    /// The escrow contract has been deployed for a job, but no funds have arrived.
    Created,
    /// The employer has funded the escrow.
    Funded,
    /// The funds are locked for the duration of the work.
    Locked,
    /// Work was confirmed by both parties and the funds were released. Terminal.
    Completed,
    /// One of the parties raised a dispute.
    Disputed,
    /// A dispute was resolved manually. Terminal.
    Resolved,
    /// The escrow was refunded to the employer on cancellation. Terminal.
    Refunded,
}

impl Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EscrowStatus::Created => "Created",
            EscrowStatus::Funded => "Funded",
            EscrowStatus::Locked => "Locked",
            EscrowStatus::Completed => "Completed",
            EscrowStatus::Disputed => "Disputed",
            EscrowStatus::Resolved => "Resolved",
            EscrowStatus::Refunded => "Refunded",
        };
        write!(f, "{s}")
    }
}

impl FromStr for EscrowStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Created" => Ok(Self::Created),
            "Funded" => Ok(Self::Funded),
            "Locked" => Ok(Self::Locked),
            "Completed" => Ok(Self::Completed),
            "Disputed" => Ok(Self::Disputed),
            "Resolved" => Ok(Self::Resolved),
            "Refunded" => Ok(Self::Refunded),
            s => Err(ConversionError(format!("Invalid escrow status: {s}"))),
        }
    }
}

impl From<String> for EscrowStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid escrow status: {value}. But this conversion cannot fail. Defaulting to Created");
            EscrowStatus::Created
        })
    }
}

//--------------------------------------        Job           --------------------------------------------------------
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    /// The id assigned by the job registry contract. `None` while the job is still a draft.
    pub ledger_id: Option<LedgerId>,
    pub employer_id: i64,
    pub worker_id: Option<i64>,
    pub wages: NanoCoin,
    pub duration_hours: i64,
    pub category: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------       NewJob         --------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewJob {
    /// The id the job registry contract assigned to the job
    pub ledger_id: LedgerId,
    /// Internal id of the employer's user record
    pub employer_id: i64,
    /// The offered wages, in the smallest on-chain unit
    pub wages: NanoCoin,
    /// Expected duration of the job, in hours
    pub duration_hours: i64,
    /// Free-form job category, used for list caching and search
    pub category: String,
}

//--------------------------------------       Escrow         --------------------------------------------------------
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Escrow {
    pub id: i64,
    pub ledger_id: LedgerId,
    pub job_id: i64,
    pub employer_id: i64,
    pub worker_id: Option<i64>,
    /// Immutable after creation
    pub amount: NanoCoin,
    pub status: EscrowStatus,
    pub employer_confirmed: bool,
    pub worker_confirmed: bool,
    pub is_disputed: bool,
    pub dispute_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub funded_at: Option<DateTime<Utc>>,
    pub locked_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEscrow {
    pub ledger_id: LedgerId,
    pub job_id: i64,
    pub employer_id: i64,
    pub worker_id: Option<i64>,
    pub amount: NanoCoin,
}

//--------------------------------------       UserRole       --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum UserRole {
    Employer,
    Worker,
    Admin,
}

impl Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserRole::Employer => write!(f, "Employer"),
            UserRole::Worker => write!(f, "Worker"),
            UserRole::Admin => write!(f, "Admin"),
        }
    }
}

impl FromStr for UserRole {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Employer" => Ok(Self::Employer),
            "Worker" => Ok(Self::Worker),
            "Admin" => Ok(Self::Admin),
            s => Err(ConversionError(format!("Invalid user role: {s}"))),
        }
    }
}

//--------------------------------------        User          --------------------------------------------------------
/// The aggregate fields (`reputation_score`, `rating_count`, jobs counters) are only ever mutated by event
/// application. The score is the running mean of all ratings received, so it lives in [0, 5] by construction.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub wallet_address: WalletAddress,
    pub role: UserRole,
    pub reputation_score: f64,
    pub rating_count: i64,
    pub jobs_completed: i64,
    pub jobs_posted: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------       Rating         --------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Rating {
    pub id: i64,
    pub job_id: i64,
    pub rater_id: i64,
    pub ratee_id: i64,
    /// Integer score in 1..=5, validated by the reputation contract before the event is emitted
    pub score: i64,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRating {
    pub job_id: i64,
    pub rater_id: i64,
    pub ratee_id: i64,
    pub score: i64,
    pub comment: Option<String>,
}

//--------------------------------------  NotificationKind    --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum NotificationKind {
    JobStatusChanged,
    WorkerAssigned,
    EscrowFunded,
    PaymentReleased,
    EscrowDisputed,
}

impl Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationKind::JobStatusChanged => "JobStatusChanged",
            NotificationKind::WorkerAssigned => "WorkerAssigned",
            NotificationKind::EscrowFunded => "EscrowFunded",
            NotificationKind::PaymentReleased => "PaymentReleased",
            NotificationKind::EscrowDisputed => "EscrowDisputed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for NotificationKind {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "JobStatusChanged" => Ok(Self::JobStatusChanged),
            "WorkerAssigned" => Ok(Self::WorkerAssigned),
            "EscrowFunded" => Ok(Self::EscrowFunded),
            "PaymentReleased" => Ok(Self::PaymentReleased),
            "EscrowDisputed" => Ok(Self::EscrowDisputed),
            s => Err(ConversionError(format!("Invalid notification kind: {s}"))),
        }
    }
}

//-------------------------------------- NotificationStatus   --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum NotificationStatus {
    /// Queued for delivery
    Pending,
    /// Successfully delivered to the messaging front-end
    Sent,
    /// Dead-lettered after exhausting the retry budget
    Failed,
}

impl Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Pending => write!(f, "Pending"),
            NotificationStatus::Sent => write!(f, "Sent"),
            NotificationStatus::Failed => write!(f, "Failed"),
        }
    }
}

impl FromStr for NotificationStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Sent" => Ok(Self::Sent),
            "Failed" => Ok(Self::Failed),
            s => Err(ConversionError(format!("Invalid notification status: {s}"))),
        }
    }
}

//--------------------------------------    Notification      --------------------------------------------------------
/// A notification row doubles as the durable delivery queue entry. Created inside the event application
/// transaction; owned by the dispatcher thereafter.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub kind: NotificationKind,
    /// JSON payload handed verbatim to the messaging front-end
    pub payload: String,
    pub status: NotificationStatus,
    pub retry_count: i64,
    /// The earliest time the dispatcher may (re)attempt delivery
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: i64,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
}

//--------------------------------------       Cursor         --------------------------------------------------------
/// The last successfully applied transaction position for one tracked contract. Owned exclusively by the
/// scheduler; advanced strictly after the entity writes it enabled have committed.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Cursor {
    pub contract: ContractAddress,
    pub last_position: i64,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn job_lifecycle_reaches_completed_only_through_the_documented_path() {
        use JobStatus::*;
        assert!(Posted.can_transition(Assigned));
        assert!(Assigned.can_transition(InProgress));
        assert!(InProgress.can_transition(PendingConfirmation));
        assert!(PendingConfirmation.can_transition(Completed));
        assert!(!Posted.can_transition(Completed));
        assert!(!Posted.can_transition(InProgress));
    }

    #[test]
    fn cancel_and_dispute_reachable_from_all_non_terminal_states() {
        use JobStatus::*;
        for status in [Posted, Assigned, InProgress, PendingConfirmation] {
            assert!(status.can_transition(Cancelled), "{status} should be cancellable");
            assert!(status.can_transition(Disputed), "{status} should be disputable");
        }
        for status in [Completed, Cancelled, Disputed] {
            assert!(status.is_terminal());
            assert!(status.next_states().is_empty());
        }
    }

    #[test]
    fn worker_only_allowed_once_assigned() {
        use JobStatus::*;
        assert!(!Draft.allows_worker());
        assert!(!Posted.allows_worker());
        for status in [Assigned, InProgress, PendingConfirmation, Completed] {
            assert!(status.allows_worker());
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in
            ["Draft", "Posted", "Assigned", "InProgress", "PendingConfirmation", "Completed", "Cancelled", "Disputed"]
        {
            let parsed: JobStatus = status.parse().unwrap();
            assert_eq!(parsed.to_string(), status);
        }
        assert!("NotAStatus".parse::<JobStatus>().is_err());
    }
}
