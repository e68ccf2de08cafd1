use serde::{Deserialize, Serialize};

use crate::db_types::{Escrow, Job, Notification};

/// Emitted after event application commits a job mutation. Carries the fresh row so subscribers never need a
/// read-back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobUpdatedEvent {
    pub job: Job,
}

impl JobUpdatedEvent {
    pub fn new(job: Job) -> Self {
        Self { job }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowUpdatedEvent {
    pub escrow: Escrow,
}

impl EscrowUpdatedEvent {
    pub fn new(escrow: Escrow) -> Self {
        Self { escrow }
    }
}

/// Emitted when a notification is dead-lettered, so operator tooling can escalate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationDeadLetteredEvent {
    pub notification: Notification,
}
