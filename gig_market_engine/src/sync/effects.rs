use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db_types::{ContractAddress, Escrow, Job, JobStatus, NotificationKind};

//--------------------------------------      EventKey        --------------------------------------------------------
/// The idempotency key for one ledger transaction: contract address plus transaction hash. Journalled on first
/// application; replays are detected by looking this up before any mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub contract: ContractAddress,
    pub tx_hash: String,
}

impl EventKey {
    pub fn new(contract: ContractAddress, tx_hash: impl Into<String>) -> Self {
        Self { contract, tx_hash: tx_hash.into() }
    }
}

impl Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.contract, self.tx_hash)
    }
}

//--------------------------------------      CacheKey        --------------------------------------------------------
/// The enumerated read-cache invalidation keys. This set is the whole contract between the sync engine and the
/// read path -- nothing else may invent cache keys, so invalidation logic lives in exactly one place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheKey {
    Job(i64),
    JobListByStatus(JobStatus),
    JobListByCategory(String),
    TopJobs,
    UserReputation(i64),
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::Job(id) => write!(f, "job:{id}"),
            CacheKey::JobListByStatus(status) => write!(f, "job-list:{}", status.to_string().to_lowercase()),
            CacheKey::JobListByCategory(category) => write!(f, "job-list:{category}"),
            CacheKey::TopJobs => write!(f, "top-jobs"),
            CacheKey::UserReputation(id) => write!(f, "user-reputation:{id}"),
        }
    }
}

//--------------------------------------       Effect         --------------------------------------------------------
/// A side-effect instruction produced by applying a domain event.
///
/// Effects are data, not actions: the application transaction records them (and inserts the `Notify` rows), and
/// [`crate::sync::SyncApi`] executes the cache and broadcast effects after the transaction commits. Keeping them
/// serializable lets the idempotency journal return the original effect list on replay for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    /// Remove one key from the read cache, synchronously, within the same sync cycle.
    InvalidateCache(CacheKey),
    /// Enqueue a notification for at-least-once delivery. The row is inserted inside the application
    /// transaction; the dispatcher picks it up independently of the cycle.
    Notify { user_id: i64, kind: NotificationKind, payload: Value },
    /// Push the updated job to real-time subscribers.
    BroadcastJob(Job),
    /// Push the updated escrow to real-time subscribers.
    BroadcastEscrow(Escrow),
}

impl Effect {
    pub fn invalidate(key: CacheKey) -> Self {
        Effect::InvalidateCache(key)
    }

    pub fn notify(user_id: i64, kind: NotificationKind, payload: Value) -> Self {
        Effect::Notify { user_id, kind, payload }
    }

    /// The cache keys carried by a slice of effects, in emission order.
    pub fn cache_keys(effects: &[Effect]) -> Vec<CacheKey> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::InvalidateCache(key) => Some(key.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cache_keys_render_the_published_format() {
        assert_eq!(CacheKey::Job(42).to_string(), "job:42");
        assert_eq!(CacheKey::JobListByStatus(JobStatus::Posted).to_string(), "job-list:posted");
        assert_eq!(CacheKey::JobListByCategory("design".into()).to_string(), "job-list:design");
        assert_eq!(CacheKey::TopJobs.to_string(), "top-jobs");
        assert_eq!(CacheKey::UserReputation(7).to_string(), "user-reputation:7");
    }

    #[test]
    fn effects_round_trip_through_json() {
        let effects = vec![
            Effect::invalidate(CacheKey::Job(1)),
            Effect::notify(2, NotificationKind::WorkerAssigned, serde_json::json!({"job_id": 1})),
        ];
        let json = serde_json::to_string(&effects).unwrap();
        let back: Vec<Effect> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, effects);
        assert_eq!(Effect::cache_keys(&back), vec![CacheKey::Job(1)]);
    }
}
