use std::fmt::Debug;

use log::*;

use crate::{
    cache::CacheCoordinator,
    events::{EscrowUpdatedEvent, EventProducers, JobUpdatedEvent},
    sync::{
        decoder::{self, ContractFamily, Decoded},
        CacheKey,
        Effect,
        EventKey,
    },
    traits::{MarketplaceDatabase, MarketplaceError, RawTransaction},
};
use crate::db_types::ContractAddress;

/// `SyncApi` is the event application engine: it decodes one raw transaction, applies the resulting domain
/// event through the database's atomic `apply_event`, and then executes the produced effects (cache
/// invalidation synchronously, real-time broadcast through the event hooks). Notification effects are already
/// durable by the time the transaction commits, so nothing here ever blocks on delivery.
pub struct SyncApi<B> {
    db: B,
    producers: EventProducers,
    cache: CacheCoordinator,
}

impl<B> Debug for SyncApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SyncApi")
    }
}

impl<B: Clone> Clone for SyncApi<B> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone(), producers: self.producers.clone(), cache: self.cache.clone() }
    }
}

impl<B> SyncApi<B> {
    pub fn new(db: B, producers: EventProducers, cache: CacheCoordinator) -> Self {
        Self { db, producers, cache }
    }
}

/// The outcome of pushing one raw transaction through decode-and-apply.
#[derive(Debug, Clone)]
pub enum TxOutcome {
    /// The event was applied for the first time; effects were executed.
    Applied(Vec<Effect>),
    /// The idempotency journal absorbed a replay. No state changed, no effects were re-executed.
    Replayed,
    /// The transaction carried no event for us (unrecognized op code) or was malformed.
    Skipped,
    /// A precondition violation. Recorded for manual reconciliation; the cycle moves on and never retries it.
    Rejected(String),
}

impl TxOutcome {
    pub fn effects(&self) -> &[Effect] {
        match self {
            TxOutcome::Applied(effects) => effects,
            _ => &[],
        }
    }
}

impl<B> SyncApi<B>
where B: MarketplaceDatabase
{
    /// Decode and apply one transaction from the given contract.
    ///
    /// Only genuine database trouble surfaces as `Err` -- those abort the contract's cycle so the batch is
    /// retried from the unadvanced cursor. Everything that must *not* be retried (unknown op codes, malformed
    /// bodies, precondition violations, replays) comes back as an `Ok` variant so the caller keeps going.
    pub async fn process_transaction(
        &self,
        family: ContractFamily,
        contract: &ContractAddress,
        tx: &RawTransaction,
    ) -> Result<TxOutcome, MarketplaceError> {
        let event = match decoder::decode(family, tx) {
            Decoded::Unrecognized { op_code } => {
                debug!("🔄️ [{family}] Unrecognized op code {op_code:#010x} in tx {}. Skipping.", tx.hash);
                return Ok(TxOutcome::Skipped);
            },
            Decoded::Malformed { op_code, reason } => {
                warn!(
                    "🔄️ [{family}] Malformed body for op code {op_code:#010x} in tx {}: {reason}. Transaction \
                     skipped, cycle continues.",
                    tx.hash
                );
                return Ok(TxOutcome::Skipped);
            },
            Decoded::Event(event) => event,
        };
        let key = EventKey::new(contract.clone(), tx.hash.clone());
        trace!("🔄️ [{family}] Applying {} from tx {}", event.name(), tx.hash);
        match self.db.apply_event(&key, &event).await {
            Ok(outcome) if outcome.applied => {
                debug!("🔄️ [{family}] {} applied with {} effects", event.name(), outcome.effects.len());
                self.execute_effects(&outcome.effects).await;
                Ok(TxOutcome::Applied(outcome.effects))
            },
            Ok(_) => {
                debug!("🔄️ [{family}] {} from tx {} was already applied. No-op.", event.name(), tx.hash);
                Ok(TxOutcome::Replayed)
            },
            Err(e) if e.is_rejection() => {
                error!(
                    "🔄️ [{family}] {} from tx {} violated a precondition: {e}. This means out-of-order delivery \
                     or schema drift; it will NOT be retried and needs manual reconciliation.",
                    event.name(),
                    tx.hash
                );
                Ok(TxOutcome::Rejected(e.to_string()))
            },
            Err(e) => Err(e),
        }
    }

    async fn execute_effects(&self, effects: &[Effect]) {
        let keys: Vec<CacheKey> = Effect::cache_keys(effects);
        if !keys.is_empty() {
            self.cache.invalidate(&keys).await;
        }
        for effect in effects {
            match effect {
                Effect::BroadcastJob(job) => {
                    for producer in &self.producers.job_updated_producer {
                        producer.publish_event(JobUpdatedEvent::new(job.clone())).await;
                    }
                },
                Effect::BroadcastEscrow(escrow) => {
                    for producer in &self.producers.escrow_updated_producer {
                        producer.publish_event(EscrowUpdatedEvent::new(escrow.clone())).await;
                    }
                },
                // Notify rows were inserted inside the application transaction; the dispatcher owns them now.
                Effect::Notify { .. } | Effect::InvalidateCache(_) => {},
            }
        }
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn cache(&self) -> &CacheCoordinator {
        &self.cache
    }
}
