//! In-memory stand-ins for the two consumed external interfaces.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::Mutex;

use crate::{
    db_types::{ContractAddress, Notification},
    traits::{ChainReader, ChainReaderError, DeliveryError, MessageDelivery, RawTransaction},
};

/// A scripted chain reader. Load it with transactions per contract; `fetch_transactions` then behaves like the
/// real gateway (after-cursor filtering, ascending order, page limit). An optional artificial delay makes
/// cycle-overlap tests deterministic.
#[derive(Clone, Default)]
pub struct MockChainReader {
    scripts: Arc<Mutex<HashMap<ContractAddress, Vec<RawTransaction>>>>,
    delay: Option<Duration>,
    fail_transient: Arc<AtomicUsize>,
}

impl MockChainReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Appends transactions to the script for `contract`.
    pub async fn script(&self, contract: &ContractAddress, txs: Vec<RawTransaction>) {
        let mut scripts = self.scripts.lock().await;
        scripts.entry(contract.clone()).or_default().extend(txs);
    }

    /// Makes the next `n` fetches fail with a transient error.
    pub fn fail_next(&self, n: usize) {
        self.fail_transient.store(n, Ordering::SeqCst);
    }
}

impl ChainReader for MockChainReader {
    async fn fetch_transactions(
        &self,
        contract: &ContractAddress,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<RawTransaction>, ChainReaderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let remaining = self.fail_transient.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_transient.store(remaining - 1, Ordering::SeqCst);
            return Err(ChainReaderError::Transient("scripted network failure".into()));
        }
        let scripts = self.scripts.lock().await;
        let mut txs: Vec<RawTransaction> = scripts
            .get(contract)
            .map(|txs| {
                txs.iter().filter(|tx| after.map_or(true, |cursor| tx.logical_time > cursor)).cloned().collect()
            })
            .unwrap_or_default();
        txs.sort_by_key(|tx| tx.logical_time);
        txs.truncate(limit);
        Ok(txs)
    }
}

/// A delivery channel that records what it sent and can be told to fail the first `n` attempts.
#[derive(Clone, Default)]
pub struct MemoryDelivery {
    fail_remaining: Arc<AtomicUsize>,
    delivered: Arc<Mutex<Vec<Notification>>>,
}

impl MemoryDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(n: usize) -> Self {
        let delivery = Self::default();
        delivery.fail_remaining.store(n, Ordering::SeqCst);
        delivery
    }

    pub async fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().await.clone()
    }
}

impl MessageDelivery for MemoryDelivery {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(DeliveryError("scripted delivery failure".into()));
        }
        self.delivered.lock().await.push(notification.clone());
        Ok(())
    }
}
