//! The sync scheduler.
//!
//! Owns the periodic cycle: on every tick (and on manual trigger, which shares the exact same code path) it
//! walks the tracked contracts, pulls a window of transactions after each contract's cursor, pushes them
//! through the [`SyncApi`] in logical-time order, and advances the cursor once the whole window has been
//! processed. The [`CycleGuard`] guarantees at most one cycle is ever active; a tick that fires mid-cycle is
//! skipped and logged, never queued.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use log::*;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};

use crate::{
    db_types::ContractAddress,
    sync::{api::TxOutcome, ContractFamily, SyncApi},
    traits::{ChainReader, ChainReaderError, MarketplaceDatabase, MarketplaceError},
};

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_PAGE_SIZE: usize = 20;

//--------------------------------------  TrackedContracts    --------------------------------------------------------
/// The statically configured set of contracts this backend follows. Immutable after construction; the
/// scheduler receives it by value and nothing mutates addresses at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedContracts {
    job_registry: ContractAddress,
    escrow: ContractAddress,
    reputation: ContractAddress,
}

impl TrackedContracts {
    pub fn new(job_registry: ContractAddress, escrow: ContractAddress, reputation: ContractAddress) -> Self {
        Self { job_registry, escrow, reputation }
    }

    pub fn job_registry(&self) -> &ContractAddress {
        &self.job_registry
    }

    pub fn escrow(&self) -> &ContractAddress {
        &self.escrow
    }

    pub fn reputation(&self) -> &ContractAddress {
        &self.reputation
    }

    /// The contracts in the order they are synced within a cycle.
    pub fn iter(&self) -> [(ContractFamily, &ContractAddress); 3] {
        [
            (ContractFamily::JobRegistry, &self.job_registry),
            (ContractFamily::Escrow, &self.escrow),
            (ContractFamily::Reputation, &self.reputation),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub interval: Duration,
    pub page_size: usize,
    pub contracts: TrackedContracts,
}

impl SyncConfig {
    pub fn new(contracts: TrackedContracts) -> Self {
        Self { interval: DEFAULT_SYNC_INTERVAL, page_size: DEFAULT_PAGE_SIZE, contracts }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

//--------------------------------------     CycleGuard       --------------------------------------------------------
/// Overlap prevention for sync cycles, testable in isolation from any timer.
///
/// `try_enter` either hands out a [`CyclePass`] or tells the caller a cycle is already active. The pass
/// releases the guard on drop, so early returns and panics cannot wedge the scheduler.
#[derive(Clone, Default)]
pub struct CycleGuard {
    active: Arc<AtomicBool>,
}

impl CycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_enter(&self) -> Option<CyclePass> {
        if self.active.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            Some(CyclePass { active: Arc::clone(&self.active) })
        } else {
            None
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

pub struct CyclePass {
    active: Arc<AtomicBool>,
}

impl Drop for CyclePass {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

//--------------------------------------     SyncStatus       --------------------------------------------------------
/// Per-contract sync state, exposed through the status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractSyncState {
    pub last_position: Option<u64>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// A snapshot of the scheduler's health, taken at the end of every cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_indexing: bool,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub job_registry: ContractSyncState,
    pub escrow: ContractSyncState,
    pub reputation: ContractSyncState,
}

impl SyncStatus {
    fn state_mut(&mut self, family: ContractFamily) -> &mut ContractSyncState {
        match family {
            ContractFamily::JobRegistry => &mut self.job_registry,
            ContractFamily::Escrow => &mut self.escrow,
            ContractFamily::Reputation => &mut self.reputation,
        }
    }

    pub fn state(&self, family: ContractFamily) -> &ContractSyncState {
        match family {
            ContractFamily::JobRegistry => &self.job_registry,
            ContractFamily::Escrow => &self.escrow,
            ContractFamily::Reputation => &self.reputation,
        }
    }
}

/// The result of one cycle attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed { applied: usize, skipped: usize, rejected: usize },
    /// A cycle was already running; the attempt was a no-op. Never queued for later.
    AlreadyRunning,
}

#[derive(Debug, Default)]
struct ContractCycleStats {
    applied: usize,
    skipped: usize,
    rejected: usize,
    new_position: Option<u64>,
}

//--------------------------------------    SyncScheduler     --------------------------------------------------------
pub struct SyncScheduler<B, R> {
    api: SyncApi<B>,
    reader: R,
    config: SyncConfig,
    guard: CycleGuard,
    status: Arc<RwLock<SyncStatus>>,
}

impl<B: Clone, R: Clone> Clone for SyncScheduler<B, R> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            reader: self.reader.clone(),
            config: self.config.clone(),
            guard: self.guard.clone(),
            status: Arc::clone(&self.status),
        }
    }
}

impl<B, R> SyncScheduler<B, R>
where
    B: MarketplaceDatabase,
    R: ChainReader,
{
    pub fn new(api: SyncApi<B>, reader: R, config: SyncConfig) -> Self {
        Self { api, reader, config, guard: CycleGuard::new(), status: Arc::new(RwLock::new(SyncStatus::default())) }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn api(&self) -> &SyncApi<B> {
        &self.api
    }

    /// A snapshot of the current sync status for external health reporting.
    pub async fn status(&self) -> SyncStatus {
        let mut snapshot = self.status.read().await.clone();
        snapshot.is_indexing = self.guard.is_active();
        snapshot
    }

    /// Run one full synchronization cycle. Both the timer and the manual trigger call this; if a cycle is
    /// already active the call returns [`SyncOutcome::AlreadyRunning`] immediately.
    pub async fn run_cycle(&self) -> SyncOutcome {
        let _pass = match self.guard.try_enter() {
            Some(pass) => pass,
            None => {
                info!("🕰️ Sync tick fired while a cycle is still running. Skipping this tick.");
                return SyncOutcome::AlreadyRunning;
            },
        };
        let started = Utc::now();
        self.status.write().await.last_attempt_at = Some(started);
        debug!("🕰️ Sync cycle starting");

        let mut totals = ContractCycleStats::default();
        let mut all_ok = true;
        for (family, address) in self.config.contracts.iter() {
            match self.sync_contract(family, address).await {
                Ok(stats) => {
                    totals.applied += stats.applied;
                    totals.skipped += stats.skipped;
                    totals.rejected += stats.rejected;
                    let mut status = self.status.write().await;
                    let state = status.state_mut(family);
                    if let Some(pos) = stats.new_position {
                        state.last_position = Some(pos);
                    }
                    state.last_synced_at = Some(Utc::now());
                    state.last_error = None;
                },
                Err(e) => {
                    all_ok = false;
                    self.status.write().await.state_mut(family).last_error = Some(e.to_string());
                },
            }
        }
        if all_ok {
            self.status.write().await.last_success_at = Some(Utc::now());
        }
        info!(
            "🕰️ Sync cycle finished in {}ms. {} applied, {} skipped, {} rejected.",
            (Utc::now() - started).num_milliseconds(),
            totals.applied,
            totals.skipped,
            totals.rejected
        );
        SyncOutcome::Completed { applied: totals.applied, skipped: totals.skipped, rejected: totals.rejected }
    }

    /// The manual-trigger entry point. Identical to a timer tick apart from the caller.
    pub async fn trigger_sync(&self) -> SyncOutcome {
        debug!("🕰️ Manual sync trigger received");
        self.run_cycle().await
    }

    /// Runs the scheduler until the shutdown flag flips. The in-flight cycle is allowed to finish; new ticks
    /// are not accepted after shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut timer = tokio::time::interval(self.config.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("🕰️ Sync scheduler started with a {:?} interval", self.config.interval);
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.run_cycle().await;
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("🕰️ Sync scheduler shutting down");
                        break;
                    }
                },
            }
        }
    }

    /// Sync a single contract: fetch a window after the cursor, apply in order, advance the cursor.
    ///
    /// Reader and database failures abort this contract only (the cursor stays put, so the window is
    /// re-fetched next tick); rejections and malformed transactions are counted and stepped over.
    async fn sync_contract(
        &self,
        family: ContractFamily,
        address: &ContractAddress,
    ) -> Result<ContractCycleStats, ContractSyncError> {
        let cursor = self.api.db().fetch_cursor(address).await?;
        let after = cursor.map(|c| c.last_position as u64);
        let txs = match self.reader.fetch_transactions(address, after, self.config.page_size).await {
            Ok(txs) => txs,
            Err(e @ ChainReaderError::Transient(_)) => {
                warn!("⛓️ [{family}] Transient fetch error: {e}. Will retry on the next tick.");
                return Err(e.into());
            },
            Err(e @ ChainReaderError::FatalConfig(_)) => {
                error!("⛓️ [{family}] {e}. The contract is skipped until the configuration is corrected.");
                return Err(e.into());
            },
        };
        if txs.is_empty() {
            trace!("⛓️ [{family}] No new transactions after position {after:?}");
            return Ok(ContractCycleStats::default());
        }
        debug!("⛓️ [{family}] Fetched {} transactions after position {after:?}", txs.len());

        let mut stats = ContractCycleStats::default();
        for tx in &txs {
            match self.api.process_transaction(family, address, tx).await? {
                TxOutcome::Applied(_) => stats.applied += 1,
                TxOutcome::Replayed | TxOutcome::Skipped => stats.skipped += 1,
                TxOutcome::Rejected(_) => stats.rejected += 1,
            }
            stats.new_position = Some(tx.logical_time);
        }
        if let Some(position) = stats.new_position {
            // Entity writes for the window have committed by now; advancing later rather than earlier is what
            // keeps a crash here safe (events are re-applied as journal no-ops next tick).
            self.api.db().advance_cursor(address, position).await?;
            trace!("⛓️ [{family}] Cursor advanced to {position}");
        }
        Ok(stats)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
enum ContractSyncError {
    #[error("{0}")]
    Reader(#[from] ChainReaderError),
    #[error("{0}")]
    Database(#[from] MarketplaceError),
}
