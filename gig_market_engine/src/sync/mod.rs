//! The chain-synchronization engine.
//!
//! This is the heart of the backend: the off-chain store is a projection of the ledger's event log, and
//! everything in this module exists to keep that projection causally consistent. The pipeline is
//! `scheduler → chain reader → decoder → event application → {store, cache, notifications, broadcast} → cursor`.
//!
//! * [`decoder`] turns raw transactions into typed [`DomainEvent`]s via an op-code dispatch table.
//! * [`escrow_state`] is the pure escrow state machine; all transitions are validated against it.
//! * [`reputation`] is the O(1) incremental reputation aggregator.
//! * [`api`] ([`SyncApi`]) drives decode-and-apply for one transaction and executes the resulting effects.
//! * [`scheduler`] ([`SyncScheduler`]) owns the periodic cycle, the overlap guard and the cursors.
pub mod api;
pub mod decoder;
pub mod effects;
pub mod escrow_state;
pub mod reputation;
pub mod scheduler;

pub use api::{SyncApi, TxOutcome};
pub use decoder::{ContractFamily, Decoded, DecodeError, DomainEvent};
pub use effects::{CacheKey, Effect, EventKey};
pub use scheduler::{CycleGuard, SyncConfig, SyncOutcome, SyncScheduler, SyncStatus, TrackedContracts};
