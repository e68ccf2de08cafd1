//! Gig Market Engine
//!
//! The Gig Market Engine keeps an off-chain job marketplace database synchronized with a set of on-chain
//! contracts (job registry, escrow, reputation). This library contains the core logic and is front-end
//! agnostic.
//!
//! The library is divided into three main sections:
//! 1. Database management and control ([`mod@sqlite`]). You should never need to access the database directly.
//!    Instead, use the [`sync::SyncApi`] and the [`traits::MarketplaceDatabase`] trait. The exception is the
//!    data types used in the database, defined in the public `db_types` module.
//! 2. The synchronization core ([`mod@sync`]): the periodic scheduler, the transaction decoder and the
//!    idempotent event application engine, plus the read [`mod@cache`] it keeps coherent.
//! 3. The notification [`mod@dispatch`]er, which drains the durable queue that event application fills.
//!
//! The engine also provides a set of events that can be subscribed to. These events are emitted when event
//! application commits a job or escrow mutation. A simple Actor framework is used so that you can easily hook
//! into these events and perform custom actions.
pub mod cache;
pub mod db_types;
pub mod dispatch;
pub mod events;
pub mod sync;
pub mod traits;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{ChainReader, MarketplaceDatabase, MarketplaceError, MessageDelivery};
