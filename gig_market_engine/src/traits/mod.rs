//! The seams of the engine.
//!
//! Backends (the off-chain store), ledger gateways (the chain read boundary) and messaging front-ends all plug in
//! through the traits in this module. The engine core only ever talks to these traits, never to a concrete
//! implementation, so every one of them can be swapped out in tests.
mod chain_reader;
mod marketplace_database;
mod message_delivery;

pub use chain_reader::{ChainReader, ChainReaderError, InboundMessage, RawTransaction};
pub use marketplace_database::{EventOutcome, MarketplaceDatabase, MarketplaceError, TransitionViolation};
pub use message_delivery::{DeliveryError, MessageDelivery};
