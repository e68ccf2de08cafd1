//! # Gig Market Server
//! This module hosts the HTTP front-end and the long-running workers of the gig marketplace backend. It is
//! responsible for:
//! * serving the cached job read endpoints,
//! * exposing the manual sync trigger and the sync status introspection endpoint,
//! * running the periodic chain-sync scheduler, and
//! * running the notification dispatcher that drains the durable queue.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
pub mod chain_client;
pub mod config;
pub mod delivery;
pub mod errors;
pub mod routes;
pub mod server;
pub mod workers;
