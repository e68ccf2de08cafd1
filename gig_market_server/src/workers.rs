//! The long-running background workers of the server: the chain-sync scheduler and the notification
//! dispatcher. Both run until the shutdown signal flips.
use gig_market_engine::{dispatch::NotificationDispatcher, sync::SyncScheduler, SqliteDatabase};
use log::*;
use tokio::{sync::watch, task::JoinHandle};

use crate::{chain_client::HttpChainReader, delivery::WebhookDelivery};

/// Starts the periodic sync worker. Do not await the returned JoinHandle; it only resolves on shutdown.
pub fn start_sync_worker(
    scheduler: SyncScheduler<SqliteDatabase, HttpChainReader>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    info!("🕰️ Starting the chain sync worker");
    tokio::spawn(scheduler.run(shutdown))
}

/// Starts the notification dispatcher worker. Do not await the returned JoinHandle; it only resolves on
/// shutdown.
pub fn start_dispatcher(
    dispatcher: NotificationDispatcher<SqliteDatabase, WebhookDelivery>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    info!("📨️ Starting the notification dispatcher");
    tokio::spawn(dispatcher.run(shutdown))
}
