use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use gig_market_engine::{
    cache::{CacheCoordinator, ReadCache},
    dispatch::NotificationDispatcher,
    events::{EventHandlers, EventHooks, EventProducers},
    sync::{SyncApi, SyncConfig, SyncScheduler},
    SqliteDatabase,
};
use log::*;
use tokio::sync::watch;

use crate::{
    chain_client::HttpChainReader,
    config::ServerConfig,
    delivery::WebhookDelivery,
    errors::ServerError,
    routes::{health, job_detail, search_jobs, sync_status, top_jobs, trigger_sync, user_reputation},
    workers::{start_dispatcher, start_sync_worker},
};

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    sqlx::migrate!("../gig_market_engine/src/sqlite/migrations")
        .run(db.pool())
        .await
        .map_err(|e| ServerError::InitializeError(format!("Could not run database migrations. {e}")))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let producers = start_event_handlers().await;

    let cache = ReadCache::default();
    let api = SyncApi::new(db.clone(), producers, CacheCoordinator::new(cache.clone()));
    let reader = HttpChainReader::new(&config.gateway)?;
    let sync_config = SyncConfig::new(config.contracts.clone())
        .with_interval(config.sync_interval)
        .with_page_size(config.sync_page_size);
    let scheduler = SyncScheduler::new(api, reader, sync_config);
    if config.run_workers {
        start_sync_worker(scheduler.clone(), shutdown_rx.clone());
        let delivery = WebhookDelivery::new(&config.delivery)?;
        let dispatcher = NotificationDispatcher::new(db.clone(), delivery, config.dispatch.clone());
        start_dispatcher(dispatcher, shutdown_rx);
    } else {
        warn!("🚀️ GMB_RUN_WORKERS is off. Serving reads only; no syncing or notification delivery.");
    }

    let srv = create_server_instance(config, db, cache, scheduler)?;
    let result = srv.await.map_err(|e| ServerError::Unspecified(e.to_string()));
    let _unused = shutdown_tx.send(true);
    result
}

/// Wires up the post-commit event subscribers and starts their handler loops. Currently the only subscribers
/// log the fresh rows; the producer set is where side channels (metrics, live feeds) plug in.
async fn start_event_handlers() -> EventProducers {
    let mut hooks = EventHooks::default();
    hooks.on_job_updated(|ev| {
        Box::pin(async move {
            debug!("📬️ Job {} is now {}", ev.job.id, ev.job.status);
        })
    });
    hooks.on_escrow_updated(|ev| {
        Box::pin(async move {
            debug!("📬️ Escrow {} is now {}", ev.escrow.id, ev.escrow.status);
        })
    });
    let handlers = EventHandlers::new(128, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;
    producers
}

pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    cache: ReadCache,
    scheduler: SyncScheduler<SqliteDatabase, HttpChainReader>,
) -> Result<Server, ServerError> {
    let srv = HttpServer::new(move || {
        let app = App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("gms::access_log"))
            .app_data(web::Data::new(db.clone()))
            .app_data(web::Data::new(cache.clone()))
            .app_data(web::Data::new(scheduler.clone()));
        // `/jobs/top` must register before `/jobs/{id}` or actix routes "top" to the path parameter
        let api_scope = web::scope("/api")
            .service(trigger_sync)
            .service(sync_status)
            .service(top_jobs)
            .service(job_detail)
            .service(search_jobs)
            .service(user_reputation);
        app.service(health).service(api_scope)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}
