//! Request handler definitions
//!
//! Define each route and its handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! All handlers are bound to the concrete backend types ([`SqliteDatabase`], [`HttpChainReader`]), so the
//! generics stay inside the engine and actix never sees them.
use std::str::FromStr;

use actix_web::{get, post, web, HttpResponse, Responder};
use gig_market_engine::{
    cache::ReadCache,
    db_types::JobStatus,
    sync::{CacheKey, SyncOutcome, SyncScheduler},
    MarketplaceDatabase,
    SqliteDatabase,
};
use log::*;
use serde::Deserialize;
use serde_json::json;

use crate::{chain_client::HttpChainReader, errors::ServerError};

type Scheduler = SyncScheduler<SqliteDatabase, HttpChainReader>;

/// Route handler for the health check endpoint
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("🌐️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

/// Route handler for `POST /api/sync/trigger`.
///
/// Kicks off a sync cycle immediately. If a cycle is already running the request is acknowledged with a 202
/// and nothing is queued.
#[post("/sync/trigger")]
pub async fn trigger_sync(scheduler: web::Data<Scheduler>) -> Result<HttpResponse, ServerError> {
    debug!("🌐️ Manual sync trigger received");
    match scheduler.trigger_sync().await {
        SyncOutcome::Completed { applied, skipped, rejected } => Ok(HttpResponse::Ok().json(json!({
            "status": "completed",
            "applied": applied,
            "skipped": skipped,
            "rejected": rejected,
        }))),
        SyncOutcome::AlreadyRunning => {
            Ok(HttpResponse::Accepted().json(json!({ "status": "already_running" })))
        },
    }
}

/// Route handler for `GET /api/sync/status`.
#[get("/sync/status")]
pub async fn sync_status(scheduler: web::Data<Scheduler>) -> Result<HttpResponse, ServerError> {
    let status = scheduler.status().await;
    Ok(HttpResponse::Ok().json(status))
}

/// Route handler for `GET /api/jobs/top`. Served from cache when warm.
#[get("/jobs/top")]
pub async fn top_jobs(
    db: web::Data<SqliteDatabase>,
    cache: web::Data<ReadCache>,
) -> Result<HttpResponse, ServerError> {
    let key = CacheKey::TopJobs;
    if let Some(cached) = cache.get(&key).await {
        trace!("🌐️ Serving {key} from cache");
        return Ok(HttpResponse::Ok().json(cached));
    }
    let jobs = db.fetch_top_jobs(10).await?;
    let body = serde_json::to_value(&jobs).map_err(|e| ServerError::Unspecified(e.to_string()))?;
    cache.put(&key, body.clone()).await;
    Ok(HttpResponse::Ok().json(body))
}

/// Route handler for `GET /api/jobs/{id}` (internal id).
#[get("/jobs/{id}")]
pub async fn job_detail(
    db: web::Data<SqliteDatabase>,
    cache: web::Data<ReadCache>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    let key = CacheKey::Job(id);
    if let Some(cached) = cache.get(&key).await {
        trace!("🌐️ Serving {key} from cache");
        return Ok(HttpResponse::Ok().json(cached));
    }
    let job = db.fetch_job(id).await?.ok_or_else(|| ServerError::NoRecordFound(format!("Job {id}")))?;
    let body = serde_json::to_value(&job).map_err(|e| ServerError::Unspecified(e.to_string()))?;
    cache.put(&key, body.clone()).await;
    Ok(HttpResponse::Ok().json(body))
}

#[derive(Debug, Deserialize)]
pub struct JobSearchQuery {
    pub status: Option<String>,
    pub category: Option<String>,
}

/// Route handler for `GET /api/jobs?status=&category=`.
///
/// Single-filter searches are served through the list caches; combined filters always hit the database, since
/// only the single-filter lists have invalidation keys.
#[get("/jobs")]
pub async fn search_jobs(
    db: web::Data<SqliteDatabase>,
    cache: web::Data<ReadCache>,
    query: web::Query<JobSearchQuery>,
) -> Result<HttpResponse, ServerError> {
    let status = match &query.status {
        Some(s) => {
            Some(JobStatus::from_str(s).map_err(|e| ServerError::InvalidQuery(e.to_string()))?)
        },
        None => None,
    };
    let category = query.category.as_deref();
    let key = match (status, category) {
        (Some(status), None) => Some(CacheKey::JobListByStatus(status)),
        (None, Some(category)) => Some(CacheKey::JobListByCategory(category.to_string())),
        _ => None,
    };
    if let Some(key) = &key {
        if let Some(cached) = cache.get(key).await {
            trace!("🌐️ Serving {key} from cache");
            return Ok(HttpResponse::Ok().json(cached));
        }
    }
    let jobs = db.search_jobs(status, category).await?;
    let body = serde_json::to_value(&jobs).map_err(|e| ServerError::Unspecified(e.to_string()))?;
    if let Some(key) = &key {
        cache.put(key, body.clone()).await;
    }
    Ok(HttpResponse::Ok().json(body))
}

/// Route handler for `GET /api/users/{id}/reputation`.
#[get("/users/{id}/reputation")]
pub async fn user_reputation(
    db: web::Data<SqliteDatabase>,
    cache: web::Data<ReadCache>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    let key = CacheKey::UserReputation(id);
    if let Some(cached) = cache.get(&key).await {
        trace!("🌐️ Serving {key} from cache");
        return Ok(HttpResponse::Ok().json(cached));
    }
    let user = db.fetch_user(id).await?.ok_or_else(|| ServerError::NoRecordFound(format!("User {id}")))?;
    let body = json!({
        "user_id": user.id,
        "reputation_score": user.reputation_score,
        "rating_count": user.rating_count,
        "jobs_completed": user.jobs_completed,
        "jobs_posted": user.jobs_posted,
    });
    cache.put(&key, body.clone()).await;
    Ok(HttpResponse::Ok().json(body))
}
