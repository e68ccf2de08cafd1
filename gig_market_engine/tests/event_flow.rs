//! End-to-end event application tests against a file-backed SQLite database: decode a wire transaction, apply
//! it, and inspect the resulting rows, cache invalidations and notification queue entries.
use chrono::Duration;
use gig_market_engine::{
    cache::{CacheCoordinator, ReadCache},
    db_types::{ContractAddress, JobStatus, LedgerId, NotificationKind},
    events::EventProducers,
    sync::{CacheKey, ContractFamily, Effect, SyncApi, TxOutcome},
    test_utils::{
        encode,
        prepare_env::{prepare_test_env, random_db_path},
    },
    MarketplaceDatabase,
    SqliteDatabase,
};

const EMPLOYER: [u8; 32] = [0xaa; 32];
const WORKER: [u8; 32] = [0xbb; 32];

async fn setup() -> (SqliteDatabase, SyncApi<SqliteDatabase>, ReadCache, ContractAddress) {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    let cache = ReadCache::default();
    let api = SyncApi::new(db.clone(), EventProducers::default(), CacheCoordinator::new(cache.clone()));
    (db, api, cache, ContractAddress::from("job_registry_contract"))
}

#[tokio::test]
async fn job_created_inserts_a_posted_job() {
    let (db, api, _cache, contract) = setup().await;
    let tx = encode::job_created(42, &EMPLOYER, 5_000_000_000, 8, "design");
    let outcome = api.process_transaction(ContractFamily::JobRegistry, &contract, &tx).await.unwrap();
    assert!(matches!(outcome, TxOutcome::Applied(_)));

    let job = db.fetch_job_by_ledger_id(LedgerId(42)).await.unwrap().expect("job should exist");
    assert_eq!(job.status, JobStatus::Posted);
    assert_eq!(job.wages.value(), 5_000_000_000);
    assert_eq!(job.duration_hours, 8);
    assert_eq!(job.category, "design");
    assert!(job.worker_id.is_none());

    let employer = db.fetch_user(job.employer_id).await.unwrap().expect("employer should exist");
    assert_eq!(employer.jobs_posted, 1);
}

#[tokio::test]
async fn worker_assignment_invalidates_caches_and_notifies_both_parties() {
    let (db, api, cache, contract) = setup().await;
    let tx = encode::job_created(42, &EMPLOYER, 5_000_000_000, 8, "design");
    api.process_transaction(ContractFamily::JobRegistry, &contract, &tx).await.unwrap();
    let job = db.fetch_job_by_ledger_id(LedgerId(42)).await.unwrap().unwrap();

    cache.put(&CacheKey::Job(job.id), serde_json::json!({"stale": true})).await;
    cache.put(&CacheKey::JobListByStatus(JobStatus::Posted), serde_json::json!([42])).await;

    let tx = encode::worker_assigned(42, &WORKER);
    let outcome = api.process_transaction(ContractFamily::JobRegistry, &contract, &tx).await.unwrap();
    let keys = Effect::cache_keys(outcome.effects());
    assert!(keys.contains(&CacheKey::Job(job.id)));
    assert!(keys.contains(&CacheKey::JobListByStatus(JobStatus::Posted)));
    assert!(cache.get(&CacheKey::Job(job.id)).await.is_none(), "stale job entry must be gone");
    assert!(cache.get(&CacheKey::JobListByStatus(JobStatus::Posted)).await.is_none());

    let job = db.fetch_job_by_ledger_id(LedgerId(42)).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Assigned);
    assert!(job.worker_id.is_some());

    let pending = db.claim_due_notifications(10, Duration::seconds(60)).await.unwrap();
    assert_eq!(pending.len(), 2, "employer and worker must each get a notification");
    assert!(pending.iter().all(|n| n.kind == NotificationKind::WorkerAssigned));
}

#[tokio::test]
async fn replaying_a_transaction_is_a_no_op() {
    let (db, api, _cache, contract) = setup().await;
    let tx = encode::job_created(42, &EMPLOYER, 5_000_000_000, 8, "design");
    let first = api.process_transaction(ContractFamily::JobRegistry, &contract, &tx).await.unwrap();
    assert!(matches!(first, TxOutcome::Applied(_)));
    let second = api.process_transaction(ContractFamily::JobRegistry, &contract, &tx).await.unwrap();
    assert!(matches!(second, TxOutcome::Replayed));

    let job = db.fetch_job_by_ledger_id(LedgerId(42)).await.unwrap().unwrap();
    let employer = db.fetch_user(job.employer_id).await.unwrap().unwrap();
    assert_eq!(employer.jobs_posted, 1, "replay must not double-count");

    // Replaying a notifying event must not duplicate queue entries either
    let assign = encode::worker_assigned(42, &WORKER);
    api.process_transaction(ContractFamily::JobRegistry, &contract, &assign).await.unwrap();
    api.process_transaction(ContractFamily::JobRegistry, &contract, &assign).await.unwrap();
    let pending = db.claim_due_notifications(10, Duration::seconds(60)).await.unwrap();
    assert_eq!(pending.len(), 2);
}

#[tokio::test]
async fn out_of_order_event_is_rejected_without_partial_rows() {
    let (db, api, _cache, contract) = setup().await;
    let tx = encode::worker_assigned(99, &WORKER);
    let outcome = api.process_transaction(ContractFamily::JobRegistry, &contract, &tx).await.unwrap();
    assert!(matches!(outcome, TxOutcome::Rejected(_)));
    assert!(db.fetch_job_by_ledger_id(LedgerId(99)).await.unwrap().is_none());
    let pending = db.claim_due_notifications(10, Duration::seconds(60)).await.unwrap();
    assert!(pending.is_empty(), "a rejected event must leave no notifications behind");
}

#[tokio::test]
async fn illegal_status_jump_is_rejected() {
    let (db, api, _cache, contract) = setup().await;
    let tx = encode::job_created(7, &EMPLOYER, 1_000, 2, "writing");
    api.process_transaction(ContractFamily::JobRegistry, &contract, &tx).await.unwrap();

    // Posted -> Completed skips the whole lifecycle
    let jump = encode::job_status_changed(7, 4);
    let outcome = api.process_transaction(ContractFamily::JobRegistry, &contract, &jump).await.unwrap();
    assert!(matches!(outcome, TxOutcome::Rejected(_)));
    let job = db.fetch_job_by_ledger_id(LedgerId(7)).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Posted, "rejected transitions must not mutate the row");

    // Posted -> Cancelled is fine
    let cancel = encode::job_status_changed(7, 5);
    let outcome = api.process_transaction(ContractFamily::JobRegistry, &contract, &cancel).await.unwrap();
    assert!(matches!(outcome, TxOutcome::Applied(_)));
    let job = db.fetch_job_by_ledger_id(LedgerId(7)).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn unrecognized_op_codes_are_skipped() {
    let (_db, api, _cache, contract) = setup().await;
    let tx = encode::tx_with_body(0xdead_beef, vec![0, 1, 2]);
    let outcome = api.process_transaction(ContractFamily::JobRegistry, &contract, &tx).await.unwrap();
    assert!(matches!(outcome, TxOutcome::Skipped));
}
