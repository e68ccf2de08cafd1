//! Scheduler cycle tests with a scripted chain reader: cursor bookkeeping, overlap prevention and transient
//! failure handling.
use std::time::Duration;

use gig_market_engine::{
    cache::{CacheCoordinator, ReadCache},
    db_types::{ContractAddress, JobStatus, LedgerId},
    events::EventProducers,
    sync::{ContractFamily, SyncApi, SyncConfig, SyncOutcome, SyncScheduler, TrackedContracts},
    test_utils::{
        encode,
        mocks::MockChainReader,
        prepare_env::{prepare_test_env, random_db_path},
    },
    MarketplaceDatabase,
    SqliteDatabase,
};

const EMPLOYER: [u8; 32] = [0xaa; 32];
const WORKER: [u8; 32] = [0xbb; 32];

fn contracts() -> TrackedContracts {
    TrackedContracts::new(
        ContractAddress::from("job_registry_contract"),
        ContractAddress::from("escrow_contract"),
        ContractAddress::from("reputation_contract"),
    )
}

async fn scheduler_with(reader: MockChainReader) -> (SqliteDatabase, SyncScheduler<SqliteDatabase, MockChainReader>) {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    let api = SyncApi::new(db.clone(), EventProducers::default(), CacheCoordinator::new(ReadCache::default()));
    let scheduler = SyncScheduler::new(api, reader, SyncConfig::new(contracts()));
    (db, scheduler)
}

#[tokio::test]
async fn a_cycle_applies_transactions_and_advances_the_cursors() {
    let reader = MockChainReader::new();
    let (db, scheduler) = scheduler_with(reader.clone()).await;

    let job_txs = vec![encode::job_created(1, &EMPLOYER, 2_000, 4, "design"), encode::worker_assigned(1, &WORKER)];
    let last_job_time = job_txs.last().unwrap().logical_time;
    reader.script(scheduler.config().contracts.job_registry(), job_txs).await;
    let escrow_txs = vec![encode::escrow_created(10, 1, 2_000), encode::escrow_funded(10)];
    let last_escrow_time = escrow_txs.last().unwrap().logical_time;
    reader.script(scheduler.config().contracts.escrow(), escrow_txs).await;

    let outcome = scheduler.run_cycle().await;
    assert!(matches!(outcome, SyncOutcome::Completed { applied: 4, skipped: 0, rejected: 0 }), "got {outcome:?}");

    let job = db.fetch_job_by_ledger_id(LedgerId(1)).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Assigned);

    let cursor = db.fetch_cursor(scheduler.config().contracts.job_registry()).await.unwrap().unwrap();
    assert_eq!(cursor.last_position as u64, last_job_time);
    let cursor = db.fetch_cursor(scheduler.config().contracts.escrow()).await.unwrap().unwrap();
    assert_eq!(cursor.last_position as u64, last_escrow_time);

    let status = scheduler.status().await;
    assert!(!status.is_indexing);
    assert_eq!(status.state(ContractFamily::JobRegistry).last_position, Some(last_job_time));
    assert!(status.last_success_at.is_some());

    // An idle follow-up cycle applies nothing and leaves the cursors alone
    let outcome = scheduler.run_cycle().await;
    assert!(matches!(outcome, SyncOutcome::Completed { applied: 0, .. }));
    let cursor = db.fetch_cursor(scheduler.config().contracts.job_registry()).await.unwrap().unwrap();
    assert_eq!(cursor.last_position as u64, last_job_time);
}

#[tokio::test]
async fn rejected_transactions_still_advance_the_cursor() {
    let reader = MockChainReader::new();
    let (db, scheduler) = scheduler_with(reader.clone()).await;

    // Assignment for a job that was never created: rejected, never retried.
    let tx = encode::worker_assigned(99, &WORKER);
    let time = tx.logical_time;
    reader.script(scheduler.config().contracts.job_registry(), vec![tx]).await;

    let outcome = scheduler.run_cycle().await;
    assert!(matches!(outcome, SyncOutcome::Completed { applied: 0, skipped: 0, rejected: 1 }));
    let cursor = db.fetch_cursor(scheduler.config().contracts.job_registry()).await.unwrap().unwrap();
    assert_eq!(cursor.last_position as u64, time, "a rejection is stepped over, not re-fetched forever");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_trigger_while_a_cycle_runs_reports_already_running() {
    let reader = MockChainReader::new().with_delay(Duration::from_millis(200));
    let (_db, scheduler) = scheduler_with(reader).await;

    let background = scheduler.clone();
    let handle = tokio::spawn(async move { background.run_cycle().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(scheduler.status().await.is_indexing);
    let outcome = scheduler.trigger_sync().await;
    assert!(matches!(outcome, SyncOutcome::AlreadyRunning));

    let first = handle.await.unwrap();
    assert!(matches!(first, SyncOutcome::Completed { .. }));
    // Once the cycle has finished the trigger works again
    let outcome = scheduler.trigger_sync().await;
    assert!(matches!(outcome, SyncOutcome::Completed { .. }));
}

#[tokio::test]
async fn transient_fetch_errors_leave_the_cursor_for_the_next_tick() {
    let reader = MockChainReader::new();
    let (db, scheduler) = scheduler_with(reader.clone()).await;
    reader.script(scheduler.config().contracts.job_registry(), vec![encode::job_created(1, &EMPLOYER, 100, 1, "qa")]).await;

    // All three contract fetches fail this cycle
    reader.fail_next(3);
    scheduler.run_cycle().await;
    assert!(db.fetch_cursor(scheduler.config().contracts.job_registry()).await.unwrap().is_none());
    let status = scheduler.status().await;
    assert!(status.state(ContractFamily::JobRegistry).last_error.is_some());
    assert!(status.last_success_at.is_none());

    // Next tick the network is back and the window is re-fetched
    let outcome = scheduler.run_cycle().await;
    assert!(matches!(outcome, SyncOutcome::Completed { applied: 1, .. }));
    assert!(db.fetch_cursor(scheduler.config().contracts.job_registry()).await.unwrap().is_some());
    let status = scheduler.status().await;
    assert!(status.state(ContractFamily::JobRegistry).last_error.is_none());
    assert!(status.last_success_at.is_some());
}
