//! Notification dispatcher tests: claim-deliver-mark, retry with backoff, and dead-lettering.
use chrono::Duration;
use gig_market_engine::{
    cache::{CacheCoordinator, ReadCache},
    db_types::{ContractAddress, NotificationStatus},
    dispatch::{DispatchConfig, NotificationDispatcher},
    events::EventProducers,
    sync::{ContractFamily, SyncApi},
    test_utils::{
        encode,
        mocks::MemoryDelivery,
        prepare_env::{prepare_test_env, random_db_path},
    },
    MarketplaceDatabase,
    SqliteDatabase,
};

const EMPLOYER: [u8; 32] = [0xaa; 32];
const WORKER: [u8; 32] = [0xbb; 32];

/// A database with two pending notifications (worker assignment notifies both parties).
async fn db_with_pending_notifications() -> SqliteDatabase {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    let api = SyncApi::new(db.clone(), EventProducers::default(), CacheCoordinator::new(ReadCache::default()));
    let contract = ContractAddress::from("job_registry_contract");
    let tx = encode::job_created(1, &EMPLOYER, 1_000, 4, "design");
    api.process_transaction(ContractFamily::JobRegistry, &contract, &tx).await.unwrap();
    let tx = encode::worker_assigned(1, &WORKER);
    api.process_transaction(ContractFamily::JobRegistry, &contract, &tx).await.unwrap();
    db
}

fn config() -> DispatchConfig {
    DispatchConfig { base_backoff: Duration::zero(), ..DispatchConfig::default() }
}

#[tokio::test]
async fn delivers_pending_notifications_and_marks_them_sent() {
    let db = db_with_pending_notifications().await;
    let delivery = MemoryDelivery::new();
    let dispatcher = NotificationDispatcher::new(db.clone(), delivery.clone(), config());

    let sent = dispatcher.run_once().await.unwrap();
    assert_eq!(sent, 2);
    let delivered = delivery.delivered().await;
    assert_eq!(delivered.len(), 2);
    for n in &delivered {
        let stored = db.fetch_notification(n.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Sent);
    }

    // Nothing left to claim
    assert_eq!(dispatcher.run_once().await.unwrap(), 0);
}

#[tokio::test]
async fn failed_delivery_is_retried_until_it_succeeds() {
    let db = db_with_pending_notifications().await;
    // The first attempt fails; with a zero base backoff the retry is due immediately.
    let delivery = MemoryDelivery::failing(1);
    let dispatcher = NotificationDispatcher::new(db.clone(), delivery.clone(), config());

    let first_pass = dispatcher.run_once().await.unwrap();
    assert_eq!(first_pass, 1, "one of the two deliveries fails on the first pass");
    let second_pass = dispatcher.run_once().await.unwrap();
    assert_eq!(second_pass, 1, "the failed one is retried and succeeds");

    let delivered = delivery.delivered().await;
    assert_eq!(delivered.len(), 2);
    for n in &delivered {
        let stored = db.fetch_notification(n.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Sent);
    }
}

#[tokio::test]
async fn exhausted_retry_budget_dead_letters_the_notification() {
    let db = db_with_pending_notifications().await;
    let delivery = MemoryDelivery::failing(usize::MAX);
    let config = DispatchConfig { max_attempts: 2, base_backoff: Duration::zero(), ..DispatchConfig::default() };
    let dispatcher = NotificationDispatcher::new(db.clone(), delivery.clone(), config);

    assert_eq!(dispatcher.run_once().await.unwrap(), 0);
    assert_eq!(dispatcher.run_once().await.unwrap(), 0);

    // Both notifications have burned their two attempts and are dead-lettered, never silently dropped.
    let remaining = db.claim_due_notifications(10, Duration::seconds(60)).await.unwrap();
    assert!(remaining.is_empty(), "failed notifications must not stay claimable");
    for id in [1, 2] {
        let stored = db.fetch_notification(id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Failed);
        assert_eq!(stored.retry_count, 2);
    }
    assert!(delivery.delivered().await.is_empty());
}
