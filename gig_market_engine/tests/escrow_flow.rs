//! The full escrow lifecycle against a real database: create, fund, lock, complete, plus the dispute path,
//! state-machine closure and the rating flow that only opens up after completion.
use chrono::Duration;
use gig_market_engine::{
    cache::{CacheCoordinator, ReadCache},
    db_types::{ContractAddress, EscrowStatus, JobStatus, LedgerId, NotificationKind},
    events::EventProducers,
    sync::{ContractFamily, SyncApi, TxOutcome},
    test_utils::{
        encode,
        prepare_env::{prepare_test_env, random_db_path},
    },
    MarketplaceDatabase,
    SqliteDatabase,
};

const EMPLOYER: [u8; 32] = [0xaa; 32];
const WORKER: [u8; 32] = [0xbb; 32];

struct Harness {
    db: SqliteDatabase,
    api: SyncApi<SqliteDatabase>,
    jobs: ContractAddress,
    escrows: ContractAddress,
    ratings: ContractAddress,
}

impl Harness {
    async fn new() -> Self {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
        let api = SyncApi::new(db.clone(), EventProducers::default(), CacheCoordinator::new(ReadCache::default()));
        Self {
            db,
            api,
            jobs: ContractAddress::from("job_registry_contract"),
            escrows: ContractAddress::from("escrow_contract"),
            ratings: ContractAddress::from("reputation_contract"),
        }
    }

    /// A posted job with an assigned worker, ready for escrow events.
    async fn assigned_job(&self, ledger_id: u64) {
        let tx = encode::job_created(ledger_id, &EMPLOYER, 5_000_000_000, 8, "design");
        self.apply(ContractFamily::JobRegistry, &self.jobs, &tx).await;
        let tx = encode::worker_assigned(ledger_id, &WORKER);
        self.apply(ContractFamily::JobRegistry, &self.jobs, &tx).await;
    }

    async fn apply(
        &self,
        family: ContractFamily,
        contract: &ContractAddress,
        tx: &gig_market_engine::traits::RawTransaction,
    ) -> TxOutcome {
        let outcome = self.api.process_transaction(family, contract, tx).await.unwrap();
        assert!(
            matches!(outcome, TxOutcome::Applied(_)),
            "expected the event to apply, got {outcome:?}"
        );
        outcome
    }

    async fn apply_expect_rejection(
        &self,
        family: ContractFamily,
        contract: &ContractAddress,
        tx: &gig_market_engine::traits::RawTransaction,
    ) {
        let outcome = self.api.process_transaction(family, contract, tx).await.unwrap();
        assert!(matches!(outcome, TxOutcome::Rejected(_)), "expected a rejection, got {outcome:?}");
    }

    async fn drain_notifications(&self) -> Vec<gig_market_engine::db_types::Notification> {
        self.db.claim_due_notifications(50, Duration::seconds(600)).await.unwrap()
    }
}

#[tokio::test]
async fn happy_path_releases_payment_exactly_once() {
    let h = Harness::new().await;
    h.assigned_job(1).await;
    h.apply(ContractFamily::Escrow, &h.escrows, &encode::escrow_created(10, 1, 5_000_000_000)).await;
    h.apply(ContractFamily::Escrow, &h.escrows, &encode::escrow_funded(10)).await;
    h.apply(ContractFamily::Escrow, &h.escrows, &encode::escrow_locked(10)).await;

    let escrow = h.db.fetch_escrow_by_ledger_id(LedgerId(10)).await.unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Locked);
    assert!(escrow.funded_at.is_some());
    assert!(escrow.locked_at.is_some());
    h.drain_notifications().await;

    let complete = encode::escrow_completed(10, true, true);
    h.apply(ContractFamily::Escrow, &h.escrows, &complete).await;

    let escrow = h.db.fetch_escrow_by_ledger_id(LedgerId(10)).await.unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Completed);
    assert!(escrow.employer_confirmed && escrow.worker_confirmed);
    assert!(escrow.completed_at.is_some());

    let job = h.db.fetch_job_by_ledger_id(LedgerId(1)).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let released: Vec<_> = h
        .drain_notifications()
        .await
        .into_iter()
        .filter(|n| n.kind == NotificationKind::PaymentReleased)
        .collect();
    assert_eq!(released.len(), 2, "exactly one payment-released notification per party");

    let employer = h.db.fetch_user(job.employer_id).await.unwrap().unwrap();
    let worker = h.db.fetch_user(job.worker_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(employer.jobs_completed, 1);
    assert_eq!(worker.jobs_completed, 1);

    // Replaying the completion changes nothing
    let replay = h.api.process_transaction(ContractFamily::Escrow, &h.escrows, &complete).await.unwrap();
    assert!(matches!(replay, TxOutcome::Replayed));
    let employer = h.db.fetch_user(job.employer_id).await.unwrap().unwrap();
    assert_eq!(employer.jobs_completed, 1);
    assert!(h.drain_notifications().await.is_empty());
}

#[tokio::test]
async fn confirmation_only_completion_from_funded_is_allowed() {
    let h = Harness::new().await;
    h.assigned_job(2).await;
    h.apply(ContractFamily::Escrow, &h.escrows, &encode::escrow_created(20, 2, 1_000)).await;
    h.apply(ContractFamily::Escrow, &h.escrows, &encode::escrow_funded(20)).await;
    h.apply(ContractFamily::Escrow, &h.escrows, &encode::escrow_completed(20, true, true)).await;
    let escrow = h.db.fetch_escrow_by_ledger_id(LedgerId(20)).await.unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Completed);
}

#[tokio::test]
async fn completion_requires_both_confirmations() {
    let h = Harness::new().await;
    h.assigned_job(3).await;
    h.apply(ContractFamily::Escrow, &h.escrows, &encode::escrow_created(30, 3, 1_000)).await;
    h.apply(ContractFamily::Escrow, &h.escrows, &encode::escrow_funded(30)).await;
    h.apply_expect_rejection(ContractFamily::Escrow, &h.escrows, &encode::escrow_completed(30, true, false)).await;
    let escrow = h.db.fetch_escrow_by_ledger_id(LedgerId(30)).await.unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Funded, "a rejected completion must not move the escrow");
}

#[tokio::test]
async fn terminal_escrows_reject_further_transitions() {
    let h = Harness::new().await;
    h.assigned_job(4).await;
    h.apply(ContractFamily::Escrow, &h.escrows, &encode::escrow_created(40, 4, 1_000)).await;
    h.apply(ContractFamily::Escrow, &h.escrows, &encode::escrow_funded(40)).await;
    h.apply(ContractFamily::Escrow, &h.escrows, &encode::escrow_locked(40)).await;
    h.apply(ContractFamily::Escrow, &h.escrows, &encode::escrow_completed(40, true, true)).await;

    // Completed -> Funded and Completed -> Locked are both illegal
    h.apply_expect_rejection(ContractFamily::Escrow, &h.escrows, &encode::escrow_funded(40)).await;
    h.apply_expect_rejection(ContractFamily::Escrow, &h.escrows, &encode::escrow_locked(40)).await;
}

#[tokio::test]
async fn dispute_records_the_reason_and_notifies() {
    let h = Harness::new().await;
    h.assigned_job(5).await;
    h.apply(ContractFamily::Escrow, &h.escrows, &encode::escrow_created(50, 5, 1_000)).await;
    h.apply(ContractFamily::Escrow, &h.escrows, &encode::escrow_funded(50)).await;
    h.drain_notifications().await;
    h.apply(ContractFamily::Escrow, &h.escrows, &encode::escrow_disputed(50, "work never started")).await;

    let escrow = h.db.fetch_escrow_by_ledger_id(LedgerId(50)).await.unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Disputed);
    assert!(escrow.is_disputed);
    assert_eq!(escrow.dispute_reason.as_deref(), Some("work never started"));
    let disputes: Vec<_> = h
        .drain_notifications()
        .await
        .into_iter()
        .filter(|n| n.kind == NotificationKind::EscrowDisputed)
        .collect();
    assert_eq!(disputes.len(), 2);

    // Disputes can only be raised while funds are in play
    h.apply_expect_rejection(ContractFamily::Escrow, &h.escrows, &encode::escrow_disputed(50, "again")).await;
}

#[tokio::test]
async fn ratings_only_after_completion_and_once_per_rater() {
    let h = Harness::new().await;
    h.assigned_job(6).await;
    h.apply(ContractFamily::Escrow, &h.escrows, &encode::escrow_created(60, 6, 1_000)).await;
    h.apply(ContractFamily::Escrow, &h.escrows, &encode::escrow_funded(60)).await;

    // Too early: the job is not Completed yet
    let early = encode::rating_submitted(6, &EMPLOYER, &WORKER, 5, "great work");
    h.apply_expect_rejection(ContractFamily::Reputation, &h.ratings, &early).await;

    h.apply(ContractFamily::Escrow, &h.escrows, &encode::escrow_completed(60, true, true)).await;
    h.apply(ContractFamily::Reputation, &h.ratings, &encode::rating_submitted(6, &EMPLOYER, &WORKER, 5, "great")).await;

    let job = h.db.fetch_job_by_ledger_id(LedgerId(6)).await.unwrap().unwrap();
    let worker = h.db.fetch_user(job.worker_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(worker.rating_count, 1);
    assert!((worker.reputation_score - 5.0).abs() < f64::EPSILON);

    // The same rater cannot rate the job twice
    let dup = encode::rating_submitted(6, &EMPLOYER, &WORKER, 1, "changed my mind");
    h.apply_expect_rejection(ContractFamily::Reputation, &h.ratings, &dup).await;
    let worker = h.db.fetch_user(job.worker_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(worker.rating_count, 1);

    // The other party still can
    h.apply(ContractFamily::Reputation, &h.ratings, &encode::rating_submitted(6, &WORKER, &EMPLOYER, 4, "")).await;
    let employer = h.db.fetch_user(job.employer_id).await.unwrap().unwrap();
    assert_eq!(employer.rating_count, 1);
    assert!((employer.reputation_score - 4.0).abs() < f64::EPSILON);
}
