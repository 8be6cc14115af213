//! Many clients racing for the same seats against the in-memory replicated store.

use rand::Rng;
use snatcher_booking::{BookingServices, EngineSettings};
use snatcher_core::{
    AtomicBatch, BookingError, BookingRequest, BookingStore, ConsistencyLevel, ErrorClass,
    Reservation, SeatKey, SeatState,
};
use snatcher_store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;

const EVENT: &str = "1";
const SECTION: &str = "A";

fn services(store: &Arc<MemoryStore>, window_ms: u64, consistency: ConsistencyLevel) -> BookingServices {
    BookingServices::new(
        store.clone(),
        EngineSettings {
            arbitration_window: Duration::from_millis(window_ms),
            consistency,
        },
    )
}

fn request(user: &str, seats: &[i32]) -> BookingRequest {
    BookingRequest {
        event_id: EVENT.to_string(),
        section_id: SECTION.to_string(),
        seat_numbers: seats.to_vec(),
        user_id: user.to_string(),
        user_name: "StressBot".to_string(),
    }
}

fn seat(n: i32) -> SeatKey {
    SeatKey::new(EVENT, SECTION, n)
}

async fn race(
    services: &BookingServices,
    users: Vec<String>,
    seats: &[i32],
    max_jitter_ms: u64,
) -> Vec<(String, Result<Reservation, BookingError>)> {
    let handles: Vec<_> = users
        .into_iter()
        .map(|user| {
            let engine = Arc::clone(&services.engine);
            let request = request(&user, seats);
            tokio::spawn(async move {
                if max_jitter_ms > 0 {
                    let jitter = rand::thread_rng().gen_range(0..=max_jitter_ms);
                    tokio::time::sleep(Duration::from_millis(jitter)).await;
                }
                (user, engine.attempt_booking(&request).await)
            })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }
    outcomes
}

fn bots(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("bot_{}", i)).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_writers_produce_one_winner() {
    const CONTENDERS: usize = 8;
    let store = Arc::new(MemoryStore::default());
    store.provision_seats(EVENT, SECTION, &[900]).await.unwrap();
    store.hold_batches_until(CONTENDERS).await;
    let services = services(&store, 100, ConsistencyLevel::Quorum);

    let outcomes = race(&services, bots(CONTENDERS), &[900], 0).await;

    let winners: Vec<_> = outcomes.iter().filter(|(_, r)| r.is_ok()).collect();
    assert_eq!(winners.len(), 1);
    let (winner, reservation) = winners[0];
    assert_eq!(reservation.as_ref().unwrap().seat_numbers, vec![900]);

    for (user, outcome) in outcomes.iter().filter(|(u, _)| u != winner) {
        match outcome {
            Err(BookingError::SeatConflict { seat, winner: seen }) => {
                assert_eq!(*seat, 900);
                assert_eq!(seen.as_deref(), Some(winner.as_str()), "{} saw wrong winner", user);
            }
            other => panic!("{} expected SeatConflict, got {:?}", user, other),
        }
    }

    // Every contender got past the pre-check.
    assert_eq!(store.batches_executed(), CONTENDERS);
    let sold = store.inspect_seat(&seat(900)).await.unwrap();
    assert_eq!(sold.state(), SeatState::sold_to(winner.clone()));

    let recorded = services.recorder.list().await.unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(&recorded[0].user_id, winner);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_racers_for_seat_900() {
    let store = Arc::new(MemoryStore::default());
    store.provision_seats(EVENT, SECTION, &[900]).await.unwrap();
    store.hold_batches_until(2).await;
    let services = services(&store, 80, ConsistencyLevel::Quorum);

    let outcomes = race(&services, vec!["bot_1".into(), "bot_2".into()], &[900], 0).await;

    let (won, lost): (Vec<_>, Vec<_>) = outcomes.into_iter().partition(|(_, r)| r.is_ok());
    assert_eq!(won.len(), 1);
    assert_eq!(lost.len(), 1);

    let (winner, reservation) = &won[0];
    assert_eq!(reservation.as_ref().unwrap().seat_numbers, vec![900]);
    assert!(matches!(
        &lost[0].1,
        Err(BookingError::SeatConflict { seat: 900, winner: Some(w) }) if w == winner
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_jittered_stress_run_has_single_winner() {
    let store = Arc::new(MemoryStore::default());
    store.provision_seats(EVENT, SECTION, &[900]).await.unwrap();
    let services = services(&store, 120, ConsistencyLevel::Quorum);

    let outcomes = race(&services, bots(20), &[900], 20).await;

    assert_eq!(outcomes.iter().filter(|(_, r)| r.is_ok()).count(), 1);
    for (user, outcome) in &outcomes {
        if let Err(e) = outcome {
            assert_eq!(e.class(), ErrorClass::Conflict, "{} failed with {}", user, e);
        }
    }
    assert_eq!(services.recorder.list().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lagging_replicas_settle_inside_window() {
    let store = Arc::new(MemoryStore::new(3, Duration::from_millis(15)));
    store.provision_seats(EVENT, SECTION, &[42]).await.unwrap();
    store.hold_batches_until(4).await;
    let services = services(&store, 100, ConsistencyLevel::One);

    let outcomes = race(&services, bots(4), &[42], 0).await;

    assert_eq!(outcomes.iter().filter(|(_, r)| r.is_ok()).count(), 1);
    assert!(outcomes.iter().all(|(_, r)| match r {
        Ok(_) => true,
        Err(e) => matches!(e, BookingError::SeatConflict { seat: 42, .. }),
    }));
}

#[tokio::test]
async fn test_full_win_records_seats_in_request_order() {
    let store = Arc::new(MemoryStore::default());
    store.provision_seats(EVENT, SECTION, &[3, 1, 2]).await.unwrap();
    let services = services(&store, 10, ConsistencyLevel::Quorum);

    let reservation = services.engine.attempt_booking(&request("cli_user_1", &[3, 1, 2])).await.unwrap();
    assert_eq!(reservation.seat_numbers, vec![3, 1, 2]);

    let listed = services.recorder.list().await.unwrap();
    assert_eq!(listed, vec![reservation.clone()]);
    assert_eq!(services.recorder.get(reservation.id).await.unwrap(), reservation);
}

#[tokio::test]
async fn test_partial_win_keeps_won_seats_sold() {
    let store = Arc::new(MemoryStore::default());
    store.provision_seats(EVENT, SECTION, &[10, 11]).await.unwrap();
    store
        .inject_after_next_batch(AtomicBatch::new().claim_seat(seat(11), "rival"))
        .await;
    let services = services(&store, 10, ConsistencyLevel::Quorum);

    let err = services
        .engine
        .attempt_booking(&request("cli_user_1", &[10, 11]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BookingError::SeatConflict { seat: 11, winner: Some(ref w) } if w == "rival"
    ));
    assert_eq!(
        store.inspect_seat(&seat(10)).await.unwrap().state(),
        SeatState::sold_to("cli_user_1")
    );
    assert_eq!(
        store.inspect_seat(&seat(11)).await.unwrap().state(),
        SeatState::sold_to("rival")
    );
    assert!(services.recorder.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sold_seat_fails_fast_without_batch() {
    let store = Arc::new(MemoryStore::default());
    store.provision_seats(EVENT, SECTION, &[10, 11]).await.unwrap();
    store
        .execute_batch(&AtomicBatch::new().claim_seat(seat(11), "someone_else"), ConsistencyLevel::All)
        .await
        .unwrap();
    let batches_before = store.batches_executed();
    let services = services(&store, 10, ConsistencyLevel::Quorum);

    let err = services
        .engine
        .attempt_booking(&request("cli_user_1", &[10, 11]))
        .await
        .unwrap_err();

    assert!(matches!(err, BookingError::SeatUnavailable(11)));
    assert_eq!(store.batches_executed(), batches_before);
    assert_eq!(
        store.inspect_seat(&seat(10)).await.unwrap().state(),
        SeatState::available()
    );
}

#[tokio::test]
async fn test_cancel_then_rebook_by_other_user() {
    let store = Arc::new(MemoryStore::default());
    store.provision_seats(EVENT, SECTION, &[5, 6]).await.unwrap();
    let services = services(&store, 10, ConsistencyLevel::Quorum);

    let first = services.engine.attempt_booking(&request("cli_user_1", &[5, 6])).await.unwrap();
    let blocked = services.engine.attempt_booking(&request("cli_user_2", &[6])).await;
    assert!(matches!(blocked, Err(BookingError::SeatUnavailable(6))));

    services.cancellations.cancel(first.id).await.unwrap();
    assert!(matches!(
        services.recorder.get(first.id).await,
        Err(BookingError::NotFound(_))
    ));
    for n in [5, 6] {
        assert_eq!(store.inspect_seat(&seat(n)).await.unwrap().state(), SeatState::available());
    }

    let second = services.engine.attempt_booking(&request("cli_user_2", &[6])).await.unwrap();
    assert_eq!(second.user_id, "cli_user_2");
    assert_eq!(services.recorder.list().await.unwrap(), vec![second]);
}

#[tokio::test]
async fn test_cancel_unknown_reservation_mutates_nothing() {
    let store = Arc::new(MemoryStore::default());
    store.provision_seats(EVENT, SECTION, &[1]).await.unwrap();
    let services = services(&store, 10, ConsistencyLevel::Quorum);
    let before = store.batches_executed();

    let err = services.cancellations.cancel(uuid::Uuid::now_v7()).await.unwrap_err();

    assert_eq!(err.class(), ErrorClass::NotFound);
    assert_eq!(store.batches_executed(), before);
    assert_eq!(store.inspect_seat(&seat(1)).await.unwrap().state(), SeatState::available());
}

#[tokio::test]
async fn test_lost_quorum_is_retryable_write_failure() {
    let store = Arc::new(MemoryStore::default());
    store.provision_seats(EVENT, SECTION, &[7]).await.unwrap();
    store.set_replica_up(0, false);
    store.set_replica_up(1, false);
    let services = services(&store, 10, ConsistencyLevel::Quorum);

    let err = services.engine.attempt_booking(&request("cli_user_1", &[7])).await.unwrap_err();
    assert!(matches!(err, BookingError::WriteFailure(_)));
    assert!(err.is_retryable());

    store.set_replica_up(0, true);
    store.set_replica_up(1, true);
    let reservation = services.engine.attempt_booking(&request("cli_user_1", &[7])).await.unwrap();
    assert_eq!(reservation.seat_numbers, vec![7]);
}

#[tokio::test]
async fn test_failed_verification_read_leaves_claim_in_place() {
    let store = Arc::new(MemoryStore::default());
    store.provision_seats(EVENT, SECTION, &[8]).await.unwrap();
    // First read is the pre-check, second is the verification.
    store.fail_next_seat_reads(2);
    let services = services(&store, 10, ConsistencyLevel::Quorum);

    let err = services.engine.attempt_booking(&request("cli_user_1", &[8])).await.unwrap_err();

    assert!(matches!(err, BookingError::VerificationFailure { seat: 8, .. }));
    assert!(!err.is_retryable());
    assert_eq!(
        store.inspect_seat(&seat(8)).await.unwrap().state(),
        SeatState::sold_to("cli_user_1")
    );
}

#[tokio::test]
async fn test_failed_record_orphans_sold_seats() {
    let store = Arc::new(MemoryStore::default());
    store.provision_seats(EVENT, SECTION, &[12]).await.unwrap();
    store.fail_next_reservation_writes(1);
    let services = services(&store, 10, ConsistencyLevel::Quorum);

    let err = services.engine.attempt_booking(&request("cli_user_1", &[12])).await.unwrap_err();

    assert!(matches!(err, BookingError::RecordFailure(_)));
    assert_eq!(
        store.inspect_seat(&seat(12)).await.unwrap().state(),
        SeatState::sold_to("cli_user_1")
    );
    assert!(services.recorder.list().await.unwrap().is_empty());
}
