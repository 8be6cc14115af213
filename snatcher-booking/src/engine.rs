//! Optimistic seat claiming.
//!
//! The store has no compare-and-swap, so a claim cannot be made conditional on
//! the seat being free. Instead every contender writes its claim
//! unconditionally, waits out the arbitration window, and reads the seat
//! back. Last-writer-wins leaves exactly one occupant visible per seat, and
//! only the contender that sees itself there has won.
//!
//! A request for several seats must win all of them. Seats won inside a
//! request that loses another seat stay SOLD under the requester; nothing
//! rolls them back.

use snatcher_core::{
    AtomicBatch, BatchWriter, BookingError, BookingRequest, BookingResult, BookingStore,
    ConsistencyLevel, Reservation, SeatKey, SeatStatus, StoreError,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::recorder::ReservationRecorder;

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Wait between the claim batch and the verification read. Shorter than
    /// the store's replication latency means spurious conflicts or two winners.
    pub arbitration_window: Duration,
    /// Used for the pre-check, the claim batch and the verification read alike.
    pub consistency: ConsistencyLevel,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            arbitration_window: Duration::from_millis(200),
            consistency: ConsistencyLevel::Quorum,
        }
    }
}

pub struct BookingEngine {
    store: Arc<dyn BookingStore>,
    batches: BatchWriter,
    recorder: ReservationRecorder,
    settings: EngineSettings,
}

impl BookingEngine {
    pub fn new(
        store: Arc<dyn BookingStore>,
        recorder: ReservationRecorder,
        settings: EngineSettings,
    ) -> Self {
        Self {
            batches: BatchWriter::new(Arc::clone(&store), settings.consistency),
            store,
            recorder,
            settings,
        }
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Claims every requested seat or fails.
    ///
    /// `WriteFailure` is safe to retry as a fresh attempt. `VerificationFailure`
    /// is not: the claim may already be in place.
    pub async fn attempt_booking(&self, request: &BookingRequest) -> BookingResult<Reservation> {
        request.validate()?;
        let seats: Vec<SeatKey> = request.seat_keys().collect();

        self.pre_check(&seats).await?;

        let batch = seats
            .iter()
            .fold(AtomicBatch::new(), |batch, key| batch.claim_seat(key.clone(), &request.user_id));
        self.batches
            .commit(&batch)
            .await
            .map_err(BookingError::WriteFailure)?;

        tokio::time::sleep(self.settings.arbitration_window).await;

        self.verify(&seats, &request.user_id).await?;

        info!(
            "{} won seats {:?} in {}:{}",
            request.user_id, request.seat_numbers, request.event_id, request.section_id
        );
        self.recorder.record(request).await
    }

    /// Fails fast on a seat already seen SOLD. A stale read can miss a sale, and
    /// a failed read proves nothing, so neither stops the attempt.
    async fn pre_check(&self, seats: &[SeatKey]) -> BookingResult<()> {
        for key in seats {
            match self.store.read_seat(key, self.settings.consistency).await {
                Ok(Some(state)) if state.status == SeatStatus::Sold => {
                    info!("Seat {} already SOLD, rejecting before write", key);
                    return Err(BookingError::SeatUnavailable(key.seat_number));
                }
                Ok(_) => {}
                Err(e) => debug!("Pre-check read of seat {} failed, proceeding: {}", key, e),
            }
        }
        Ok(())
    }

    /// Decides the winner of each seat from the converged read-back.
    async fn verify(&self, seats: &[SeatKey], user_id: &str) -> BookingResult<()> {
        for key in seats {
            let state = self
                .store
                .read_seat(key, self.settings.consistency)
                .await
                .map_err(|source| BookingError::VerificationFailure {
                    seat: key.seat_number,
                    source,
                })?
                .ok_or_else(|| BookingError::VerificationFailure {
                    seat: key.seat_number,
                    source: StoreError::Corrupt(format!("seat {} missing after claim", key)),
                })?;

            if !state.is_held_by(user_id) {
                info!(
                    "{} lost seat {} to {}",
                    user_id,
                    key,
                    state.occupant.as_deref().unwrap_or("nobody")
                );
                return Err(BookingError::SeatConflict {
                    seat: key.seat_number,
                    winner: state.occupant,
                });
            }
        }
        Ok(())
    }
}
