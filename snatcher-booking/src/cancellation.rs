use snatcher_core::{
    AtomicBatch, BatchWriter, BookingError, BookingResult, BookingStore, ConsistencyLevel,
};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Undoes a recorded booking: drops the record and frees its seats in one
/// atomic batch.
pub struct CancellationManager {
    store: Arc<dyn BookingStore>,
    batches: BatchWriter,
    consistency: ConsistencyLevel,
}

impl CancellationManager {
    pub fn new(store: Arc<dyn BookingStore>, consistency: ConsistencyLevel) -> Self {
        Self {
            batches: BatchWriter::new(Arc::clone(&store), consistency),
            store,
            consistency,
        }
    }

    /// Cancels the reservation `id`.
    ///
    /// The record delete and every seat release land together or not at all.
    /// A failed batch may be retried with the same id.
    pub async fn cancel(&self, id: Uuid) -> BookingResult<()> {
        let reservation = self
            .store
            .get_reservation(id, self.consistency)
            .await?
            .ok_or(BookingError::NotFound(id))?;

        let batch = reservation
            .seat_keys()
            .fold(AtomicBatch::new().delete_reservation(id), |batch, key| batch.release_seat(key));

        if let Err(e) = self.batches.commit(&batch).await {
            warn!("Cancellation of reservation {} failed: {}", id, e);
            return Err(BookingError::WriteFailure(e));
        }

        info!(
            "Reservation {} cancelled, seats {:?} in {}:{} released",
            id, reservation.seat_numbers, reservation.event_id, reservation.section_id
        );
        Ok(())
    }
}
