use async_trait::async_trait;
use uuid::Uuid;

use crate::batch::AtomicBatch;
use crate::consistency::ConsistencyLevel;
use crate::error::StoreResult;
use crate::models::{Reservation, SeatKey, SeatState};

/// Replicated seat and reservation storage.
///
/// Writes resolve by last-writer-wins. Batches are atomic but not isolated, and
/// there is deliberately no conditional write: a claim never checks what it
/// overwrites.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Point read of a seat's (status, occupant). `None` when the row does not exist.
    async fn read_seat(
        &self,
        key: &SeatKey,
        consistency: ConsistencyLevel,
    ) -> StoreResult<Option<SeatState>>;

    /// Records every statement of `batch` as one unit.
    async fn execute_batch(
        &self,
        batch: &AtomicBatch,
        consistency: ConsistencyLevel,
    ) -> StoreResult<()>;

    async fn get_reservation(
        &self,
        id: Uuid,
        consistency: ConsistencyLevel,
    ) -> StoreResult<Option<Reservation>>;

    async fn insert_reservation(
        &self,
        reservation: &Reservation,
        consistency: ConsistencyLevel,
    ) -> StoreResult<()>;

    async fn list_reservations(
        &self,
        consistency: ConsistencyLevel,
    ) -> StoreResult<Vec<Reservation>>;

    /// Creates missing seats of a section as AVAILABLE. Existing rows are left
    /// alone. Returns how many seats were created.
    async fn provision_seats(
        &self,
        event_id: &str,
        section_id: &str,
        seat_numbers: &[i32],
    ) -> StoreResult<usize>;

    /// Releases the connection. Later calls fail with `StoreError::Closed`.
    async fn close(&self) -> StoreResult<()>;
}
