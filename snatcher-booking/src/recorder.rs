use snatcher_core::{BookingError, BookingRequest, BookingResult, BookingStore, ConsistencyLevel, Reservation};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Persists and serves the audit log of winning requests.
#[derive(Clone)]
pub struct ReservationRecorder {
    store: Arc<dyn BookingStore>,
    consistency: ConsistencyLevel,
}

impl ReservationRecorder {
    pub fn new(store: Arc<dyn BookingStore>, consistency: ConsistencyLevel) -> Self {
        Self { store, consistency }
    }

    /// Stores the record of a request that won every seat.
    ///
    /// Runs after the seats are already SOLD, so a failure here leaves them
    /// SOLD with no matching record. That is reported, never repaired.
    pub async fn record(&self, request: &BookingRequest) -> BookingResult<Reservation> {
        let reservation = Reservation::for_request(request);

        match self.store.insert_reservation(&reservation, self.consistency).await {
            Ok(()) => {
                info!(
                    "Reservation {} recorded: {} took seats {:?} in {}:{}",
                    reservation.id,
                    reservation.user_id,
                    reservation.seat_numbers,
                    reservation.event_id,
                    reservation.section_id
                );
                Ok(reservation)
            }
            Err(e) => {
                error!(
                    "Orphaned seats {:?} in {}:{} are SOLD to {} without a reservation record: {}",
                    request.seat_numbers, request.event_id, request.section_id, request.user_id, e
                );
                Err(BookingError::RecordFailure(e))
            }
        }
    }

    /// Every reservation, oldest first.
    pub async fn list(&self) -> BookingResult<Vec<Reservation>> {
        let mut reservations = self.store.list_reservations(self.consistency).await?;
        reservations.sort_by_key(|r| r.id);
        Ok(reservations)
    }

    pub async fn get(&self, id: Uuid) -> BookingResult<Reservation> {
        self.store
            .get_reservation(id, self.consistency)
            .await?
            .ok_or(BookingError::NotFound(id))
    }
}
