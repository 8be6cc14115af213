use snatcher_booking::{BookingEngine, BookingServices, CancellationManager, ReservationRecorder};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BookingEngine>,
    pub recorder: ReservationRecorder,
    pub cancellations: Arc<CancellationManager>,
}

impl From<BookingServices> for AppState {
    fn from(services: BookingServices) -> Self {
        Self {
            engine: services.engine,
            recorder: services.recorder,
            cancellations: services.cancellations,
        }
    }
}
