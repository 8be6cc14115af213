pub mod cancellation;
pub mod engine;
pub mod recorder;

use snatcher_core::BookingStore;
use std::sync::Arc;

pub use cancellation::CancellationManager;
pub use engine::{BookingEngine, EngineSettings};
pub use recorder::ReservationRecorder;

/// The three booking components wired over one store and one consistency level.
#[derive(Clone)]
pub struct BookingServices {
    pub engine: Arc<BookingEngine>,
    pub recorder: ReservationRecorder,
    pub cancellations: Arc<CancellationManager>,
}

impl BookingServices {
    pub fn new(store: Arc<dyn BookingStore>, settings: EngineSettings) -> Self {
        let recorder = ReservationRecorder::new(Arc::clone(&store), settings.consistency);
        Self {
            engine: Arc::new(BookingEngine::new(Arc::clone(&store), recorder.clone(), settings)),
            cancellations: Arc::new(CancellationManager::new(store, settings.consistency)),
            recorder,
        }
    }
}
