pub mod batch;
pub mod consistency;
pub mod error;
pub mod models;
pub mod repository;

pub use batch::{AtomicBatch, BatchStatement, BatchWriter};
pub use consistency::ConsistencyLevel;
pub use error::{BookingError, BookingResult, ErrorClass, StoreError, StoreResult};
pub use models::{BookingRequest, PartitionKey, Reservation, Seat, SeatKey, SeatState, SeatStatus};
pub use repository::BookingStore;
