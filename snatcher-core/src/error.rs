use uuid::Uuid;

/// Failures reported by a `BookingStore` backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Not enough replicas: required {required}, alive {alive}")]
    Unavailable { required: usize, alive: usize },

    #[error("Store operation timed out: {0}")]
    Timeout(String),

    #[error("Store connection is closed")]
    Closed,

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        StoreError::Backend(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Coarse outcome classes the presentation layer maps to user-facing answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Conflict,
    BadRequest,
    NotFound,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("conflict: seat {0} is already permanently SOLD")]
    SeatUnavailable(i32),

    #[error("Seat batch write failed: {0}")]
    WriteFailure(#[source] StoreError),

    #[error("Verify read failed for seat {seat}: {source}")]
    VerificationFailure {
        seat: i32,
        #[source]
        source: StoreError,
    },

    #[error("conflict: seat {seat} lost to {}", .winner.as_deref().unwrap_or("nobody"))]
    SeatConflict { seat: i32, winner: Option<String> },

    #[error("Reservation not found: {0}")]
    NotFound(Uuid),

    #[error("Reservation could not be recorded: {0}")]
    RecordFailure(#[source] StoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BookingError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BookingError::SeatUnavailable(_) | BookingError::SeatConflict { .. } => ErrorClass::Conflict,
            BookingError::InvalidRequest(_) => ErrorClass::BadRequest,
            BookingError::NotFound(_) => ErrorClass::NotFound,
            BookingError::WriteFailure(_)
            | BookingError::VerificationFailure { .. }
            | BookingError::RecordFailure(_)
            | BookingError::Store(_) => ErrorClass::Internal,
        }
    }

    /// Whether resubmitting the identical request is safe. A retry is always a fresh race.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::WriteFailure(_) | BookingError::Store(_))
    }
}

pub type BookingResult<T> = Result<T, BookingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(BookingError::SeatUnavailable(3).class(), ErrorClass::Conflict);
        let conflict = BookingError::SeatConflict { seat: 3, winner: Some("bot_7".into()) };
        assert_eq!(conflict.class(), ErrorClass::Conflict);
        assert_eq!(BookingError::InvalidRequest("x".into()).class(), ErrorClass::BadRequest);
        assert_eq!(BookingError::NotFound(Uuid::nil()).class(), ErrorClass::NotFound);
        assert_eq!(BookingError::WriteFailure(StoreError::Closed).class(), ErrorClass::Internal);
    }

    #[test]
    fn test_only_unambiguous_failures_are_retryable() {
        assert!(BookingError::WriteFailure(StoreError::Closed).is_retryable());
        let ambiguous = BookingError::VerificationFailure { seat: 1, source: StoreError::Closed };
        assert!(!ambiguous.is_retryable());
        assert!(!BookingError::SeatConflict { seat: 1, winner: None }.is_retryable());
    }

    #[test]
    fn test_conflict_messages_name_the_winner() {
        let err = BookingError::SeatConflict { seat: 900, winner: Some("bot_3".into()) };
        assert_eq!(err.to_string(), "conflict: seat 900 lost to bot_3");
        let err = BookingError::SeatConflict { seat: 900, winner: None };
        assert_eq!(err.to_string(), "conflict: seat 900 lost to nobody");
    }
}
