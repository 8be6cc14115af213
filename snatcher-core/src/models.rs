use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::BookingError;

/// Sale state of a single seat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Available,
    Sold,
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeatStatus::Available => write!(f, "AVAILABLE"),
            SeatStatus::Sold => write!(f, "SOLD"),
        }
    }
}

impl FromStr for SeatStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(SeatStatus::Available),
            "SOLD" => Ok(SeatStatus::Sold),
            other => Err(format!("unknown seat status: {}", other)),
        }
    }
}

/// Partition a seat lives in. Seats of one section share a partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub event_id: String,
    pub section_id: String,
}

/// Composite primary key of a seat row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeatKey {
    pub event_id: String,
    pub section_id: String,
    pub seat_number: i32,
}

impl SeatKey {
    pub fn new(event_id: impl Into<String>, section_id: impl Into<String>, seat_number: i32) -> Self {
        Self {
            event_id: event_id.into(),
            section_id: section_id.into(),
            seat_number,
        }
    }

    pub fn partition(&self) -> PartitionKey {
        PartitionKey {
            event_id: self.event_id.clone(),
            section_id: self.section_id.clone(),
        }
    }
}

impl fmt::Display for SeatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.event_id, self.section_id, self.seat_number)
    }
}

/// The (status, occupant) pair the booking protocol reads back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatState {
    pub status: SeatStatus,
    pub occupant: Option<String>,
}

impl SeatState {
    pub fn available() -> Self {
        Self {
            status: SeatStatus::Available,
            occupant: None,
        }
    }

    pub fn sold_to(user_id: impl Into<String>) -> Self {
        Self {
            status: SeatStatus::Sold,
            occupant: Some(user_id.into()),
        }
    }

    /// True when the seat is SOLD and `user_id` is the visible occupant.
    pub fn is_held_by(&self, user_id: &str) -> bool {
        self.status == SeatStatus::Sold && self.occupant.as_deref() == Some(user_id)
    }
}

/// A full seat row as persisted by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub key: SeatKey,
    pub status: SeatStatus,
    pub occupant: Option<String>,
    pub last_update: DateTime<Utc>,
}

impl Seat {
    pub fn state(&self) -> SeatState {
        SeatState {
            status: self.status,
            occupant: self.occupant.clone(),
        }
    }
}

/// Incoming request to claim a set of seats. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub event_id: String,
    pub section_id: String,
    pub seat_numbers: Vec<i32>,
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
}

impl BookingRequest {
    /// Checks that run before any storage access.
    pub fn validate(&self) -> Result<(), BookingError> {
        if self.seat_numbers.is_empty() {
            return Err(BookingError::InvalidRequest("no seats requested".to_string()));
        }

        if self.user_id.trim().is_empty() {
            return Err(BookingError::InvalidRequest("user_id must not be empty".to_string()));
        }

        let mut seen = HashSet::with_capacity(self.seat_numbers.len());
        for seat in &self.seat_numbers {
            if !seen.insert(*seat) {
                return Err(BookingError::InvalidRequest(format!(
                    "seat {} requested more than once",
                    seat
                )));
            }
        }

        Ok(())
    }

    /// Seat keys in request order.
    pub fn seat_keys(&self) -> impl Iterator<Item = SeatKey> + '_ {
        self.seat_numbers
            .iter()
            .map(move |n| SeatKey::new(self.event_id.clone(), self.section_id.clone(), *n))
    }
}

/// Audit record of a request that won every seat it asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub event_id: String,
    pub section_id: String,
    pub seat_numbers: Vec<i32>,
    pub user_id: String,
    pub user_name: String,
    pub timestamp: DateTime<Utc>,
}

impl Reservation {
    /// Builds the record for a winning request with a fresh time-ordered id.
    pub fn for_request(request: &BookingRequest) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_id: request.event_id.clone(),
            section_id: request.section_id.clone(),
            seat_numbers: request.seat_numbers.clone(),
            user_id: request.user_id.clone(),
            user_name: request.user_name.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn seat_keys(&self) -> impl Iterator<Item = SeatKey> + '_ {
        self.seat_numbers
            .iter()
            .map(move |n| SeatKey::new(self.event_id.clone(), self.section_id.clone(), *n))
    }
}
