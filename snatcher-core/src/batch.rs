//! Grouped multi-partition writes.
//!
//! An `AtomicBatch` is recorded by the store as a single unit: after a
//! coordinator failure either every statement lands or none does. Nothing
//! isolates a batch from batches issued concurrently by other callers, and no
//! statement is conditional on the current row value.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::consistency::ConsistencyLevel;
use crate::error::StoreResult;
use crate::models::{PartitionKey, SeatKey, SeatStatus};
use crate::repository::BookingStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatement {
    /// Unconditionally set a seat's status and occupant.
    MarkSeat {
        key: SeatKey,
        status: SeatStatus,
        occupant: Option<String>,
    },
    /// Remove a reservation record.
    DeleteReservation { id: Uuid },
}

/// Ordered statements sharing one write timestamp.
#[derive(Debug, Clone)]
pub struct AtomicBatch {
    statements: Vec<BatchStatement>,
    written_at: DateTime<Utc>,
}

impl AtomicBatch {
    pub fn new() -> Self {
        Self {
            statements: Vec::new(),
            written_at: Utc::now(),
        }
    }

    /// SOLD under `user_id`.
    pub fn claim_seat(mut self, key: SeatKey, user_id: &str) -> Self {
        self.statements.push(BatchStatement::MarkSeat {
            key,
            status: SeatStatus::Sold,
            occupant: Some(user_id.to_string()),
        });
        self
    }

    /// Back to AVAILABLE with the occupant cleared.
    pub fn release_seat(mut self, key: SeatKey) -> Self {
        self.statements.push(BatchStatement::MarkSeat {
            key,
            status: SeatStatus::Available,
            occupant: None,
        });
        self
    }

    pub fn delete_reservation(mut self, id: Uuid) -> Self {
        self.statements.push(BatchStatement::DeleteReservation { id });
        self
    }

    pub fn statements(&self) -> &[BatchStatement] {
        &self.statements
    }

    /// The `lastUpdate` value every seat statement in this batch writes.
    pub fn written_at(&self) -> DateTime<Utc> {
        self.written_at
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Seat partitions the batch touches.
    pub fn partitions(&self) -> BTreeSet<PartitionKey> {
        self.statements
            .iter()
            .filter_map(|s| match s {
                BatchStatement::MarkSeat { key, .. } => Some(key.partition()),
                BatchStatement::DeleteReservation { .. } => None,
            })
            .collect()
    }
}

impl Default for AtomicBatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Submits batches to a store at a fixed consistency level.
#[derive(Clone)]
pub struct BatchWriter {
    store: Arc<dyn BookingStore>,
    consistency: ConsistencyLevel,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn BookingStore>, consistency: ConsistencyLevel) -> Self {
        Self { store, consistency }
    }

    pub fn consistency(&self) -> ConsistencyLevel {
        self.consistency
    }

    /// Records the batch as one unit. An empty batch never reaches the store.
    pub async fn commit(&self, batch: &AtomicBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        debug!(
            "Executing batch of {} statements across {} partitions at {}",
            batch.len(),
            batch.partitions().len(),
            self.consistency
        );

        self.store
            .execute_batch(batch, self.consistency)
            .await
            .map_err(|e| {
                error!("Batch of {} statements failed: {}", batch.len(), e);
                e
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_builder_keeps_order() {
        let id = Uuid::now_v7();
        let batch = AtomicBatch::new()
            .claim_seat(SeatKey::new("1", "A", 10), "bot_1")
            .release_seat(SeatKey::new("1", "B", 11))
            .delete_reservation(id);

        assert_eq!(batch.len(), 3);
        assert_eq!(
            batch.statements()[0],
            BatchStatement::MarkSeat {
                key: SeatKey::new("1", "A", 10),
                status: SeatStatus::Sold,
                occupant: Some("bot_1".to_string()),
            }
        );
        assert_eq!(batch.statements()[2], BatchStatement::DeleteReservation { id });
    }

    #[test]
    fn test_partitions_span_sections() {
        let batch = AtomicBatch::new()
            .claim_seat(SeatKey::new("1", "A", 1), "u")
            .claim_seat(SeatKey::new("1", "A", 2), "u")
            .claim_seat(SeatKey::new("1", "B", 1), "u");

        let partitions = batch.partitions();
        assert_eq!(partitions.len(), 2);
        assert!(partitions.contains(&PartitionKey { event_id: "1".into(), section_id: "B".into() }));
    }
}
