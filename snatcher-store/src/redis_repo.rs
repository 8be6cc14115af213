use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};
use uuid::Uuid;

use snatcher_core::{
    AtomicBatch, BatchStatement, BookingStore, ConsistencyLevel, Reservation, SeatKey, SeatState,
    SeatStatus, StoreError, StoreResult,
};

use crate::app_config::StoreConfig;

const RESERVATION_INDEX: &str = "reservations";

fn seat_key(key: &SeatKey) -> String {
    format!("seat:{}:{}:{}", key.event_id, key.section_id, key.seat_number)
}

fn reservation_key(id: Uuid) -> String {
    format!("reservation:{}", id)
}

/// Replica acknowledgements `WAIT` must collect; the primary is the first ack.
fn replica_acks(consistency: ConsistencyLevel, replicas: usize) -> usize {
    consistency.required_acks(replicas + 1).saturating_sub(1)
}

/// Released seats store an empty `user_id`.
fn occupant(user_id: Option<String>) -> Option<String> {
    user_id.filter(|u| !u.is_empty())
}

fn map_redis_error(err: redis::RedisError) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout(err.to_string())
    } else {
        StoreError::backend(err)
    }
}

/// Redis-backed store.
///
/// A `MULTI`/`EXEC` pipeline is the atomic batch: no `WATCH`, so concurrent
/// batches interleave freely and the last `EXEC` wins. Writes are confirmed
/// against replicas with `WAIT`; reads are served by the primary.
pub struct RedisStore {
    conn: MultiplexedConnection,
    replicas: usize,
    wait_timeout_ms: u64,
    closed: AtomicBool,
}

impl RedisStore {
    pub async fn new(config: &StoreConfig) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            replicas: config.replicas,
            wait_timeout_ms: config.wait_timeout_ms,
            closed: AtomicBool::new(false),
        })
    }

    fn connection(&self) -> StoreResult<MultiplexedConnection> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(self.conn.clone())
    }

    /// Blocks until enough replicas acknowledged the preceding writes. The
    /// primary counts as one acknowledgement.
    async fn wait_for_replicas(
        &self,
        conn: &mut MultiplexedConnection,
        consistency: ConsistencyLevel,
    ) -> StoreResult<()> {
        let needed = replica_acks(consistency, self.replicas);
        if needed == 0 {
            return Ok(());
        }

        let acked: usize = redis::cmd("WAIT")
            .arg(needed)
            .arg(self.wait_timeout_ms)
            .query_async(conn)
            .await
            .map_err(map_redis_error)?;

        if acked < needed {
            warn!("WAIT reached {} of {} replicas", acked, needed);
            return Err(StoreError::Unavailable {
                required: needed + 1,
                alive: acked + 1,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl BookingStore for RedisStore {
    async fn read_seat(
        &self,
        key: &SeatKey,
        _consistency: ConsistencyLevel,
    ) -> StoreResult<Option<SeatState>> {
        let mut conn = self.connection()?;
        let (status, user_id): (Option<String>, Option<String>) = redis::cmd("HMGET")
            .arg(seat_key(key))
            .arg("status")
            .arg("user_id")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        let Some(status) = status else {
            return Ok(None);
        };

        let status: SeatStatus = status.parse().map_err(StoreError::Corrupt)?;
        Ok(Some(SeatState {
            status,
            occupant: occupant(user_id),
        }))
    }

    async fn execute_batch(
        &self,
        batch: &AtomicBatch,
        consistency: ConsistencyLevel,
    ) -> StoreResult<()> {
        let mut conn = self.connection()?;
        let last_update = batch.written_at().to_rfc3339();

        let mut pipe = redis::pipe();
        pipe.atomic();
        for statement in batch.statements() {
            match statement {
                BatchStatement::MarkSeat { key, status, occupant } => {
                    pipe.hset_multiple(
                        seat_key(key),
                        &[
                            ("status", status.to_string()),
                            ("user_id", occupant.clone().unwrap_or_default()),
                            ("last_update", last_update.clone()),
                        ],
                    )
                    .ignore();
                }
                BatchStatement::DeleteReservation { id } => {
                    pipe.del(reservation_key(*id)).ignore();
                    pipe.srem(RESERVATION_INDEX, id.to_string()).ignore();
                }
            }
        }

        let _: () = pipe.query_async(&mut conn).await.map_err(map_redis_error)?;
        self.wait_for_replicas(&mut conn, consistency).await
    }

    async fn get_reservation(
        &self,
        id: Uuid,
        _consistency: ConsistencyLevel,
    ) -> StoreResult<Option<Reservation>> {
        let mut conn = self.connection()?;
        let raw: Option<String> = conn.get(reservation_key(id)).await.map_err(map_redis_error)?;

        raw.map(|json| serde_json::from_str(&json).map_err(|e| StoreError::Corrupt(e.to_string())))
            .transpose()
    }

    async fn insert_reservation(
        &self,
        reservation: &Reservation,
        consistency: ConsistencyLevel,
    ) -> StoreResult<()> {
        let mut conn = self.connection()?;
        let payload =
            serde_json::to_string(reservation).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let _: () = redis::pipe()
            .atomic()
            .set(reservation_key(reservation.id), payload)
            .ignore()
            .sadd(RESERVATION_INDEX, reservation.id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        self.wait_for_replicas(&mut conn, consistency).await
    }

    async fn list_reservations(
        &self,
        _consistency: ConsistencyLevel,
    ) -> StoreResult<Vec<Reservation>> {
        let mut conn = self.connection()?;
        let ids: Vec<String> = conn.smembers(RESERVATION_INDEX).await.map_err(map_redis_error)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys = ids
            .iter()
            .map(|id| {
                Uuid::parse_str(id)
                    .map(reservation_key)
                    .map_err(|e| StoreError::Corrupt(format!("reservation index entry {}: {}", id, e)))
            })
            .collect::<StoreResult<Vec<String>>>()?;
        let rows: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        let mut reservations = Vec::with_capacity(rows.len());
        // A row can vanish between SMEMBERS and MGET when a cancellation lands.
        for json in rows.into_iter().flatten() {
            let reservation: Reservation =
                serde_json::from_str(&json).map_err(|e| StoreError::Corrupt(e.to_string()))?;
            reservations.push(reservation);
        }

        reservations.sort_by_key(|r| r.id);
        Ok(reservations)
    }

    async fn provision_seats(
        &self,
        event_id: &str,
        section_id: &str,
        seat_numbers: &[i32],
    ) -> StoreResult<usize> {
        let mut conn = self.connection()?;
        let now = chrono::Utc::now().to_rfc3339();

        let mut pipe = redis::pipe();
        for seat in seat_numbers {
            let key = seat_key(&SeatKey::new(event_id, section_id, *seat));
            pipe.hset_nx(&key, "status", SeatStatus::Available.to_string());
            pipe.hset_nx(&key, "user_id", "").ignore();
            pipe.hset_nx(&key, "last_update", &now).ignore();
        }

        let created: Vec<i64> = pipe.query_async(&mut conn).await.map_err(map_redis_error)?;
        let created = created.into_iter().filter(|c| *c == 1).count();
        info!("Provisioned {} new seats in {}:{}", created, event_id, section_id);
        Ok(created)
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        info!("Redis store closed");
        Ok(())
    }
}
