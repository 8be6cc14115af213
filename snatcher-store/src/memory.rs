//! In-process replicated store.
//!
//! Every replica holds its own copy of each cell tagged with a write
//! timestamp, and a newer timestamp always overwrites an older one
//! (last-writer-wins). A write reaches as many replicas as its consistency
//! level requires before it returns; the remaining replicas receive it after
//! `replication_lag`. Reads ask as many replicas as their level requires and
//! keep the newest cell they see. Writes a replica misses while it is down
//! are kept as hints and handed off the next time the replica is touched
//! after it comes back up.
//!
//! The fault hooks (`fail_next_*`, `set_replica_up`, `hold_batches_until`,
//! `inject_after_next_batch`) let tests force the interleavings the booking
//! protocol has to survive.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Barrier, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use snatcher_core::{
    AtomicBatch, BatchStatement, BookingStore, ConsistencyLevel, Reservation, Seat, SeatKey,
    SeatState, SeatStatus, StoreError, StoreResult,
};

use crate::app_config::StoreConfig;

#[derive(Debug, Clone)]
struct Versioned<T> {
    value: T,
    written_at: u64,
}

#[derive(Debug, Clone)]
struct SeatRow {
    status: SeatStatus,
    occupant: Option<String>,
    last_update: DateTime<Utc>,
}

#[derive(Debug, Clone)]
enum Mutation {
    Seat(SeatKey, SeatRow),
    /// `None` is a tombstone.
    Reservation(Uuid, Option<Reservation>),
}

/// Mutations a replica missed while down.
#[derive(Debug, Clone)]
struct Hint {
    mutations: Vec<Mutation>,
    written_at: u64,
}

#[derive(Debug, Default)]
struct Replica {
    seats: HashMap<SeatKey, Versioned<SeatRow>>,
    reservations: HashMap<Uuid, Versioned<Option<Reservation>>>,
    hints: Vec<Hint>,
}

impl Replica {
    fn hint(&mut self, mutations: &[Mutation], written_at: u64) {
        self.hints.push(Hint {
            mutations: mutations.to_vec(),
            written_at,
        });
    }

    /// Replays missed writes. Order does not matter under last-writer-wins.
    fn hand_off(&mut self) {
        for hint in std::mem::take(&mut self.hints) {
            self.apply(&hint.mutations, hint.written_at);
        }
    }

    fn apply(&mut self, mutations: &[Mutation], written_at: u64) {
        for mutation in mutations {
            match mutation {
                Mutation::Seat(key, row) => {
                    write_cell(self.seats.entry(key.clone()).or_insert_with(|| Versioned {
                        value: row.clone(),
                        written_at: 0,
                    }), row.clone(), written_at);
                }
                Mutation::Reservation(id, record) => {
                    write_cell(self.reservations.entry(*id).or_insert_with(|| Versioned {
                        value: record.clone(),
                        written_at: 0,
                    }), record.clone(), written_at);
                }
            }
        }
    }
}

fn write_cell<T>(cell: &mut Versioned<T>, value: T, written_at: u64) {
    if written_at > cell.written_at {
        cell.value = value;
        cell.written_at = written_at;
    }
}

struct BatchGate {
    barrier: Arc<Barrier>,
    remaining: usize,
}

#[derive(Default)]
struct Faults {
    batches: AtomicUsize,
    seat_reads: AtomicUsize,
    reservation_writes: AtomicUsize,
}

fn take_fault(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

struct Inner {
    replicas: Vec<Mutex<Replica>>,
    up: Vec<AtomicBool>,
    replication_lag: Duration,
    clock: AtomicU64,
    closed: AtomicBool,
    faults: Faults,
    gate: Mutex<Option<BatchGate>>,
    competitor: Mutex<Option<AtomicBatch>>,
    batches_executed: AtomicUsize,
    operations: AtomicUsize,
}

impl Inner {
    /// Locks a live replica, handing off any writes it missed first.
    async fn replica(&self, idx: usize) -> MutexGuard<'_, Replica> {
        let mut guard = self.replicas[idx].lock().await;
        guard.hand_off();
        guard
    }

    /// Applies a lagged write, or keeps it as a hint if the replica went down meanwhile.
    async fn deliver(&self, idx: usize, mutations: &[Mutation], written_at: u64) {
        if self.up[idx].load(Ordering::SeqCst) {
            self.replica(idx).await.apply(mutations, written_at);
        } else {
            self.replicas[idx].lock().await.hint(mutations, written_at);
        }
    }
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new(replication_factor: usize, replication_lag: Duration) -> Self {
        let replication_factor = replication_factor.max(1);
        Self {
            inner: Arc::new(Inner {
                replicas: (0..replication_factor).map(|_| Mutex::new(Replica::default())).collect(),
                up: (0..replication_factor).map(|_| AtomicBool::new(true)).collect(),
                replication_lag,
                clock: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                faults: Faults::default(),
                gate: Mutex::new(None),
                competitor: Mutex::new(None),
                batches_executed: AtomicUsize::new(0),
                operations: AtomicUsize::new(0),
            }),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.replication_factor, config.replication_lag())
    }

    pub fn replication_factor(&self) -> usize {
        self.inner.replicas.len()
    }

    /// Batches that reached the replicas, including injected competitor batches.
    pub fn batches_executed(&self) -> usize {
        self.inner.batches_executed.load(Ordering::SeqCst)
    }

    /// Every call made through `BookingStore`, successful or not.
    pub fn operations(&self) -> usize {
        self.inner.operations.load(Ordering::SeqCst)
    }

    pub fn fail_next_batches(&self, count: usize) {
        self.inner.faults.batches.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_seat_reads(&self, count: usize) {
        self.inner.faults.seat_reads.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_reservation_writes(&self, count: usize) {
        self.inner.faults.reservation_writes.store(count, Ordering::SeqCst);
    }

    /// A down replica neither acknowledges nor receives writes.
    pub fn set_replica_up(&self, replica: usize, up: bool) {
        if let Some(flag) = self.inner.up.get(replica) {
            flag.store(up, Ordering::SeqCst);
        }
    }

    /// The next `count` batches each wait until all `count` have arrived, then
    /// proceed together.
    pub async fn hold_batches_until(&self, count: usize) {
        let mut gate = self.inner.gate.lock().await;
        *gate = Some(BatchGate {
            barrier: Arc::new(Barrier::new(count.max(1))),
            remaining: count,
        });
    }

    /// Applies `batch` right after the next batch lands, with a later timestamp,
    /// as a competing client would.
    pub async fn inject_after_next_batch(&self, batch: AtomicBatch) {
        *self.inner.competitor.lock().await = Some(batch);
    }

    /// Converged view of a seat across every replica, outside any consistency level.
    pub async fn inspect_seat(&self, key: &SeatKey) -> Option<Seat> {
        let mut newest: Option<Versioned<SeatRow>> = None;
        for replica in &self.inner.replicas {
            let guard = replica.lock().await;
            if let Some(cell) = guard.seats.get(key) {
                if newest.as_ref().map_or(true, |n| cell.written_at > n.written_at) {
                    newest = Some(cell.clone());
                }
            }
        }

        newest.map(|cell| Seat {
            key: key.clone(),
            status: cell.value.status,
            occupant: cell.value.occupant,
            last_update: cell.value.last_update,
        })
    }

    fn begin(&self) -> StoreResult<()> {
        self.inner.operations.fetch_add(1, Ordering::SeqCst);
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Strictly increasing microsecond timestamps.
    fn tick(&self) -> u64 {
        let now = Utc::now().timestamp_micros().max(0) as u64;
        let mut last = self.inner.clock.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .inner
                .clock
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    /// Live replicas starting at a random offset, or `Unavailable`.
    fn pick_replicas(&self, consistency: ConsistencyLevel) -> StoreResult<(Vec<usize>, usize)> {
        let live: Vec<usize> = self
            .inner
            .up
            .iter()
            .enumerate()
            .filter(|(_, up)| up.load(Ordering::SeqCst))
            .map(|(idx, _)| idx)
            .collect();

        let required = consistency.required_acks(self.inner.replicas.len());
        if live.len() < required || live.is_empty() {
            return Err(StoreError::Unavailable {
                required,
                alive: live.len(),
            });
        }

        let offset = rand::thread_rng().gen_range(0..live.len());
        let mut ordered = live;
        ordered.rotate_left(offset);
        Ok((ordered, required))
    }

    async fn replicate(&self, mutations: Vec<Mutation>, consistency: ConsistencyLevel) -> StoreResult<()> {
        let (replicas, required) = self.pick_replicas(consistency)?;
        let written_at = self.tick();
        let (acked, lagged) = replicas.split_at(required);

        for idx in acked {
            self.inner.replica(*idx).await.apply(&mutations, written_at);
        }

        for idx in lagged.iter().copied() {
            if self.inner.replication_lag.is_zero() {
                self.inner.deliver(idx, &mutations, written_at).await;
                continue;
            }

            let inner = Arc::clone(&self.inner);
            let mutations = mutations.clone();
            tokio::spawn(async move {
                tokio::time::sleep(inner.replication_lag).await;
                inner.deliver(idx, &mutations, written_at).await;
            });
        }

        for (idx, replica) in self.inner.replicas.iter().enumerate() {
            if !replicas.contains(&idx) {
                replica.lock().await.hint(&mutations, written_at);
            }
        }

        Ok(())
    }

    /// Reads from `required` replicas and keeps the newest cell.
    async fn read_newest<T, F>(&self, consistency: ConsistencyLevel, lookup: F) -> StoreResult<Option<T>>
    where
        F: Fn(&Replica) -> Option<Versioned<T>>,
    {
        let (replicas, required) = self.pick_replicas(consistency)?;
        let mut newest: Option<Versioned<T>> = None;

        for idx in replicas.iter().take(required) {
            let guard = self.inner.replica(*idx).await;
            if let Some(cell) = lookup(&*guard) {
                if newest.as_ref().map_or(true, |n| cell.written_at > n.written_at) {
                    newest = Some(cell);
                }
            }
        }

        Ok(newest.map(|cell| cell.value))
    }

    async fn wait_at_gate(&self) {
        let barrier = {
            let mut gate = self.inner.gate.lock().await;
            match gate.as_mut() {
                Some(g) if g.remaining > 0 => {
                    g.remaining -= 1;
                    Some(Arc::clone(&g.barrier))
                }
                _ => None,
            }
        };

        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
    }

    async fn apply_batch(&self, batch: &AtomicBatch, consistency: ConsistencyLevel) -> StoreResult<()> {
        let mutations = batch
            .statements()
            .iter()
            .map(|statement| match statement {
                BatchStatement::MarkSeat { key, status, occupant } => Mutation::Seat(
                    key.clone(),
                    SeatRow {
                        status: *status,
                        occupant: occupant.clone(),
                        last_update: batch.written_at(),
                    },
                ),
                BatchStatement::DeleteReservation { id } => Mutation::Reservation(*id, None),
            })
            .collect();

        self.replicate(mutations, consistency).await?;
        self.inner.batches_executed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(3, Duration::ZERO)
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn read_seat(
        &self,
        key: &SeatKey,
        consistency: ConsistencyLevel,
    ) -> StoreResult<Option<SeatState>> {
        self.begin()?;
        if take_fault(&self.inner.faults.seat_reads) {
            return Err(StoreError::Timeout(format!("read of seat {}", key)));
        }

        let row = self
            .read_newest(consistency, |replica| replica.seats.get(key).cloned())
            .await?;

        Ok(row.map(|row| SeatState {
            status: row.status,
            occupant: row.occupant,
        }))
    }

    async fn execute_batch(
        &self,
        batch: &AtomicBatch,
        consistency: ConsistencyLevel,
    ) -> StoreResult<()> {
        self.begin()?;
        self.wait_at_gate().await;

        if take_fault(&self.inner.faults.batches) {
            return Err(StoreError::Timeout(format!("batch of {} statements", batch.len())));
        }

        self.apply_batch(batch, consistency).await?;

        let competitor = self.inner.competitor.lock().await.take();
        if let Some(competitor) = competitor {
            debug!("Applying injected competitor batch of {} statements", competitor.len());
            self.apply_batch(&competitor, ConsistencyLevel::All).await?;
        }

        Ok(())
    }

    async fn get_reservation(
        &self,
        id: Uuid,
        consistency: ConsistencyLevel,
    ) -> StoreResult<Option<Reservation>> {
        self.begin()?;
        let record = self
            .read_newest(consistency, |replica| replica.reservations.get(&id).cloned())
            .await?;
        Ok(record.flatten())
    }

    async fn insert_reservation(
        &self,
        reservation: &Reservation,
        consistency: ConsistencyLevel,
    ) -> StoreResult<()> {
        self.begin()?;
        if take_fault(&self.inner.faults.reservation_writes) {
            return Err(StoreError::Timeout(format!("insert of reservation {}", reservation.id)));
        }

        self.replicate(
            vec![Mutation::Reservation(reservation.id, Some(reservation.clone()))],
            consistency,
        )
        .await
    }

    async fn list_reservations(
        &self,
        consistency: ConsistencyLevel,
    ) -> StoreResult<Vec<Reservation>> {
        self.begin()?;
        let (replicas, required) = self.pick_replicas(consistency)?;

        let mut merged: HashMap<Uuid, Versioned<Option<Reservation>>> = HashMap::new();
        for idx in replicas.iter().take(required) {
            let guard = self.inner.replica(*idx).await;
            for (id, cell) in &guard.reservations {
                let newer = merged.get(id).map_or(true, |m| cell.written_at > m.written_at);
                if newer {
                    merged.insert(*id, cell.clone());
                }
            }
        }

        let mut reservations: Vec<Reservation> =
            merged.into_values().filter_map(|cell| cell.value).collect();
        reservations.sort_by_key(|r| r.id);
        Ok(reservations)
    }

    async fn provision_seats(
        &self,
        event_id: &str,
        section_id: &str,
        seat_numbers: &[i32],
    ) -> StoreResult<usize> {
        self.begin()?;
        let written_at = self.tick();
        let now = Utc::now();
        let mut created = 0;

        for (idx, replica) in self.inner.replicas.iter().enumerate() {
            let mut guard = replica.lock().await;
            for seat in seat_numbers {
                let key = SeatKey::new(event_id, section_id, *seat);
                if guard.seats.contains_key(&key) {
                    continue;
                }
                guard.seats.insert(
                    key,
                    Versioned {
                        value: SeatRow {
                            status: SeatStatus::Available,
                            occupant: None,
                            last_update: now,
                        },
                        written_at,
                    },
                );
                if idx == 0 {
                    created += 1;
                }
            }
        }

        Ok(created)
    }

    async fn close(&self) -> StoreResult<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
