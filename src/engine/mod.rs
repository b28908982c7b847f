mod conflict;
mod error;
mod mutations;
mod queries;

pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::feed::{ChangeFeed, ChangeOp};
use crate::limits::WAL_CHANNEL_CAPACITY;
use crate::model::*;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { response } => {
            let _ = response.send(wal.compact_in_place());
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The reservation store. Partitions mutable state by resource id; all
/// mutations on one resource serialize on that partition's write lock,
/// and every committed mutation appends one WAL record and publishes one
/// change event while the lock is held.
pub struct Engine {
    pub(super) state: DashMap<String, SharedResourceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub feed: Arc<ChangeFeed>,
    /// Reverse lookup: reservation id → resource id.
    pub(super) reservation_to_resource: DashMap<Ulid, String>,
}

/// Apply an event directly to a partition (no locking — caller holds the
/// lock) and return the resulting record snapshot. `None` means the target
/// record was absent, which only a damaged log can produce.
fn apply_to_partition(
    rs: &mut ResourceState,
    event: &Event,
    index: &DashMap<Ulid, String>,
) -> Option<Reservation> {
    match event {
        Event::Created { reservation } => {
            rs.insert(reservation.clone());
            index.insert(reservation.id, reservation.resource_id.clone());
            Some(reservation.clone())
        }
        Event::NoteUpdated { id, note, .. } => {
            let record = rs.find_mut(*id)?;
            record.note = note.clone();
            Some(record.clone())
        }
        Event::Rescheduled { id, span, .. } => {
            // Remove + re-insert so the vec stays sorted by span.start.
            let mut record = rs.remove(*id)?;
            record.span = *span;
            rs.insert(record.clone());
            Some(record)
        }
        Event::Confirmed { id, .. } => {
            let record = rs.find_mut(*id)?;
            record.status = Status::Confirmed;
            Some(record.clone())
        }
        Event::Cancelled { id, .. } => {
            // The record stays in the partition; flipping the status is what
            // frees the slot, since conflict checks skip cancelled records.
            let record = rs.find_mut(*id)?;
            record.status = Status::Cancelled;
            Some(record.clone())
        }
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, feed: Arc<ChangeFeed>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            feed,
            reservation_to_resource: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context.
        for event in &events {
            let resource_id = event.resource_id();
            let rs_arc = engine
                .state
                .entry(resource_id.to_string())
                .or_insert_with(|| {
                    Arc::new(RwLock::new(ResourceState::new(resource_id.to_string())))
                })
                .clone();
            let mut guard = rs_arc.try_write().expect("replay: uncontended write");
            apply_to_partition(&mut guard, event, &engine.reservation_to_resource);
        }
        metrics::gauge!(crate::observability::RESOURCES_ACTIVE).set(engine.state.len() as f64);
        if !events.is_empty() {
            tracing::info!(
                "replayed {} events into {} resource partitions",
                events.len(),
                engine.state.len()
            );
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(super) fn get_partition(&self, resource_id: &str) -> Option<SharedResourceState> {
        self.state.get(resource_id).map(|e| e.value().clone())
    }

    /// Lazily create the partition for a resource on first reservation.
    pub(super) fn partition_or_create(&self, resource_id: &str) -> SharedResourceState {
        let rs = self
            .state
            .entry(resource_id.to_string())
            .or_insert_with(|| {
                Arc::new(RwLock::new(ResourceState::new(resource_id.to_string())))
            })
            .clone();
        metrics::gauge!(crate::observability::RESOURCES_ACTIVE).set(self.state.len() as f64);
        rs
    }

    pub(super) fn resource_for(&self, id: &Ulid) -> Option<String> {
        self.reservation_to_resource
            .get(id)
            .map(|e| e.value().clone())
    }

    /// WAL-append + apply + publish in one call, all under the partition
    /// lock the caller holds. A failed append aborts before apply, so no
    /// change event is ever observed for a rolled-back mutation.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        event: &Event,
        op: ChangeOp,
    ) -> Result<Reservation, EngineError> {
        self.wal_append(event).await?;
        let snapshot = apply_to_partition(rs, event, &self.reservation_to_resource)
            .expect("mutation target present under partition lock");
        self.feed.publish(op, snapshot.clone());
        metrics::counter!(
            crate::observability::MUTATIONS_TOTAL,
            "op" => crate::observability::op_label(event)
        )
        .increment(1);
        Ok(snapshot)
    }

    /// Lookup reservation → resource, get partition, acquire write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<ResourceState>, EngineError> {
        let resource_id = self.resource_for(id).ok_or(EngineError::NotFound(*id))?;
        let rs = self
            .get_partition(&resource_id)
            .ok_or(EngineError::NotFound(*id))?;
        Ok(rs.write_owned().await)
    }

    /// Attach a live listener to the change feed.
    pub fn listen(&self) -> crate::feed::Listener {
        self.feed.subscribe()
    }

    /// Compact the WAL down to one `Created` event per stored reservation
    /// (current status baked in). The fold runs inside the writer task,
    /// serialized with concurrent appends.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
