use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::limits::FEED_CHANNEL_CAPACITY;
use crate::model::Reservation;

/// What happened to the reservation carried in the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOp {
    Create,
    Update,
    Cancel,
}

/// An immutable record of one committed mutation. The snapshot is an
/// independent copy captured at emission time; later mutation of the
/// reservation never alters a delivered event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub sequence: u64,
    pub op: ChangeOp,
    pub snapshot: Reservation,
}

impl ChangeEvent {
    pub fn reservation_id(&self) -> Ulid {
        self.snapshot.id
    }
}

/// Broadcast hub for the live change feed. One append-only sequence, many
/// independent cursors.
pub struct ChangeFeed {
    /// Next sequence number. Sends happen while this is held, so every
    /// listener observes strictly increasing sequences with no reordering.
    next_seq: Mutex<u64>,
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CHANNEL_CAPACITY);
        Self {
            next_seq: Mutex::new(1),
            tx,
        }
    }

    /// Attach a new listener. It observes every event published after this
    /// call; earlier events are not replayed.
    pub fn subscribe(&self) -> Listener {
        metrics::gauge!(crate::observability::FEED_LISTENERS_ACTIVE).increment(1.0);
        Listener {
            rx: self.tx.subscribe(),
            lagged: None,
        }
    }

    /// Assign the next sequence number and fan the event out. No-op send if
    /// nobody is listening. Returns the assigned sequence.
    pub fn publish(&self, op: ChangeOp, snapshot: Reservation) -> u64 {
        let mut next = self.next_seq.lock().expect("feed sequence lock poisoned");
        let sequence = *next;
        *next += 1;
        let _ = self.tx.send(ChangeEvent {
            sequence,
            op,
            snapshot,
        });
        sequence
    }
}

/// One subscriber's cursor into the feed.
///
/// A listener that falls more than the ring capacity behind is terminated:
/// `recv` reports `Lagged` with the number of missed events and keeps
/// reporting it. A terminated listener never silently skips events.
pub struct Listener {
    rx: broadcast::Receiver<ChangeEvent>,
    lagged: Option<u64>,
}

impl Listener {
    pub async fn recv(&mut self) -> Result<ChangeEvent, FeedError> {
        if let Some(missed) = self.lagged {
            return Err(FeedError::Lagged(missed));
        }
        match self.rx.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                metrics::counter!(crate::observability::FEED_LAGGED_TOTAL).increment(1);
                tracing::warn!("feed listener lagged, {missed} events missed");
                self.lagged = Some(missed);
                Err(FeedError::Lagged(missed))
            }
            Err(broadcast::error::RecvError::Closed) => Err(FeedError::Closed),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        metrics::gauge!(crate::observability::FEED_LISTENERS_ACTIVE).decrement(1.0);
    }
}

/// Terminal listener-side conditions. Neither affects writers or other
/// listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedError {
    /// The listener fell behind the ring; the count is how many events it
    /// can no longer observe.
    Lagged(u64),
    /// The feed was shut down.
    Closed,
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedError::Lagged(missed) => write!(f, "listener lagged: {missed} events missed"),
            FeedError::Closed => write!(f, "change feed closed"),
        }
    }
}

impl std::error::Error for FeedError {}
