use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Reservation lifecycle state. Transitions are monotone: `Pending` may
/// become `Confirmed` or `Cancelled`, `Confirmed` may become `Cancelled`,
/// and `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Confirmed,
    Cancelled,
}

impl Status {
    /// Active reservations occupy their slot; cancelled ones don't.
    pub fn is_active(&self) -> bool {
        matches!(self, Status::Pending | Status::Confirmed)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Pending => write!(f, "pending"),
            Status::Confirmed => write!(f, "confirmed"),
            Status::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A single reservation record. Owned by the engine; everything handed out
/// (query results, feed snapshots) is an independent clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub resource_id: String,
    pub user_id: String,
    pub span: Span,
    pub note: String,
    pub status: Status,
}

/// Per-resource partition: every reservation on one resource, cancelled
/// included, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub resource_id: String,
    pub reservations: Vec<Reservation>,
}

impl ResourceState {
    pub fn new(resource_id: String) -> Self {
        Self {
            resource_id,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    /// Remove by id.
    pub fn remove(&mut self, id: Ulid) -> Option<Reservation> {
        if let Some(pos) = self.reservations.iter().position(|r| r.id == id) {
            Some(self.reservations.remove(pos))
        } else {
            None
        }
    }

    pub fn find(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn find_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Return only reservations whose span overlaps the query window.
    /// Uses binary search to skip everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
/// `Created` carries the full record (status included) so that a compacted
/// log is exactly one event per surviving reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Created {
        reservation: Reservation,
    },
    NoteUpdated {
        id: Ulid,
        resource_id: String,
        note: String,
    },
    Rescheduled {
        id: Ulid,
        resource_id: String,
        span: Span,
    },
    Confirmed {
        id: Ulid,
        resource_id: String,
    },
    Cancelled {
        id: Ulid,
        resource_id: String,
    },
}

impl Event {
    /// The resource partition this event belongs to (for replay routing).
    pub fn resource_id(&self) -> &str {
        match self {
            Event::Created { reservation } => &reservation.resource_id,
            Event::NoteUpdated { resource_id, .. }
            | Event::Rescheduled { resource_id, .. }
            | Event::Confirmed { resource_id, .. }
            | Event::Cancelled { resource_id, .. } => resource_id,
        }
    }
}
