//! Conflict-safe reservation engine.
//!
//! Per-resource interval state guarantees that no two pending-or-confirmed
//! reservations on the same resource overlap in time, under concurrent
//! writers. Every committed mutation is appended to a write-ahead log and
//! published on a sequenced change feed that live subscribers can tail.

pub mod engine;
pub mod feed;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod observability;
pub mod wal;

pub use engine::{Engine, EngineError};
pub use feed::{ChangeEvent, ChangeFeed, ChangeOp, FeedError, Listener};
pub use model::{Ms, Reservation, Span, Status};
