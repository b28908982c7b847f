//! Operational limits. Every mutation validates against these before any
//! state is touched.

use crate::model::Ms;

/// Earliest accepted timestamp (unix epoch).
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;

/// Latest accepted timestamp (2100-01-01T00:00:00Z).
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Widest accepted reservation span (366 days).
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;

/// Widest accepted query window (5 years).
pub const MAX_QUERY_WINDOW_MS: Ms = 5 * 366 * 24 * 3_600_000;

pub const MAX_RESOURCE_ID_LEN: usize = 256;
pub const MAX_USER_ID_LEN: usize = 256;
pub const MAX_NOTE_LEN: usize = 4096;

/// Cap on stored reservations per resource, cancelled included.
pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 100_000;

/// Ring capacity of the change feed. A listener that falls more than this
/// many events behind is terminated with a lag error.
pub const FEED_CHANNEL_CAPACITY: usize = 1024;

/// Queue depth of the group-commit WAL writer.
pub const WAL_CHANNEL_CAPACITY: usize = 4096;
