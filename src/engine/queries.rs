use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, SharedResourceState};

/// Query windows allow much wider ranges than reservation spans, so they
/// get their own validation.
fn validate_window(window: &Span) -> Result<(), EngineError> {
    if window.start >= window.end {
        return Err(EngineError::InvalidArgument("window start must be before end"));
    }
    if window.start < MIN_VALID_TIMESTAMP_MS || window.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if window.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

impl Engine {
    /// Point lookup by reservation id.
    pub async fn get(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let resource_id = self.resource_for(&id).ok_or(EngineError::NotFound(id))?;
        let rs = self
            .get_partition(&resource_id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        guard
            .find(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Filtered enumeration of reservations intersecting `window`.
    ///
    /// Absent filters are wildcards: no `resource_id` means any resource, no
    /// `user_id` means any user, no `status` means all statuses. Each
    /// returned record is a consistent snapshot taken under its partition's
    /// read lock; the result as a whole takes no global lock.
    pub async fn query(
        &self,
        resource_id: Option<&str>,
        user_id: Option<&str>,
        status: Option<Status>,
        window: Span,
    ) -> Result<Vec<Reservation>, EngineError> {
        validate_window(&window)?;
        metrics::counter!(crate::observability::QUERIES_TOTAL).increment(1);

        let partitions: Vec<SharedResourceState> = match resource_id {
            Some(rid) => self.get_partition(rid).into_iter().collect(),
            // Clone the Arcs first so no DashMap shard guard is held across
            // an await point.
            None => self.state.iter().map(|e| e.value().clone()).collect(),
        };

        let mut results = Vec::new();
        for rs in partitions {
            let guard = rs.read().await;
            for record in guard.overlapping(&window) {
                if let Some(uid) = user_id
                    && record.user_id != uid
                {
                    continue;
                }
                if let Some(st) = status
                    && record.status != st
                {
                    continue;
                }
                results.push(record.clone());
            }
        }

        results.sort_by(|a, b| (a.span.start, a.id).cmp(&(b.span.start, b.id)));
        Ok(results)
    }
}
