use ulid::Ulid;

use crate::feed::ChangeOp;
use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_create, validate_note, validate_span};
use super::{Engine, EngineError};

impl Engine {
    /// Create a pending reservation if the span is free. The conflict check
    /// and the insert happen under one write-lock acquisition on the
    /// resource's partition, so two overlapping requests can never both
    /// succeed.
    pub async fn reserve(
        &self,
        user_id: &str,
        resource_id: &str,
        span: Span,
        note: &str,
    ) -> Result<Reservation, EngineError> {
        validate_create(resource_id, user_id, note, &span)?;

        let rs = self.partition_or_create(resource_id);
        let mut guard = rs.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many reservations on resource"));
        }

        if let Err(e) = check_no_conflict(&guard, &span, None) {
            metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let reservation = Reservation {
            id: Ulid::new(),
            resource_id: resource_id.to_string(),
            user_id: user_id.to_string(),
            span,
            note: note.to_string(),
            status: Status::Pending,
        };
        let event = Event::Created { reservation };
        self.persist_and_apply(&mut guard, &event, ChangeOp::Create)
            .await
    }

    /// Replace the note. Touches neither span nor status.
    pub async fn update_note(&self, id: Ulid, note: &str) -> Result<Reservation, EngineError> {
        validate_note(note)?;
        let mut guard = self.resolve_reservation_write(&id).await?;
        let record = guard.find(id).ok_or(EngineError::NotFound(id))?;

        let event = Event::NoteUpdated {
            id,
            resource_id: record.resource_id.clone(),
            note: note.to_string(),
        };
        self.persist_and_apply(&mut guard, &event, ChangeOp::Update)
            .await
    }

    /// Move a reservation to a new span. Behaves as release-then-reserve in
    /// one atomic step: the old span is excluded from the conflict check and
    /// no other writer can interleave, since the partition lock is held
    /// throughout. Cancelled reservations cannot be rescheduled.
    pub async fn reschedule(&self, id: Ulid, span: Span) -> Result<Reservation, EngineError> {
        validate_span(&span)?;
        let mut guard = self.resolve_reservation_write(&id).await?;
        let record = guard.find(id).ok_or(EngineError::NotFound(id))?;
        if record.status == Status::Cancelled {
            return Err(EngineError::InvalidTransition {
                id,
                from: Status::Cancelled,
            });
        }
        let resource_id = record.resource_id.clone();

        if let Err(e) = check_no_conflict(&guard, &span, Some(id)) {
            metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let event = Event::Rescheduled {
            id,
            resource_id,
            span,
        };
        self.persist_and_apply(&mut guard, &event, ChangeOp::Update)
            .await
    }

    /// Transition `Pending → Confirmed`. Confirming an already-confirmed
    /// reservation is a no-op success; nothing is committed, so nothing
    /// appears on the feed. Confirming a cancelled one is rejected.
    pub async fn confirm(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let record = guard.find(id).ok_or(EngineError::NotFound(id))?;

        match record.status {
            Status::Confirmed => Ok(record.clone()),
            Status::Cancelled => Err(EngineError::InvalidTransition {
                id,
                from: Status::Cancelled,
            }),
            Status::Pending => {
                let event = Event::Confirmed {
                    id,
                    resource_id: record.resource_id.clone(),
                };
                self.persist_and_apply(&mut guard, &event, ChangeOp::Update)
                    .await
            }
        }
    }

    /// Transition to `Cancelled`, freeing the slot for new reservations.
    /// Cancelling an already-cancelled reservation is a no-op success.
    pub async fn cancel(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let record = guard.find(id).ok_or(EngineError::NotFound(id))?;

        match record.status {
            Status::Cancelled => Ok(record.clone()),
            Status::Pending | Status::Confirmed => {
                let event = Event::Cancelled {
                    id,
                    resource_id: record.resource_id.clone(),
                };
                self.persist_and_apply(&mut guard, &event, ChangeOp::Cancel)
                    .await
            }
        }
    }
}
