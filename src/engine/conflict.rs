use ulid::Ulid;

use crate::limits::*;
use crate::model::{ResourceState, Span};

use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::InvalidArgument("span start must be before end"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Checks applied to `reserve` arguments before the partition is touched.
pub(crate) fn validate_create(
    resource_id: &str,
    user_id: &str,
    note: &str,
    span: &Span,
) -> Result<(), EngineError> {
    if resource_id.is_empty() {
        return Err(EngineError::InvalidArgument("empty resource_id"));
    }
    if user_id.is_empty() {
        return Err(EngineError::InvalidArgument("empty user_id"));
    }
    if resource_id.len() > MAX_RESOURCE_ID_LEN {
        return Err(EngineError::LimitExceeded("resource_id too long"));
    }
    if user_id.len() > MAX_USER_ID_LEN {
        return Err(EngineError::LimitExceeded("user_id too long"));
    }
    validate_note(note)?;
    validate_span(span)
}

pub(crate) fn validate_note(note: &str) -> Result<(), EngineError> {
    if note.len() > MAX_NOTE_LEN {
        return Err(EngineError::LimitExceeded("note too long"));
    }
    Ok(())
}

/// The overlap check at the heart of the engine: does `span` collide with
/// any active reservation in this partition? `exclude` skips the record
/// being rescheduled so its old span is invisible as a conflict source.
///
/// The caller holds the partition's write lock, which is what makes
/// check-then-insert atomic.
pub(crate) fn check_no_conflict(
    rs: &ResourceState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for existing in rs.overlapping(span) {
        if Some(existing.id) == exclude {
            continue;
        }
        if existing.status.is_active() {
            return Err(EngineError::Conflict(existing.id));
        }
    }
    Ok(())
}
