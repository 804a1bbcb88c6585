//! Full-state resync for (re)connecting subscribers.

use sagebrush_protocol::wire::{self, WireError};
use sagebrush_protocol::{Event, EventEnvelope, SessionMirror, SessionSnapshot};

use crate::session::SessionState;

/// A `FullSnapshot` tagged with the number of the last event the session emitted.
///
/// Subscribers drop anything buffered at or below that number.
pub fn full_snapshot(state: &SessionState, sequence: u64) -> Result<EventEnvelope, WireError> {
    let snapshot = state.snapshot();
    let checksum = wire::snapshot_hash(&snapshot)?;
    Ok(EventEnvelope {
        session_id: state.id().clone(),
        sequence_number: sequence,
        event: Event::FullSnapshot { snapshot, checksum },
    })
}

/// True when the mirror holds exactly the authoritative snapshot.
pub fn converged(mirror: &SessionMirror, authoritative: &SessionSnapshot) -> bool {
    mirror.snapshot() == Some(authoritative)
}
