use thiserror::Error;

use crate::types::CommittedEvent;

/// A projection failed on an event and the error policy refused to skip it.
///
/// Always terminates the run. Never retried automatically.
#[derive(Debug, Error)]
#[error("unrecoverable failure on event #{} ({}): {source}", .event.id, .event.event_type)]
pub struct UnrecoverableError {
    pub event: CommittedEvent,
    #[source]
    pub source: anyhow::Error,
}

impl UnrecoverableError {
    pub fn new(event: CommittedEvent, source: anyhow::Error) -> Self {
        Self { event, source }
    }

    pub fn event_id(&self) -> i64 {
        self.event.id
    }
}

/// Why a checkpoint wait gave up.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WaitError {
    #[error("timed out waiting for checkpoint {target}")]
    Timeout { target: i64 },

    #[error("aborted while waiting for checkpoint {target}")]
    Aborted { target: i64 },
}

/// Projections did not catch up with an event in time.
#[derive(Debug, Error)]
#[error("projections did not reach event #{event_id}: {source}")]
pub struct JerniPersistenceError {
    pub event_id: i64,
    #[source]
    pub source: WaitError,
}

impl JerniPersistenceError {
    pub fn new(event_id: i64, source: WaitError) -> Self {
        Self { event_id, source }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.source, WaitError::Timeout { .. })
    }
}
