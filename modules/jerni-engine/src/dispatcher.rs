//! Bisecting dispatcher: apply a batch to one store, isolating poison events.
//!
//! A failed batch is split in half and both halves are retried, left before
//! right, until the failure is pinned to single events. Each of those goes to
//! the [`ErrorPolicy`]. Everything else in the batch still gets applied.

use std::ops::Range;

use jerni_events::{CommittedEvent, Store, UnrecoverableError};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorResolution {
    Skip,
    NotSkip,
}

/// Decides what happens to a single event its store cannot apply.
pub trait ErrorPolicy: Send + Sync {
    fn resolve(&self, error: &anyhow::Error, event: &CommittedEvent, store: &str) -> ErrorResolution;
}

impl<F> ErrorPolicy for F
where
    F: Fn(&anyhow::Error, &CommittedEvent, &str) -> ErrorResolution + Send + Sync,
{
    fn resolve(&self, error: &anyhow::Error, event: &CommittedEvent, store: &str) -> ErrorResolution {
        self(error, event, store)
    }
}

/// Default policy: every poison event stops the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSkip;

impl ErrorPolicy for NeverSkip {
    fn resolve(&self, _: &anyhow::Error, _: &CommittedEvent, _: &str) -> ErrorResolution {
        ErrorResolution::NotSkip
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dispatched {
    /// One output per successful `handle_events` call, in apply order.
    pub outputs: Vec<serde_json::Value>,
    /// Ids the policy chose to skip.
    pub skipped: Vec<i64>,
}

/// Apply an id-ordered batch to `store`.
///
/// Sub-batches run strictly one after another. A store error that already is
/// an [`UnrecoverableError`] is returned as-is without consulting the policy.
pub async fn dispatch(
    store: &dyn Store,
    events: &[CommittedEvent],
    policy: &dyn ErrorPolicy,
) -> Result<Dispatched, UnrecoverableError> {
    let mut dispatched = Dispatched::default();

    // Worklist of index ranges. Right is pushed before left so left pops first.
    let mut pending: Vec<Range<usize>> = Vec::new();
    if !events.is_empty() {
        pending.push(0..events.len());
    }

    while let Some(range) = pending.pop() {
        let batch = &events[range.clone()];
        let err = match store.handle_events(batch).await {
            Ok(output) => {
                dispatched.outputs.push(output);
                continue;
            }
            Err(err) => err,
        };

        let err = match err.downcast::<UnrecoverableError>() {
            Ok(unrecoverable) => {
                error!(store = store.name(), event_id = unrecoverable.event_id(), error = %unrecoverable.source, "store raised unrecoverable error");
                return Err(unrecoverable);
            }
            Err(err) => err,
        };

        if let [event] = batch {
            match policy.resolve(&err, event, store.name()) {
                ErrorResolution::Skip => {
                    warn!(store = store.name(), event_id = event.id, event_type = %event.event_type, error = %err, "skipping event");
                    dispatched.skipped.push(event.id);
                }
                ErrorResolution::NotSkip => {
                    error!(store = store.name(), event_id = event.id, event_type = %event.event_type, error = %err, "event cannot be applied");
                    return Err(UnrecoverableError::new(event.clone(), err));
                }
            }
            continue;
        }

        let mid = range.start + batch.len() / 2;
        debug!(
            store = store.name(),
            from = batch[0].id,
            to = batch[batch.len() - 1].id,
            error = %err,
            "batch failed, bisecting"
        );
        pending.push(mid..range.end);
        pending.push(range.start..mid);
    }

    Ok(dispatched)
}
