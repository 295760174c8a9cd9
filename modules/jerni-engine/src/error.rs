use jerni_events::UnrecoverableError;
use jerni_stream::SubscriptionError;
use thiserror::Error;

/// Errors that end a [`crate::Journey::begin`] run.
#[derive(Debug, Error)]
pub enum JourneyError {
    #[error(transparent)]
    Unrecoverable(#[from] UnrecoverableError),

    #[error("Burst still too large at batch size 1 (resuming after event #{from})")]
    BatchTooLarge { from: i64 },

    #[error("Event database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Store {store} failed: {source}")]
    Store {
        store: String,
        #[source]
        source: anyhow::Error,
    },
}

impl From<SubscriptionError> for JourneyError {
    fn from(err: SubscriptionError) -> Self {
        match err {
            SubscriptionError::BatchTooLarge { from } => JourneyError::BatchTooLarge { from },
        }
    }
}
