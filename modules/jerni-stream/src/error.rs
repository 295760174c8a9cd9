use thiserror::Error;

/// Failure of one connection attempt. Always transient: the subscription
/// loop retries through the backoff ladder and never surfaces it.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Subscribe rejected (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("Malformed INCMSG payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Stream closed by server")]
    Closed,

    #[error("Server URL cannot carry a path: {0}")]
    InvalidUrl(String),
}

/// Errors that end a subscription run.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// The server keeps overflowing the burst limits even one event at a time.
    #[error("Burst still too large at batch size 1 (resuming after event #{from})")]
    BatchTooLarge { from: i64 },
}

/// Errors from the request/response log endpoints.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Server URL cannot carry a path: {0}")]
    InvalidUrl(String),
}
