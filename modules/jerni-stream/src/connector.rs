//! Stream Connector: a single subscription attempt.
//!
//! Opens the subscribe request, feeds the body through the frame parser, and
//! reports what the caller must adapt before reconnecting:
//! - `Idle`: nothing arrived within the idle time; double it and reconnect
//! - `TooLarge`: too much data without a finished message; halve the batch size
//!
//! The stream ends after `Idle`, `TooLarge`, an error, or cancellation.
//! Ending drops the response, which closes the connection.

use std::time::Duration;

use async_stream::stream;
use futures::Stream;
use jerni_events::CommittedEvent;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::{SseConnection, SubscribeRequest};
use crate::error::StreamError;

/// Only frames with this event name carry committed events.
pub const INCOMING_EVENT: &str = "INCMSG";

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorSignal {
    Connected,
    Idle,
    TooLarge,
    Incoming(Vec<CommittedEvent>),
}

/// Data allowed to pile up without a completed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstLimits {
    pub max_bytes: usize,
    pub max_chunks: usize,
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub request: SubscribeRequest,
    pub idle_time: Duration,
    pub limits: BurstLimits,
}

enum Step {
    Cancelled,
    Idle,
    Read(Result<Option<crate::connection::Read>, StreamError>),
}

/// Run one connection attempt.
pub fn connect(
    http: reqwest::Client,
    options: ConnectOptions,
    token: CancellationToken,
) -> impl Stream<Item = Result<ConnectorSignal, StreamError>> + Send {
    stream! {
        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            opened = SseConnection::open(&http, &options.request) => Some(opened),
        };
        let mut connection = match opened {
            None => return,
            Some(Ok(connection)) => connection,
            Some(Err(e)) => {
                yield Err(e);
                return;
            }
        };
        yield Ok(ConnectorSignal::Connected);

        let mut last_message_at = Instant::now();
        let mut bytes_since_message = 0usize;
        let mut chunks_since_message = 0usize;

        loop {
            // Data already waiting wins over the idle deadline.
            let step = tokio::select! {
                biased;
                _ = token.cancelled() => Step::Cancelled,
                read = connection.read() => Step::Read(read),
                _ = tokio::time::sleep_until(last_message_at + options.idle_time) => Step::Idle,
            };

            let read = match step {
                Step::Cancelled => return,
                Step::Idle => {
                    debug!(idle_time = ?options.idle_time, "subscription idle");
                    yield Ok(ConnectorSignal::Idle);
                    return;
                }
                Step::Read(Ok(Some(read))) => read,
                Step::Read(Ok(None)) => {
                    yield Err(StreamError::Closed);
                    return;
                }
                Step::Read(Err(e)) => {
                    yield Err(e);
                    return;
                }
            };

            if read.messages.is_empty() {
                bytes_since_message += read.bytes;
                chunks_since_message += 1;
            } else {
                for message in read.messages {
                    if message.event != INCOMING_EVENT {
                        continue;
                    }
                    match serde_json::from_str::<Vec<CommittedEvent>>(&message.data) {
                        Ok(events) => yield Ok(ConnectorSignal::Incoming(events)),
                        Err(e) => {
                            yield Err(StreamError::Payload(e));
                            return;
                        }
                    }
                }
                // The consumer's time spent on the yielded batches is not idle time.
                last_message_at = Instant::now();
                bytes_since_message = read.unfinished;
                chunks_since_message = 0;
            }

            if bytes_since_message > options.limits.max_bytes
                || chunks_since_message > options.limits.max_chunks
            {
                warn!(
                    bytes = bytes_since_message,
                    chunks = chunks_since_message,
                    burst_count = options.request.burst_count,
                    "burst exceeds limits"
                );
                yield Ok(ConnectorSignal::TooLarge);
                return;
            }
        }
    }
}
