//! Buffered Listener: push-based ingestion with watermark flow control.
//!
//! A pump task reads the connection into a FIFO as fast as the server sends.
//! Above the high water mark it drops the connection and remembers where it
//! stopped; once the consumer drains the buffer below the low water mark it
//! reconnects from there.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_stream::stream;
use futures::Stream;
use reqwest::Url;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::connection::{SseConnection, SubscribeRequest};
use crate::policy::Backoff;

/// Buffer sizes, in messages, that pause and resume ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermarks {
    pub high: usize,
    pub low: usize,
}

pub struct BufferedListener {
    http: reqwest::Client,
    server: Url,
    includes: Vec<String>,
    watermarks: Watermarks,
    burst_count: usize,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<VecDeque<String>>,
    data_ready: Notify,
    drained: Notify,
}

impl Shared {
    fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl BufferedListener {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            server: config.server.clone(),
            includes: config.includes.clone(),
            watermarks: config.watermarks(),
            burst_count: config.batch_size,
        }
    }

    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Raw `data` of every message received after `last_event_id`, in order.
    ///
    /// Ends when `token` is cancelled; dropping the stream stops the pump.
    pub fn listen(
        &self,
        last_event_id: i64,
        token: CancellationToken,
    ) -> impl Stream<Item = String> + Send {
        let shared = Arc::new(Shared::default());
        let request = SubscribeRequest {
            server: self.server.clone(),
            includes: self.includes.clone(),
            last_event_id,
            burst_count: self.burst_count,
        };
        let pump = tokio::spawn(pump(
            self.http.clone(),
            request,
            self.watermarks,
            shared.clone(),
            token.clone(),
        ));
        let low = self.watermarks.low;

        stream! {
            let _pump = AbortOnDrop(pump.abort_handle());
            loop {
                let next = {
                    let mut queue = shared.queue.lock().unwrap();
                    let next = queue.pop_front();
                    if queue.len() < low {
                        shared.drained.notify_one();
                    }
                    next
                };
                if let Some(raw) = next {
                    yield raw;
                    continue;
                }

                let cancelled = tokio::select! {
                    biased;
                    _ = token.cancelled() => true,
                    _ = shared.data_ready.notified() => false,
                };
                if cancelled {
                    return;
                }
            }
        }
    }
}

async fn pump(
    http: reqwest::Client,
    mut request: SubscribeRequest,
    watermarks: Watermarks,
    shared: Arc<Shared>,
    token: CancellationToken,
) {
    let mut backoff = Backoff::new();

    loop {
        let delay = backoff.delay();
        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            opened = async {
                tokio::time::sleep(delay).await;
                SseConnection::open(&http, &request).await
            } => opened,
        };
        let mut connection = match opened {
            Ok(connection) => connection,
            Err(e) => {
                backoff.record_failure();
                warn!(error = %e, retry_in = ?backoff.delay(), "listener connect failed");
                continue;
            }
        };
        backoff.record_success();
        info!(last_event_id = request.last_event_id, "listener connected");

        loop {
            let read = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                read = connection.read() => read,
            };
            let read = match read {
                Ok(Some(read)) => read,
                Ok(None) => {
                    backoff.record_failure();
                    debug!("listener stream closed by server");
                    break;
                }
                Err(e) => {
                    backoff.record_failure();
                    warn!(error = %e, "listener read failed");
                    break;
                }
            };
            if read.messages.is_empty() {
                continue;
            }

            let buffered = {
                let mut queue = shared.queue.lock().unwrap();
                for message in read.messages {
                    if let Some(id) = message.id.as_deref().and_then(|id| id.trim().parse().ok()) {
                        request.last_event_id = id;
                    }
                    queue.push_back(message.data);
                }
                queue.len()
            };
            shared.data_ready.notify_one();

            if buffered > watermarks.high {
                drop(connection);
                let resume_from = request.last_event_id + 1;
                info!(buffered, resume_from, "buffer above high water mark, pausing");

                while shared.len() >= watermarks.low {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return,
                        _ = shared.drained.notified() => {}
                    }
                }
                info!(resume_from, "buffer drained below low water mark, resuming");
                break;
            }
        }
    }
}
