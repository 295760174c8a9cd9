//! The outer retry loop around the Stream Connector.
//!
//! Persist-before-emit: every delivered batch is written to the EventDatabase
//! first, then its last id is yielded. A crash between the two replays the
//! batch on restart, which the database absorbs as an upsert.

use async_stream::stream;
use futures::{Stream, StreamExt};
use jerni_events::{last_id, EventDatabase};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::connection::SubscribeRequest;
use crate::connector::{connect, ConnectOptions, ConnectorSignal};
use crate::error::SubscriptionError;
use crate::policy::{Backoff, BatchSizePolicy};

/// Keeps one connection alive at a time and persists what it delivers.
pub struct Subscription<D> {
    http: reqwest::Client,
    config: StreamConfig,
    db: D,
}

impl<D: EventDatabase + 'static> Subscription<D> {
    pub fn new(config: StreamConfig, db: D) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            db,
        }
    }

    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Stream the last persisted id of every batch received after `from`.
    ///
    /// Transient failures are retried through the backoff ladder and never
    /// surface. Ends without an item when `token` is cancelled.
    pub fn run(
        self,
        from: i64,
        token: CancellationToken,
    ) -> impl Stream<Item = Result<i64, SubscriptionError>> + Send {
        let Self { http, config, db } = self;

        stream! {
            let mut current_from = from;
            let mut backoff = Backoff::new();
            let mut policy = BatchSizePolicy::new(
                config.idle_time,
                config.max_idle_time,
                config.batch_size,
            );

            loop {
                if token.is_cancelled() {
                    return;
                }
                let delay = backoff.delay();
                let cancelled = tokio::select! {
                    biased;
                    _ = token.cancelled() => true,
                    _ = tokio::time::sleep(delay) => false,
                };
                if cancelled {
                    return;
                }

                let options = ConnectOptions {
                    request: SubscribeRequest {
                        server: config.server.clone(),
                        includes: config.includes.clone(),
                        last_event_id: current_from,
                        burst_count: policy.batch_size(),
                    },
                    idle_time: policy.idle_time(),
                    limits: config.burst_limits(),
                };

                let signals = connect(http.clone(), options, token.child_token());
                futures::pin_mut!(signals);

                while let Some(signal) = signals.next().await {
                    match signal {
                        Ok(ConnectorSignal::Connected) => {
                            info!(from = current_from, batch_size = policy.batch_size(), "subscription connected");
                        }
                        Ok(ConnectorSignal::Idle) => {
                            policy.on_idle();
                            debug!(idle_time = ?policy.idle_time(), "reconnecting after idle");
                        }
                        Ok(ConnectorSignal::TooLarge) => {
                            if !policy.on_too_large() {
                                yield Err(SubscriptionError::BatchTooLarge { from: current_from });
                                return;
                            }
                            warn!(batch_size = policy.batch_size(), "shrinking batch size");
                        }
                        Ok(ConnectorSignal::Incoming(mut events)) => {
                            events.retain(|e| e.id > current_from);
                            let Some(last) = last_id(&events) else {
                                continue;
                            };

                            if let Err(e) = db.persist_batch(&events).await {
                                backoff.record_failure();
                                warn!(
                                    error = %e,
                                    consecutive_errors = backoff.consecutive_errors(),
                                    "failed to persist batch, reconnecting"
                                );
                                break;
                            }

                            debug!(count = events.len(), last_id = last, "batch persisted");
                            current_from = last;
                            backoff.record_success();
                            policy.on_batch();
                            yield Ok(last);
                        }
                        Err(e) => {
                            backoff.record_failure();
                            warn!(
                                error = %e,
                                consecutive_errors = backoff.consecutive_errors(),
                                retry_in = ?backoff.delay(),
                                "subscription attempt failed"
                            );
                        }
                    }
                }
            }
        }
    }
}
