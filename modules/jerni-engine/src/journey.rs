//! The Journey facade over the log client, the subscription and the stores.

use std::any::Any;
use std::sync::Arc;

use async_stream::stream;
use futures::future::try_join_all;
use futures::{Stream, StreamExt};
use jerni_events::{
    last_id, CommittedEvent, EventDatabase, JerniPersistenceError, NewEvent, Store,
};
use jerni_stream::{Backoff, ClientError, LogClient, Subscription};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::JourneyConfig;
use crate::dispatcher::{dispatch, ErrorPolicy, NeverSkip};
use crate::error::JourneyError;
use crate::waiter::{CheckpointWaiter, WaitLimit};

/// What one store did for one processed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutput {
    pub store: String,
    /// The store's checkpoint after the batch.
    pub last_id: i64,
    pub outputs: Vec<serde_json::Value>,
    pub skipped: Vec<i64>,
}

pub struct Journey {
    config: JourneyConfig,
    http: reqwest::Client,
    client: LogClient,
    db: Arc<dyn EventDatabase>,
    stores: Vec<Arc<dyn Store>>,
    waiter: Arc<CheckpointWaiter>,
    policy: Arc<dyn ErrorPolicy>,
}

impl Journey {
    pub fn new(
        config: JourneyConfig,
        db: Arc<dyn EventDatabase>,
        stores: Vec<Arc<dyn Store>>,
    ) -> Self {
        let http = reqwest::Client::new();
        Self {
            client: LogClient::new(config.stream.server.clone()).with_client(http.clone()),
            waiter: Arc::new(CheckpointWaiter::new(stores.len())),
            policy: Arc::new(NeverSkip),
            config,
            http,
            db,
            stores,
        }
    }

    pub fn with_error_policy(mut self, policy: impl ErrorPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.client = self.client.with_client(http.clone());
        self.http = http;
        self
    }

    pub fn waiter(&self) -> &CheckpointWaiter {
        &self.waiter
    }

    // -----------------------------------------------------------------------
    // Write side
    // -----------------------------------------------------------------------

    pub async fn commit(&self, event: &NewEvent) -> Result<CommittedEvent, ClientError> {
        self.client.commit(event).await
    }

    pub async fn latest(&self) -> Result<Option<CommittedEvent>, ClientError> {
        self.client.latest().await
    }

    // -----------------------------------------------------------------------
    // Projection
    // -----------------------------------------------------------------------

    /// Project the log into every store until `token` is cancelled.
    ///
    /// Stores are first caught up from the local EventDatabase, then the
    /// subscription resumes from its latest persisted id. Yields one
    /// `Vec<BatchOutput>` per processed batch. Only fatal errors are yielded,
    /// and the stream ends right after one. Event database reads for live
    /// batches are retried with backoff rather than reported.
    pub fn begin(
        &self,
        token: CancellationToken,
    ) -> impl Stream<Item = Result<Vec<BatchOutput>, JourneyError>> + Send {
        let projector = Projector {
            db: self.db.clone(),
            stores: self.stores.clone(),
            waiter: self.waiter.clone(),
            policy: self.policy.clone(),
            page_size: self.config.page_size.max(1),
            token: token.clone(),
        };
        let subscription = Subscription::new(self.config.stream.clone(), self.db.clone())
            .with_client(self.http.clone());

        stream! {
            let mut cursors = Vec::with_capacity(projector.stores.len());
            for (track, store) in projector.stores.iter().enumerate() {
                if token.is_cancelled() {
                    return;
                }
                match store.last_seen_id().await {
                    Ok(seen) => {
                        let seen = seen.unwrap_or(0);
                        projector.waiter.increment(track, seen);
                        cursors.push(seen);
                    }
                    Err(source) => {
                        yield Err(JourneyError::Store { store: store.name().to_string(), source });
                        return;
                    }
                }
            }

            let from = match projector.db.latest_event_id().await {
                Ok(id) => id,
                Err(e) => {
                    yield Err(JourneyError::Database(e));
                    return;
                }
            };

            if cursors.iter().any(|cursor| *cursor < from) {
                info!(until = from, "catching stores up from event database");
                match projector.advance(&mut cursors, from, Reads::FailFast).await {
                    Ok(_) if token.is_cancelled() => {
                        info!("journey cancelled during catch-up");
                        return;
                    }
                    Ok(outputs) => yield Ok(outputs),
                    Err(e) => {
                        error!(error = %e, "catch-up failed");
                        yield Err(e);
                        return;
                    }
                }
            }

            let batches = subscription.run(from, token.clone());
            futures::pin_mut!(batches);

            while let Some(next) = batches.next().await {
                let until = match next {
                    Ok(id) => id,
                    Err(e) => {
                        error!(error = %e, "subscription stopped");
                        yield Err(e.into());
                        return;
                    }
                };
                match projector.advance(&mut cursors, until, Reads::Retry).await {
                    Ok(_) if token.is_cancelled() => break,
                    Ok(outputs) => yield Ok(outputs),
                    Err(e) => {
                        error!(error = %e, until, "projection stopped");
                        yield Err(e);
                        return;
                    }
                }
            }
            info!("journey stopped");
        }
    }

    /// Resolve once every store has processed `event`.
    pub async fn wait_for(
        &self,
        event: &CommittedEvent,
        limit: WaitLimit,
    ) -> Result<(), JerniPersistenceError> {
        self.waiter
            .wait(event.id, limit)
            .await
            .map_err(|e| JerniPersistenceError::new(event.id, e))
    }

    /// Feed every store's own checkpoint stream into the waiter until
    /// `token` is cancelled or all of them end.
    pub async fn watch_stores(&self, token: CancellationToken) {
        let feeds = self
            .stores
            .iter()
            .enumerate()
            .map(|(track, store)| store.listen().map(move |id| (track, id)));
        let mut checkpoints = futures::stream::select_all(feeds);

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                next = checkpoints.next() => next,
            };
            let Some((track, id)) = next else {
                return;
            };
            if self.waiter.increment(track, id) {
                debug!(store = self.stores[track].name(), checkpoint = id, "store checkpoint advanced");
            }
        }
    }

    /// Read-side handle for `model`, from the first store that serves it.
    pub fn get_reader<T: Any + Send + Sync>(&self, model: &str) -> Option<Arc<T>> {
        self.stores
            .iter()
            .filter_map(|store| store.driver(model))
            .find_map(|driver| driver.downcast::<T>().ok())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Wipe every store and the event database, and rewind all checkpoints.
    pub async fn clean(&self) -> anyhow::Result<()> {
        for store in &self.stores {
            store.clean().await?;
        }
        self.db.clean().await?;
        self.waiter.reset_all(None);
        info!("journey cleaned");
        Ok(())
    }

    pub async fn dispose(&self) -> anyhow::Result<()> {
        for store in &self.stores {
            store.dispose().await?;
        }
        self.db.dispose().await
    }
}

// ---------------------------------------------------------------------------
// Projector: moves every store from its cursor up to a persisted id
// ---------------------------------------------------------------------------

/// What a failed event database read does to a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reads {
    FailFast,
    Retry,
}

struct Projector {
    db: Arc<dyn EventDatabase>,
    stores: Vec<Arc<dyn Store>>,
    waiter: Arc<CheckpointWaiter>,
    policy: Arc<dyn ErrorPolicy>,
    page_size: usize,
    token: CancellationToken,
}

impl Projector {
    /// Stores run concurrently; each one applies its own pages in order.
    /// On cancellation each store stops at a page boundary, so the returned
    /// checkpoints may fall short of `until`.
    async fn advance(
        &self,
        cursors: &mut [i64],
        until: i64,
        reads: Reads,
    ) -> Result<Vec<BatchOutput>, JourneyError> {
        let runs = self
            .stores
            .iter()
            .zip(cursors.iter())
            .enumerate()
            .map(|(track, (store, cursor))| {
                self.advance_store(track, store.as_ref(), *cursor, until, reads)
            });
        let outputs = try_join_all(runs).await?;

        for (cursor, output) in cursors.iter_mut().zip(&outputs) {
            *cursor = output.last_id;
        }
        Ok(outputs)
    }

    async fn advance_store(
        &self,
        track: usize,
        store: &dyn Store,
        from: i64,
        until: i64,
        reads: Reads,
    ) -> Result<BatchOutput, JourneyError> {
        let mut output = BatchOutput {
            store: store.name().to_string(),
            last_id: from,
            outputs: Vec::new(),
            skipped: Vec::new(),
        };

        let mut cursor = from;
        while cursor < until {
            let Some(mut events) = self.read_page(store.name(), cursor, reads).await? else {
                output.last_id = cursor;
                return Ok(output);
            };
            events.retain(|e| e.id <= until);
            let Some(last) = last_id(&events) else {
                break;
            };

            let dispatched = dispatch(store, &events, self.policy.as_ref()).await?;
            debug!(
                store = store.name(),
                count = events.len(),
                last_id = last,
                skipped = dispatched.skipped.len(),
                "events projected"
            );
            output.outputs.extend(dispatched.outputs);
            output.skipped.extend(dispatched.skipped);
            cursor = last;
            self.waiter.increment(track, cursor);
        }

        // Everything up to `until` is persisted, so a store with nothing
        // left to read is caught up even when ids are sparse.
        if cursor < until {
            cursor = until;
            self.waiter.increment(track, cursor);
        }
        output.last_id = cursor;
        Ok(output)
    }

    /// One page after `cursor`, or `None` once the token is cancelled.
    async fn read_page(
        &self,
        store: &str,
        cursor: i64,
        reads: Reads,
    ) -> Result<Option<Vec<CommittedEvent>>, JourneyError> {
        let mut backoff = Backoff::new();
        loop {
            if self.token.is_cancelled() {
                return Ok(None);
            }
            let err = match self.db.get_events_from(cursor, self.page_size).await {
                Ok(events) => return Ok(Some(events)),
                Err(err) if reads == Reads::FailFast => return Err(JourneyError::Database(err)),
                Err(err) => err,
            };

            backoff.record_failure();
            let delay = backoff.delay();
            warn!(store, cursor, error = %err, retry_in = ?delay, "event database read failed");
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
