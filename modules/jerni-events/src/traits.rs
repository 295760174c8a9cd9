//! Contracts for the collaborators the delivery engine drives.

use std::any::Any;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::types::{last_id, CommittedEvent};

/// A projection: a materialized view folded from committed events in id order.
///
/// `handle_events` receives a non-empty, id-ordered batch and must be
/// idempotent at the batch boundary, since a reconnect may redeliver the
/// last event it saw.
#[async_trait]
pub trait Store: Send + Sync {
    /// Human readable name, used in logs and batch outputs.
    fn name(&self) -> &str;

    /// Apply a batch. The returned value is opaque to the engine.
    async fn handle_events(&self, events: &[CommittedEvent]) -> Result<serde_json::Value>;

    /// Highest event id this projection has durably applied, if any.
    async fn last_seen_id(&self) -> Result<Option<i64>>;

    /// Checkpoint ids pushed by the backing storage (e.g. a change feed).
    /// Stores without such a feed never yield.
    fn listen(&self) -> BoxStream<'static, i64> {
        futures::stream::empty().boxed()
    }

    /// Declare the models this store materializes.
    async fn register_models(&self, _models: &[&str]) -> Result<()> {
        Ok(())
    }

    /// Storage handle for one model, for read-side queries.
    fn driver(&self, _model: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        None
    }

    /// Drop all projected state.
    async fn clean(&self) -> Result<()>;

    /// Release connections. The store is unusable afterwards.
    async fn dispose(&self) -> Result<()>;
}

/// Local raw-event persistence. Writes must be idempotent upserts keyed by id.
#[async_trait]
pub trait EventDatabase: Send + Sync {
    /// Events with `id > from`, in id order, at most `limit` of them.
    async fn get_events_from(&self, from: i64, limit: usize) -> Result<Vec<CommittedEvent>>;

    /// Persist an id-ordered batch.
    async fn persist_batch(&self, events: &[CommittedEvent]) -> Result<()>;

    /// Highest persisted id, or 0 when empty.
    async fn latest_event_id(&self) -> Result<i64>;

    async fn clean(&self) -> Result<()>;

    async fn dispose(&self) -> Result<()>;

    /// Page through everything after `from`, `limit` events per item.
    fn stream_events_from(
        &self,
        from: i64,
        limit: usize,
    ) -> BoxStream<'_, Result<Vec<CommittedEvent>>> {
        let limit = limit.max(1);
        futures::stream::unfold(Some(from), move |cursor| async move {
            let cursor = cursor?;
            match self.get_events_from(cursor, limit).await {
                Ok(page) if page.is_empty() => None,
                Ok(page) => {
                    let next = if page.len() < limit { None } else { last_id(&page) };
                    Some((Ok(page), next))
                }
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// Arc<T> blankets
// ---------------------------------------------------------------------------

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn handle_events(&self, events: &[CommittedEvent]) -> Result<serde_json::Value> {
        (**self).handle_events(events).await
    }

    async fn last_seen_id(&self) -> Result<Option<i64>> {
        (**self).last_seen_id().await
    }

    fn listen(&self) -> BoxStream<'static, i64> {
        (**self).listen()
    }

    async fn register_models(&self, models: &[&str]) -> Result<()> {
        (**self).register_models(models).await
    }

    fn driver(&self, model: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        (**self).driver(model)
    }

    async fn clean(&self) -> Result<()> {
        (**self).clean().await
    }

    async fn dispose(&self) -> Result<()> {
        (**self).dispose().await
    }
}

#[async_trait]
impl<D: EventDatabase + ?Sized> EventDatabase for Arc<D> {
    async fn get_events_from(&self, from: i64, limit: usize) -> Result<Vec<CommittedEvent>> {
        (**self).get_events_from(from, limit).await
    }

    async fn persist_batch(&self, events: &[CommittedEvent]) -> Result<()> {
        (**self).persist_batch(events).await
    }

    async fn latest_event_id(&self) -> Result<i64> {
        (**self).latest_event_id().await
    }

    async fn clean(&self) -> Result<()> {
        (**self).clean().await
    }

    async fn dispose(&self) -> Result<()> {
        (**self).dispose().await
    }

    fn stream_events_from(
        &self,
        from: i64,
        limit: usize,
    ) -> BoxStream<'_, Result<Vec<CommittedEvent>>> {
        (**self).stream_events_from(from, limit)
    }
}
