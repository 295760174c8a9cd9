//! In-process log server and a recording store for Journey tests.
#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, BoxStream, StreamExt};
use jerni_events::{CommittedEvent, EventDatabase, MemoryEventDatabase, Store};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

// =============================================================================
// Log server
// =============================================================================

#[derive(Default)]
struct Log {
    events: Mutex<Vec<Value>>,
    subscribe_from: Mutex<Vec<i64>>,
}

/// Serves its whole log as one INCMSG frame per subscribe request, then holds
/// the connection open.
pub struct LogServer {
    pub url: reqwest::Url,
    log: Arc<Log>,
}

impl LogServer {
    pub async fn start() -> Self {
        let log = Arc::new(Log::default());
        let app = Router::new()
            .route("/subscribe", get(subscribe))
            .route("/events/latest", get(latest))
            .route("/commit", post(commit))
            .with_state(log.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}").parse().unwrap(),
            log,
        }
    }

    /// Append events server-side with ids `ids`.
    pub fn seed(&self, ids: impl IntoIterator<Item = i64>) {
        let mut events = self.log.events.lock().unwrap();
        for id in ids {
            events.push(json!({ "id": id, "type": "TEST", "payload": { "n": id } }));
        }
    }

    /// `Last-Event-ID` of every subscribe request so far.
    pub fn subscribed_from(&self) -> Vec<i64> {
        self.log.subscribe_from.lock().unwrap().clone()
    }
}

async fn subscribe(State(log): State<Arc<Log>>, headers: HeaderMap) -> Response {
    let from: i64 = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    log.subscribe_from.lock().unwrap().push(from);

    let pending: Vec<Value> = log
        .events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e["id"].as_i64().unwrap_or_default() > from)
        .cloned()
        .collect();

    let mut chunks = vec![":ok\n\n".to_string()];
    if let Some(last) = pending.last() {
        chunks.push(format!(
            "id: {}\nevent: INCMSG\ndata: {}\n\n",
            last["id"],
            Value::Array(pending.clone())
        ));
    }
    let body: BoxStream<'static, Result<String, Infallible>> = stream::iter(chunks.into_iter().map(Ok))
        .chain(stream::pending())
        .boxed();

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(body))
        .unwrap()
}

async fn latest(State(log): State<Arc<Log>>) -> Json<Value> {
    let events = log.events.lock().unwrap();
    Json(
        events
            .last()
            .cloned()
            .unwrap_or_else(|| json!({ "id": 0, "type": "@@INIT" })),
    )
}

async fn commit(State(log): State<Arc<Log>>, Json(body): Json<Value>) -> Json<Value> {
    let mut events = log.events.lock().unwrap();
    let event = json!({
        "id": events.len() as i64 + 1,
        "type": body["type"],
        "payload": body["payload"],
    });
    events.push(event.clone());
    Json(event)
}

// =============================================================================
// Recording store
// =============================================================================

/// Applies everything except its poison ids, remembering what it applied.
pub struct RecordingStore {
    name: String,
    poison: Vec<i64>,
    last_seen: Option<i64>,
    checkpoints: Vec<i64>,
    applied: Mutex<Vec<i64>>,
    cleaned: Mutex<bool>,
    cancel_after: Option<(i64, CancellationToken)>,
}

impl RecordingStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            poison: Vec::new(),
            last_seen: None,
            checkpoints: Vec::new(),
            applied: Mutex::new(Vec::new()),
            cleaned: Mutex::new(false),
            cancel_after: None,
        }
    }

    pub fn poisoned(mut self, ids: &[i64]) -> Self {
        self.poison = ids.to_vec();
        self
    }

    pub fn seen_up_to(mut self, id: i64) -> Self {
        self.last_seen = Some(id);
        self
    }

    /// Checkpoints to push through `listen()`.
    pub fn pushing(mut self, checkpoints: &[i64]) -> Self {
        self.checkpoints = checkpoints.to_vec();
        self
    }

    /// Cancel `token` once an event with id `id` or higher is applied.
    pub fn cancelling_after(mut self, id: i64, token: CancellationToken) -> Self {
        self.cancel_after = Some((id, token));
        self
    }

    pub fn applied(&self) -> Vec<i64> {
        self.applied.lock().unwrap().clone()
    }

    pub fn was_cleaned(&self) -> bool {
        *self.cleaned.lock().unwrap()
    }
}

#[async_trait]
impl Store for RecordingStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle_events(&self, events: &[CommittedEvent]) -> Result<Value> {
        if let Some(bad) = events.iter().find(|e| self.poison.contains(&e.id)) {
            return Err(anyhow!("{} rejects #{}", self.name, bad.id));
        }
        let ids: Vec<i64> = events.iter().map(|e| e.id).collect();
        self.applied.lock().unwrap().extend(&ids);
        if let Some((after, token)) = &self.cancel_after {
            if ids.iter().any(|id| id >= after) {
                token.cancel();
            }
        }
        Ok(json!(ids))
    }

    async fn last_seen_id(&self) -> Result<Option<i64>> {
        Ok(self.last_seen)
    }

    fn listen(&self) -> BoxStream<'static, i64> {
        stream::iter(self.checkpoints.clone()).boxed()
    }

    fn driver(&self, model: &str) -> Option<Arc<dyn std::any::Any + Send + Sync>> {
        (model == self.name).then(|| Arc::new(self.name.clone()) as Arc<dyn std::any::Any + Send + Sync>)
    }

    async fn clean(&self) -> Result<()> {
        self.applied.lock().unwrap().clear();
        *self.cleaned.lock().unwrap() = true;
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Flaky event database
// =============================================================================

/// In-memory database whose first `failures` page reads fail.
pub struct FlakyDatabase {
    inner: MemoryEventDatabase,
    failures: AtomicUsize,
    reads: AtomicUsize,
}

impl FlakyDatabase {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: MemoryEventDatabase::new(),
            failures: AtomicUsize::new(failures),
            reads: AtomicUsize::new(0),
        }
    }

    /// Page reads attempted so far, failed ones included.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventDatabase for FlakyDatabase {
    async fn get_events_from(&self, from: i64, limit: usize) -> Result<Vec<CommittedEvent>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(anyhow!("database unavailable"));
        }
        self.inner.get_events_from(from, limit).await
    }

    async fn persist_batch(&self, events: &[CommittedEvent]) -> Result<()> {
        self.inner.persist_batch(events).await
    }

    async fn latest_event_id(&self) -> Result<i64> {
        self.inner.latest_event_id().await
    }

    async fn clean(&self) -> Result<()> {
        self.inner.clean().await
    }

    async fn dispose(&self) -> Result<()> {
        self.inner.dispose().await
    }
}

pub fn events(ids: impl IntoIterator<Item = i64>) -> Vec<CommittedEvent> {
    ids.into_iter()
        .map(|id| CommittedEvent::new(id, "TEST", json!({ "n": id })))
        .collect()
}
