//! Scripted log server on 127.0.0.1:0 for integration tests.
#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Value};

/// What the server saw on one `/subscribe` request.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub query: String,
    pub last_event_id: Option<String>,
    pub burst_count: Option<String>,
    pub authorization: Option<String>,
}

/// How to answer one `/subscribe` request.
pub enum Plan {
    /// Send the chunks, then either keep the body open or end it.
    Body { chunks: Vec<String>, hang: bool },
    Status(u16),
}

impl Plan {
    pub fn close(chunks: Vec<String>) -> Self {
        Plan::Body {
            chunks,
            hang: false,
        }
    }

    pub fn hang(chunks: Vec<String>) -> Self {
        Plan::Body { chunks, hang: true }
    }
}

type Script = dyn Fn(usize, &SeenRequest) -> Plan + Send + Sync;

struct ServerState {
    script: Box<Script>,
    requests: Mutex<Vec<SeenRequest>>,
    latest: Mutex<Value>,
    committed: Mutex<Vec<Value>>,
    /// Attempts whose response body was dropped by the server.
    closed: Mutex<Vec<usize>>,
}

/// Lives inside a response body; hyper drops the body once the client
/// disconnects or the body ends.
struct BodyGuard {
    state: Arc<ServerState>,
    attempt: usize,
}

impl Drop for BodyGuard {
    fn drop(&mut self) {
        self.state.closed.lock().unwrap().push(self.attempt);
    }
}

pub struct TestServer {
    pub url: reqwest::Url,
    state: Arc<ServerState>,
}

impl TestServer {
    pub async fn start<F>(script: F) -> Self
    where
        F: Fn(usize, &SeenRequest) -> Plan + Send + Sync + 'static,
    {
        let state = Arc::new(ServerState {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
            latest: Mutex::new(json!({ "id": 0, "type": "@@INIT" })),
            committed: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/subscribe", get(subscribe))
            .route("/events/latest", get(latest))
            .route("/commit", post(commit))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://user:secret@{addr}").parse().unwrap(),
            state,
        }
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn set_latest(&self, event: Value) {
        *self.state.latest.lock().unwrap() = event;
    }

    pub fn committed(&self) -> Vec<Value> {
        self.state.committed.lock().unwrap().clone()
    }

    /// Poll until at least `n` subscribe requests arrived.
    pub async fn wait_for_requests(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.state.requests.lock().unwrap().len() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("server never saw enough requests");
    }

    pub fn closed(&self) -> Vec<usize> {
        self.state.closed.lock().unwrap().clone()
    }

    /// Poll until the server dropped at least `n` response bodies.
    pub async fn wait_for_closed(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.state.closed.lock().unwrap().len() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("server still holds a connection open; closed: {:?}", self.closed()));
    }
}

async fn subscribe(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let seen = SeenRequest {
        query: uri.query().unwrap_or_default().to_string(),
        last_event_id: header("last-event-id"),
        burst_count: header("burst-count"),
        authorization: header("authorization"),
    };

    let attempt = {
        let mut requests = state.requests.lock().unwrap();
        requests.push(seen.clone());
        requests.len() - 1
    };

    match (state.script)(attempt, &seen) {
        Plan::Status(code) => (
            StatusCode::from_u16(code).unwrap(),
            "scripted failure".to_string(),
        )
            .into_response(),
        Plan::Body { chunks, hang } => {
            let sent = stream::iter(chunks.into_iter().map(Ok::<_, Infallible>));
            let sent: BoxStream<'static, Result<String, Infallible>> = if hang {
                sent.chain(stream::pending()).boxed()
            } else {
                sent.boxed()
            };
            let guard = BodyGuard {
                state: state.clone(),
                attempt,
            };
            let body = sent.map(move |chunk| {
                let _held = &guard;
                chunk
            });
            Response::builder()
                .header(header::CONTENT_TYPE, "text/event-stream")
                .body(Body::from_stream(body))
                .unwrap()
        }
    }
}

async fn latest(State(state): State<Arc<ServerState>>) -> Json<Value> {
    Json(state.latest.lock().unwrap().clone())
}

async fn commit(State(state): State<Arc<ServerState>>, Json(body): Json<Value>) -> Json<Value> {
    let mut committed = state.committed.lock().unwrap();
    committed.push(body.clone());
    Json(json!({
        "id": committed.len() as i64,
        "type": body["type"],
        "payload": body["payload"],
    }))
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// One INCMSG frame carrying events with the given ids.
pub fn incmsg(ids: &[i64]) -> String {
    let events: Vec<Value> = ids
        .iter()
        .map(|id| json!({ "id": id, "type": "TEST", "payload": { "n": id } }))
        .collect();
    let last = ids.last().copied().unwrap_or_default();
    format!(
        "id: {last}\nevent: INCMSG\ndata: {}\n\n",
        Value::Array(events)
    )
}

/// A plain message whose `data` is `body`.
pub fn data(id: i64, body: &str) -> String {
    format!("id: {id}\ndata: {body}\n\n")
}
