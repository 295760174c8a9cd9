//! Core event types. Opaque payloads, no domain knowledge.

use serde::{Deserialize, Serialize};

/// Type tag the server reports from `events/latest` when the log is empty.
pub const INIT_EVENT_TYPE: &str = "@@INIT";

/// An event as committed by the append-only log server.
///
/// Ids are strictly increasing within one subscription run. Re-subscribing
/// from an id may redeliver it, so everything downstream must treat an id it
/// has already seen as an idempotent upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedEvent {
    pub id: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub meta: serde_json::Value,
}

impl CommittedEvent {
    pub fn new(id: i64, event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id,
            event_type: event_type.into(),
            payload,
            meta: serde_json::Value::Null,
        }
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }

    /// True for the sentinel the server returns when nothing was committed yet.
    pub fn is_init_sentinel(&self) -> bool {
        self.id == 0 && self.event_type == INIT_EVENT_TYPE
    }
}

/// An event to be committed. The server assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub meta: serde_json::Value,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            meta: serde_json::Value::Null,
        }
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }
}

/// Id of the last event in an id-ordered batch.
pub fn last_id(events: &[CommittedEvent]) -> Option<i64> {
    events.last().map(|e| e.id)
}
