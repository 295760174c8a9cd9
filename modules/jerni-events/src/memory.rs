//! In-memory EventDatabase for tests and development. No persistence.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::traits::EventDatabase;
use crate::types::CommittedEvent;

/// BTreeMap-backed event database. Persisting an id twice overwrites it.
#[derive(Default)]
pub struct MemoryEventDatabase {
    events: Mutex<BTreeMap<i64, CommittedEvent>>,
}

impl MemoryEventDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with events (for tests).
    pub fn with_events(events: impl IntoIterator<Item = CommittedEvent>) -> Self {
        let db = Self::new();
        {
            let mut map = db.events.lock().unwrap();
            for event in events {
                map.insert(event.id, event);
            }
        }
        db
    }

    /// Snapshot of every stored event in id order.
    pub fn events(&self) -> Vec<CommittedEvent> {
        self.events.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventDatabase for MemoryEventDatabase {
    async fn get_events_from(&self, from: i64, limit: usize) -> Result<Vec<CommittedEvent>> {
        let map = self.events.lock().unwrap();
        Ok(map
            .range(from.saturating_add(1)..)
            .take(limit)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn persist_batch(&self, events: &[CommittedEvent]) -> Result<()> {
        let mut map = self.events.lock().unwrap();
        for event in events {
            map.insert(event.id, event.clone());
        }
        debug!(count = events.len(), total = map.len(), "persisted batch in memory");
        Ok(())
    }

    async fn latest_event_id(&self) -> Result<i64> {
        let map = self.events.lock().unwrap();
        Ok(map.keys().next_back().copied().unwrap_or(0))
    }

    async fn clean(&self) -> Result<()> {
        self.events.lock().unwrap().clear();
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}
