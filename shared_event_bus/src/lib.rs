#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Event publication used to surface engine lifecycle events to subscribers.

use std::{collections::VecDeque, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// One engine event, JSON-encodable for durable sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Unique event identifier.
    pub id: Uuid,
    /// Component that emitted the event.
    pub source: String,
    /// Dotted event kind (e.g. `practice.session.completed`).
    pub kind: String,
    /// Emission timestamp.
    pub occurred_at: DateTime<Utc>,
    /// Arbitrary JSON payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EngineEvent {
    /// Builds an event stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        kind: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            kind: kind.into(),
            occurred_at: Utc::now(),
            payload,
        }
    }
}

/// Sink for engine events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one event.
    async fn publish(&self, event: EngineEvent) -> Result<()>;
}

/// In-memory broadcast bus retaining a bounded backlog, for wiring and tests.
#[derive(Debug, Clone)]
pub struct MemoryEventBus {
    sender: broadcast::Sender<EngineEvent>,
    backlog: Arc<Mutex<VecDeque<EngineEvent>>>,
    capacity: usize,
}

impl MemoryEventBus {
    /// Creates a bus retaining at most `capacity` recent events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Subscribes to live events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Snapshot of the retained backlog, oldest first.
    #[must_use]
    pub fn backlog(&self) -> Vec<EngineEvent> {
        self.backlog.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn publish(&self, event: EngineEvent) -> Result<()> {
        {
            let mut backlog = self.backlog.lock();
            if backlog.len() == self.capacity {
                backlog.pop_front();
            }
            backlog.push_back(event.clone());
        }
        // A send with no live receivers is fine; the backlog keeps the event.
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn retains_backlog_and_broadcasts() {
        let bus = MemoryEventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(EngineEvent::new(
            "sessions.manager",
            "practice.session.completed",
            json!({ "correct": 3 }),
        ))
        .await
        .unwrap();
        let live = rx.recv().await.unwrap();
        assert_eq!(live.kind, "practice.session.completed");
        assert_eq!(bus.backlog().len(), 1);
    }

    #[tokio::test]
    async fn backlog_is_bounded() {
        let bus = MemoryEventBus::new(2);
        for i in 0..5 {
            bus.publish(EngineEvent::new("t", "tick", json!({ "i": i })))
                .await
                .unwrap();
        }
        let backlog = bus.backlog();
        assert_eq!(backlog.len(), 2);
        assert_eq!(backlog[0].payload["i"], 3);
    }
}
