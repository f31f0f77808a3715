//! Append-only event stream.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

use super::event::{Event, EventKind};
use crate::task::TaskId;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct Inner {
    events: Vec<Event>,
    counts: HashMap<EventKind, usize>,
}

/// Ordered, append-only record of everything the orchestrator did.
///
/// Sequence numbers are assigned under the write lock, so `seq` order is
/// append order even when timestamps collide.
#[derive(Debug)]
pub struct EventStream {
    inner: RwLock<Inner>,
    tx: broadcast::Sender<Event>,
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStream {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// `capacity` bounds how far a subscriber may lag before it misses events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: RwLock::new(Inner::default()),
            tx,
        }
    }

    /// Append an event and notify subscribers.
    pub async fn append(
        &self,
        task_id: TaskId,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> Event {
        let event = {
            let mut inner = self.inner.write().await;
            let event = Event {
                seq: inner.events.len() as u64,
                timestamp: Utc::now(),
                task_id,
                kind,
                payload,
            };
            inner.events.push(event.clone());
            *inner.counts.entry(kind).or_default() += 1;
            // Sent under the lock so subscribers see events in seq order.
            // No receivers is fine.
            let _ = self.tx.send(event.clone());
            event
        };

        tracing::debug!("New event: {}", event);
        event
    }

    /// Receive events appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// All events in append order.
    pub async fn events(&self) -> Vec<Event> {
        self.inner.read().await.events.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.events.is_empty()
    }

    /// Events matching every given criterion.
    pub async fn filter(
        &self,
        kind: Option<EventKind>,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Vec<Event> {
        self.inner
            .read()
            .await
            .events
            .iter()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .filter(|e| since.map_or(true, |s| e.timestamp >= s))
            .filter(|e| until.map_or(true, |u| e.timestamp <= u))
            .cloned()
            .collect()
    }

    pub async fn for_task(&self, task_id: TaskId) -> Vec<Event> {
        self.inner
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect()
    }

    /// Most recent event, optionally of one kind.
    pub async fn latest(&self, kind: Option<EventKind>) -> Option<Event> {
        self.inner
            .read()
            .await
            .events
            .iter()
            .rev()
            .find(|e| kind.map_or(true, |k| e.kind == k))
            .cloned()
    }

    /// Most recent event of `kind` for `task_id`.
    pub async fn latest_for_task(&self, task_id: TaskId, kind: EventKind) -> Option<Event> {
        self.inner
            .read()
            .await
            .events
            .iter()
            .rev()
            .find(|e| e.task_id == task_id && e.kind == kind)
            .cloned()
    }

    /// Number of events, optionally of one kind.
    pub async fn count(&self, kind: Option<EventKind>) -> usize {
        let inner = self.inner.read().await;
        match kind {
            Some(k) => inner.counts.get(&k).copied().unwrap_or(0),
            None => inner.events.len(),
        }
    }
}
