#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Lifecycle events emitted by cue sessions and their stage controllers.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::broadcast};
use uuid::Uuid;

/// Event type emitted when a cue is mounted.
pub const CUE_MOUNTED: &str = "cue.mounted";
/// Event type emitted on every stage change.
pub const STAGE_CHANGED: &str = "stage.changed";
/// Event type emitted when a timer is registered.
pub const TIMER_SCHEDULED: &str = "timer.scheduled";
/// Event type emitted when the host completion callback fires.
pub const CUE_COMPLETED: &str = "cue.completed";
/// Event type emitted when a controller tears down its timers.
pub const LIFECYCLE_TORN_DOWN: &str = "lifecycle.torn_down";

/// Lifecycle event encoded as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CueEvent {
    /// Unique identifier.
    pub id: String,
    /// Cue instance that produced the event.
    pub cue: String,
    /// Event type (e.g. `stage.changed`).
    pub event_type: String,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Event-specific fields.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CueEvent {
    /// Creates an event with a fresh id and the current time.
    #[must_use]
    pub fn new(
        cue: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: format!("evt-{}", Uuid::new_v4()),
            cue: cue.into(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// `cue.mounted`
    #[must_use]
    pub fn mounted(cue: impl Into<String>) -> Self {
        Self::new(cue, CUE_MOUNTED, json!({}))
    }

    /// `stage.changed` with the previous and new stage names.
    #[must_use]
    pub fn stage_changed(cue: impl Into<String>, from: &str, to: &str) -> Self {
        Self::new(cue, STAGE_CHANGED, json!({ "from": from, "to": to }))
    }

    /// `timer.scheduled` with the timer id and its delay.
    #[must_use]
    pub fn timer_scheduled(cue: impl Into<String>, timer: u64, delay_ms: u64) -> Self {
        Self::new(
            cue,
            TIMER_SCHEDULED,
            json!({ "timer": timer, "delay_ms": delay_ms }),
        )
    }

    /// `cue.completed`
    #[must_use]
    pub fn completed(cue: impl Into<String>) -> Self {
        Self::new(cue, CUE_COMPLETED, json!({}))
    }

    /// `lifecycle.torn_down` with how many timers were still pending.
    #[must_use]
    pub fn torn_down(cue: impl Into<String>, cancelled: usize) -> Self {
        Self::new(cue, LIFECYCLE_TORN_DOWN, json!({ "cancelled": cancelled }))
    }
}

/// Event publisher interface.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes an event.
    async fn publish(&self, event: CueEvent) -> Result<()>;
}

/// Event subscriber interface.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Returns a receiver for every event published after the call.
    async fn subscribe(&self) -> Result<broadcast::Receiver<CueEvent>>;
}

/// In-memory broadcast bus with a bounded backlog.
#[derive(Debug, Clone)]
pub struct MemoryEventBus {
    sender: broadcast::Sender<CueEvent>,
    capacity: usize,
    backlog: Arc<Mutex<VecDeque<CueEvent>>>,
}

impl MemoryEventBus {
    /// Creates a bus retaining at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
        }
    }

    /// Snapshot of retained events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CueEvent> {
        self.backlog.lock().iter().cloned().collect()
    }

    /// Retained events of one type.
    #[must_use]
    pub fn events_of(&self, event_type: &str) -> Vec<CueEvent> {
        self.backlog
            .lock()
            .iter()
            .filter(|event| event.event_type == event_type)
            .cloned()
            .collect()
    }
}

/// File-backed publisher appending JSON lines.
#[derive(Debug, Clone)]
pub struct FileEventPublisher {
    path: PathBuf,
}

impl FileEventPublisher {
    /// Creates a publisher that appends to the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Destination file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn publish(&self, event: CueEvent) -> Result<()> {
        {
            let mut backlog = self.backlog.lock();
            backlog.push_back(event.clone());
            while backlog.len() > self.capacity {
                backlog.pop_front();
            }
        }
        // No live subscriber is fine; the backlog still holds the event.
        let _ = self.sender.send(event);
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for MemoryEventBus {
    async fn subscribe(&self) -> Result<broadcast::Receiver<CueEvent>> {
        Ok(self.sender.subscribe())
    }
}

#[async_trait]
impl EventPublisher for FileEventPublisher {
    async fn publish(&self, event: CueEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let mut data = serde_json::to_vec(&event)?;
        data.push(b'\n');
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::runtime::Runtime;

    #[test]
    fn publishes_and_receives() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let bus = MemoryEventBus::new(16);
            let mut rx = bus.subscribe().await.unwrap();
            bus.publish(CueEvent::stage_changed("tap-ripple", "arriving", "present"))
                .await
                .unwrap();
            let event = rx.recv().await.unwrap();
            assert_eq!(event.event_type, STAGE_CHANGED);
            assert_eq!(event.payload["to"], "present");
        });
    }

    #[tokio::test]
    async fn backlog_is_bounded_by_capacity() {
        let bus = MemoryEventBus::new(2);
        for timer in 0..5 {
            bus.publish(CueEvent::timer_scheduled("cue", timer, 100))
                .await
                .unwrap();
        }
        let retained = bus.snapshot();
        assert_eq!(retained.len(), 2);
        assert_eq!(retained[0].payload["timer"], 3);
        assert_eq!(retained[1].payload["timer"], 4);
    }

    #[tokio::test]
    async fn filters_by_event_type() {
        let bus = MemoryEventBus::new(8);
        bus.publish(CueEvent::mounted("cue")).await.unwrap();
        bus.publish(CueEvent::completed("cue")).await.unwrap();
        bus.publish(CueEvent::torn_down("cue", 0)).await.unwrap();
        assert_eq!(bus.events_of(CUE_COMPLETED).len(), 1);
        assert!(bus.events_of(STAGE_CHANGED).is_empty());
    }

    #[test]
    fn file_publisher_writes_events() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let dir = tempdir().unwrap();
            let path = dir.path().join("events.jsonl");
            let publisher = FileEventPublisher::new(&path).unwrap();
            publisher.publish(CueEvent::completed("breath-hold")).await.unwrap();
            let content = std::fs::read_to_string(path).unwrap();
            assert!(content.contains(CUE_COMPLETED));
            assert!(content.contains("breath-hold"));
        });
    }
}
