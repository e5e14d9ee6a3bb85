//! Domain events published after commit.

use serde::{Deserialize, Serialize};

/// What happened to an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageEventKind {
    ComponentCreated,
    ComponentUpdated,
    ComponentDeleted,
    AssetCreated,
    AssetUpdated,
    AssetDeleted,
}

/// A committed entity mutation.
///
/// `entity_id` is absent when the entity never committed (for example an
/// entity both created and deleted inside one transaction).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEvent {
    pub kind: StorageEventKind,
    pub repository: String,
    pub format: String,
    pub entity_id: Option<String>,
}

/// Consumer of storage events.
pub trait EventSink: Send + Sync {
    /// Deliver one event. Must not block for long and must not fail.
    fn publish(&self, event: StorageEvent);
}

/// Sink that drops every event.
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, _event: StorageEvent) {}
}
