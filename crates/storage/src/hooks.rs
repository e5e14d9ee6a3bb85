//! Transaction lifecycle hooks.
//!
//! Hooks observe entity mutations during a transaction and the commit or
//! rollback that ends it. They run synchronously on the committing thread
//! with the ambient unit-of-work context suspended, so a hook can never
//! observe or interfere with the transaction notifying it.

use crate::entity::{Asset, Component};
use crate::events::{EventSink, StorageEvent, StorageEventKind};
use depot_metadata::EntityId;
use std::cell::RefCell;
use std::sync::Arc;

/// Observer of one storage transaction's lifecycle.
///
/// All methods default to no-ops; implement only what you need. Hooks must
/// not fail on the happy path - they are combined into one composite
/// invoked per event, and a panicking hook is a caller-visible defect, not
/// something the transaction handles.
pub trait StorageTxHook {
    fn create_asset(&self, asset: &Asset) {
        let _ = asset;
    }

    fn update_asset(&self, asset: &Asset) {
        let _ = asset;
    }

    fn delete_asset(&self, asset: &Asset) {
        let _ = asset;
    }

    fn create_component(&self, component: &Component) {
        let _ = component;
    }

    fn update_component(&self, component: &Component) {
        let _ = component;
    }

    fn delete_component(&self, component: &Component) {
        let _ = component;
    }

    fn post_commit(&self) {}

    fn post_rollback(&self) {}
}

/// Composite invoking a list of hooks in registration order.
pub struct StorageTxHooks {
    hooks: Vec<Box<dyn StorageTxHook>>,
}

impl StorageTxHooks {
    /// Combine hooks into one composite.
    pub fn new(hooks: Vec<Box<dyn StorageTxHook>>) -> Self {
        Self { hooks }
    }

    /// A composite with no hooks.
    pub fn empty() -> Self {
        Self { hooks: Vec::new() }
    }
}

impl StorageTxHook for StorageTxHooks {
    fn create_asset(&self, asset: &Asset) {
        for hook in &self.hooks {
            hook.create_asset(asset);
        }
    }

    fn update_asset(&self, asset: &Asset) {
        for hook in &self.hooks {
            hook.update_asset(asset);
        }
    }

    fn delete_asset(&self, asset: &Asset) {
        for hook in &self.hooks {
            hook.delete_asset(asset);
        }
    }

    fn create_component(&self, component: &Component) {
        for hook in &self.hooks {
            hook.create_component(component);
        }
    }

    fn update_component(&self, component: &Component) {
        for hook in &self.hooks {
            hook.update_component(component);
        }
    }

    fn delete_component(&self, component: &Component) {
        for hook in &self.hooks {
            hook.delete_component(component);
        }
    }

    fn post_commit(&self) {
        for hook in &self.hooks {
            hook.post_commit();
        }
    }

    fn post_rollback(&self) {
        for hook in &self.hooks {
            hook.post_rollback();
        }
    }
}

/// Hook publishing domain events for committed mutations.
///
/// Events are batched while the transaction runs and handed to the sink on
/// post-commit, once entity identities have their final values; a rollback
/// drops the batch.
pub struct EventsHook {
    sink: Arc<dyn EventSink>,
    repository: String,
    pending: RefCell<Vec<PendingEvent>>,
}

struct PendingEvent {
    kind: StorageEventKind,
    format: String,
    entity_id: EntityId,
}

impl EventsHook {
    /// Create an events hook for one repository's transaction.
    pub fn new(sink: Arc<dyn EventSink>, repository: impl Into<String>) -> Self {
        Self {
            sink,
            repository: repository.into(),
            pending: RefCell::new(Vec::new()),
        }
    }

    fn record_asset(&self, kind: StorageEventKind, asset: &Asset) {
        if let Some(metadata) = asset.metadata() {
            self.pending.borrow_mut().push(PendingEvent {
                kind,
                format: asset.format().to_string(),
                entity_id: metadata.id().clone(),
            });
        }
    }

    fn record_component(&self, kind: StorageEventKind, component: &Component) {
        if let Some(metadata) = component.metadata() {
            self.pending.borrow_mut().push(PendingEvent {
                kind,
                format: component.format().to_string(),
                entity_id: metadata.id().clone(),
            });
        }
    }
}

impl StorageTxHook for EventsHook {
    fn create_asset(&self, asset: &Asset) {
        self.record_asset(StorageEventKind::AssetCreated, asset);
    }

    fn update_asset(&self, asset: &Asset) {
        self.record_asset(StorageEventKind::AssetUpdated, asset);
    }

    fn delete_asset(&self, asset: &Asset) {
        self.record_asset(StorageEventKind::AssetDeleted, asset);
    }

    fn create_component(&self, component: &Component) {
        self.record_component(StorageEventKind::ComponentCreated, component);
    }

    fn update_component(&self, component: &Component) {
        self.record_component(StorageEventKind::ComponentUpdated, component);
    }

    fn delete_component(&self, component: &Component) {
        self.record_component(StorageEventKind::ComponentDeleted, component);
    }

    fn post_commit(&self) {
        for pending in self.pending.borrow_mut().drain(..) {
            self.sink.publish(StorageEvent {
                kind: pending.kind,
                repository: self.repository.clone(),
                format: pending.format,
                // Identities resolve now that the commit assigned them;
                // entities deleted before ever committing have none.
                entity_id: pending.entity_id.try_value(),
            });
        }
    }

    fn post_rollback(&self) {
        self.pending.borrow_mut().clear();
    }
}
