//! Common fixtures for the storage integration tests.

use depot_blobstore::{BlobStoreRegistry, MemoryBlobStore};
use depot_core::{StorageConfig, WritePolicy};
use depot_metadata::MemoryDocumentStore;
use depot_storage::{EventSink, StorageEvent, StorageFacet, StorageTx};
use std::sync::{Arc, Mutex};

/// Event sink remembering everything published to it.
pub struct RecordingSink(Mutex<Vec<StorageEvent>>);

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(Vec::new())))
    }

    #[allow(dead_code)]
    pub fn events(&self) -> Vec<StorageEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: StorageEvent) {
        self.0.lock().unwrap().push(event);
    }
}

/// A started storage facet over in-memory stores.
pub struct Harness {
    pub facet: StorageFacet,
    pub document_store: MemoryDocumentStore,
    pub blob_store: Arc<MemoryBlobStore>,
    pub events: Arc<RecordingSink>,
}

/// Build a started facet for `test-repo` with the given write policy.
pub fn harness(write_policy: WritePolicy) -> Harness {
    let document_store = MemoryDocumentStore::new();
    let blob_store = Arc::new(MemoryBlobStore::new("default"));
    let registry = Arc::new(BlobStoreRegistry::new());
    registry.register(blob_store.clone());
    let events = RecordingSink::new();

    let mut facet = StorageFacet::new(
        "test-repo",
        StorageConfig::new("default").with_write_policy(write_policy),
        Arc::new(document_store.clone()),
        registry,
        events.clone(),
    );
    facet.init().expect("facet init");
    facet.start().expect("facet start");

    Harness {
        facet,
        document_store,
        blob_store,
        events,
    }
}

/// Open a transaction from the harness facet and begin it.
#[allow(dead_code)]
pub fn begin_tx(harness: &Harness) -> StorageTx {
    let factory = harness.facet.tx_factory().expect("tx factory");
    let mut tx = factory();
    tx.begin().expect("begin");
    tx
}
