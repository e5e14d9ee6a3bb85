//! Blob store trait and registry.

use crate::blob::{Blob, BlobHeaders, BlobId};
use crate::error::BlobStoreResult;
use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, RwLock};

/// A store of binary payloads keyed by [`BlobId`].
///
/// Implementations are shared read-mostly objects; every method may block
/// the calling thread. The store itself has no transactions - the blob
/// transaction in the storage layer layers staged commit/rollback on top of
/// these primitives.
pub trait BlobStore: Send + Sync {
    /// The store's registry name.
    fn name(&self) -> &str;

    /// Store a new blob from `source`, recording `headers` with it.
    fn create(&self, source: &mut dyn Read, headers: BlobHeaders) -> BlobStoreResult<Blob>;

    /// Fetch a blob, or `None` if absent.
    fn get(&self, id: &BlobId) -> BlobStoreResult<Option<Blob>>;

    /// Delete a blob. Returns whether it existed.
    fn delete(&self, id: &BlobId) -> BlobStoreResult<bool>;

    /// Whether a blob exists.
    fn exists(&self, id: &BlobId) -> BlobStoreResult<bool> {
        Ok(self.get(id)?.is_some())
    }
}

/// Name-keyed registry of blob stores.
///
/// The storage facet resolves its configured `blob_store_name` here.
#[derive(Default)]
pub struct BlobStoreRegistry {
    stores: RwLock<HashMap<String, Arc<dyn BlobStore>>>,
}

impl BlobStoreRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store under its own name, replacing any previous entry.
    pub fn register(&self, store: Arc<dyn BlobStore>) {
        let name = store.name().to_string();
        self.stores
            .write()
            .expect("blob store registry lock poisoned")
            .insert(name, store);
    }

    /// Look up a store by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn BlobStore>> {
        self.stores
            .read()
            .expect("blob store registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// Look up a store by name, failing if absent.
    pub fn require(&self, name: &str) -> BlobStoreResult<Arc<dyn BlobStore>> {
        self.get(name)
            .ok_or_else(|| crate::BlobStoreError::UnknownStore(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBlobStore;

    #[test]
    fn test_registry_lookup() {
        let registry = BlobStoreRegistry::new();
        registry.register(Arc::new(MemoryBlobStore::new("default")));

        assert!(registry.get("default").is_some());
        assert!(registry.get("other").is_none());
        assert!(registry.require("other").is_err());
    }
}
