//! In-memory blob store.
//!
//! Reference backend used by tests and embedded deployments. Payloads are
//! held on the heap; nothing survives the process.

use crate::blob::{Blob, BlobHeaders, BlobId, BlobMetrics};
use crate::error::BlobStoreResult;
use crate::store::BlobStore;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Mutex;
use time::OffsetDateTime;
use tracing::debug;

/// A blob store keeping everything in process memory.
pub struct MemoryBlobStore {
    name: String,
    blobs: Mutex<HashMap<BlobId, Blob>>,
}

impl MemoryBlobStore {
    /// Create an empty store with the given registry name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blobs: Mutex::new(HashMap::new()),
        }
    }

    /// Number of blobs currently stored.
    pub fn blob_count(&self) -> usize {
        self.blobs.lock().expect("blob store lock poisoned").len()
    }
}

impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, source: &mut dyn Read, headers: BlobHeaders) -> BlobStoreResult<Blob> {
        let mut payload = Vec::new();
        source.read_to_end(&mut payload)?;

        let id = BlobId::new();
        let metrics = BlobMetrics {
            created: OffsetDateTime::now_utc(),
            size: payload.len() as u64,
        };
        let blob = Blob::new(id, headers, metrics, Bytes::from(payload));

        debug!(store = %self.name, blob = %id, size = blob.metrics().size, "blob stored");
        self.blobs
            .lock()
            .expect("blob store lock poisoned")
            .insert(id, blob.clone());
        Ok(blob)
    }

    fn get(&self, id: &BlobId) -> BlobStoreResult<Option<Blob>> {
        Ok(self
            .blobs
            .lock()
            .expect("blob store lock poisoned")
            .get(id)
            .cloned())
    }

    fn delete(&self, id: &BlobId) -> BlobStoreResult<bool> {
        let removed = self
            .blobs
            .lock()
            .expect("blob store lock poisoned")
            .remove(id)
            .is_some();
        if removed {
            debug!(store = %self.name, blob = %id, "blob deleted");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::CONTENT_TYPE_HEADER;

    #[test]
    fn test_create_get_delete() {
        let store = MemoryBlobStore::new("default");
        let mut source: &[u8] = b"payload bytes";
        let headers = BlobHeaders::new().with(CONTENT_TYPE_HEADER, "text/plain");

        let blob = store.create(&mut source, headers).unwrap();
        assert_eq!(blob.metrics().size, 13);
        assert_eq!(blob.headers().get(CONTENT_TYPE_HEADER), Some("text/plain"));

        let fetched = store.get(blob.id()).unwrap().unwrap();
        assert_eq!(fetched.bytes().as_ref(), b"payload bytes");

        assert!(store.delete(blob.id()).unwrap());
        assert!(!store.delete(blob.id()).unwrap());
        assert!(store.get(blob.id()).unwrap().is_none());
    }

    #[test]
    fn test_reader_sees_full_payload() {
        let store = MemoryBlobStore::new("default");
        let mut source: &[u8] = b"stream me";
        let blob = store.create(&mut source, BlobHeaders::new()).unwrap();

        let mut read_back = String::new();
        blob.open().read_to_string(&mut read_back).unwrap();
        assert_eq!(read_back, "stream me");
    }
}
