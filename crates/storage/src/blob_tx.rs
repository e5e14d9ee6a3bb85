//! Staged blob-store side effects.
//!
//! The blob store has no native transactions. This transaction defers
//! physical deletes until commit and treats creates as immediately visible
//! but reversible by delete on rollback, which is enough for the storage
//! transaction to drive both stores with correct ordering.

use crate::asset_blob::AssetBlob;
use crate::error::{StorageError, StorageResult};
use depot_blobstore::{Blob, BlobHeaders, BlobId, BlobRef, BlobStore};
use depot_core::hash::HashingReader;
use depot_core::{HashAlgorithm, MultiHasher};
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, warn};

/// Blob mutations staged under one storage transaction.
pub struct BlobTx {
    store: Arc<dyn BlobStore>,
    /// Blobs created in this transaction; deleted again on rollback.
    new_blobs: Vec<BlobId>,
    /// Deletes deferred until commit.
    deletions: Vec<BlobRef>,
}

impl BlobTx {
    /// Start an empty blob transaction against the given store.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            new_blobs: Vec::new(),
            deletions: Vec::new(),
        }
    }

    /// Store a new blob, hashing the payload in the same pass.
    ///
    /// The blob is immediately visible in the store but still owned by this
    /// transaction until commit.
    pub fn create(
        &mut self,
        source: &mut dyn Read,
        headers: BlobHeaders,
        hash_algorithms: &[HashAlgorithm],
        content_type: String,
    ) -> StorageResult<AssetBlob> {
        let mut hasher = MultiHasher::new(hash_algorithms);
        let mut reader = HashingReader::new(source, &mut hasher);
        let blob = self.store.create(&mut reader, headers)?;

        self.new_blobs.push(*blob.id());
        debug!(blob = %blob.id(), size = blob.metrics().size, "blob created in transaction");

        Ok(AssetBlob::new(
            BlobRef::new(self.store.name(), *blob.id()),
            blob.metrics().size,
            content_type,
            hasher.finalize(),
        ))
    }

    /// Read a blob through to the store. Reads are not transactional.
    pub fn get(&self, blob_ref: &BlobRef) -> StorageResult<Option<Blob>> {
        Ok(self.store.get(blob_ref.blob_id())?)
    }

    /// Stage removal of a blob; applied at commit.
    pub fn delete(&mut self, blob_ref: &BlobRef) {
        debug!(blob = %blob_ref, "blob delete staged");
        self.deletions.push(blob_ref.clone());
    }

    /// Apply staged deletes. A failing delete aborts the commit.
    pub fn commit(&mut self) -> StorageResult<()> {
        while let Some(blob_ref) = self.deletions.first().cloned() {
            self.store.delete(blob_ref.blob_id()).map_err(|e| {
                warn!(blob = %blob_ref, error = %e, "staged blob delete failed during commit");
                StorageError::from(e)
            })?;
            self.deletions.remove(0);
        }
        self.new_blobs.clear();
        Ok(())
    }

    /// Discard staged work: forget deferred deletes and remove blobs
    /// created in this transaction. Removal is best-effort.
    pub fn rollback(&mut self) -> StorageResult<()> {
        self.deletions.clear();
        for blob_id in self.new_blobs.drain(..) {
            if let Err(e) = self.store.delete(&blob_id) {
                warn!(blob = %blob_id, error = %e, "could not remove blob during rollback");
            }
        }
        Ok(())
    }
}
