//! A created blob awaiting attachment to an asset.

use depot_blobstore::BlobRef;
use depot_core::{HashAlgorithm, HashValue};
use std::cell::Cell;
use std::collections::BTreeMap;

/// Result of `create_blob`: the stored payload's reference, metrics and
/// computed hashes.
///
/// An asset blob is attached to exactly one asset; attaching it a second
/// time is a contract violation enforced by the transaction.
#[derive(Clone, Debug)]
pub struct AssetBlob {
    blob_ref: BlobRef,
    size: u64,
    content_type: String,
    hashes: BTreeMap<HashAlgorithm, HashValue>,
    attached: Cell<bool>,
}

impl AssetBlob {
    pub(crate) fn new(
        blob_ref: BlobRef,
        size: u64,
        content_type: String,
        hashes: BTreeMap<HashAlgorithm, HashValue>,
    ) -> Self {
        Self {
            blob_ref,
            size,
            content_type,
            hashes,
            attached: Cell::new(false),
        }
    }

    /// Reference to the stored blob.
    pub fn blob_ref(&self) -> &BlobRef {
        &self.blob_ref
    }

    /// Payload size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The effective content type determined at creation.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Hashes computed while the payload was stored.
    pub fn hashes(&self) -> &BTreeMap<HashAlgorithm, HashValue> {
        &self.hashes
    }

    /// Whether the blob has been attached to an asset.
    pub fn is_attached(&self) -> bool {
        self.attached.get()
    }

    pub(crate) fn mark_attached(&self) {
        self.attached.set(true);
    }
}
