//! Blob store API for the depot storage engine.
//!
//! Binary content lives in a blob store, separate from the metadata
//! document store. This crate provides:
//! - Blob identity ([`BlobId`], [`BlobRef`]) and metadata ([`BlobHeaders`],
//!   [`BlobMetrics`])
//! - The [`BlobStore`] trait the transaction layer drives
//! - A name-keyed [`BlobStoreRegistry`]
//! - An in-memory reference backend
//!
//! Disk and cloud backends are deliberately not part of this crate; the
//! transaction layer only relies on the trait contract.

pub mod blob;
pub mod error;
pub mod memory;
pub mod store;

pub use blob::{
    Blob, BlobHeaders, BlobId, BlobMetrics, BlobRef, BLOB_NAME_HEADER, CONTENT_TYPE_HEADER,
    CREATED_BY_HEADER, REPO_NAME_HEADER,
};
pub use error::{BlobStoreError, BlobStoreResult};
pub use memory::MemoryBlobStore;
pub use store::{BlobStore, BlobStoreRegistry};
