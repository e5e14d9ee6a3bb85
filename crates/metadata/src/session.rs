//! Document store boundary contracts.

use crate::document::{DocumentFilter, DocumentHandle, FieldValue, RecordId};
use crate::error::MetadataResult;
use std::collections::BTreeMap;

/// One connection's transaction over the document store.
///
/// Sessions are single-threaded and blocking. Every mutation is staged
/// until `commit`; optimistic-concurrency conflicts are detected there and
/// surface as [`crate::MetadataError::Conflict`]. Reads observe the
/// session's own staged writes.
pub trait DocumentSession {
    /// Start a transaction. Fails if one is already active.
    fn begin(&mut self) -> MetadataResult<()>;

    /// Validate staged writes against the store and apply them.
    ///
    /// On success, staged additions receive their durable record locations
    /// and version tokens. On conflict, nothing is applied.
    fn commit(&mut self) -> MetadataResult<()>;

    /// Discard staged writes, reverting handles to their committed state.
    fn rollback(&mut self) -> MetadataResult<()>;

    /// Whether a transaction is active.
    fn is_active(&self) -> bool;

    /// Release the connection. Implicitly discards staged writes.
    fn close(&mut self);

    /// Stage a new document of the given type.
    fn add(
        &mut self,
        type_name: &str,
        fields: BTreeMap<String, FieldValue>,
    ) -> MetadataResult<DocumentHandle>;

    /// Stage new field content for an existing document.
    fn update(
        &mut self,
        document: &DocumentHandle,
        fields: BTreeMap<String, FieldValue>,
    ) -> MetadataResult<()>;

    /// Stage removal of a document.
    fn delete(&mut self, document: &DocumentHandle) -> MetadataResult<()>;

    /// Fetch one document by record id.
    fn get(&mut self, type_name: &str, id: RecordId) -> MetadataResult<Option<DocumentHandle>>;

    /// All documents of a type, staged state included.
    fn browse(&mut self, type_name: &str) -> MetadataResult<Vec<DocumentHandle>>;

    /// First document matching the filter, if any.
    fn find_first(
        &mut self,
        type_name: &str,
        filter: &DocumentFilter,
    ) -> MetadataResult<Option<DocumentHandle>>;

    /// All documents matching the filter.
    fn select(
        &mut self,
        type_name: &str,
        filter: &DocumentFilter,
    ) -> MetadataResult<Vec<DocumentHandle>>;

    /// Number of documents matching the filter.
    fn count(&mut self, type_name: &str, filter: &DocumentFilter) -> MetadataResult<u64>;
}

/// Factory for document sessions.
///
/// One fresh session per transaction; sessions are never shared between
/// transactions or threads.
pub trait DocumentStore: Send + Sync {
    /// Open a new session against this store.
    fn open_session(&self) -> Box<dyn DocumentSession>;

    /// Pre-register a document type (schema initialization).
    fn register_type(&self, type_name: &str);
}
