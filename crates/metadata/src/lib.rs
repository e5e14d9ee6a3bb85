//! Document store abstraction and entity identity.
//!
//! Metadata lives in a mutable document store with optimistic-concurrency
//! transactions. This crate provides:
//! - Live mutable [`DocumentHandle`]s whose record location and version are
//!   provisional until the owning session commits
//! - Attached [`EntityId`]/[`EntityVersion`] values resolved lazily from a
//!   live handle
//! - The [`DocumentSession`]/[`DocumentStore`] boundary contracts
//! - An in-memory store detecting write conflicts at commit time
//!
//! The conflict errors raised here are what the transactional retry engine
//! in `depot-transaction` exists to absorb.

pub mod document;
pub mod entity;
pub mod error;
pub mod memory;
pub mod session;

pub use document::{
    DocLink, DocumentFilter, DocumentHandle, FieldValue, RecordId, RecordLocation, RecordVersion,
};
pub use entity::{decode_entity_id, encode_entity_id, EntityId, EntityMetadata, EntityVersion};
pub use error::{MetadataError, MetadataResult};
pub use memory::MemoryDocumentStore;
pub use session::{DocumentSession, DocumentStore};
