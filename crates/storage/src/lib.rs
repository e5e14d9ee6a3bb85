//! Transactional storage facade for the depot artifact-repository engine.
//!
//! This crate binds the metadata document store and the blob store under a
//! single transactional contract:
//! - The entity model: [`Bucket`], [`Component`], [`Asset`]
//! - [`StorageTx`]: the transaction facade with its OPEN/ACTIVE/CLOSED
//!   state machine, write-policy enforcement and lifecycle hooks
//! - [`BlobTx`]: staged blob-store side effects driven by the metadata
//!   transaction
//! - [`StorageFacet`]: per-repository configuration, bucket initialization
//!   and the transaction factory handed to the unit of work
//!
//! Commit order is metadata first, blob store second: a crash in between
//! leaves at most orphaned blobs, never asset records pointing at missing
//! content.

pub mod adapter;
pub mod asset_blob;
pub mod blob_tx;
pub mod content;
pub mod entity;
pub mod error;
pub mod events;
pub mod facet;
pub mod hooks;
pub mod selector;
pub mod tx;

pub use asset_blob::AssetBlob;
pub use blob_tx::BlobTx;
pub use content::{ContentValidator, DefaultContentValidator, MimeRulesSource, NoopMimeRules};
pub use entity::{Asset, Bucket, Component};
pub use error::{StorageError, StorageResult};
pub use events::{EventSink, NoopEventSink, StorageEvent, StorageEventKind};
pub use facet::{FacetState, HookFactory, StorageFacet};
pub use hooks::{EventsHook, StorageTxHook, StorageTxHooks};
pub use selector::{DefaultWritePolicySelector, WritePolicySelector};
pub use tx::{StorageTx, TxState};
