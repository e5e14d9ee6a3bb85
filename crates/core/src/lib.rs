//! Core domain types and shared logic for the depot storage engine.
//!
//! This crate defines the vocabulary used across all other crates:
//! - Nested attribute bags carried by buckets, components and assets
//! - Checksum hash algorithms and values
//! - Write policies and the gate that enforces them
//! - Storage facet configuration

pub mod attributes;
pub mod config;
pub mod error;
pub mod hash;
pub mod policy;

pub use attributes::Attributes;
pub use config::StorageConfig;
pub use error::{Error, Result};
pub use hash::{HashAlgorithm, HashValue, Hasher, HashingReader, MultiHasher};
pub use policy::{WriteOperation, WritePolicy, check_allowed};

/// Attribute child map holding computed blob checksums on an asset.
pub const CHECKSUM_ATTRIBUTES: &str = "checksum";

/// Content type recorded when nothing better can be determined.
pub const OCTET_STREAM: &str = "application/octet-stream";
