//! Blob identity and metadata types.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Cursor, Read};
use time::OffsetDateTime;
use uuid::Uuid;

/// Header naming the repository a blob was stored for.
pub const REPO_NAME_HEADER: &str = "repo-name";

/// Header naming the blob (usually the asset path).
pub const BLOB_NAME_HEADER: &str = "blob-name";

/// Header naming the principal that created the blob.
pub const CREATED_BY_HEADER: &str = "created-by";

/// Header carrying the effective content type.
pub const CONTENT_TYPE_HEADER: &str = "content-type";

/// Unique identifier for a blob within one store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlobId(Uuid);

impl BlobId {
    /// Generate a new random blob ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> Result<Self, crate::BlobStoreError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::BlobStoreError::InvalidRef(format!("invalid blob ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BlobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({})", self.0)
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to a blob: the store holding it plus its id.
///
/// Canonical string form is `store@id`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BlobRef {
    store: String,
    blob: BlobId,
}

impl BlobRef {
    /// Create a reference to a blob in the named store.
    pub fn new(store: impl Into<String>, blob: BlobId) -> Self {
        Self {
            store: store.into(),
            blob,
        }
    }

    /// The name of the store holding the blob.
    pub fn store(&self) -> &str {
        &self.store
    }

    /// The blob id within the store.
    pub fn blob_id(&self) -> &BlobId {
        &self.blob
    }

    /// Parse the canonical `store@id` form.
    pub fn parse(s: &str) -> Result<Self, crate::BlobStoreError> {
        let (store, id) = s
            .split_once('@')
            .ok_or_else(|| crate::BlobStoreError::InvalidRef(format!("missing '@': {s}")))?;
        if store.is_empty() {
            return Err(crate::BlobStoreError::InvalidRef(format!(
                "empty store name: {s}"
            )));
        }
        Ok(Self {
            store: store.to_string(),
            blob: BlobId::parse(id)?,
        })
    }
}

impl fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobRef({})", self)
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.store, self.blob)
    }
}

/// String headers stored alongside a blob.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlobHeaders(BTreeMap<String, String>);

impl BlobHeaders {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Set a header, returning self for chaining.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Set a header.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Get a header value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Merge all entries of `other` into this map.
    pub fn extend(&mut self, other: &BlobHeaders) {
        for (name, value) in &other.0 {
            self.0.insert(name.clone(), value.clone());
        }
    }

    /// Iterate over header entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

/// Size and age metadata tracked per blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobMetrics {
    /// When the blob was stored.
    pub created: OffsetDateTime,
    /// Payload size in bytes.
    pub size: u64,
}

/// A stored blob: identity, headers, metrics and payload.
#[derive(Clone, Debug)]
pub struct Blob {
    id: BlobId,
    headers: BlobHeaders,
    metrics: BlobMetrics,
    payload: Bytes,
}

impl Blob {
    /// Assemble a blob value.
    pub fn new(id: BlobId, headers: BlobHeaders, metrics: BlobMetrics, payload: Bytes) -> Self {
        Self {
            id,
            headers,
            metrics,
            payload,
        }
    }

    /// The blob id.
    pub fn id(&self) -> &BlobId {
        &self.id
    }

    /// Headers stored with the blob.
    pub fn headers(&self) -> &BlobHeaders {
        &self.headers
    }

    /// Size and age metadata.
    pub fn metrics(&self) -> &BlobMetrics {
        &self.metrics
    }

    /// The payload bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.payload
    }

    /// Open a reader over the payload.
    pub fn open(&self) -> impl Read {
        Cursor::new(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_id_roundtrip() {
        let id = BlobId::new();
        let parsed = BlobId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(BlobId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_blob_ref_roundtrip() {
        let blob_ref = BlobRef::new("default", BlobId::new());
        let parsed = BlobRef::parse(&blob_ref.to_string()).unwrap();
        assert_eq!(blob_ref, parsed);

        assert!(BlobRef::parse("no-separator").is_err());
        assert!(BlobRef::parse("@missing-store").is_err());
    }

    #[test]
    fn test_headers_extend_overrides() {
        let mut headers = BlobHeaders::new().with(CONTENT_TYPE_HEADER, "text/plain");
        let extra = BlobHeaders::new()
            .with(CONTENT_TYPE_HEADER, "application/xml")
            .with("custom", "value");
        headers.extend(&extra);

        assert_eq!(headers.get(CONTENT_TYPE_HEADER), Some("application/xml"));
        assert_eq!(headers.get("custom"), Some("value"));
    }
}
