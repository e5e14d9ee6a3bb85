//! Entity identity and version values.
//!
//! An attached identity wraps a live document handle. Its external value
//! can only be computed once the underlying record has committed, because
//! the store reassigns record locations at commit under optimistic
//! transactions; resolving eagerly would hand out stale identifiers. Once
//! resolved, the value is cached for the life of the in-memory entity.

use crate::document::{DocLink, DocumentHandle, RecordId, RecordLocation, RecordVersion};
use crate::error::{MetadataError, MetadataResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::cell::OnceCell;
use std::fmt;

/// Encode a record location as an opaque external identifier.
pub fn encode_entity_id(type_name: &str, id: RecordId) -> String {
    format!("{type_name}:{}", URL_SAFE_NO_PAD.encode(id.to_be_bytes()))
}

/// Decode an opaque external identifier back into a record location.
pub fn decode_entity_id(value: &str) -> MetadataResult<(String, RecordId)> {
    let (type_name, encoded) = value
        .split_once(':')
        .ok_or_else(|| MetadataError::InvalidEntityId(value.to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| MetadataError::InvalidEntityId(value.to_string()))?;
    let bytes: [u8; 8] = bytes
        .try_into()
        .map_err(|_| MetadataError::InvalidEntityId(value.to_string()))?;
    Ok((type_name.to_string(), RecordId::from_be_bytes(bytes)))
}

/// External identity of an entity.
///
/// `Attached` stays connected to the live document and resolves lazily;
/// `Detached` carries an already-encoded value (for example one received
/// from a client).
#[derive(Clone)]
pub enum EntityId {
    Attached(AttachedEntityId),
    Detached(String),
}

impl EntityId {
    /// Attach an identity to a live document.
    pub fn attached(document: DocumentHandle) -> Self {
        Self::Attached(AttachedEntityId {
            document,
            value: OnceCell::new(),
        })
    }

    /// Wrap an already-encoded identifier.
    pub fn detached(value: impl Into<String>) -> Self {
        Self::Detached(value.into())
    }

    /// The stable external identifier.
    ///
    /// Fails while the underlying document is uncommitted; computed at most
    /// once per identity instance afterwards.
    pub fn value(&self) -> MetadataResult<String> {
        match self {
            Self::Detached(value) => Ok(value.clone()),
            Self::Attached(attached) => attached.value().map(str::to_string),
        }
    }

    /// The identifier if it can currently be resolved.
    pub fn try_value(&self) -> Option<String> {
        self.value().ok()
    }

    /// Convert to a document link for persistence.
    pub fn to_link(&self) -> MetadataResult<DocLink> {
        match self {
            Self::Detached(value) => {
                let (type_name, id) = decode_entity_id(value)?;
                Ok(DocLink::Saved { type_name, id })
            }
            Self::Attached(attached) => match attached.document.location() {
                RecordLocation::Committed(id) => Ok(DocLink::Saved {
                    type_name: attached.document.type_name(),
                    id,
                }),
                RecordLocation::Provisional(_) => {
                    Ok(DocLink::Pending(attached.document.clone()))
                }
            },
        }
    }

    /// Build an identity from a persisted link.
    pub fn from_link(link: &DocLink) -> Self {
        match link {
            DocLink::Saved { type_name, id } => Self::Detached(encode_entity_id(type_name, *id)),
            DocLink::Pending(handle) => Self::attached(handle.clone()),
        }
    }
}

impl PartialEq for EntityId {
    fn eq(&self, other: &Self) -> bool {
        match (self.try_value(), other.try_value()) {
            (Some(a), Some(b)) => a == b,
            // Provisional identities only equal themselves.
            _ => match (self, other) {
                (Self::Attached(a), Self::Attached(b)) => a.document.ptr_eq(&b.document),
                _ => false,
            },
        }
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_value() {
            Some(value) => write!(f, "EntityId({value})"),
            None => write!(f, "EntityId(<provisional>)"),
        }
    }
}

/// Identity attached to a live document.
#[derive(Clone)]
pub struct AttachedEntityId {
    document: DocumentHandle,
    value: OnceCell<String>,
}

impl AttachedEntityId {
    fn value(&self) -> MetadataResult<&str> {
        if let Some(value) = self.value.get() {
            return Ok(value);
        }
        match self.document.location() {
            RecordLocation::Provisional(_) => Err(MetadataError::IllegalState(
                "attempted use of provisional/uncommitted document identity".to_string(),
            )),
            RecordLocation::Committed(id) => {
                let encoded = encode_entity_id(&self.document.type_name(), id);
                Ok(self.value.get_or_init(|| encoded))
            }
        }
    }
}

/// External version token of an entity.
///
/// Follows the same attach/resolve contract as [`EntityId`], using the
/// document's record version instead of its location.
#[derive(Clone)]
pub enum EntityVersion {
    Attached(AttachedEntityVersion),
    Detached(String),
}

impl EntityVersion {
    /// Attach a version to a live document.
    pub fn attached(document: DocumentHandle) -> Self {
        Self::Attached(AttachedEntityVersion {
            document,
            value: OnceCell::new(),
        })
    }

    /// Wrap an already-stringified version token.
    pub fn detached(value: impl Into<String>) -> Self {
        Self::Detached(value.into())
    }

    /// The stable version token.
    ///
    /// Fails while the underlying document is uncommitted; stable for this
    /// instance afterwards even if the document is mutated further.
    pub fn value(&self) -> MetadataResult<String> {
        match self {
            Self::Detached(value) => Ok(value.clone()),
            Self::Attached(attached) => attached.value().map(str::to_string),
        }
    }

    /// The version token if it can currently be resolved.
    pub fn try_value(&self) -> Option<String> {
        self.value().ok()
    }
}

impl PartialEq for EntityVersion {
    fn eq(&self, other: &Self) -> bool {
        matches!((self.try_value(), other.try_value()), (Some(a), Some(b)) if a == b)
    }
}

impl fmt::Debug for EntityVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_value() {
            Some(value) => write!(f, "EntityVersion({value})"),
            None => write!(f, "EntityVersion(<provisional>)"),
        }
    }
}

/// Version attached to a live document.
#[derive(Clone)]
pub struct AttachedEntityVersion {
    document: DocumentHandle,
    value: OnceCell<String>,
}

impl AttachedEntityVersion {
    fn value(&self) -> MetadataResult<&str> {
        if let Some(value) = self.value.get() {
            return Ok(value);
        }
        match self.document.version() {
            RecordVersion::Provisional => Err(MetadataError::IllegalState(
                "attempted use of provisional/uncommitted document version".to_string(),
            )),
            RecordVersion::Committed(version) => {
                Ok(self.value.get_or_init(|| version.to_string()))
            }
        }
    }
}

/// Identity, version and backing document of a persisted entity.
///
/// Entities loaded inside a session are attached to their live document.
/// A detached form (identity and version only) exists for entities handed
/// across thread boundaries, such as the facet's bucket reference.
#[derive(Clone, Debug)]
pub struct EntityMetadata {
    id: EntityId,
    version: EntityVersion,
    document: Option<DocumentHandle>,
}

impl EntityMetadata {
    /// Attach metadata to a live document.
    pub fn attached(document: DocumentHandle) -> Self {
        Self {
            id: EntityId::attached(document.clone()),
            version: EntityVersion::attached(document.clone()),
            document: Some(document),
        }
    }

    /// Metadata without a live document.
    pub fn detached(id: EntityId, version: EntityVersion) -> Self {
        Self {
            id,
            version,
            document: None,
        }
    }

    /// The entity's identity.
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    /// The entity's version token.
    pub fn version(&self) -> &EntityVersion {
        &self.version
    }

    /// The backing document, if this metadata is attached.
    pub fn document(&self) -> Option<&DocumentHandle> {
        self.document.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_encode_decode_roundtrip() {
        let encoded = encode_entity_id("asset", 42);
        let (type_name, id) = decode_entity_id(&encoded).unwrap();
        assert_eq!(type_name, "asset");
        assert_eq!(id, 42);

        assert!(decode_entity_id("garbage").is_err());
        assert!(decode_entity_id("asset:!!!").is_err());
    }

    #[test]
    fn test_attached_id_fails_until_commit_then_caches() {
        let doc = DocumentHandle::provisional("asset", 1, BTreeMap::new());
        let id = EntityId::attached(doc.clone());

        assert!(matches!(
            id.value(),
            Err(MetadataError::IllegalState(_))
        ));

        doc.set_committed(9, 1);
        let first = id.value().unwrap();
        assert_eq!(first, encode_entity_id("asset", 9));

        // Later mutation of the document must not change the resolved value.
        doc.set_committed(10, 2);
        assert_eq!(id.value().unwrap(), first);
    }

    #[test]
    fn test_attached_version_follows_same_contract() {
        let doc = DocumentHandle::provisional("asset", 1, BTreeMap::new());
        let version = EntityVersion::attached(doc.clone());
        assert!(version.value().is_err());

        doc.set_committed(9, 3);
        assert_eq!(version.value().unwrap(), "3");

        doc.set_version(4);
        assert_eq!(version.value().unwrap(), "3");

        // A fresh attachment observes the new state.
        assert_eq!(EntityVersion::attached(doc).value().unwrap(), "4");
    }

    #[test]
    fn test_entity_id_equality() {
        let doc = DocumentHandle::provisional("asset", 1, BTreeMap::new());
        let attached = EntityId::attached(doc.clone());
        let same = EntityId::attached(doc.clone());
        let other = EntityId::attached(DocumentHandle::provisional(
            "asset",
            2,
            BTreeMap::new(),
        ));

        // Provisional: identity equality only.
        assert_eq!(attached, same);
        assert_ne!(attached, other);

        doc.set_committed(5, 1);
        let detached = EntityId::detached(encode_entity_id("asset", 5));
        assert_eq!(attached, detached);
    }
}
