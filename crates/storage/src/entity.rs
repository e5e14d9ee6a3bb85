//! The entity model: buckets, components and assets.
//!
//! Entities are plain in-memory values until saved through a transaction.
//! `metadata` is stamped by the entity adapters when an entity is added to
//! or loaded from the document store; its presence is the persisted flag.

use depot_blobstore::BlobRef;
use depot_core::Attributes;
use depot_metadata::{EntityId, EntityMetadata};

/// Root container for one repository's components and assets.
///
/// Exactly one non-deleted bucket exists per repository name; the storage
/// facet creates it lazily on first initialization.
#[derive(Clone, Debug)]
pub struct Bucket {
    metadata: Option<EntityMetadata>,
    repository_name: String,
    attributes: Attributes,
}

impl Bucket {
    /// Create a new, not yet persisted bucket.
    pub fn new(repository_name: impl Into<String>) -> Self {
        Self {
            metadata: None,
            repository_name: repository_name.into(),
            attributes: Attributes::new(),
        }
    }

    /// The owning repository's name.
    pub fn repository_name(&self) -> &str {
        &self.repository_name
    }

    /// The bucket's attribute bag.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Mutable access to the attribute bag.
    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    /// Whether the bucket has been persisted.
    pub fn is_persisted(&self) -> bool {
        self.metadata.is_some()
    }

    /// Persistence metadata, present once persisted.
    pub fn metadata(&self) -> Option<&EntityMetadata> {
        self.metadata.as_ref()
    }

    pub(crate) fn set_metadata(&mut self, metadata: EntityMetadata) {
        self.metadata = Some(metadata);
    }

    pub(crate) fn set_attributes(&mut self, attributes: Attributes) {
        self.attributes = attributes;
    }
}

/// A named, versioned unit owned by a bucket, e.g. one package release.
#[derive(Clone, Debug)]
pub struct Component {
    metadata: Option<EntityMetadata>,
    bucket_id: EntityId,
    format: String,
    group: Option<String>,
    name: String,
    version: Option<String>,
    attributes: Attributes,
}

impl Component {
    pub(crate) fn new(bucket_id: EntityId, format: impl Into<String>) -> Self {
        Self {
            metadata: None,
            bucket_id,
            format: format.into(),
            group: None,
            name: String::new(),
            version: None,
            attributes: Attributes::new(),
        }
    }

    /// Identity of the owning bucket.
    pub fn bucket_id(&self) -> &EntityId {
        &self.bucket_id
    }

    /// The repository format this component belongs to.
    pub fn format(&self) -> &str {
        &self.format
    }

    /// The component's group, if any.
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Set the component's group.
    pub fn set_group(&mut self, group: impl Into<String>) -> &mut Self {
        self.group = Some(group.into());
        self
    }

    /// The component's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the component's name. Required before saving.
    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    /// The component's version, if any.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Set the component's version.
    pub fn set_version(&mut self, version: impl Into<String>) -> &mut Self {
        self.version = Some(version.into());
        self
    }

    /// The component's attribute bag.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Mutable access to the attribute bag.
    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    /// Whether the component has been persisted.
    pub fn is_persisted(&self) -> bool {
        self.metadata.is_some()
    }

    /// Persistence metadata, present once persisted.
    pub fn metadata(&self) -> Option<&EntityMetadata> {
        self.metadata.as_ref()
    }

    pub(crate) fn set_metadata(&mut self, metadata: EntityMetadata) {
        self.metadata = Some(metadata);
    }

    pub(crate) fn set_all(
        &mut self,
        group: Option<String>,
        name: String,
        version: Option<String>,
        attributes: Attributes,
    ) {
        self.group = group;
        self.name = name;
        self.version = version;
        self.attributes = attributes;
    }
}

/// A single stored resource, optionally owned by a component, referencing
/// at most one blob.
#[derive(Clone, Debug)]
pub struct Asset {
    metadata: Option<EntityMetadata>,
    bucket_id: EntityId,
    component_id: Option<EntityId>,
    name: Option<String>,
    format: String,
    content_type: Option<String>,
    size: Option<u64>,
    blob_ref: Option<BlobRef>,
    attributes: Attributes,
}

impl Asset {
    pub(crate) fn new(bucket_id: EntityId, format: impl Into<String>) -> Self {
        Self {
            metadata: None,
            bucket_id,
            component_id: None,
            name: None,
            format: format.into(),
            content_type: None,
            size: None,
            blob_ref: None,
            attributes: Attributes::new(),
        }
    }

    /// Identity of the owning bucket.
    pub fn bucket_id(&self) -> &EntityId {
        &self.bucket_id
    }

    /// Identity of the owning component, if the asset belongs to one.
    pub fn component_id(&self) -> Option<&EntityId> {
        self.component_id.as_ref()
    }

    pub(crate) fn set_component_id(&mut self, component_id: Option<EntityId>) {
        self.component_id = component_id;
    }

    /// The asset's name (usually its repository path), if set.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Set the asset's name.
    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// The repository format this asset belongs to.
    pub fn format(&self) -> &str {
        &self.format
    }

    /// The effective content type, once a blob is attached.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub(crate) fn set_content_type(&mut self, content_type: Option<String>) {
        self.content_type = content_type;
    }

    /// The payload size in bytes, once a blob is attached.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub(crate) fn set_size(&mut self, size: Option<u64>) {
        self.size = size;
    }

    /// Reference to the attached blob, if any.
    pub fn blob_ref(&self) -> Option<&BlobRef> {
        self.blob_ref.as_ref()
    }

    pub(crate) fn set_blob_ref(&mut self, blob_ref: Option<BlobRef>) {
        self.blob_ref = blob_ref;
    }

    /// The asset's attribute bag.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Mutable access to the attribute bag.
    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    /// Whether the asset has been persisted.
    pub fn is_persisted(&self) -> bool {
        self.metadata.is_some()
    }

    /// Persistence metadata, present once persisted.
    pub fn metadata(&self) -> Option<&EntityMetadata> {
        self.metadata.as_ref()
    }

    pub(crate) fn set_metadata(&mut self, metadata: EntityMetadata) {
        self.metadata = Some(metadata);
    }

    pub(crate) fn set_attributes(&mut self, attributes: Attributes) {
        self.attributes = attributes;
    }
}
