//! Entity adapters: translation between entities and documents.
//!
//! One adapter per entity type owns the document type name, the field
//! layout and the store operations. Adapters stamp persistence metadata on
//! the entities they add or load.

use crate::entity::{Asset, Bucket, Component};
use crate::error::{StorageError, StorageResult};
use depot_blobstore::BlobRef;
use depot_core::Attributes;
use depot_metadata::{
    decode_entity_id, DocumentFilter, DocumentHandle, DocumentSession, EntityId, EntityMetadata,
    FieldValue, MetadataError,
};
use serde_json::Value;
use std::collections::BTreeMap;

pub const P_REPOSITORY_NAME: &str = "repository_name";
pub const P_ATTRIBUTES: &str = "attributes";
pub const P_FORMAT: &str = "format";
pub const P_GROUP: &str = "group";
pub const P_NAME: &str = "name";
pub const P_VERSION: &str = "version";
pub const P_BUCKET: &str = "bucket";
pub const P_COMPONENT: &str = "component";
pub const P_CONTENT_TYPE: &str = "content_type";
pub const P_SIZE: &str = "size";
pub const P_BLOB_REF: &str = "blob_ref";

fn attributes_field(attributes: &Attributes) -> FieldValue {
    FieldValue::Json(Value::Object(attributes.as_map().clone()))
}

fn attributes_from(field: Option<FieldValue>) -> Attributes {
    match field {
        Some(FieldValue::Json(Value::Object(map))) => Attributes::from_map(map),
        _ => Attributes::new(),
    }
}

fn required_text(document: &DocumentHandle, field: &str) -> StorageResult<String> {
    document
        .field(field)
        .and_then(|value| value.as_str().map(str::to_string))
        .ok_or_else(|| {
            MetadataError::Serialization(format!(
                "{} document is missing field {field}",
                document.type_name()
            ))
            .into()
        })
}

fn optional_text(document: &DocumentHandle, field: &str) -> Option<String> {
    document
        .field(field)
        .and_then(|value| value.as_str().map(str::to_string))
}

/// Link field for a persisted entity's identity.
fn link_of(id: &EntityId) -> StorageResult<FieldValue> {
    Ok(FieldValue::Link(id.to_link()?))
}

/// Link field for a bucket, which must be persisted.
pub(crate) fn bucket_link(bucket: &Bucket) -> StorageResult<FieldValue> {
    let metadata = bucket
        .metadata()
        .ok_or_else(|| StorageError::IllegalState("bucket is not persisted".to_string()))?;
    link_of(metadata.id())
}

/// Link field for a component, which must be persisted.
pub(crate) fn component_link(component: &Component) -> StorageResult<FieldValue> {
    let metadata = component.metadata().ok_or_else(|| {
        StorageError::IllegalState("component is not persisted".to_string())
    })?;
    link_of(metadata.id())
}

/// Resolve the live document behind an entity's metadata, re-fetching by
/// identity when the metadata is detached.
fn document_for(
    session: &mut dyn DocumentSession,
    metadata: &EntityMetadata,
    type_name: &str,
) -> StorageResult<DocumentHandle> {
    if let Some(document) = metadata.document() {
        return Ok(document.clone());
    }
    let id_value = metadata.id().value()?;
    let (decoded_type, record_id) = decode_entity_id(&id_value)?;
    if decoded_type != type_name {
        return Err(StorageError::IllegalArgument(format!(
            "entity id {id_value} does not identify a {type_name}"
        )));
    }
    session
        .get(type_name, record_id)?
        .ok_or_else(|| MetadataError::NotFound(format!("{type_name} {id_value}")).into())
}

/// Fetch a document by external identity, checking the type tag.
fn get_by_id(
    session: &mut dyn DocumentSession,
    id: &EntityId,
    type_name: &str,
) -> StorageResult<Option<DocumentHandle>> {
    let id_value = id.value()?;
    let (decoded_type, record_id) = decode_entity_id(&id_value)?;
    if decoded_type != type_name {
        return Ok(None);
    }
    Ok(session.get(type_name, record_id)?)
}

/// Adapter for [`Bucket`] documents.
pub struct BucketAdapter;

impl BucketAdapter {
    pub const TYPE_NAME: &'static str = "bucket";

    fn to_fields(bucket: &Bucket) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();
        fields.insert(
            P_REPOSITORY_NAME.to_string(),
            FieldValue::Text(bucket.repository_name().to_string()),
        );
        fields.insert(P_ATTRIBUTES.to_string(), attributes_field(bucket.attributes()));
        fields
    }

    fn from_document(document: &DocumentHandle) -> StorageResult<Bucket> {
        let mut bucket = Bucket::new(required_text(document, P_REPOSITORY_NAME)?);
        bucket.set_attributes(attributes_from(document.field(P_ATTRIBUTES)));
        bucket.set_metadata(EntityMetadata::attached(document.clone()));
        Ok(bucket)
    }

    pub fn add(session: &mut dyn DocumentSession, bucket: &mut Bucket) -> StorageResult<()> {
        let document = session.add(Self::TYPE_NAME, Self::to_fields(bucket))?;
        bucket.set_metadata(EntityMetadata::attached(document));
        Ok(())
    }

    pub fn edit(session: &mut dyn DocumentSession, bucket: &Bucket) -> StorageResult<()> {
        let metadata = bucket
            .metadata()
            .ok_or_else(|| StorageError::IllegalState("bucket is not persisted".to_string()))?;
        let document = document_for(session, metadata, Self::TYPE_NAME)?;
        Ok(session.update(&document, Self::to_fields(bucket))?)
    }

    pub fn delete(session: &mut dyn DocumentSession, bucket: &Bucket) -> StorageResult<()> {
        let metadata = bucket
            .metadata()
            .ok_or_else(|| StorageError::IllegalState("bucket is not persisted".to_string()))?;
        let document = document_for(session, metadata, Self::TYPE_NAME)?;
        Ok(session.delete(&document)?)
    }

    pub fn browse(session: &mut dyn DocumentSession) -> StorageResult<Vec<Bucket>> {
        session
            .browse(Self::TYPE_NAME)?
            .iter()
            .map(Self::from_document)
            .collect()
    }

    pub fn get(
        session: &mut dyn DocumentSession,
        id: &EntityId,
    ) -> StorageResult<Option<Bucket>> {
        get_by_id(session, id, Self::TYPE_NAME)?
            .map(|document| Self::from_document(&document))
            .transpose()
    }

    pub fn find_by_repository_name(
        session: &mut dyn DocumentSession,
        repository_name: &str,
    ) -> StorageResult<Option<Bucket>> {
        session
            .find_first(
                Self::TYPE_NAME,
                &DocumentFilter::any().field(
                    P_REPOSITORY_NAME,
                    FieldValue::Text(repository_name.to_string()),
                ),
            )?
            .map(|document| Self::from_document(&document))
            .transpose()
    }
}

/// Adapter for [`Component`] documents.
pub struct ComponentAdapter;

impl ComponentAdapter {
    pub const TYPE_NAME: &'static str = "component";

    fn to_fields(component: &Component) -> StorageResult<BTreeMap<String, FieldValue>> {
        let mut fields = BTreeMap::new();
        fields.insert(P_BUCKET.to_string(), link_of(component.bucket_id())?);
        fields.insert(
            P_FORMAT.to_string(),
            FieldValue::Text(component.format().to_string()),
        );
        if let Some(group) = component.group() {
            fields.insert(P_GROUP.to_string(), FieldValue::Text(group.to_string()));
        }
        fields.insert(
            P_NAME.to_string(),
            FieldValue::Text(component.name().to_string()),
        );
        if let Some(version) = component.version() {
            fields.insert(P_VERSION.to_string(), FieldValue::Text(version.to_string()));
        }
        fields.insert(
            P_ATTRIBUTES.to_string(),
            attributes_field(component.attributes()),
        );
        Ok(fields)
    }

    fn from_document(document: &DocumentHandle) -> StorageResult<Component> {
        let bucket_link = document
            .field(P_BUCKET)
            .and_then(|value| value.as_link().cloned())
            .ok_or_else(|| {
                MetadataError::Serialization("component document has no bucket link".to_string())
            })?;
        let mut component = Component::new(
            EntityId::from_link(&bucket_link),
            required_text(document, P_FORMAT)?,
        );
        component.set_all(
            optional_text(document, P_GROUP),
            required_text(document, P_NAME)?,
            optional_text(document, P_VERSION),
            attributes_from(document.field(P_ATTRIBUTES)),
        );
        component.set_metadata(EntityMetadata::attached(document.clone()));
        Ok(component)
    }

    pub fn add(
        session: &mut dyn DocumentSession,
        component: &mut Component,
    ) -> StorageResult<()> {
        let document = session.add(Self::TYPE_NAME, Self::to_fields(component)?)?;
        component.set_metadata(EntityMetadata::attached(document));
        Ok(())
    }

    pub fn edit(session: &mut dyn DocumentSession, component: &Component) -> StorageResult<()> {
        let metadata = component.metadata().ok_or_else(|| {
            StorageError::IllegalState("component is not persisted".to_string())
        })?;
        let document = document_for(session, metadata, Self::TYPE_NAME)?;
        let fields = Self::to_fields(component)?;
        Ok(session.update(&document, fields)?)
    }

    pub fn delete(session: &mut dyn DocumentSession, component: &Component) -> StorageResult<()> {
        let metadata = component.metadata().ok_or_else(|| {
            StorageError::IllegalState("component is not persisted".to_string())
        })?;
        let document = document_for(session, metadata, Self::TYPE_NAME)?;
        Ok(session.delete(&document)?)
    }

    pub fn get(
        session: &mut dyn DocumentSession,
        id: &EntityId,
    ) -> StorageResult<Option<Component>> {
        get_by_id(session, id, Self::TYPE_NAME)?
            .map(|document| Self::from_document(&document))
            .transpose()
    }

    pub fn browse_by_bucket(
        session: &mut dyn DocumentSession,
        bucket: &Bucket,
    ) -> StorageResult<Vec<Component>> {
        let filter = DocumentFilter::any().field(P_BUCKET, bucket_link(bucket)?);
        session
            .select(Self::TYPE_NAME, &filter)?
            .iter()
            .map(Self::from_document)
            .collect()
    }

    pub fn find_by_property(
        session: &mut dyn DocumentSession,
        property: &str,
        value: FieldValue,
        bucket: &Bucket,
    ) -> StorageResult<Option<Component>> {
        let filter = DocumentFilter::any()
            .field(property, value)
            .field(P_BUCKET, bucket_link(bucket)?);
        session
            .find_first(Self::TYPE_NAME, &filter)?
            .map(|document| Self::from_document(&document))
            .transpose()
    }

    pub fn browse_by_query(
        session: &mut dyn DocumentSession,
        filter: &DocumentFilter,
    ) -> StorageResult<Vec<Component>> {
        session
            .select(Self::TYPE_NAME, filter)?
            .iter()
            .map(Self::from_document)
            .collect()
    }

    pub fn count_by_query(
        session: &mut dyn DocumentSession,
        filter: &DocumentFilter,
    ) -> StorageResult<u64> {
        Ok(session.count(Self::TYPE_NAME, filter)?)
    }
}

/// Adapter for [`Asset`] documents.
pub struct AssetAdapter;

impl AssetAdapter {
    pub const TYPE_NAME: &'static str = "asset";

    fn to_fields(asset: &Asset) -> StorageResult<BTreeMap<String, FieldValue>> {
        let mut fields = BTreeMap::new();
        fields.insert(P_BUCKET.to_string(), link_of(asset.bucket_id())?);
        if let Some(component_id) = asset.component_id() {
            fields.insert(P_COMPONENT.to_string(), link_of(component_id)?);
        }
        if let Some(name) = asset.name() {
            fields.insert(P_NAME.to_string(), FieldValue::Text(name.to_string()));
        }
        fields.insert(
            P_FORMAT.to_string(),
            FieldValue::Text(asset.format().to_string()),
        );
        if let Some(content_type) = asset.content_type() {
            fields.insert(
                P_CONTENT_TYPE.to_string(),
                FieldValue::Text(content_type.to_string()),
            );
        }
        if let Some(size) = asset.size() {
            fields.insert(P_SIZE.to_string(), FieldValue::Int(size as i64));
        }
        if let Some(blob_ref) = asset.blob_ref() {
            fields.insert(
                P_BLOB_REF.to_string(),
                FieldValue::Text(blob_ref.to_string()),
            );
        }
        fields.insert(P_ATTRIBUTES.to_string(), attributes_field(asset.attributes()));
        Ok(fields)
    }

    fn from_document(document: &DocumentHandle) -> StorageResult<Asset> {
        let bucket_link = document
            .field(P_BUCKET)
            .and_then(|value| value.as_link().cloned())
            .ok_or_else(|| {
                MetadataError::Serialization("asset document has no bucket link".to_string())
            })?;
        let mut asset = Asset::new(
            EntityId::from_link(&bucket_link),
            required_text(document, P_FORMAT)?,
        );
        if let Some(FieldValue::Link(component_link)) = document.field(P_COMPONENT) {
            asset.set_component_id(Some(EntityId::from_link(&component_link)));
        }
        if let Some(name) = optional_text(document, P_NAME) {
            asset.set_name(name);
        }
        asset.set_content_type(optional_text(document, P_CONTENT_TYPE));
        asset.set_size(
            document
                .field(P_SIZE)
                .and_then(|value| value.as_i64())
                .map(|size| size as u64),
        );
        if let Some(text) = optional_text(document, P_BLOB_REF) {
            asset.set_blob_ref(Some(BlobRef::parse(&text)?));
        }
        asset.set_attributes(attributes_from(document.field(P_ATTRIBUTES)));
        asset.set_metadata(EntityMetadata::attached(document.clone()));
        Ok(asset)
    }

    pub fn add(session: &mut dyn DocumentSession, asset: &mut Asset) -> StorageResult<()> {
        let document = session.add(Self::TYPE_NAME, Self::to_fields(asset)?)?;
        asset.set_metadata(EntityMetadata::attached(document));
        Ok(())
    }

    pub fn edit(session: &mut dyn DocumentSession, asset: &Asset) -> StorageResult<()> {
        let metadata = asset
            .metadata()
            .ok_or_else(|| StorageError::IllegalState("asset is not persisted".to_string()))?;
        let document = document_for(session, metadata, Self::TYPE_NAME)?;
        let fields = Self::to_fields(asset)?;
        Ok(session.update(&document, fields)?)
    }

    pub fn delete(session: &mut dyn DocumentSession, asset: &Asset) -> StorageResult<()> {
        let metadata = asset
            .metadata()
            .ok_or_else(|| StorageError::IllegalState("asset is not persisted".to_string()))?;
        let document = document_for(session, metadata, Self::TYPE_NAME)?;
        Ok(session.delete(&document)?)
    }

    pub fn get(session: &mut dyn DocumentSession, id: &EntityId) -> StorageResult<Option<Asset>> {
        get_by_id(session, id, Self::TYPE_NAME)?
            .map(|document| Self::from_document(&document))
            .transpose()
    }

    pub fn browse_by_bucket(
        session: &mut dyn DocumentSession,
        bucket: &Bucket,
    ) -> StorageResult<Vec<Asset>> {
        let filter = DocumentFilter::any().field(P_BUCKET, bucket_link(bucket)?);
        session
            .select(Self::TYPE_NAME, &filter)?
            .iter()
            .map(Self::from_document)
            .collect()
    }

    pub fn browse_by_component(
        session: &mut dyn DocumentSession,
        component: &Component,
    ) -> StorageResult<Vec<Asset>> {
        let filter = DocumentFilter::any().field(P_COMPONENT, component_link(component)?);
        session
            .select(Self::TYPE_NAME, &filter)?
            .iter()
            .map(Self::from_document)
            .collect()
    }

    pub fn find_by_property(
        session: &mut dyn DocumentSession,
        property: &str,
        value: FieldValue,
        bucket: &Bucket,
    ) -> StorageResult<Option<Asset>> {
        let filter = DocumentFilter::any()
            .field(property, value)
            .field(P_BUCKET, bucket_link(bucket)?);
        session
            .find_first(Self::TYPE_NAME, &filter)?
            .map(|document| Self::from_document(&document))
            .transpose()
    }

    pub fn browse_by_query(
        session: &mut dyn DocumentSession,
        filter: &DocumentFilter,
    ) -> StorageResult<Vec<Asset>> {
        session
            .select(Self::TYPE_NAME, filter)?
            .iter()
            .map(Self::from_document)
            .collect()
    }

    pub fn count_by_query(
        session: &mut dyn DocumentSession,
        filter: &DocumentFilter,
    ) -> StorageResult<u64> {
        Ok(session.count(Self::TYPE_NAME, filter)?)
    }
}
