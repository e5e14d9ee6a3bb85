//! The storage transaction facade.
//!
//! One `StorageTx` owns one metadata-store session and one blob
//! transaction, scoped to a single unit of work. The state machine is
//! OPEN -> ACTIVE -> OPEN (commit/rollback) -> CLOSED; operations invoked
//! in any other state fail without side effects.

use crate::adapter::{AssetAdapter, BucketAdapter, ComponentAdapter};
use crate::asset_blob::AssetBlob;
use crate::blob_tx::BlobTx;
use crate::content::{ContentValidator, MimeRulesSource};
use crate::entity::{Asset, Bucket, Component};
use crate::error::{StorageError, StorageResult};
use crate::hooks::{StorageTxHook, StorageTxHooks};
use crate::selector::WritePolicySelector;
use depot_blobstore::{
    Blob, BlobHeaders, BlobRef, BLOB_NAME_HEADER, CONTENT_TYPE_HEADER, CREATED_BY_HEADER,
    REPO_NAME_HEADER,
};
use depot_core::{HashAlgorithm, WriteOperation, WritePolicy, CHECKSUM_ATTRIBUTES};
use depot_metadata::{DocumentFilter, DocumentSession, EntityId, FieldValue};
use depot_transaction::{PausedWork, Transaction, UnitOfWork};
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use tracing::{debug, warn};

/// Cascading deletes commit after this many deleted entities to bound
/// transaction size on large repositories.
const DELETE_BATCH_SIZE: usize = 100;

/// Optimistic-conflict retry budget per transaction instance.
const MAX_RETRIES: u32 = 8;

/// Blob payloads up to this size spool in memory; larger ones go to disk.
const SPOOL_MEMORY_LIMIT: usize = 1024 * 1024;

/// Storage transaction states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxState {
    /// Created or committed/rolled back; ready to begin.
    Open,
    /// Between begin and commit/rollback.
    Active,
    /// Released; terminal.
    Closed,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "OPEN",
            Self::Active => "ACTIVE",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Restores the paused unit-of-work context even if a hook panics.
struct ResumeOnDrop(Option<PausedWork>);

impl Drop for ResumeOnDrop {
    fn drop(&mut self) {
        if let Some(paused) = self.0.take() {
            UnitOfWork::resume(paused);
        }
    }
}

/// The transactional facade over one repository's metadata and blobs.
pub struct StorageTx {
    created_by: String,
    db: Box<dyn DocumentSession>,
    blob_tx: BlobTx,
    repository_name: String,
    bucket_id: String,
    bucket: Option<Bucket>,
    write_policy: WritePolicy,
    write_policy_selector: Arc<dyn WritePolicySelector>,
    strict_content_validation: bool,
    content_validator: Arc<dyn ContentValidator>,
    mime_rules: Arc<dyn MimeRulesSource>,
    hook: StorageTxHooks,
    state: TxState,
    retries: u32,
}

impl StorageTx {
    /// Assemble a transaction over a fresh metadata session and blob
    /// transaction. The repository's bucket is loaded on first `begin`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        created_by: impl Into<String>,
        db: Box<dyn DocumentSession>,
        blob_tx: BlobTx,
        repository_name: impl Into<String>,
        bucket_id: impl Into<String>,
        write_policy: WritePolicy,
        write_policy_selector: Arc<dyn WritePolicySelector>,
        strict_content_validation: bool,
        content_validator: Arc<dyn ContentValidator>,
        mime_rules: Arc<dyn MimeRulesSource>,
        hook: StorageTxHooks,
    ) -> Self {
        Self {
            created_by: created_by.into(),
            db,
            blob_tx,
            repository_name: repository_name.into(),
            bucket_id: bucket_id.into(),
            bucket: None,
            write_policy,
            write_policy_selector,
            strict_content_validation,
            content_validator,
            mime_rules,
            hook,
            state: TxState::Open,
            retries: 0,
        }
    }

    fn ensure_state(&self, expected: TxState, operation: &str) -> StorageResult<()> {
        if self.state != expected {
            return Err(StorageError::IllegalState(format!(
                "{operation} requires a {expected} transaction, but this transaction is {}",
                self.state
            )));
        }
        Ok(())
    }

    fn denied(&self, operation: WriteOperation) -> StorageError {
        warn!(repository = %self.repository_name, %operation, "write policy denial");
        StorageError::IllegalOperation {
            repository: self.repository_name.clone(),
            operation,
        }
    }

    /// Current transaction state.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Start the transaction.
    pub fn begin(&mut self) -> StorageResult<()> {
        self.ensure_state(TxState::Open, "begin")?;
        if self.db.is_active() {
            return Err(StorageError::IllegalState(
                "nested transaction".to_string(),
            ));
        }
        self.db.begin()?;
        self.state = TxState::Active;
        if self.bucket.is_none() {
            let id = EntityId::detached(self.bucket_id.clone());
            self.bucket = Some(
                BucketAdapter::get(self.db.as_mut(), &id)?.ok_or_else(|| {
                    StorageError::IllegalState(format!(
                        "bucket missing for repository {}",
                        self.repository_name
                    ))
                })?,
            );
        }
        Ok(())
    }

    /// Commit: metadata store first, then blob store, then post-commit
    /// hooks with the ambient unit of work suspended.
    pub fn commit(&mut self) -> StorageResult<()> {
        self.ensure_state(TxState::Active, "commit")?;
        self.db.commit()?;
        self.blob_tx.commit()?;
        {
            let _resume = ResumeOnDrop(Some(UnitOfWork::pause()));
            self.hook.post_commit();
        }
        self.retries = 0;
        self.state = TxState::Open;
        debug!(repository = %self.repository_name, "storage transaction committed");
        Ok(())
    }

    /// Roll back: metadata store first, then blob store, then post-rollback
    /// hooks with the ambient unit of work suspended.
    pub fn rollback(&mut self) -> StorageResult<()> {
        self.ensure_state(TxState::Active, "rollback")?;
        // The session has nothing to roll back when the metadata commit
        // succeeded but the blob commit failed afterwards.
        if self.db.is_active() {
            self.db.rollback()?;
        }
        self.blob_tx.rollback()?;
        {
            let _resume = ResumeOnDrop(Some(UnitOfWork::pause()));
            self.hook.post_rollback();
        }
        self.state = TxState::Open;
        debug!(repository = %self.repository_name, "storage transaction rolled back");
        Ok(())
    }

    /// Release the transaction, rolling back first if still active.
    /// Idempotent; terminal.
    pub fn close(&mut self) -> StorageResult<()> {
        if self.state == TxState::Closed {
            return Ok(());
        }
        let result = if self.state == TxState::Active {
            self.rollback()
        } else {
            Ok(())
        };
        self.db.close();
        self.state = TxState::Closed;
        result
    }

    /// Whether the transaction is between begin and commit/rollback.
    pub fn is_active(&self) -> bool {
        self.state == TxState::Active
    }

    /// Consume one unit of the retry budget; consulted by the retry engine.
    pub fn allow_retry(&mut self) -> bool {
        if self.retries < MAX_RETRIES {
            self.retries += 1;
            debug!(
                repository = %self.repository_name,
                retries = self.retries,
                "optimistic retry granted"
            );
            true
        } else {
            warn!(repository = %self.repository_name, "retry budget exhausted");
            false
        }
    }

    /// The repository's bucket. Available once the transaction has begun.
    pub fn bucket(&self) -> StorageResult<&Bucket> {
        self.bucket.as_ref().ok_or_else(|| {
            StorageError::IllegalState("transaction has not begun".to_string())
        })
    }

    // ---- reads ------------------------------------------------------

    /// All buckets in the store.
    pub fn browse_buckets(&mut self) -> StorageResult<Vec<Bucket>> {
        self.ensure_state(TxState::Active, "browse_buckets")?;
        BucketAdapter::browse(self.db.as_mut())
    }

    /// All components owned by `bucket`.
    pub fn browse_components(&mut self, bucket: &Bucket) -> StorageResult<Vec<Component>> {
        self.ensure_state(TxState::Active, "browse_components")?;
        ComponentAdapter::browse_by_bucket(self.db.as_mut(), bucket)
    }

    /// All assets owned by `bucket`, standalone or not.
    pub fn browse_assets(&mut self, bucket: &Bucket) -> StorageResult<Vec<Asset>> {
        self.ensure_state(TxState::Active, "browse_assets")?;
        AssetAdapter::browse_by_bucket(self.db.as_mut(), bucket)
    }

    /// All assets owned by `component`.
    pub fn browse_assets_by_component(
        &mut self,
        component: &Component,
    ) -> StorageResult<Vec<Asset>> {
        self.ensure_state(TxState::Active, "browse_assets_by_component")?;
        AssetAdapter::browse_by_component(self.db.as_mut(), component)
    }

    /// The first asset of a component, if it has any.
    pub fn first_asset(&mut self, component: &Component) -> StorageResult<Option<Asset>> {
        Ok(self.browse_assets_by_component(component)?.into_iter().next())
    }

    /// Find a component by identity, scoped to `bucket`.
    pub fn find_component(
        &mut self,
        id: &EntityId,
        bucket: &Bucket,
    ) -> StorageResult<Option<Component>> {
        self.ensure_state(TxState::Active, "find_component")?;
        Ok(ComponentAdapter::get(self.db.as_mut(), id)?
            .filter(|component| bucket_owns(bucket, component.bucket_id())))
    }

    /// Find an asset by identity, scoped to `bucket`.
    pub fn find_asset(&mut self, id: &EntityId, bucket: &Bucket) -> StorageResult<Option<Asset>> {
        self.ensure_state(TxState::Active, "find_asset")?;
        Ok(AssetAdapter::get(self.db.as_mut(), id)?
            .filter(|asset| bucket_owns(bucket, asset.bucket_id())))
    }

    /// Find a component by one property value within `bucket`.
    pub fn find_component_with_property(
        &mut self,
        property: &str,
        value: FieldValue,
        bucket: &Bucket,
    ) -> StorageResult<Option<Component>> {
        self.ensure_state(TxState::Active, "find_component_with_property")?;
        ComponentAdapter::find_by_property(self.db.as_mut(), property, value, bucket)
    }

    /// Find an asset by one property value within `bucket`.
    pub fn find_asset_with_property(
        &mut self,
        property: &str,
        value: FieldValue,
        bucket: &Bucket,
    ) -> StorageResult<Option<Asset>> {
        self.ensure_state(TxState::Active, "find_asset_with_property")?;
        AssetAdapter::find_by_property(self.db.as_mut(), property, value, bucket)
    }

    /// All components matching a filter, across buckets.
    pub fn find_components(&mut self, filter: &DocumentFilter) -> StorageResult<Vec<Component>> {
        self.ensure_state(TxState::Active, "find_components")?;
        ComponentAdapter::browse_by_query(self.db.as_mut(), filter)
    }

    /// Number of components matching a filter.
    pub fn count_components(&mut self, filter: &DocumentFilter) -> StorageResult<u64> {
        self.ensure_state(TxState::Active, "count_components")?;
        ComponentAdapter::count_by_query(self.db.as_mut(), filter)
    }

    /// All assets matching a filter, across buckets.
    pub fn find_assets(&mut self, filter: &DocumentFilter) -> StorageResult<Vec<Asset>> {
        self.ensure_state(TxState::Active, "find_assets")?;
        AssetAdapter::browse_by_query(self.db.as_mut(), filter)
    }

    /// Number of assets matching a filter.
    pub fn count_assets(&mut self, filter: &DocumentFilter) -> StorageResult<u64> {
        self.ensure_state(TxState::Active, "count_assets")?;
        AssetAdapter::count_by_query(self.db.as_mut(), filter)
    }

    // ---- entity construction and persistence ------------------------

    /// Build a new, not yet persisted standalone asset.
    pub fn create_asset(&mut self, bucket: &Bucket, format: &str) -> StorageResult<Asset> {
        self.ensure_state(TxState::Active, "create_asset")?;
        Ok(Asset::new(owned_bucket_id(bucket)?, format))
    }

    /// Build a new, not yet persisted asset owned by `component`.
    pub fn create_asset_for(
        &mut self,
        bucket: &Bucket,
        component: &Component,
    ) -> StorageResult<Asset> {
        self.ensure_state(TxState::Active, "create_asset_for")?;
        let component_id = component
            .metadata()
            .ok_or_else(|| {
                StorageError::IllegalState("component is not persisted".to_string())
            })?
            .id()
            .clone();
        let mut asset = Asset::new(owned_bucket_id(bucket)?, component.format());
        asset.set_component_id(Some(component_id));
        Ok(asset)
    }

    /// Build a new, not yet persisted component.
    pub fn create_component(&mut self, bucket: &Bucket, format: &str) -> StorageResult<Component> {
        self.ensure_state(TxState::Active, "create_component")?;
        Ok(Component::new(owned_bucket_id(bucket)?, format))
    }

    /// Persist a component: add it on first save, update it afterwards.
    pub fn save_component(&mut self, component: &mut Component) -> StorageResult<()> {
        self.ensure_state(TxState::Active, "save_component")?;
        if component.name().is_empty() {
            return Err(StorageError::IllegalArgument(
                "component name is required".to_string(),
            ));
        }
        if component.is_persisted() {
            ComponentAdapter::edit(self.db.as_mut(), component)?;
            self.hook.update_component(component);
        } else {
            ComponentAdapter::add(self.db.as_mut(), component)?;
            self.hook.create_component(component);
        }
        Ok(())
    }

    /// Persist an asset: add it on first save, update it afterwards.
    pub fn save_asset(&mut self, asset: &mut Asset) -> StorageResult<()> {
        self.ensure_state(TxState::Active, "save_asset")?;
        if asset.is_persisted() {
            AssetAdapter::edit(self.db.as_mut(), asset)?;
            self.hook.update_asset(asset);
        } else {
            AssetAdapter::add(self.db.as_mut(), asset)?;
            self.hook.create_asset(asset);
        }
        Ok(())
    }

    // ---- blobs ------------------------------------------------------

    /// Store a new blob and compute the requested hashes over it.
    ///
    /// The input is spooled so content-type sniffing never consumes it.
    /// Fails fast if the repository's write policy denies creation; no
    /// bytes are written in that case.
    pub fn create_blob(
        &mut self,
        blob_name: &str,
        source: &mut dyn Read,
        hash_algorithms: &[HashAlgorithm],
        headers: Option<&BlobHeaders>,
        declared_content_type: Option<&str>,
    ) -> StorageResult<AssetBlob> {
        self.ensure_state(TxState::Active, "create_blob")?;
        if !self.write_policy.check_create_allowed() {
            return Err(self.denied(WriteOperation::Create));
        }

        let mut spool = tempfile::spooled_tempfile(SPOOL_MEMORY_LIMIT);
        io::copy(source, &mut spool)?;

        spool.seek(SeekFrom::Start(0))?;
        let content_type = self.content_validator.determine_content_type(
            self.strict_content_validation,
            &mut spool,
            self.mime_rules.as_ref(),
            Some(blob_name),
            declared_content_type,
        )?;
        spool.seek(SeekFrom::Start(0))?;

        let mut storage_headers = BlobHeaders::new()
            .with(REPO_NAME_HEADER, self.repository_name.clone())
            .with(BLOB_NAME_HEADER, blob_name)
            .with(CREATED_BY_HEADER, self.created_by.clone())
            .with(CONTENT_TYPE_HEADER, content_type.clone());
        if let Some(extra) = headers {
            storage_headers.extend(extra);
        }

        self.blob_tx
            .create(&mut spool, storage_headers, hash_algorithms, content_type)
    }

    /// Attach a created blob to an asset.
    ///
    /// Replacing an existing blob requires update permission and deletes
    /// the old blob first. The asset itself is not persisted here; callers
    /// still save it.
    pub fn attach_blob(&mut self, asset: &mut Asset, asset_blob: &AssetBlob) -> StorageResult<()> {
        self.ensure_state(TxState::Active, "attach_blob")?;
        if asset_blob.is_attached() {
            return Err(StorageError::IllegalArgument(
                "blob is already attached to an asset".to_string(),
            ));
        }

        let effective = self.write_policy_selector.select(asset, self.write_policy);
        if !effective.check_create_allowed() {
            return Err(self.denied(WriteOperation::Create));
        }
        if let Some(old_blob_ref) = asset.blob_ref().cloned() {
            if !effective.check_update_allowed() {
                return Err(self.denied(WriteOperation::Update));
            }
            self.delete_blob_internal(&old_blob_ref, Some(effective))?;
        }

        asset.set_blob_ref(Some(asset_blob.blob_ref().clone()));
        asset.set_size(Some(asset_blob.size()));
        asset.set_content_type(Some(asset_blob.content_type().to_string()));
        let mut checksums = asset.attributes_mut().child_mut(CHECKSUM_ATTRIBUTES);
        for (algorithm, value) in asset_blob.hashes() {
            checksums.set(algorithm.name(), value.to_hex());
        }

        asset_blob.mark_attached();
        Ok(())
    }

    /// Create a blob and attach it to `asset` in one step.
    ///
    /// When the asset already has a blob, the update-permission check runs
    /// before any new bytes are written.
    pub fn set_blob(
        &mut self,
        asset: &mut Asset,
        blob_name: &str,
        source: &mut dyn Read,
        hash_algorithms: &[HashAlgorithm],
        headers: Option<&BlobHeaders>,
        declared_content_type: Option<&str>,
    ) -> StorageResult<AssetBlob> {
        self.ensure_state(TxState::Active, "set_blob")?;
        if asset.blob_ref().is_some() {
            let effective = self.write_policy_selector.select(asset, self.write_policy);
            if !effective.check_update_allowed() {
                return Err(self.denied(WriteOperation::Update));
            }
        }
        let asset_blob =
            self.create_blob(blob_name, source, hash_algorithms, headers, declared_content_type)?;
        self.attach_blob(asset, &asset_blob)?;
        Ok(asset_blob)
    }

    /// Read a blob through to the store.
    pub fn get_blob(&mut self, blob_ref: &BlobRef) -> StorageResult<Option<Blob>> {
        self.ensure_state(TxState::Active, "get_blob")?;
        self.blob_tx.get(blob_ref)
    }

    /// Read a blob that must exist.
    pub fn require_blob(&mut self, blob_ref: &BlobRef) -> StorageResult<Blob> {
        self.get_blob(blob_ref)?.ok_or_else(|| {
            StorageError::IllegalState(format!("blob not found: {blob_ref}"))
        })
    }

    fn delete_blob_internal(
        &mut self,
        blob_ref: &BlobRef,
        effective_policy: Option<WritePolicy>,
    ) -> StorageResult<()> {
        if let Some(policy) = effective_policy {
            if !policy.check_delete_allowed() {
                return Err(self.denied(WriteOperation::Delete));
            }
        }
        self.blob_tx.delete(blob_ref);
        Ok(())
    }

    // ---- deletion ---------------------------------------------------

    /// Delete an asset and its attached blob, subject to write policy.
    pub fn delete_asset(&mut self, asset: &Asset) -> StorageResult<()> {
        self.ensure_state(TxState::Active, "delete_asset")?;
        let effective = self.write_policy_selector.select(asset, self.write_policy);
        self.delete_asset_with(asset, Some(effective))
    }

    fn delete_asset_with(
        &mut self,
        asset: &Asset,
        effective_policy: Option<WritePolicy>,
    ) -> StorageResult<()> {
        if let Some(blob_ref) = asset.blob_ref().cloned() {
            self.delete_blob_internal(&blob_ref, effective_policy)?;
        }
        self.hook.delete_asset(asset);
        AssetAdapter::delete(self.db.as_mut(), asset)
    }

    /// Delete a component, cascading to every asset it owns.
    pub fn delete_component(&mut self, component: &Component) -> StorageResult<()> {
        self.ensure_state(TxState::Active, "delete_component")?;
        self.delete_component_with(component, true)
    }

    fn delete_component_with(
        &mut self,
        component: &Component,
        check_write_policy: bool,
    ) -> StorageResult<()> {
        for asset in AssetAdapter::browse_by_component(self.db.as_mut(), component)? {
            let policy = if check_write_policy {
                Some(self.write_policy_selector.select(&asset, self.write_policy))
            } else {
                None
            };
            self.delete_asset_with(&asset, policy)?;
        }
        self.hook.delete_component(component);
        ComponentAdapter::delete(self.db.as_mut(), component)
    }

    /// Delete a bucket: every component (cascading), every standalone
    /// asset, then the bucket document.
    ///
    /// Commits in batches of [`DELETE_BATCH_SIZE`] entities, so bucket
    /// deletion is not atomic; a crash mid-way leaves a partially deleted
    /// bucket. The transaction is left active with nothing staged.
    pub fn delete_bucket(&mut self, bucket: &Bucket) -> StorageResult<()> {
        self.ensure_state(TxState::Active, "delete_bucket")?;

        let mut count = 0;
        for component in ComponentAdapter::browse_by_bucket(self.db.as_mut(), bucket)? {
            self.delete_component_with(&component, false)?;
            count += 1;
            if count == DELETE_BATCH_SIZE {
                self.commit_and_restart()?;
                count = 0;
            }
        }
        self.commit_and_restart()?;

        count = 0;
        for asset in AssetAdapter::browse_by_bucket(self.db.as_mut(), bucket)? {
            self.delete_asset_with(&asset, None)?;
            count += 1;
            if count == DELETE_BATCH_SIZE {
                self.commit_and_restart()?;
                count = 0;
            }
        }
        self.commit_and_restart()?;

        BucketAdapter::delete(self.db.as_mut(), bucket)?;
        self.commit_and_restart()
    }

    fn commit_and_restart(&mut self) -> StorageResult<()> {
        self.commit()?;
        self.begin()
    }
}

fn bucket_owns(bucket: &Bucket, owner_id: &EntityId) -> bool {
    bucket
        .metadata()
        .map(|metadata| metadata.id() == owner_id)
        .unwrap_or(false)
}

fn owned_bucket_id(bucket: &Bucket) -> StorageResult<EntityId> {
    Ok(bucket
        .metadata()
        .ok_or_else(|| StorageError::IllegalState("bucket is not persisted".to_string()))?
        .id()
        .clone())
}

impl Transaction for StorageTx {
    type Error = StorageError;

    fn begin(&mut self) -> StorageResult<()> {
        StorageTx::begin(self)
    }

    fn commit(&mut self) -> StorageResult<()> {
        StorageTx::commit(self)
    }

    fn rollback(&mut self) -> StorageResult<()> {
        StorageTx::rollback(self)
    }

    fn close(&mut self) -> StorageResult<()> {
        StorageTx::close(self)
    }

    fn is_active(&self) -> bool {
        StorageTx::is_active(self)
    }

    fn allow_retry(&mut self) -> bool {
        StorageTx::allow_retry(self)
    }
}
