//! Per-repository storage facet.
//!
//! The facet owns storage configuration, initializes the repository's
//! bucket, and supplies the transaction factory handed to the unit of
//! work. Hook factories and the write-policy selector may only be
//! registered while the facet is initialized but not yet started, so the
//! shared hook list never changes under active transactions.

use crate::adapter::{AssetAdapter, BucketAdapter, ComponentAdapter};
use crate::blob_tx::BlobTx;
use crate::content::{ContentValidator, DefaultContentValidator, MimeRulesSource, NoopMimeRules};
use crate::entity::Bucket;
use crate::error::{StorageError, StorageResult};
use crate::events::EventSink;
use crate::hooks::{EventsHook, StorageTxHook, StorageTxHooks};
use crate::selector::{DefaultWritePolicySelector, WritePolicySelector};
use crate::tx::StorageTx;
use depot_blobstore::{BlobStore, BlobStoreRegistry};
use depot_core::{StorageConfig, WritePolicy};
use depot_metadata::DocumentStore;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Creates one hook instance per transaction.
pub type HookFactory = Arc<dyn Fn() -> Box<dyn StorageTxHook> + Send + Sync>;

/// Storage facet lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FacetState {
    New,
    Initialized,
    Started,
    Stopped,
}

impl fmt::Display for FacetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "NEW",
            Self::Initialized => "INITIALIZED",
            Self::Started => "STARTED",
            Self::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Everything needed to open one transaction; cloneable into the factory
/// closure.
#[derive(Clone)]
struct TxParts {
    created_by: String,
    repository_name: String,
    bucket_id: String,
    write_policy: WritePolicy,
    strict_content_validation: bool,
    document_store: Arc<dyn DocumentStore>,
    blob_store: Arc<dyn BlobStore>,
    write_policy_selector: Arc<dyn WritePolicySelector>,
    content_validator: Arc<dyn ContentValidator>,
    mime_rules: Arc<dyn MimeRulesSource>,
    event_sink: Arc<dyn EventSink>,
    hook_factories: Vec<HookFactory>,
}

fn open_tx(parts: &TxParts) -> StorageTx {
    let mut hooks: Vec<Box<dyn StorageTxHook>> = vec![Box::new(EventsHook::new(
        Arc::clone(&parts.event_sink),
        parts.repository_name.clone(),
    ))];
    hooks.extend(parts.hook_factories.iter().map(|factory| factory()));

    StorageTx::new(
        parts.created_by.clone(),
        parts.document_store.open_session(),
        BlobTx::new(Arc::clone(&parts.blob_store)),
        parts.repository_name.clone(),
        parts.bucket_id.clone(),
        parts.write_policy,
        Arc::clone(&parts.write_policy_selector),
        parts.strict_content_validation,
        Arc::clone(&parts.content_validator),
        Arc::clone(&parts.mime_rules),
        StorageTxHooks::new(hooks),
    )
}

/// Storage facet for one repository.
pub struct StorageFacet {
    repository_name: String,
    config: StorageConfig,
    document_store: Arc<dyn DocumentStore>,
    blob_stores: Arc<BlobStoreRegistry>,
    event_sink: Arc<dyn EventSink>,
    content_validator: Arc<dyn ContentValidator>,
    mime_rules: Arc<dyn MimeRulesSource>,
    write_policy_selector: Arc<dyn WritePolicySelector>,
    hook_factories: Vec<HookFactory>,
    created_by: String,
    state: FacetState,
    bucket_id: Option<String>,
}

impl StorageFacet {
    /// Create a facet; call [`StorageFacet::init`] before use.
    pub fn new(
        repository_name: impl Into<String>,
        config: StorageConfig,
        document_store: Arc<dyn DocumentStore>,
        blob_stores: Arc<BlobStoreRegistry>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            repository_name: repository_name.into(),
            config,
            document_store,
            blob_stores,
            event_sink,
            content_validator: Arc::new(DefaultContentValidator),
            mime_rules: Arc::new(NoopMimeRules),
            write_policy_selector: Arc::new(DefaultWritePolicySelector),
            hook_factories: Vec::new(),
            created_by: "system".to_string(),
            state: FacetState::New,
            bucket_id: None,
        }
    }

    /// Use a format-specific content validator. Call before `init`.
    pub fn with_content_validator(mut self, validator: Arc<dyn ContentValidator>) -> Self {
        self.content_validator = validator;
        self
    }

    /// Use format-specific mime rules. Call before `init`.
    pub fn with_mime_rules(mut self, mime_rules: Arc<dyn MimeRulesSource>) -> Self {
        self.mime_rules = mime_rules;
        self
    }

    /// Record a principal other than `system` on created blobs.
    pub fn with_created_by(mut self, principal: impl Into<String>) -> Self {
        self.created_by = principal.into();
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> FacetState {
        self.state
    }

    /// The repository this facet serves.
    pub fn repository_name(&self) -> &str {
        &self.repository_name
    }

    fn ensure_state(&self, expected: FacetState, operation: &str) -> StorageResult<()> {
        if self.state != expected {
            return Err(StorageError::IllegalState(format!(
                "{operation} requires a {expected} facet, but this facet is {}",
                self.state
            )));
        }
        Ok(())
    }

    /// Validate configuration, register document types and get-or-create
    /// the repository's bucket.
    pub fn init(&mut self) -> StorageResult<()> {
        self.ensure_state(FacetState::New, "init")?;
        self.config
            .validate()
            .map_err(|e| StorageError::IllegalArgument(e.to_string()))?;
        // Resolve the blob store now so a bad name fails at init, not at
        // first write.
        self.blob_stores.require(&self.config.blob_store_name)?;

        self.document_store.register_type(BucketAdapter::TYPE_NAME);
        self.document_store
            .register_type(ComponentAdapter::TYPE_NAME);
        self.document_store.register_type(AssetAdapter::TYPE_NAME);

        let mut session = self.document_store.open_session();
        session.begin()?;
        let bucket =
            match BucketAdapter::find_by_repository_name(session.as_mut(), &self.repository_name)? {
                Some(existing) => existing,
                None => {
                    let mut bucket = Bucket::new(&self.repository_name);
                    BucketAdapter::add(session.as_mut(), &mut bucket)?;
                    debug!(repository = %self.repository_name, "bucket created");
                    bucket
                }
            };
        session.commit()?;

        let bucket_id = bucket
            .metadata()
            .ok_or_else(|| StorageError::IllegalState("bucket was not persisted".to_string()))?
            .id()
            .value()?;
        session.close();

        self.bucket_id = Some(bucket_id);
        self.state = FacetState::Initialized;
        Ok(())
    }

    /// Register a per-transaction hook factory.
    pub fn register_hook_factory(&mut self, factory: HookFactory) -> StorageResult<()> {
        self.ensure_state(FacetState::Initialized, "register_hook_factory")?;
        self.hook_factories.push(factory);
        Ok(())
    }

    /// Install a write-policy selector with per-asset overrides.
    pub fn register_write_policy_selector(
        &mut self,
        selector: Arc<dyn WritePolicySelector>,
    ) -> StorageResult<()> {
        self.ensure_state(FacetState::Initialized, "register_write_policy_selector")?;
        self.write_policy_selector = selector;
        Ok(())
    }

    /// Begin serving transactions.
    pub fn start(&mut self) -> StorageResult<()> {
        self.ensure_state(FacetState::Initialized, "start")?;
        self.state = FacetState::Started;
        Ok(())
    }

    /// Stop serving transactions.
    pub fn stop(&mut self) -> StorageResult<()> {
        self.ensure_state(FacetState::Started, "stop")?;
        self.state = FacetState::Stopped;
        Ok(())
    }

    fn tx_parts(&self) -> StorageResult<TxParts> {
        Ok(TxParts {
            created_by: self.created_by.clone(),
            repository_name: self.repository_name.clone(),
            bucket_id: self
                .bucket_id
                .clone()
                .ok_or_else(|| StorageError::IllegalState("facet not initialized".to_string()))?,
            write_policy: self.config.write_policy,
            strict_content_validation: self.config.strict_content_validation,
            document_store: Arc::clone(&self.document_store),
            blob_store: self.blob_stores.require(&self.config.blob_store_name)?,
            write_policy_selector: Arc::clone(&self.write_policy_selector),
            content_validator: Arc::clone(&self.content_validator),
            mime_rules: Arc::clone(&self.mime_rules),
            event_sink: Arc::clone(&self.event_sink),
            hook_factories: self.hook_factories.clone(),
        })
    }

    /// The transaction factory handed to `UnitOfWork::begin`.
    ///
    /// Every call of the returned closure opens a fresh metadata session
    /// and blob transaction and instantiates fresh hooks.
    pub fn tx_factory(
        &self,
    ) -> StorageResult<impl Fn() -> StorageTx + Send + Sync + 'static> {
        self.ensure_state(FacetState::Started, "tx_factory")?;
        let parts = self.tx_parts()?;
        Ok(move || open_tx(&parts))
    }

    /// Delete the repository's storage: the bucket and everything in it.
    ///
    /// Deletion commits in batches; it is not atomic.
    pub fn delete(&mut self) -> StorageResult<()> {
        self.ensure_state(FacetState::Stopped, "delete")?;
        let mut tx = open_tx(&self.tx_parts()?);
        tx.begin()?;
        let bucket = tx.bucket()?.clone();
        tx.delete_bucket(&bucket)?;
        tx.commit()?;
        tx.close()?;
        self.bucket_id = None;
        debug!(repository = %self.repository_name, "repository storage deleted");
        Ok(())
    }
}
