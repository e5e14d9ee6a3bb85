//! In-memory document store with optimistic concurrency.
//!
//! Sessions stage every write and validate record versions against the
//! shared store at commit; a mismatch means another session committed in
//! between and raises a conflict without applying anything. Staged
//! additions receive their durable record ids only when the commit
//! succeeds, which is what makes attached entity identity lazy.

use crate::document::{
    DocLink, DocumentFilter, DocumentHandle, FieldValue, RecordId, RecordLocation, RecordVersion,
};
use crate::error::{MetadataError, MetadataResult};
use crate::session::{DocumentSession, DocumentStore};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Store-side field representation; never holds live handles, so the store
/// can be shared across threads.
#[derive(Clone, Debug)]
enum StoredValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Json(Value),
    Link { type_name: String, id: RecordId },
}

#[derive(Clone)]
struct StoredRecord {
    version: u64,
    fields: BTreeMap<String, StoredValue>,
}

#[derive(Default)]
struct TypeStore {
    next_id: RecordId,
    records: BTreeMap<RecordId, StoredRecord>,
}

#[derive(Default)]
struct SharedStore {
    types: HashMap<String, TypeStore>,
}

impl SharedStore {
    fn type_store(&mut self, type_name: &str) -> &mut TypeStore {
        self.types.entry(type_name.to_string()).or_default()
    }
}

/// A document store keeping everything in process memory.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<Mutex<SharedStore>>,
}

impl MemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed records of a type. Test/diagnostic helper.
    pub fn record_count(&self, type_name: &str) -> usize {
        self.lock()
            .types
            .get(type_name)
            .map(|t| t.records.len())
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, SharedStore> {
        self.inner.lock().expect("document store lock poisoned")
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn open_session(&self) -> Box<dyn DocumentSession> {
        Box::new(MemorySession {
            store: Arc::clone(&self.inner),
            active: false,
            closed: false,
            next_placeholder: 0,
            adds: Vec::new(),
            updates: HashMap::new(),
            deletes: HashMap::new(),
            loaded: HashMap::new(),
        })
    }

    fn register_type(&self, type_name: &str) {
        self.lock().type_store(type_name);
    }
}

struct StagedWrite {
    handle: DocumentHandle,
    base_version: u64,
}

/// One session over a [`MemoryDocumentStore`].
struct MemorySession {
    store: Arc<Mutex<SharedStore>>,
    active: bool,
    closed: bool,
    next_placeholder: u64,
    adds: Vec<DocumentHandle>,
    updates: HashMap<(String, RecordId), StagedWrite>,
    deletes: HashMap<(String, RecordId), StagedWrite>,
    /// One handle per committed record touched by this session, so staged
    /// updates stay visible through every reference.
    loaded: HashMap<(String, RecordId), DocumentHandle>,
}

impl MemorySession {
    fn lock(&self) -> MutexGuard<'_, SharedStore> {
        self.store.lock().expect("document store lock poisoned")
    }

    fn ensure_active(&self) -> MetadataResult<()> {
        if !self.active {
            return Err(MetadataError::IllegalState(
                "no active transaction".to_string(),
            ));
        }
        Ok(())
    }

    fn handle_for(
        loaded: &mut HashMap<(String, RecordId), DocumentHandle>,
        type_name: &str,
        id: RecordId,
        record: &StoredRecord,
    ) -> DocumentHandle {
        loaded
            .entry((type_name.to_string(), id))
            .or_insert_with(|| {
                DocumentHandle::committed(
                    type_name,
                    id,
                    record.version,
                    record.fields.iter().map(|(k, v)| (k.clone(), to_field(v))).collect(),
                )
            })
            .clone()
    }

    fn committed_version(document: &DocumentHandle) -> MetadataResult<u64> {
        match document.version() {
            RecordVersion::Committed(version) => Ok(version),
            RecordVersion::Provisional => Err(MetadataError::IllegalState(
                "document has no committed version".to_string(),
            )),
        }
    }

    /// Validate that every pending link in `fields` targets either a
    /// committed document or one of this session's staged additions.
    fn validate_links(&self, fields: &BTreeMap<String, FieldValue>) -> MetadataResult<()> {
        for value in fields.values() {
            if let FieldValue::Link(DocLink::Pending(target)) = value {
                let committed = !target.location().is_provisional();
                let staged = self.adds.iter().any(|add| add.ptr_eq(target));
                if !committed && !staged {
                    return Err(MetadataError::IllegalState(
                        "link targets a document outside this transaction".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl DocumentSession for MemorySession {
    fn begin(&mut self) -> MetadataResult<()> {
        if self.closed {
            return Err(MetadataError::IllegalState("session closed".to_string()));
        }
        if self.active {
            return Err(MetadataError::IllegalState(
                "transaction already active".to_string(),
            ));
        }
        self.active = true;
        Ok(())
    }

    fn commit(&mut self) -> MetadataResult<()> {
        self.ensure_active()?;

        // Pre-validate staged link targets before touching the store.
        for handle in &self.adds {
            handle.with_fields(|fields| self.validate_links(fields))?;
        }
        for staged in self.updates.values() {
            staged.handle.with_fields(|fields| self.validate_links(fields))?;
        }

        let mut store = self.store.lock().expect("document store lock poisoned");

        // Phase 1: validate every staged write against current versions.
        for ((type_name, id), staged) in self.updates.iter().chain(self.deletes.iter()) {
            let current = store
                .types
                .get(type_name)
                .and_then(|t| t.records.get(id))
                .map(|r| r.version);
            if current != Some(staged.base_version) {
                return Err(MetadataError::Conflict {
                    type_name: type_name.clone(),
                    id: *id,
                });
            }
        }

        // Phase 2: assign durable ids to staged additions.
        for handle in &self.adds {
            let type_name = handle.type_name();
            let type_store = store.type_store(&type_name);
            type_store.next_id += 1;
            handle.set_committed(type_store.next_id, 1);
        }

        // Phase 3: apply. Links are materializable now that ids exist.
        for handle in self.adds.drain(..) {
            let type_name = handle.type_name();
            let id = match handle.location() {
                RecordLocation::Committed(id) => id,
                RecordLocation::Provisional(_) => unreachable!("id assigned in phase 2"),
            };
            let fields = handle.with_fields(to_stored_fields);
            store
                .type_store(&type_name)
                .records
                .insert(id, StoredRecord { version: 1, fields });
            self.loaded.insert((type_name, id), handle);
        }
        for ((type_name, id), staged) in self.updates.drain() {
            let fields = staged.handle.with_fields(to_stored_fields);
            let record = store
                .type_store(&type_name)
                .records
                .get_mut(&id)
                .expect("validated in phase 1");
            record.version += 1;
            record.fields = fields;
            staged.handle.set_version(record.version);
        }
        for ((type_name, id), _staged) in self.deletes.drain() {
            store.type_store(&type_name).records.remove(&id);
        }

        self.active = false;
        debug!("document session committed");
        Ok(())
    }

    fn rollback(&mut self) -> MetadataResult<()> {
        self.ensure_active()?;

        // Staged additions simply never commit.
        self.adds.clear();

        // Revert updated handles to their committed content and version, so
        // a retry re-stages against the store's current state instead of
        // conflicting forever on a stale base version.
        let store = self.store.lock().expect("document store lock poisoned");
        for ((type_name, id), staged) in self.updates.drain() {
            if let Some(record) = store.types.get(&type_name).and_then(|t| t.records.get(&id)) {
                staged.handle.set_fields(
                    record.fields.iter().map(|(k, v)| (k.clone(), to_field(v))).collect(),
                );
                staged.handle.set_version(record.version);
            }
        }
        // Deleted records were never removed; make their handles reachable
        // again, likewise refreshed.
        for ((type_name, id), staged) in self.deletes.drain() {
            if let Some(record) = store.types.get(&type_name).and_then(|t| t.records.get(&id)) {
                staged.handle.set_fields(
                    record.fields.iter().map(|(k, v)| (k.clone(), to_field(v))).collect(),
                );
                staged.handle.set_version(record.version);
            }
            self.loaded.insert((type_name, id), staged.handle);
        }
        drop(store);

        self.active = false;
        debug!("document session rolled back");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn close(&mut self) {
        if self.active {
            // Implicit rollback; a close must always succeed.
            let _ = self.rollback();
        }
        self.closed = true;
    }

    fn add(
        &mut self,
        type_name: &str,
        fields: BTreeMap<String, FieldValue>,
    ) -> MetadataResult<DocumentHandle> {
        self.ensure_active()?;
        self.next_placeholder += 1;
        let handle = DocumentHandle::provisional(type_name, self.next_placeholder, fields);
        self.adds.push(handle.clone());
        Ok(handle)
    }

    fn update(
        &mut self,
        document: &DocumentHandle,
        fields: BTreeMap<String, FieldValue>,
    ) -> MetadataResult<()> {
        self.ensure_active()?;
        match document.location() {
            RecordLocation::Provisional(_) => {
                if !self.adds.iter().any(|add| add.ptr_eq(document)) {
                    return Err(MetadataError::IllegalState(
                        "update of a document this session did not stage".to_string(),
                    ));
                }
                document.set_fields(fields);
            }
            RecordLocation::Committed(id) => {
                let key = (document.type_name(), id);
                if self.deletes.contains_key(&key) {
                    return Err(MetadataError::NotFound(format!(
                        "{} record {id} was deleted in this transaction",
                        key.0
                    )));
                }
                let base_version = Self::committed_version(document)?;
                document.set_fields(fields);
                self.updates.entry(key).or_insert(StagedWrite {
                    handle: document.clone(),
                    base_version,
                });
            }
        }
        Ok(())
    }

    fn delete(&mut self, document: &DocumentHandle) -> MetadataResult<()> {
        self.ensure_active()?;
        match document.location() {
            RecordLocation::Provisional(_) => {
                self.adds.retain(|add| !add.ptr_eq(document));
            }
            RecordLocation::Committed(id) => {
                let key = (document.type_name(), id);
                let base_version = match self.updates.remove(&key) {
                    Some(staged) => staged.base_version,
                    None => Self::committed_version(document)?,
                };
                self.loaded.remove(&key);
                self.deletes.entry(key).or_insert(StagedWrite {
                    handle: document.clone(),
                    base_version,
                });
            }
        }
        Ok(())
    }

    fn get(&mut self, type_name: &str, id: RecordId) -> MetadataResult<Option<DocumentHandle>> {
        let key = (type_name.to_string(), id);
        if self.deletes.contains_key(&key) {
            return Ok(None);
        }
        if let Some(handle) = self.loaded.get(&key) {
            return Ok(Some(handle.clone()));
        }
        let record = {
            let store = self.lock();
            store
                .types
                .get(type_name)
                .and_then(|t| t.records.get(&id))
                .cloned()
        };
        Ok(record.map(|record| Self::handle_for(&mut self.loaded, type_name, id, &record)))
    }

    fn browse(&mut self, type_name: &str) -> MetadataResult<Vec<DocumentHandle>> {
        let records: Vec<(RecordId, StoredRecord)> = {
            let store = self.lock();
            store
                .types
                .get(type_name)
                .map(|t| t.records.iter().map(|(id, r)| (*id, r.clone())).collect())
                .unwrap_or_default()
        };

        let mut handles = Vec::with_capacity(records.len());
        for (id, record) in records {
            if self.deletes.contains_key(&(type_name.to_string(), id)) {
                continue;
            }
            handles.push(Self::handle_for(&mut self.loaded, type_name, id, &record));
        }
        // Read-your-writes: staged additions of this type are visible.
        handles.extend(
            self.adds
                .iter()
                .filter(|add| add.type_name() == type_name)
                .cloned(),
        );
        Ok(handles)
    }

    fn find_first(
        &mut self,
        type_name: &str,
        filter: &DocumentFilter,
    ) -> MetadataResult<Option<DocumentHandle>> {
        Ok(self
            .browse(type_name)?
            .into_iter()
            .find(|handle| handle.with_fields(|fields| filter.matches(fields))))
    }

    fn select(
        &mut self,
        type_name: &str,
        filter: &DocumentFilter,
    ) -> MetadataResult<Vec<DocumentHandle>> {
        Ok(self
            .browse(type_name)?
            .into_iter()
            .filter(|handle| handle.with_fields(|fields| filter.matches(fields)))
            .collect())
    }

    fn count(&mut self, type_name: &str, filter: &DocumentFilter) -> MetadataResult<u64> {
        Ok(self.select(type_name, filter)?.len() as u64)
    }
}

fn to_stored_fields(fields: &BTreeMap<String, FieldValue>) -> BTreeMap<String, StoredValue> {
    fields
        .iter()
        .map(|(name, value)| (name.clone(), to_stored(value)))
        .collect()
}

fn to_stored(value: &FieldValue) -> StoredValue {
    match value {
        FieldValue::Null => StoredValue::Null,
        FieldValue::Bool(v) => StoredValue::Bool(*v),
        FieldValue::Int(v) => StoredValue::Int(*v),
        FieldValue::Text(v) => StoredValue::Text(v.clone()),
        FieldValue::Json(v) => StoredValue::Json(v.clone()),
        FieldValue::Link(link) => {
            let (type_name, id) = link
                .resolved()
                .expect("pending links validated before commit");
            StoredValue::Link { type_name, id }
        }
    }
}

fn to_field(value: &StoredValue) -> FieldValue {
    match value {
        StoredValue::Null => FieldValue::Null,
        StoredValue::Bool(v) => FieldValue::Bool(*v),
        StoredValue::Int(v) => FieldValue::Int(*v),
        StoredValue::Text(v) => FieldValue::Text(v.clone()),
        StoredValue::Json(v) => FieldValue::Json(v.clone()),
        StoredValue::Link { type_name, id } => FieldValue::Link(DocLink::Saved {
            type_name: type_name.clone(),
            id: *id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> FieldValue {
        FieldValue::Text(value.to_string())
    }

    fn fields(entries: &[(&str, FieldValue)]) -> BTreeMap<String, FieldValue> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_add_commits_with_durable_id() {
        let store = MemoryDocumentStore::new();
        let mut session = store.open_session();

        session.begin().unwrap();
        let doc = session
            .add("bucket", fields(&[("repository_name", text("releases"))]))
            .unwrap();
        assert!(doc.location().is_provisional());

        session.commit().unwrap();
        assert!(!doc.location().is_provisional());
        assert_eq!(doc.version(), RecordVersion::Committed(1));
        assert_eq!(store.record_count("bucket"), 1);
    }

    #[test]
    fn test_uncommitted_add_invisible_to_other_sessions() {
        let store = MemoryDocumentStore::new();
        let mut writer = store.open_session();
        let mut reader = store.open_session();

        writer.begin().unwrap();
        writer
            .add("bucket", fields(&[("repository_name", text("releases"))]))
            .unwrap();

        assert!(reader.browse("bucket").unwrap().is_empty());
        writer.commit().unwrap();
        assert_eq!(reader.browse("bucket").unwrap().len(), 1);
    }

    #[test]
    fn test_read_your_writes() {
        let store = MemoryDocumentStore::new();
        let mut session = store.open_session();

        session.begin().unwrap();
        session
            .add("asset", fields(&[("name", text("lib.jar"))]))
            .unwrap();
        assert_eq!(session.browse("asset").unwrap().len(), 1);
        assert!(session
            .find_first(
                "asset",
                &DocumentFilter::any().field("name", text("lib.jar"))
            )
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_concurrent_update_conflicts() {
        let store = MemoryDocumentStore::new();

        let mut setup = store.open_session();
        setup.begin().unwrap();
        let doc = setup
            .add("asset", fields(&[("name", text("lib.jar"))]))
            .unwrap();
        setup.commit().unwrap();
        let id = match doc.location() {
            RecordLocation::Committed(id) => id,
            _ => unreachable!(),
        };

        let mut first = store.open_session();
        let mut second = store.open_session();
        first.begin().unwrap();
        second.begin().unwrap();
        let doc_a = first.get("asset", id).unwrap().unwrap();
        let doc_b = second.get("asset", id).unwrap().unwrap();

        first
            .update(&doc_a, fields(&[("name", text("one.jar"))]))
            .unwrap();
        first.commit().unwrap();

        second
            .update(&doc_b, fields(&[("name", text("two.jar"))]))
            .unwrap();
        let err = second.commit().unwrap_err();
        assert!(err.is_conflict());

        // The conflicting session stayed active; it can roll back cleanly.
        second.rollback().unwrap();
    }

    #[test]
    fn test_delete_of_concurrently_updated_record_conflicts() {
        let store = MemoryDocumentStore::new();

        let mut setup = store.open_session();
        setup.begin().unwrap();
        let doc = setup.add("asset", fields(&[("name", text("a"))])).unwrap();
        setup.commit().unwrap();
        let id = match doc.location() {
            RecordLocation::Committed(id) => id,
            _ => unreachable!(),
        };

        let mut deleter = store.open_session();
        deleter.begin().unwrap();
        let doomed = deleter.get("asset", id).unwrap().unwrap();
        deleter.delete(&doomed).unwrap();

        let mut updater = store.open_session();
        updater.begin().unwrap();
        let target = updater.get("asset", id).unwrap().unwrap();
        updater
            .update(&target, fields(&[("name", text("b"))]))
            .unwrap();
        updater.commit().unwrap();

        assert!(deleter.commit().unwrap_err().is_conflict());
    }

    #[test]
    fn test_rollback_reverts_staged_state() {
        let store = MemoryDocumentStore::new();

        let mut setup = store.open_session();
        setup.begin().unwrap();
        let doc = setup.add("asset", fields(&[("name", text("a"))])).unwrap();
        setup.commit().unwrap();

        setup.begin().unwrap();
        setup
            .update(&doc, fields(&[("name", text("changed"))]))
            .unwrap();
        setup.add("asset", fields(&[("name", text("extra"))])).unwrap();
        assert_eq!(setup.browse("asset").unwrap().len(), 2);

        setup.rollback().unwrap();
        assert_eq!(doc.field("name"), Some(text("a")));
        assert_eq!(setup.browse("asset").unwrap().len(), 1);
        assert_eq!(store.record_count("asset"), 1);
    }

    #[test]
    fn test_pending_link_materialized_at_commit() {
        let store = MemoryDocumentStore::new();
        let mut session = store.open_session();

        session.begin().unwrap();
        let component = session
            .add("component", fields(&[("name", text("lib"))]))
            .unwrap();
        let asset = session
            .add(
                "asset",
                fields(&[
                    ("name", text("lib.jar")),
                    (
                        "component",
                        FieldValue::Link(DocLink::Pending(component.clone())),
                    ),
                ]),
            )
            .unwrap();
        session.commit().unwrap();

        let component_id = match component.location() {
            RecordLocation::Committed(id) => id,
            _ => unreachable!(),
        };

        // A fresh session observes the saved link.
        let mut reader = store.open_session();
        let found = reader
            .find_first(
                "asset",
                &DocumentFilter::any().field(
                    "component",
                    FieldValue::Link(DocLink::Saved {
                        type_name: "component".to_string(),
                        id: component_id,
                    }),
                ),
            )
            .unwrap()
            .unwrap();
        assert!(found
            .with_fields(|f| f.get("name").cloned())
            .is_some());
        drop(asset);
    }

    #[test]
    fn test_commit_rejects_link_outside_transaction() {
        let store = MemoryDocumentStore::new();
        let mut session = store.open_session();

        let stranger = DocumentHandle::provisional("component", 99, BTreeMap::new());
        session.begin().unwrap();
        session
            .add(
                "asset",
                fields(&[("component", FieldValue::Link(DocLink::Pending(stranger)))]),
            )
            .unwrap();
        assert!(matches!(
            session.commit(),
            Err(MetadataError::IllegalState(_))
        ));
    }

    #[test]
    fn test_begin_twice_fails() {
        let store = MemoryDocumentStore::new();
        let mut session = store.open_session();
        session.begin().unwrap();
        assert!(session.begin().is_err());
    }

    #[test]
    fn test_close_discards_active_transaction() {
        let store = MemoryDocumentStore::new();
        let mut session = store.open_session();
        session.begin().unwrap();
        session.add("asset", BTreeMap::new()).unwrap();
        session.close();

        assert_eq!(store.record_count("asset"), 0);
        assert!(session.begin().is_err());
    }
}
