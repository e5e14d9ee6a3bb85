//! Live mutable document handles.
//!
//! A document's record location and version are assigned by the store when
//! the owning session commits; until then both are provisional. Handles
//! stay attached to the same in-memory state across the commit, which is
//! how attached entity identity observes the final values.

use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Durable record identifier within one document type.
pub type RecordId = u64;

/// Where a document's record lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordLocation {
    /// Session-local placeholder; reassigned at commit.
    Provisional(u64),
    /// Durable location assigned by the store at commit.
    Committed(RecordId),
}

impl RecordLocation {
    /// Whether the record has not been committed yet.
    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional(_))
    }
}

/// A document's optimistic-concurrency version token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordVersion {
    /// Not committed yet; no token exists.
    Provisional,
    /// Committed token, bumped by the store on every committed update.
    Committed(u64),
}

impl RecordVersion {
    /// Whether no committed token exists yet.
    pub fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional)
    }
}

/// A single document field value.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    /// Free-form JSON, used for attribute bags.
    Json(Value),
    /// Reference to another document.
    Link(DocLink),
}

impl FieldValue {
    /// Text content, if this is a text field.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content, if this is an integer field.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// JSON content, if this is a JSON field.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Link content, if this is a link field.
    pub fn as_link(&self) -> Option<&DocLink> {
        match self {
            Self::Link(link) => Some(link),
            _ => None,
        }
    }
}

/// A reference from one document to another.
///
/// Links to documents that have not committed yet stay pending; the session
/// materializes them into `(type, record id)` form at commit, once the
/// target's durable location exists.
#[derive(Clone)]
pub enum DocLink {
    /// Link to a document still provisional in the same session.
    Pending(DocumentHandle),
    /// Link to a committed record.
    Saved { type_name: String, id: RecordId },
}

impl DocLink {
    /// The committed target, if the link can be resolved.
    pub fn resolved(&self) -> Option<(String, RecordId)> {
        match self {
            Self::Saved { type_name, id } => Some((type_name.clone(), *id)),
            Self::Pending(handle) => match handle.location() {
                RecordLocation::Committed(id) => Some((handle.type_name(), id)),
                RecordLocation::Provisional(_) => None,
            },
        }
    }
}

impl PartialEq for DocLink {
    fn eq(&self, other: &Self) -> bool {
        match (self.resolved(), other.resolved()) {
            (Some(a), Some(b)) => a == b,
            _ => match (self, other) {
                (Self::Pending(a), Self::Pending(b)) => a.ptr_eq(b),
                _ => false,
            },
        }
    }
}

impl fmt::Debug for DocLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resolved() {
            Some((type_name, id)) => write!(f, "DocLink({type_name}:{id})"),
            None => write!(f, "DocLink(<pending>)"),
        }
    }
}

struct DocumentState {
    type_name: String,
    location: RecordLocation,
    version: RecordVersion,
    fields: BTreeMap<String, FieldValue>,
}

/// Shared handle to a live document.
///
/// Handles are session-local (`Rc`-based, not `Send`); sessions hand out
/// one handle per record so that staged updates are visible through every
/// reference to it.
#[derive(Clone)]
pub struct DocumentHandle(Rc<RefCell<DocumentState>>);

impl DocumentHandle {
    /// Create a provisional document of the given type.
    pub fn provisional(
        type_name: impl Into<String>,
        placeholder: u64,
        fields: BTreeMap<String, FieldValue>,
    ) -> Self {
        Self(Rc::new(RefCell::new(DocumentState {
            type_name: type_name.into(),
            location: RecordLocation::Provisional(placeholder),
            version: RecordVersion::Provisional,
            fields,
        })))
    }

    /// Create a handle over a committed record.
    pub fn committed(
        type_name: impl Into<String>,
        id: RecordId,
        version: u64,
        fields: BTreeMap<String, FieldValue>,
    ) -> Self {
        Self(Rc::new(RefCell::new(DocumentState {
            type_name: type_name.into(),
            location: RecordLocation::Committed(id),
            version: RecordVersion::Committed(version),
            fields,
        })))
    }

    /// The document's type name.
    pub fn type_name(&self) -> String {
        self.0.borrow().type_name.clone()
    }

    /// The current record location.
    pub fn location(&self) -> RecordLocation {
        self.0.borrow().location
    }

    /// The current version token.
    pub fn version(&self) -> RecordVersion {
        self.0.borrow().version
    }

    /// Clone of a single field value.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        self.0.borrow().fields.get(name).cloned()
    }

    /// Run a closure over the full field map.
    pub fn with_fields<R>(&self, f: impl FnOnce(&BTreeMap<String, FieldValue>) -> R) -> R {
        f(&self.0.borrow().fields)
    }

    /// Replace the full field map.
    pub fn set_fields(&self, fields: BTreeMap<String, FieldValue>) {
        self.0.borrow_mut().fields = fields;
    }

    /// Promote the document to a committed location.
    pub fn set_committed(&self, id: RecordId, version: u64) {
        let mut state = self.0.borrow_mut();
        state.location = RecordLocation::Committed(id);
        state.version = RecordVersion::Committed(version);
    }

    /// Bump the committed version token.
    pub fn set_version(&self, version: u64) {
        self.0.borrow_mut().version = RecordVersion::Committed(version);
    }

    /// Whether two handles refer to the same live document.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.borrow();
        write!(
            f,
            "DocumentHandle({} {:?} {:?})",
            state.type_name, state.location, state.version
        )
    }
}

/// Field-equality conjunction used for lookups and counting.
///
/// A deliberately small query surface: the storage layer only ever needs
/// exact matches on a handful of fields.
#[derive(Clone, Debug, Default)]
pub struct DocumentFilter {
    conditions: Vec<(String, FieldValue)>,
}

impl DocumentFilter {
    /// A filter matching every document.
    pub fn any() -> Self {
        Self::default()
    }

    /// Require a field to equal a value.
    pub fn field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.conditions.push((name.into(), value));
        self
    }

    /// Whether the given field map satisfies every condition.
    pub fn matches(&self, fields: &BTreeMap<String, FieldValue>) -> bool {
        self.conditions
            .iter()
            .all(|(name, expected)| fields.get(name) == Some(expected))
    }

    /// Whether the filter has no conditions.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(entries: &[(&str, FieldValue)]) -> BTreeMap<String, FieldValue> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_provisional_then_committed() {
        let doc = DocumentHandle::provisional("asset", 1, BTreeMap::new());
        assert!(doc.location().is_provisional());
        assert!(doc.version().is_provisional());

        doc.set_committed(7, 1);
        assert_eq!(doc.location(), RecordLocation::Committed(7));
        assert_eq!(doc.version(), RecordVersion::Committed(1));
    }

    #[test]
    fn test_pending_link_resolves_after_commit() {
        let target = DocumentHandle::provisional("component", 1, BTreeMap::new());
        let link = DocLink::Pending(target.clone());
        assert!(link.resolved().is_none());

        target.set_committed(3, 1);
        assert_eq!(link.resolved(), Some(("component".to_string(), 3)));
        assert_eq!(
            link,
            DocLink::Saved {
                type_name: "component".to_string(),
                id: 3
            }
        );
    }

    #[test]
    fn test_pending_links_compare_by_identity() {
        let a = DocumentHandle::provisional("component", 1, BTreeMap::new());
        let b = DocumentHandle::provisional("component", 2, BTreeMap::new());

        assert_eq!(DocLink::Pending(a.clone()), DocLink::Pending(a.clone()));
        assert_ne!(DocLink::Pending(a), DocLink::Pending(b));
    }

    #[test]
    fn test_filter_matching() {
        let doc_fields = fields(&[
            ("name", FieldValue::Text("lib.jar".to_string())),
            ("size", FieldValue::Int(10)),
        ]);

        assert!(DocumentFilter::any().matches(&doc_fields));
        assert!(DocumentFilter::any()
            .field("name", FieldValue::Text("lib.jar".to_string()))
            .matches(&doc_fields));
        assert!(!DocumentFilter::any()
            .field("name", FieldValue::Text("other.jar".to_string()))
            .matches(&doc_fields));
        assert!(!DocumentFilter::any()
            .field("missing", FieldValue::Null)
            .matches(&doc_fields));
    }
}
