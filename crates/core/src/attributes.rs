//! Nested attribute bags.
//!
//! Buckets, components and assets each carry a free-form attribute map.
//! Child maps group related keys (for example the `checksum` child on an
//! asset holds one entry per computed hash algorithm).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A nested, string-keyed attribute map.
///
/// Values are arbitrary JSON; child maps are created on demand and empty
/// children are treated as absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(Map<String, Value>);

impl Attributes {
    /// Create an empty attribute map.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Get a top-level attribute value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a top-level attribute value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Remove a top-level attribute, returning the previous value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Check whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of top-level entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Get a child map, if present and actually a map.
    pub fn child(&self, name: &str) -> Option<ChildRef<'_>> {
        match self.0.get(name) {
            Some(Value::Object(map)) => Some(ChildRef(map)),
            _ => None,
        }
    }

    /// Get a mutable child map, creating it if absent.
    ///
    /// A non-map value under `name` is replaced by an empty map.
    pub fn child_mut(&mut self, name: &str) -> ChildMut<'_> {
        let entry = self
            .0
            .entry(name.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry {
            Value::Object(map) => ChildMut(map),
            _ => unreachable!("child entry was just set to an object"),
        }
    }

    /// Iterate over top-level entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// View the backing JSON map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Build from a backing JSON map.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Borrowed view of a child attribute map.
pub struct ChildRef<'a>(&'a Map<String, Value>);

impl ChildRef<'_> {
    /// Get an entry of the child map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Entry as a string slice, if it is a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Check whether the child map has no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over entries of the child map.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// Mutable view of a child attribute map.
pub struct ChildMut<'a>(&'a mut Map<String, Value>);

impl ChildMut<'_> {
    /// Set an entry of the child map.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Remove an entry of the child map.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get_roundtrip() {
        let mut attrs = Attributes::new();
        attrs.set("format", "maven2");
        attrs.set("size", 42);

        assert_eq!(attrs.get("format"), Some(&json!("maven2")));
        assert_eq!(attrs.get("size"), Some(&json!(42)));
        assert_eq!(attrs.len(), 2);
    }

    #[test]
    fn test_child_created_on_demand() {
        let mut attrs = Attributes::new();
        assert!(attrs.child("checksum").is_none());

        attrs.child_mut("checksum").set("sha256", "abc");
        let child = attrs.child("checksum").unwrap();
        assert_eq!(child.get_str("sha256"), Some("abc"));
    }

    #[test]
    fn test_child_replaces_non_map_value() {
        let mut attrs = Attributes::new();
        attrs.set("checksum", "not-a-map");
        attrs.child_mut("checksum").set("sha1", "def");

        assert_eq!(
            attrs.child("checksum").unwrap().get_str("sha1"),
            Some("def")
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut attrs = Attributes::new();
        attrs.child_mut("checksum").set("sha256", "abc");
        attrs.set("declared", true);

        let text = serde_json::to_string(&attrs).unwrap();
        let back: Attributes = serde_json::from_str(&text).unwrap();
        assert_eq!(attrs, back);
    }
}
