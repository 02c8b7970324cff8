use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Map(NestedAttributesMap),
}
impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}
impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}
impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}
impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

/// Tree of named attributes attached to components and assets. Children are themselves maps, e.g.
///  `checksum.sha1` is the `sha1` entry of the `checksum` child.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NestedAttributesMap {
    entries: BTreeMap<String, AttributeValue>,
}
impl NestedAttributesMap {
    pub fn new() -> NestedAttributesMap {
        Default::default()
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.entries.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(AttributeValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.entries.get(key) {
            Some(AttributeValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<AttributeValue>) {
        self.entries.insert(key.to_string(), value.into());
    }

    /// sets the value if present, removes the entry otherwise
    pub fn set_opt<V: Into<AttributeValue>>(&mut self, key: &str, value: Option<V>) {
        match value {
            Some(v) => self.set(key, v),
            None => {
                self.remove(key);
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<AttributeValue> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn child(&self, key: &str) -> Option<&NestedAttributesMap> {
        match self.entries.get(key) {
            Some(AttributeValue::Map(m)) => Some(m),
            _ => None,
        }
    }

    /// The child map, created if missing. A non-map value under the key is replaced.
    pub fn child_mut(&mut self, key: &str) -> &mut NestedAttributesMap {
        let entry = self.entries.entry(key.to_string())
            .or_insert_with(|| AttributeValue::Map(NestedAttributesMap::new()));
        if !matches!(entry, AttributeValue::Map(_)) {
            *entry = AttributeValue::Map(NestedAttributesMap::new());
        }
        match entry {
            AttributeValue::Map(m) => m,
            _ => unreachable!("entry was just set to a map"),
        }
    }

    /// Text value at a dot separated path, e.g. `maven2.groupId`
    pub fn get_path(&self, path: &str) -> Option<&str> {
        match path.split_once('.') {
            None => self.get_str(path),
            Some((first, rest)) => self.child(first)?.get_path(rest),
        }
    }
}
