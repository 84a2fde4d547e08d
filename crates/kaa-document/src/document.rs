//! Configuration document
//!
//! Schema-less JSON tree with dot-path get/set and deep merge.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::path::{segment_index, ConfigPath};

/// Server-owned configuration tree, cached locally
///
/// The client treats the tree as opaque: it never adds fields except through
/// [`set_at`](Self::set_at) on behalf of an edit, and server responses
/// replace it wholesale. Cloning is a deep copy, so snapshots never alias.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigDocument {
    value: JsonValue,
}

impl ConfigDocument {
    /// Create from JSON value
    #[inline]
    #[must_use]
    pub fn new(value: JsonValue) -> Self {
        Self { value }
    }

    /// Empty object document
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::new(JsonValue::Object(Map::new()))
    }

    /// Parse from JSON string
    ///
    /// # Errors
    /// Returns error if JSON is invalid
    #[inline]
    pub fn from_json(json: &str) -> Result<Self, DocumentError> {
        let value: JsonValue = serde_json::from_str(json)?;
        Ok(Self::new(value))
    }

    /// Parse from YAML string
    ///
    /// # Errors
    /// Returns error if YAML is invalid
    pub fn from_yaml(yaml: &str) -> Result<Self, DocumentError> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Ok(Self::new(value))
    }

    #[inline]
    #[must_use]
    pub fn value(&self) -> &JsonValue {
        &self.value
    }

    #[inline]
    #[must_use]
    pub fn into_value(self) -> JsonValue {
        self.value
    }

    /// Convert to typed struct
    ///
    /// # Errors
    /// Returns error if value doesn't match type
    #[inline]
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, DocumentError> {
        Ok(T::deserialize(&self.value)?)
    }

    /// Create from typed struct
    ///
    /// # Errors
    /// Returns error if the value cannot be represented as JSON
    #[inline]
    pub fn from_typed<T: Serialize>(value: &T) -> Result<Self, DocumentError> {
        Ok(Self::new(serde_json::to_value(value)?))
    }

    /// Read the value at `path`
    ///
    /// Objects are indexed by key, arrays by numeric segment.
    #[must_use]
    pub fn get_at(&self, path: &ConfigPath) -> Option<&JsonValue> {
        lookup(&self.value, path.segments())
    }

    /// Read the value at `path`, falling back to `default` when the path is
    /// absent or holds `null`
    #[must_use]
    pub fn get_or(&self, path: &ConfigPath, default: JsonValue) -> JsonValue {
        match self.get_at(path) {
            Some(JsonValue::Null) | None => default,
            Some(v) => v.clone(),
        }
    }

    /// Typed read at `path`; `None` when absent, null, or of another shape
    #[must_use]
    pub fn get_typed<T: DeserializeOwned>(&self, path: &ConfigPath) -> Option<T> {
        match self.get_at(path)? {
            JsonValue::Null => None,
            v => T::deserialize(v).ok(),
        }
    }

    /// Write `new_value` at `path`
    ///
    /// Missing intermediates are created as objects; an intermediate holding
    /// a scalar or `null` is replaced by an object. Inside arrays, an index
    /// equal to the length appends.
    ///
    /// # Errors
    /// Returns error if an array index is past the end
    pub fn set_at(&mut self, path: &ConfigPath, new_value: JsonValue) -> Result<(), DocumentError> {
        assign(&mut self.value, path.segments(), new_value, path)
    }

    /// Remove the value at `path`, returning it
    pub fn remove_at(&mut self, path: &ConfigPath) -> Option<JsonValue> {
        let (last, parents) = path.segments().split_last()?;
        let parent = lookup_mut(&mut self.value, parents)?;
        match parent {
            JsonValue::Object(map) => map.remove(last),
            JsonValue::Array(arr) => {
                let idx = segment_index(last).filter(|i| *i < arr.len())?;
                Some(arr.remove(idx))
            }
            _ => None,
        }
    }

    /// Deep-merge `patch` into this document
    ///
    /// Objects merge key by key and arrays merge index by index, so a dirty
    /// patch such as `{"list": [null, 9]}` only touches `list.1`. A `null`
    /// anywhere in the patch means "unchanged" and is skipped; elements past
    /// the end of a patch array are kept. Any other value replaces what was
    /// there. This is not RFC 7396: nulls never delete.
    pub fn merge_patch(&mut self, patch: &JsonValue) {
        merge_json(&mut self.value, patch);
    }

    /// Serialize to pretty JSON
    ///
    /// # Errors
    /// Returns error if serialization fails
    #[inline]
    pub fn to_json(&self) -> Result<String, DocumentError> {
        Ok(serde_json::to_string_pretty(&self.value)?)
    }

    /// Serialize to YAML
    ///
    /// # Errors
    /// Returns error if serialization fails
    #[inline]
    pub fn to_yaml(&self) -> Result<String, DocumentError> {
        Ok(serde_yaml::to_string(&self.value)?)
    }
}

impl From<JsonValue> for ConfigDocument {
    fn from(value: JsonValue) -> Self {
        Self::new(value)
    }
}

impl From<ConfigDocument> for JsonValue {
    fn from(doc: ConfigDocument) -> Self {
        doc.value
    }
}

/// Document errors
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid YAML: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),

    #[error("index {index} out of bounds at '{path}' (array length {len})")]
    IndexOutOfBounds { path: String, index: String, len: usize },

    #[error(transparent)]
    Path(#[from] crate::path::PathError),
}

pub(crate) fn lookup<'a>(mut cur: &'a JsonValue, segments: &[String]) -> Option<&'a JsonValue> {
    for seg in segments {
        cur = match cur {
            JsonValue::Object(map) => map.get(seg)?,
            JsonValue::Array(arr) => arr.get(segment_index(seg)?)?,
            _ => return None,
        };
    }
    Some(cur)
}

fn lookup_mut<'a>(mut cur: &'a mut JsonValue, segments: &[String]) -> Option<&'a mut JsonValue> {
    for seg in segments {
        cur = match cur {
            JsonValue::Object(map) => map.get_mut(seg)?,
            JsonValue::Array(arr) => arr.get_mut(segment_index(seg)?)?,
            _ => return None,
        };
    }
    Some(cur)
}

fn assign(
    cur: &mut JsonValue,
    segments: &[String],
    new_value: JsonValue,
    full: &ConfigPath,
) -> Result<(), DocumentError> {
    let Some((head, rest)) = segments.split_first() else {
        *cur = new_value;
        return Ok(());
    };

    if let JsonValue::Array(arr) = cur {
        if let Some(idx) = segment_index(head) {
            if idx == arr.len() {
                arr.push(if rest.is_empty() {
                    JsonValue::Null
                } else {
                    JsonValue::Object(Map::new())
                });
            }
            let len = arr.len();
            let slot = arr.get_mut(idx).ok_or_else(|| DocumentError::IndexOutOfBounds {
                path: full.to_string(),
                index: head.clone(),
                len,
            })?;
            if !rest.is_empty() && !is_container(slot) {
                *slot = JsonValue::Object(Map::new());
            }
            return assign(slot, rest, new_value, full);
        }
    }

    if !cur.is_object() {
        // Arrays addressed by a non-numeric key are replaced, as are scalars.
        *cur = JsonValue::Object(Map::new());
    }
    let JsonValue::Object(map) = cur else {
        unreachable!("just replaced with an object");
    };

    if rest.is_empty() {
        map.insert(head.clone(), new_value);
        return Ok(());
    }

    let slot = map
        .entry(head.clone())
        .or_insert_with(|| JsonValue::Object(Map::new()));
    if !is_container(slot) {
        *slot = JsonValue::Object(Map::new());
    }
    assign(slot, rest, new_value, full)
}

#[inline]
fn is_container(v: &JsonValue) -> bool {
    v.is_object() || v.is_array()
}

fn merge_json(target: &mut JsonValue, patch: &JsonValue) {
    match (target, patch) {
        (_, JsonValue::Null) => {}
        (JsonValue::Object(t), JsonValue::Object(p)) => {
            for (key, p_val) in p {
                if p_val.is_null() {
                    continue;
                }
                match t.get_mut(key) {
                    Some(t_val) => merge_json(t_val, p_val),
                    None => {
                        t.insert(key.clone(), p_val.clone());
                    }
                }
            }
        }
        (JsonValue::Array(t), JsonValue::Array(p)) => {
            for (idx, p_val) in p.iter().enumerate() {
                if p_val.is_null() {
                    continue;
                }
                match t.get_mut(idx) {
                    Some(t_val) => merge_json(t_val, p_val),
                    None => {
                        t.resize(idx, JsonValue::Null);
                        t.push(p_val.clone());
                    }
                }
            }
        }
        (t, p) => *t = p.clone(),
    }
}
