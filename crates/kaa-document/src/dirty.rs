//! Dirty tracking for locally edited paths
//!
//! A [`DirtyMask`] mirrors the shape of a document and marks the leaves that
//! changed since the last load or save. Each leaf remembers the edit sequence
//! number that dirtied it, so a save can clear exactly the edits it carried
//! while edits made during the save stay dirty.

use std::collections::BTreeMap;

use serde_json::{Map, Value as JsonValue};

use crate::path::{segment_index, ConfigPath};

#[derive(Debug, Clone, PartialEq, Eq)]
enum DirtyNode {
    /// Whole subtree dirty, last touched by this edit sequence
    Leaf(u64),
    Branch(BTreeMap<String, DirtyNode>),
}

/// Mirror tree of modified document paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyMask {
    root: Option<DirtyNode>,
}

impl DirtyMask {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mask from a boolean mirror tree
    ///
    /// `true` marks a leaf; `false` and other scalars are ignored. Objects and
    /// arrays descend (array positions become numeric segments).
    #[must_use]
    pub fn from_flags(flags: &JsonValue) -> Self {
        Self {
            root: node_from_flags(flags),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Mark `path` as modified by edit `seq`
    ///
    /// A dirty ancestor absorbs the mark; marking an ancestor collapses any
    /// dirty descendants into one leaf.
    pub fn mark(&mut self, path: &ConfigPath, seq: u64) {
        match &mut self.root {
            Some(node) => mark_node(node, path.segments(), seq),
            None => {
                let mut node = DirtyNode::Branch(BTreeMap::new());
                mark_node(&mut node, path.segments(), seq);
                self.root = Some(node);
            }
        }
    }

    /// Whether `path`, one of its ancestors, or one of its descendants is dirty
    #[must_use]
    pub fn touches(&self, path: &ConfigPath) -> bool {
        self.node_at(path).is_some()
    }

    /// Whether `path` itself or one of its ancestors is a dirty leaf
    #[must_use]
    pub fn contains(&self, path: &ConfigPath) -> bool {
        matches!(self.node_at(path), Some(DirtyNode::Leaf(_)))
    }

    /// Node at `path`, or the dirty leaf that covers it
    fn node_at(&self, path: &ConfigPath) -> Option<&DirtyNode> {
        let mut cur = self.root.as_ref()?;
        for seg in path.segments() {
            match cur {
                DirtyNode::Leaf(_) => return Some(cur),
                DirtyNode::Branch(children) => cur = children.get(seg)?,
            }
        }
        Some(cur)
    }

    /// Highest edit sequence recorded in the mask
    #[must_use]
    pub fn latest_seq(&self) -> Option<u64> {
        self.root.as_ref().and_then(max_seq)
    }

    /// Paths of all dirty leaves, in key order
    #[must_use]
    pub fn leaf_paths(&self) -> Vec<ConfigPath> {
        let mut out = Vec::new();
        if let Some(node) = &self.root {
            collect_leaves(node, &mut Vec::new(), &mut out);
        }
        out
    }

    pub fn clear(&mut self) {
        self.root = None;
    }

    /// Drop leaves dirtied at or before `seq`, pruning emptied branches
    pub fn clear_through(&mut self, seq: u64) {
        if let Some(node) = &mut self.root {
            if !retain_after(node, seq) {
                self.root = None;
            }
        }
    }

    /// Subset of `values` reachable through dirty leaves
    ///
    /// Object and array shape is preserved. Returns `None` when nothing is
    /// dirty or no dirty leaf exists in `values`. Arrays come back dense up to
    /// the highest extracted index, with `null` in the gaps.
    #[must_use]
    pub fn extract(&self, values: &JsonValue) -> Option<JsonValue> {
        extract_node(self.root.as_ref()?, Some(values))
    }
}

fn node_from_flags(flags: &JsonValue) -> Option<DirtyNode> {
    let children: BTreeMap<String, DirtyNode> = match flags {
        JsonValue::Bool(true) => return Some(DirtyNode::Leaf(0)),
        JsonValue::Object(map) => map
            .iter()
            .filter_map(|(k, v)| node_from_flags(v).map(|n| (k.clone(), n)))
            .collect(),
        JsonValue::Array(arr) => arr
            .iter()
            .enumerate()
            .filter_map(|(i, v)| node_from_flags(v).map(|n| (i.to_string(), n)))
            .collect(),
        _ => return None,
    };
    (!children.is_empty()).then_some(DirtyNode::Branch(children))
}

fn mark_node(node: &mut DirtyNode, segments: &[String], seq: u64) {
    if let DirtyNode::Leaf(s) = node {
        *s = (*s).max(seq);
        return;
    }
    let Some((head, rest)) = segments.split_first() else {
        *node = DirtyNode::Leaf(seq);
        return;
    };
    if let DirtyNode::Branch(children) = node {
        let child = children
            .entry(head.clone())
            .or_insert_with(|| DirtyNode::Branch(BTreeMap::new()));
        mark_node(child, rest, seq);
    }
}

fn max_seq(node: &DirtyNode) -> Option<u64> {
    match node {
        DirtyNode::Leaf(s) => Some(*s),
        DirtyNode::Branch(children) => children.values().filter_map(max_seq).max(),
    }
}

fn collect_leaves(node: &DirtyNode, prefix: &mut Vec<String>, out: &mut Vec<ConfigPath>) {
    match node {
        DirtyNode::Leaf(_) => out.push(ConfigPath::new(prefix.clone())),
        DirtyNode::Branch(children) => {
            for (key, child) in children {
                prefix.push(key.clone());
                collect_leaves(child, prefix, out);
                prefix.pop();
            }
        }
    }
}

/// Returns whether the node still holds anything dirty
fn retain_after(node: &mut DirtyNode, seq: u64) -> bool {
    match node {
        DirtyNode::Leaf(s) => *s > seq,
        DirtyNode::Branch(children) => {
            children.retain(|_, child| retain_after(child, seq));
            !children.is_empty()
        }
    }
}

fn extract_node(node: &DirtyNode, value: Option<&JsonValue>) -> Option<JsonValue> {
    let children = match node {
        DirtyNode::Leaf(_) => return value.cloned(),
        DirtyNode::Branch(children) => children,
    };

    match value? {
        JsonValue::Object(map) => {
            let picked: Map<String, JsonValue> = children
                .iter()
                .filter_map(|(key, child)| extract_node(child, map.get(key)).map(|v| (key.clone(), v)))
                .collect();
            (!picked.is_empty()).then_some(JsonValue::Object(picked))
        }
        JsonValue::Array(arr) => {
            let picked: BTreeMap<usize, JsonValue> = children
                .iter()
                .filter_map(|(key, child)| {
                    let idx = segment_index(key)?;
                    extract_node(child, arr.get(idx)).map(|v| (idx, v))
                })
                .collect();
            let len = picked.keys().next_back()? + 1;
            let mut dense = vec![JsonValue::Null; len];
            for (idx, v) in picked {
                dense[idx] = v;
            }
            Some(JsonValue::Array(dense))
        }
        _ => None,
    }
}
