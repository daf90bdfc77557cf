//! In-memory key/value tree layered on top of [`crate::hive::Hive`].
//!
//! A [`Node`] starts out **lazy**: it knows its own name and origin cell
//! offset but hasn't pulled its children or values off the reader yet.
//! The first call that needs them materializes the node in place. Once
//! materialized, mutation is just vector surgery plus a dirty flag;
//! [`Tree::mark_dirty_path`] is the only thing that walks more than one
//! level, and it stops as soon as a level is already marked.
//!
//! Value data mirrors the same laziness: [`ValueData`] either borrows its
//! bytes through the originating [`Hive`] (re-read on demand, never
//! copied until touched) or owns a `Vec<u8>` once something sets it.

use crate::cell::value::ValueData as RawValueData;
use crate::cell::ValueType;
use crate::error::{HiveError, Result};
use crate::hive::{Hive, NodeId, ValueId};
use std::sync::Arc;

/// Splits a backslash-separated path into its components, dropping empty
/// segments so a leading/trailing/doubled separator doesn't create a
/// phantom path element.
fn split_path(path: &str) -> Vec<&str> {
    path.split('\\').filter(|s| !s.is_empty()).collect()
}

/// Where a node or value's unmaterialized data lives.
#[derive(Clone)]
struct Origin {
    hive: Arc<Hive>,
    offset: u32,
}

/// A registry value inside a [`Tree`].
pub struct Value {
    name: String,
    value_type: ValueType,
    data: ValueStorage,
    dirty: bool,
}

// Hand-written rather than derived: `#[derive(Clone)]` would add a
// `Hive: Clone` bound for the `Arc<Hive>` field even though `Arc<T>` is
// `Clone` for any `T`.
impl Clone for Value {
    fn clone(&self) -> Self {
        Value {
            name: self.name.clone(),
            value_type: self.value_type,
            data: self.data.clone(),
            dirty: self.dirty,
        }
    }
}

enum ValueStorage {
    /// Not yet read; `value_id` is re-resolved against `hive` on demand.
    Lazy { hive: Arc<Hive>, value_id: ValueId },
    Owned(RawValueData),
}

impl Clone for ValueStorage {
    fn clone(&self) -> Self {
        match self {
            ValueStorage::Lazy { hive, value_id } => ValueStorage::Lazy {
                hive: hive.clone(),
                value_id: *value_id,
            },
            ValueStorage::Owned(data) => ValueStorage::Owned(data.clone()),
        }
    }
}

impl Value {
    fn from_hive(hive: Arc<Hive>, id: ValueId) -> Result<Self> {
        let stat = hive.stat_value(id)?;
        Ok(Value {
            name: stat.name,
            value_type: stat.data_type,
            data: ValueStorage::Lazy { hive, value_id: id },
            dirty: false,
        })
    }

    /// Builds a fresh value not backed by any hive, already dirty.
    pub fn new(name: &str, data: RawValueData) -> Self {
        let value_type = data.value_type();
        Value {
            name: name.to_string(),
            value_type,
            data: ValueStorage::Owned(data),
            dirty: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Reads the typed payload, resolving lazily through the hive on
    /// first touch. This does not promote storage to owned — repeated
    /// reads of an unmodified value keep re-deriving from the base
    /// buffer rather than caching a copy.
    pub fn data(&self) -> Result<RawValueData> {
        match &self.data {
            ValueStorage::Owned(data) => Ok(data.clone()),
            ValueStorage::Lazy { hive, value_id } => hive.value_data(*value_id),
        }
    }

    /// Overwrites this value's payload, promoting storage to owned and
    /// marking it dirty.
    pub fn set_data(&mut self, data: RawValueData) {
        self.value_type = data.value_type();
        self.data = ValueStorage::Owned(data);
        self.dirty = true;
    }
}

enum Children {
    Lazy,
    Loaded(Vec<Node>),
}

enum Values {
    Lazy,
    Loaded(Vec<Value>),
}

/// A registry key inside a [`Tree`]. Lazily materializes its children
/// and values from the backing [`Hive`] the first time either is
/// touched.
pub struct Node {
    name: String,
    origin: Option<Origin>,
    dirty: bool,
    last_written: u64,
    children: Children,
    values: Values,
}

impl Node {
    fn from_hive(hive: Arc<Hive>, id: NodeId) -> Result<Self> {
        let stat = hive.stat_key(id)?;
        Ok(Node {
            name: stat.name,
            origin: Some(Origin { hive, offset: id.0 }),
            dirty: false,
            last_written: stat.last_written,
            children: Children::Lazy,
            values: Values::Lazy,
        })
    }

    /// Builds a fresh, empty, dirty node not backed by any hive.
    pub fn new_empty(name: &str) -> Self {
        Node {
            name: name.to_string(),
            origin: None,
            dirty: true,
            last_written: 0,
            children: Children::Loaded(Vec::new()),
            values: Values::Loaded(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// FILETIME of the node's last-written timestamp (the base hive's if
    /// unmodified, 0 if freshly created and never stamped by a caller).
    pub fn last_written(&self) -> u64 {
        self.last_written
    }

    /// Sets the FILETIME the serializer writes for this node.
    pub fn set_last_written(&mut self, filetime: u64) {
        self.last_written = filetime;
    }

    /// The cell offset this node was read from, if it originated from a
    /// hive and hasn't been detached from that origin.
    pub(crate) fn origin_offset(&self) -> Option<u32> {
        self.origin.as_ref().map(|o| o.offset)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn ensure_children(&mut self) -> Result<()> {
        if matches!(self.children, Children::Loaded(_)) {
            return Ok(());
        }
        let origin = self
            .origin
            .as_ref()
            .expect("lazy node always carries an origin");
        let hive = origin.hive.clone();
        let mut loaded = Vec::new();
        for child_id in hive.subkeys(NodeId(origin.offset))? {
            loaded.push(Node::from_hive(hive.clone(), child_id)?);
        }
        self.children = Children::Loaded(loaded);
        Ok(())
    }

    fn ensure_values(&mut self) -> Result<()> {
        if matches!(self.values, Values::Loaded(_)) {
            return Ok(());
        }
        let origin = self
            .origin
            .as_ref()
            .expect("lazy node always carries an origin");
        let hive = origin.hive.clone();
        let mut loaded = Vec::new();
        for value_id in hive.values(NodeId(origin.offset))? {
            loaded.push(Value::from_hive(hive.clone(), value_id)?);
        }
        self.values = Values::Loaded(loaded);
        Ok(())
    }

    /// This node's children, materializing them on first access.
    pub fn children(&mut self) -> Result<&[Node]> {
        self.ensure_children()?;
        match &self.children {
            Children::Loaded(v) => Ok(v),
            Children::Lazy => unreachable!("ensure_children always loads"),
        }
    }

    /// This node's values, materializing them on first access.
    pub fn values(&mut self) -> Result<&[Value]> {
        self.ensure_values()?;
        match &self.values {
            Values::Loaded(v) => Ok(v),
            Values::Lazy => unreachable!("ensure_values always loads"),
        }
    }

    /// Materializes and returns this node's children mutably, for the
    /// serializer's recursive write pass.
    pub(crate) fn children_for_write(&mut self) -> Result<&mut [Node]> {
        self.ensure_children()?;
        Ok(self.children_mut())
    }

    /// Materializes and returns this node's values mutably, for the
    /// serializer's recursive write pass.
    pub(crate) fn values_for_write(&mut self) -> Result<&mut [Value]> {
        self.ensure_values()?;
        Ok(self.values_mut())
    }

    fn child_index(&mut self, name: &str) -> Result<Option<usize>> {
        self.ensure_children()?;
        match &self.children {
            Children::Loaded(v) => Ok(v.iter().position(|c| c.name.eq_ignore_ascii_case(name))),
            Children::Lazy => unreachable!(),
        }
    }

    fn children_mut(&mut self) -> &mut Vec<Node> {
        match &mut self.children {
            Children::Loaded(v) => v,
            Children::Lazy => unreachable!("caller must ensure_children first"),
        }
    }

    fn values_mut(&mut self) -> &mut Vec<Value> {
        match &mut self.values {
            Values::Loaded(v) => v,
            Values::Lazy => unreachable!("caller must ensure_values first"),
        }
    }

    /// Adds a child by name if absent, returning the (possibly
    /// pre-existing) child. Does not mark anything dirty — callers that
    /// need dirty propagation up to the root go through [`Tree`].
    fn add_child(&mut self, name: &str) -> Result<&mut Node> {
        crate::cell::key::validate_name_length(name)?;
        let idx = match self.child_index(name)? {
            Some(idx) => idx,
            None => {
                self.children_mut().push(Node::new_empty(name));
                self.children_mut().len() - 1
            }
        };
        Ok(&mut self.children_mut()[idx])
    }

    /// Inserts or overwrites a value by name.
    fn add_value(&mut self, name: &str, data: RawValueData) -> Result<()> {
        crate::cell::key::validate_name_length(name)?;
        self.ensure_values()?;
        let values = self.values_mut();
        match values.iter_mut().find(|v| v.name.eq_ignore_ascii_case(name)) {
            Some(existing) => existing.set_data(data),
            None => values.push(Value::new(name, data)),
        }
        Ok(())
    }

    /// Removes a child by name. Returns whether one was removed.
    fn remove_child(&mut self, name: &str) -> Result<bool> {
        match self.child_index(name)? {
            Some(idx) => {
                self.children_mut().remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes a value by name. Returns whether one was removed.
    fn remove_value(&mut self, name: &str) -> Result<bool> {
        self.ensure_values()?;
        let values = self.values_mut();
        let before = values.len();
        values.retain(|v| !v.name.eq_ignore_ascii_case(name));
        Ok(values.len() != before)
    }

    fn find_path(&mut self, segments: &[&str]) -> Result<Option<&mut Node>> {
        if segments.is_empty() {
            return Ok(Some(self));
        }
        match self.child_index(segments[0])? {
            None => Ok(None),
            Some(idx) => self.children_mut()[idx].find_path(&segments[1..]),
        }
    }

    /// Marks this node dirty, then recurses into the child named by
    /// `segments[0]`. Always touches every level named by `segments`
    /// rather than stopping early, since (unlike a bottom-up single-node
    /// `mark_dirty`) the caller already knows the whole path needs it.
    fn mark_dirty_path(&mut self, segments: &[&str]) -> Result<()> {
        self.dirty = true;
        if segments.is_empty() {
            return Ok(());
        }
        let idx = self
            .child_index(segments[0])?
            .ok_or_else(|| HiveError::not_found("key", segments[0]))?;
        self.children_mut()[idx].mark_dirty_path(&segments[1..])
    }

    /// Creates every missing segment of `segments` below this node as a
    /// fresh dirty child, marking this node (and each node along the
    /// way) dirty too.
    fn create_path(&mut self, segments: &[&str]) -> Result<()> {
        self.dirty = true;
        if segments.is_empty() {
            return Ok(());
        }
        let child = self.add_child(segments[0])?;
        child.create_path(&segments[1..])
    }
}

/// An AST rooted at a single key, either freshly created or seeded from
/// a [`Hive`]'s root (or any subtree of one).
pub struct Tree {
    root: Node,
}

impl Tree {
    /// Builds a tree with an empty, unnamed root and no backing hive.
    pub fn new_empty() -> Self {
        Tree {
            root: Node::new_empty(""),
        }
    }

    /// Seeds a tree from `hive`, rooted at `id` (typically [`Hive::root`]).
    /// The root node starts lazy; nothing is read until first accessed.
    pub fn from_hive(hive: Arc<Hive>, id: NodeId) -> Result<Self> {
        Ok(Tree {
            root: Node::from_hive(hive, id)?,
        })
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Node {
        &mut self.root
    }

    /// Finds the node at `path`, without mutating anything. Returns
    /// `None` if any segment is missing.
    pub fn find_node(&mut self, path: &str) -> Result<Option<&mut Node>> {
        let segments = split_path(path);
        self.root.find_path(&segments)
    }

    /// Creates `path`, materializing any missing segment as a fresh
    /// empty dirty node. Idempotent: a no-op, and no dirty marking at
    /// all, if the path already exists.
    pub fn create_key(&mut self, path: &str) -> Result<()> {
        let segments = split_path(path);
        if self.root.find_path(&segments)?.is_some() {
            return Ok(());
        }
        self.root.create_path(&segments)
    }

    /// Sets a value at `path`, which must already exist.
    pub fn set_value(&mut self, path: &str, name: &str, data: RawValueData) -> Result<()> {
        let segments = split_path(path);
        {
            let node = self
                .root
                .find_path(&segments)?
                .ok_or_else(|| HiveError::not_found("key", path))?;
            node.add_value(name, data)?;
        }
        self.root.mark_dirty_path(&segments)
    }

    /// Deletes the key at `path`. Fails with [`HiveError::HasChildren`]
    /// if `recursive` is false and the key has children.
    pub fn delete_key(&mut self, path: &str, recursive: bool) -> Result<()> {
        let mut segments = split_path(path);
        let name = match segments.pop() {
            Some(name) => name,
            None => return Err(HiveError::InvalidArgument("cannot delete the root key".into())),
        };
        let parent = self
            .root
            .find_path(&segments)?
            .ok_or_else(|| HiveError::not_found("key", path))?;
        if !recursive {
            if let Some(idx) = parent.child_index(name)? {
                if !parent.children_mut()[idx].children()?.is_empty() {
                    return Err(HiveError::HasChildren(path.to_string()));
                }
            }
        }
        if parent.remove_child(name)? {
            self.root.mark_dirty_path(&segments)?;
        }
        Ok(())
    }

    /// Deletes a value by name. Idempotent if absent.
    pub fn delete_value(&mut self, path: &str, name: &str) -> Result<()> {
        let segments = split_path(path);
        let removed = {
            let node = self
                .root
                .find_path(&segments)?
                .ok_or_else(|| HiveError::not_found("key", path))?;
            node.remove_value(name)?
        };
        if removed {
            self.root.mark_dirty_path(&segments)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_key_materializes_missing_segments_dirty() {
        let mut tree = Tree::new_empty();
        tree.create_key("Software\\Test").unwrap();
        assert!(tree.root().is_dirty());
        let node = tree.find_node("Software\\Test").unwrap().unwrap();
        assert!(node.is_dirty());
    }

    #[test]
    fn create_key_is_idempotent() {
        let mut tree = Tree::new_empty();
        tree.create_key("Software\\Test").unwrap();
        // Clear dirty flags by hand to prove the second call touches nothing.
        tree.root_mut().dirty = false;
        fn clear(node: &mut Node) {
            node.dirty = false;
            if let Children::Loaded(children) = &mut node.children {
                for c in children {
                    clear(c);
                }
            }
        }
        clear(tree.root_mut());
        tree.create_key("Software\\Test").unwrap();
        assert!(!tree.root().is_dirty());
    }

    #[test]
    fn set_value_requires_existing_path() {
        let mut tree = Tree::new_empty();
        let err = tree
            .set_value("Software\\Missing", "Name", RawValueData::Dword(1))
            .unwrap_err();
        assert!(matches!(err, HiveError::NotFound(_)));
    }

    #[test]
    fn set_value_marks_path_dirty() {
        let mut tree = Tree::new_empty();
        tree.create_key("Software\\Test").unwrap();
        tree.set_value("Software\\Test", "Count", RawValueData::Dword(42))
            .unwrap();
        let node = tree.find_node("Software\\Test").unwrap().unwrap();
        let values = node.values().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].name(), "Count");
    }

    #[test]
    fn delete_key_non_recursive_fails_with_children() {
        let mut tree = Tree::new_empty();
        tree.create_key("A\\B").unwrap();
        let err = tree.delete_key("A", false).unwrap_err();
        assert!(matches!(err, HiveError::HasChildren(_)));
    }

    #[test]
    fn delete_key_recursive_removes_subtree() {
        let mut tree = Tree::new_empty();
        tree.create_key("A\\B").unwrap();
        tree.delete_key("A", true).unwrap();
        assert!(tree.find_node("A").unwrap().is_none());
    }

    #[test]
    fn delete_value_is_idempotent() {
        let mut tree = Tree::new_empty();
        tree.create_key("A").unwrap();
        tree.delete_value("A", "Missing").unwrap();
    }

    #[test]
    fn name_lookup_is_case_insensitive() {
        let mut tree = Tree::new_empty();
        tree.create_key("Software\\Test").unwrap();
        assert!(tree.find_node("SOFTWARE\\test").unwrap().is_some());
    }
}
