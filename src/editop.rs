//! Edit operations: the vocabulary shared between the `.reg` parser and
//! the hive engine. [`regfile::parser`](crate::regfile::parser) produces
//! a `Vec<EditOp>`; [`apply_all`] plays it onto an [`ast::Tree`].

use crate::ast::Tree;
use crate::cell::value::ValueData;
use crate::cell::ValueType;
use crate::error::Result;

/// One step applied to an [`ast::Tree`]. Paths are backslash-separated
/// and matched case-insensitively; an empty value `name` denotes the
/// key's default value.
#[derive(Debug, Clone, PartialEq)]
pub enum EditOp {
    /// Materializes every missing segment of `path`. Idempotent.
    CreateKey { path: String },
    /// Removes the key at `path`. Fails with [`crate::error::HiveError::HasChildren`]
    /// if `recursive` is false and the key has children.
    DeleteKey { path: String, recursive: bool },
    /// Inserts or overwrites a value. `path` must already exist.
    SetValue {
        path: String,
        name: String,
        value_type: ValueType,
        data: Vec<u8>,
    },
    /// Removes a value by name. Idempotent if absent.
    DeleteValue { path: String, name: String },
}

/// Applies a single edit operation to `tree`.
pub fn apply(tree: &mut Tree, op: &EditOp) -> Result<()> {
    match op {
        EditOp::CreateKey { path } => tree.create_key(path),
        EditOp::DeleteKey { path, recursive } => tree.delete_key(path, *recursive),
        EditOp::SetValue {
            path,
            name,
            value_type,
            data,
        } => {
            let value = ValueData::decode(data, *value_type, 0)?;
            tree.set_value(path, name, value)
        }
        EditOp::DeleteValue { path, name } => tree.delete_value(path, name),
    }
}

/// Applies `ops` to `tree` in order. Aborts on the first error, leaving
/// every operation applied so far in place — callers that need
/// all-or-nothing semantics should snapshot or clone the tree first, per
/// spec's "apply errors abort the remaining operations" policy.
pub fn apply_all(tree: &mut Tree, ops: &[EditOp]) -> Result<()> {
    for op in ops {
        apply(tree, op)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HiveError;

    #[test]
    fn apply_empty_is_identity() {
        let mut tree = Tree::new_empty();
        apply_all(&mut tree, &[]).unwrap();
        assert!(!tree.root().is_dirty());
    }

    #[test]
    fn create_then_set_then_delete_value() {
        let mut tree = Tree::new_empty();
        let ops = vec![
            EditOp::CreateKey {
                path: "Software\\Test".into(),
            },
            EditOp::SetValue {
                path: "Software\\Test".into(),
                name: "Count".into(),
                value_type: ValueType::Dword,
                data: vec![0x2a, 0, 0, 0],
            },
            EditOp::DeleteValue {
                path: "Software\\Test".into(),
                name: "Count".into(),
            },
        ];
        apply_all(&mut tree, &ops).unwrap();
        let node = tree.find_node("Software\\Test").unwrap().unwrap();
        assert!(node.values().unwrap().is_empty());
    }

    #[test]
    fn set_value_on_missing_path_aborts_remaining_ops() {
        let mut tree = Tree::new_empty();
        let ops = vec![
            EditOp::SetValue {
                path: "Missing".into(),
                name: "X".into(),
                value_type: ValueType::Dword,
                data: vec![1, 0, 0, 0],
            },
            EditOp::CreateKey {
                path: "NeverReached".into(),
            },
        ];
        let err = apply_all(&mut tree, &ops).unwrap_err();
        assert!(matches!(err, HiveError::NotFound(_)));
        assert!(tree.find_node("NeverReached").unwrap().is_none());
    }

    #[test]
    fn delete_key_non_recursive_with_children_fails() {
        let mut tree = Tree::new_empty();
        apply_all(
            &mut tree,
            &[EditOp::CreateKey {
                path: "A\\B".into(),
            }],
        )
        .unwrap();
        let err = apply(
            &mut tree,
            &EditOp::DeleteKey {
                path: "A".into(),
                recursive: false,
            },
        )
        .unwrap_err();
        assert!(matches!(err, HiveError::HasChildren(_)));
    }

    #[test]
    fn ops_apply_in_input_order() {
        let mut tree = Tree::new_empty();
        let ops = vec![
            EditOp::CreateKey { path: "A".into() },
            EditOp::SetValue {
                path: "A".into(),
                name: "V".into(),
                value_type: ValueType::Dword,
                data: vec![1, 0, 0, 0],
            },
            EditOp::DeleteKey {
                path: "A".into(),
                recursive: true,
            },
        ];
        apply_all(&mut tree, &ops).unwrap();
        assert!(tree.find_node("A").unwrap().is_none());
    }
}
