//! Path-addressed resolution over rooted value trees.
//!
//! A [`PathNode`] is a coordinate, not a container: it holds a handle to
//! the root and the keys leading down from it. The store owns the tree;
//! nodes are transient views built to address one location.

use crate::error::{Result, ValueError};
use crate::value::Value;

/// A location inside a rooted value tree.
#[derive(Clone, Debug)]
pub struct PathNode {
    /// The top-level value. Reference variants share the store's tree.
    pub root: Value,
    /// Keys from `root` to the addressed location; empty addresses the root.
    pub path: Vec<String>,
}

impl PathNode {
    pub fn new<S: Into<String>>(root: Value, path: impl IntoIterator<Item = S>) -> Self {
        Self {
            root,
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    /// A node addressing the root itself.
    pub fn root(root: Value) -> Self {
        Self {
            root,
            path: Vec::new(),
        }
    }

    /// The node one level below this one.
    pub fn child(&self, key: impl Into<String>) -> Self {
        let mut path = self.path.clone();
        path.push(key.into());
        Self {
            root: self.root.clone(),
            path,
        }
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// The value currently at this location.
    pub fn value(&self) -> Value {
        resolve_node(self)
    }
}

/// Nodes are equivalent when they share the identical root and an equal path.
impl PartialEq for PathNode {
    fn eq(&self, other: &Self) -> bool {
        self.root.strict_eq(&other.root) && self.path == other.path
    }
}

/// Walk `path` down from `root`.
///
/// Resolution stops at the first falsy intermediate and yields it, so a
/// `0`, `""` or `false` on the way is returned as-is rather than indexed
/// into. Missing keys yield `undefined`; resolution never fails.
pub fn resolve<S: AsRef<str>>(root: &Value, path: &[S]) -> Value {
    let mut child = root.clone();
    for key in path {
        if !child.is_truthy() {
            break;
        }
        child = child.get(key.as_ref());
    }
    child
}

pub fn resolve_node(node: &PathNode) -> Value {
    resolve(&node.root, &node.path)
}

/// Split `node` into the coordinate of its parent and its final key.
///
/// Fails with [`ValueError::InvalidArgument`] for a root node, which has
/// no parent to mutate through.
pub fn decompose_last(node: &PathNode) -> Result<(PathNode, String)> {
    let (last, parent) = node.path.split_last().ok_or_else(|| {
        ValueError::InvalidArgument("cannot decompose the root path".into())
    })?;
    Ok((
        PathNode {
            root: node.root.clone(),
            path: parent.to_vec(),
        },
        last.clone(),
    ))
}

/// Adapt a path-oriented caller to a key-oriented callback: decompose
/// `node` and invoke `f(parent, last_key, args)`.
pub fn call_keyed<A, R>(
    f: impl FnOnce(PathNode, String, A) -> R,
    node: &PathNode,
    args: A,
) -> Result<R> {
    let (parent, last) = decompose_last(node)?;
    Ok(f(parent, last, args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree() -> Value {
        Value::from(json!({
            "user": {"name": "ada", "tags": ["x", "y"], "score": 0, "bio": ""},
            "flag": false
        }))
    }

    #[test]
    fn resolves_nested_fields_and_indices() {
        let root = tree();
        assert_eq!(resolve(&root, &["user", "name"]), Value::from("ada"));
        assert_eq!(resolve(&root, &["user", "tags", "1"]), Value::from("y"));
    }

    #[test]
    fn empty_path_resolves_to_root() {
        let root = tree();
        let empty: [&str; 0] = [];
        assert!(resolve(&root, &empty).strict_eq(&root));
    }

    #[test]
    fn missing_intermediate_yields_undefined() {
        let root = tree();
        assert!(resolve(&root, &["nope", "deeper"]).is_undefined());
    }

    #[test]
    fn falsy_intermediate_stops_resolution() {
        let root = tree();
        assert_eq!(resolve(&root, &["user", "score", "length"]), Value::from(0));
        assert_eq!(resolve(&root, &["user", "bio", "length"]), Value::from(""));
        assert_eq!(resolve(&root, &["flag", "anything"]), Value::from(false));
    }

    #[test]
    fn nodes_compare_by_root_identity() {
        let root = tree();
        let a = PathNode::new(root.clone(), ["user"]);
        let b = PathNode::new(root, ["user"]);
        let c = PathNode::new(tree(), ["user"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn decompose_last_splits_parent_and_key() {
        let node = PathNode::new(tree(), ["user", "tags", "0"]);
        let (parent, key) = decompose_last(&node).unwrap();
        assert_eq!(parent.path, vec!["user", "tags"]);
        assert_eq!(key, "0");
        assert_eq!(parent.value().get(&key), node.value());
    }

    #[test]
    fn decompose_root_is_invalid() {
        let err = decompose_last(&PathNode::root(tree())).unwrap_err();
        assert!(matches!(err, ValueError::InvalidArgument(_)));
    }

    #[test]
    fn call_keyed_passes_parent_key_and_args() {
        let node = PathNode::new(tree(), ["user", "name"]);
        let out = call_keyed(
            |parent, key, suffix| {
                let name = parent.value().get(&key);
                format!("{}{suffix}", name.as_str().unwrap_or(""))
            },
            &node,
            "!",
        )
        .unwrap();
        assert_eq!(out, "ada!");
    }

    #[test]
    fn child_extends_path() {
        let node = PathNode::root(tree()).child("user").child("name");
        assert_eq!(node.value(), Value::from("ada"));
        assert!(!node.is_root());
    }
}
