//! Generic depth-first traversal of JSON-like value trees, plus the path
//! addressing primitives used to rewrite leaves in place.
//!
//! Traversal is iterative (explicit stack) so deep or wide inputs cannot
//! exhaust the call stack, and visits the root first, then children in
//! natural enumeration order (array index order, map insertion order).
//! The visit callback's return value becomes the state seen by that node's
//! direct children only; siblings never share it.

use serde_json::{Map, Value};
use std::fmt;

/// One step in a path from the root of a value tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// A map key.
    Key(String),
    /// An array index.
    Index(usize),
}

impl Segment {
    /// Returns the key name for map segments, `None` for indices.
    #[must_use]
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Self::Key(key) => Some(key),
            Self::Index(_) => None,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for Segment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<usize> for Segment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// Renders a path in dotted form, e.g. `data.posts.create.0.content`.
#[must_use]
pub fn path_to_string(path: &[Segment]) -> String {
    path.iter().map(ToString::to_string).collect::<Vec<_>>().join(".")
}

/// Shallow classification of a visited node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// JSON null.
    Null,
    /// Boolean scalar.
    Bool,
    /// Numeric scalar.
    Number,
    /// String scalar.
    String,
    /// Ordered array.
    Array,
    /// String-keyed map.
    Object,
}

impl NodeKind {
    /// Classifies a value.
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }
}

/// A visited node: its key under the parent (none for the root), the full
/// path from the root, the node itself and its kind.
///
/// The node borrows from the tree for the whole traversal; the path only
/// lives for the duration of one visit.
#[derive(Debug)]
pub struct Item<'a, 'p> {
    /// Last path segment, `None` at the root.
    pub key: Option<&'p Segment>,
    /// Ordered segments from the root down to this node.
    pub path: &'p [Segment],
    /// The node value.
    pub node: &'a Value,
    /// Shallow kind of the node.
    pub kind: NodeKind,
}

/// Traverses `root` depth-first in pre-order, threading caller state down
/// the tree.
///
/// `visit` receives the state inherited from the nearest visited ancestor
/// and returns the state propagated to the node's direct children. Inputs
/// are assumed acyclic (they originate from serialized arguments and
/// results); no node is visited twice.
pub fn traverse_tree<'a, S, F>(root: &'a Value, mut visit: F, initial_state: S)
where
    S: Clone,
    F: for<'p> FnMut(&S, &Item<'a, 'p>) -> S,
{
    struct Frame<'a, S> {
        path: Vec<Segment>,
        node: &'a Value,
        state: S,
    }

    let mut stack = vec![Frame { path: Vec::new(), node: root, state: initial_state }];
    while let Some(frame) = stack.pop() {
        let item = Item {
            key: frame.path.last(),
            path: &frame.path,
            node: frame.node,
            kind: NodeKind::of(frame.node),
        };
        let state = visit(&frame.state, &item);
        // Children are pushed in reverse so the stack pops them in natural order.
        match frame.node {
            Value::Object(map) => {
                for (key, child) in map.iter().rev() {
                    let mut path = frame.path.clone();
                    path.push(Segment::Key(key.clone()));
                    stack.push(Frame { path, node: child, state: state.clone() });
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate().rev() {
                    let mut path = frame.path.clone();
                    path.push(Segment::Index(index));
                    stack.push(Frame { path, node: child, state: state.clone() });
                }
            }
            _ => {}
        }
    }
}

/// Returns the value at `path`, if the whole path resolves.
#[must_use]
pub fn value_at<'a>(root: &'a Value, path: &[Segment]) -> Option<&'a Value> {
    let mut current = root;
    for segment in path {
        current = match segment {
            Segment::Key(key) => current.get(key.as_str())?,
            Segment::Index(index) => current.get(index)?,
        };
    }
    Some(current)
}

/// Writes `new_value` at `path`, creating missing intermediate objects for
/// key segments. Returns `false` when the path cannot be satisfied (an
/// index segment out of bounds, or a scalar in the way).
pub fn set_value(root: &mut Value, path: &[Segment], new_value: Value) -> bool {
    let Some((last, parents)) = path.split_last() else {
        *root = new_value;
        return true;
    };
    let mut current = root;
    for segment in parents {
        current = match segment {
            Segment::Key(key) => {
                let Value::Object(map) = current else { return false };
                map.entry(key.clone()).or_insert_with(|| Value::Object(Map::new()))
            }
            Segment::Index(index) => {
                let Value::Array(items) = current else { return false };
                match items.get_mut(*index) {
                    Some(child) => child,
                    None => return false,
                }
            }
        };
    }
    match (last, current) {
        (Segment::Key(key), Value::Object(map)) => {
            map.insert(key.clone(), new_value);
            true
        }
        (Segment::Index(index), Value::Array(items)) => match items.get_mut(*index) {
            Some(slot) => {
                *slot = new_value;
                true
            }
            None => false,
        },
        _ => false,
    }
}

/// Removes and returns the value at `path`. The root itself cannot be
/// removed.
pub fn remove_value(root: &mut Value, path: &[Segment]) -> Option<Value> {
    let (last, parents) = path.split_last()?;
    let mut current = root;
    for segment in parents {
        current = match segment {
            Segment::Key(key) => current.get_mut(key.as_str())?,
            Segment::Index(index) => current.get_mut(*index)?,
        };
    }
    match (last, current) {
        (Segment::Key(key), Value::Object(map)) => map.remove(key.as_str()),
        (Segment::Index(index), Value::Array(items)) if *index < items.len() => {
            Some(items.remove(*index))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    struct Visit {
        path: String,
        kind: NodeKind,
    }

    fn collect_visits(root: &Value) -> Vec<Visit> {
        let mut visits = Vec::new();
        traverse_tree(
            root,
            |_: &(), item| visits.push(Visit { path: path_to_string(item.path), kind: item.kind }),
            (),
        );
        visits
    }

    #[test]
    fn root_literal_is_visited_once() {
        let root = json!("Hello, World!");
        let visits = collect_visits(&root);
        assert_eq!(visits, vec![Visit { path: String::new(), kind: NodeKind::String }]);
    }

    #[test]
    fn arrays_are_visited_in_index_order() {
        let root = json!(["John", "Paul", "George", "Ringo"]);
        let visits = collect_visits(&root);
        let paths: Vec<&str> = visits.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(paths, vec!["", "0", "1", "2", "3"]);
    }

    #[test]
    fn maps_are_visited_in_insertion_order() {
        let root = json!({
            "John": "Lennon",
            "Paul": "McCartney",
            "George": "Harrison",
            "Ringo": "Starr"
        });
        let visits = collect_visits(&root);
        let paths: Vec<&str> = visits.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(paths, vec!["", "John", "Paul", "George", "Ringo"]);
    }

    #[test]
    fn nested_trees_are_walked_depth_first_pre_order() {
        let root = json!({"a": {"b": [1, "x"]}});
        let visits = collect_visits(&root);
        assert_eq!(
            visits,
            vec![
                Visit { path: String::new(), kind: NodeKind::Object },
                Visit { path: "a".to_string(), kind: NodeKind::Object },
                Visit { path: "a.b".to_string(), kind: NodeKind::Array },
                Visit { path: "a.b.0".to_string(), kind: NodeKind::Number },
                Visit { path: "a.b.1".to_string(), kind: NodeKind::String },
            ]
        );
    }

    #[test]
    fn state_propagates_to_children_only() {
        // The marker set on `left` must be visible below it but not on its
        // sibling `right`.
        let root = json!({"left": {"inner": 1}, "right": {"inner": 2}});
        let mut seen = Vec::new();
        traverse_tree(
            &root,
            |state: &Option<String>, item| {
                seen.push((path_to_string(item.path), state.clone()));
                match item.key.and_then(Segment::as_key) {
                    Some("left") => Some("from-left".to_string()),
                    _ => state.clone(),
                }
            },
            None,
        );
        let lookup: std::collections::HashMap<_, _> = seen.into_iter().collect();
        assert_eq!(lookup[""], None);
        assert_eq!(lookup["left"], None);
        assert_eq!(lookup["left.inner"], Some("from-left".to_string()));
        assert_eq!(lookup["right"], None);
        assert_eq!(lookup["right.inner"], None);
    }

    #[test]
    fn node_borrows_outlive_the_visit() {
        // Visitors may keep references into the tree after traversal ends,
        // even though each visit's path is rebuilt per node.
        let root = json!({"a": {"b": "leaf"}});
        let mut strings: Vec<&Value> = Vec::new();
        traverse_tree(
            &root,
            |_: &(), item| {
                if item.kind == NodeKind::String {
                    strings.push(item.node);
                }
            },
            (),
        );
        assert_eq!(strings, vec![&json!("leaf")]);
    }

    #[test]
    fn value_at_resolves_nested_paths() {
        let root = json!({"a": {"b": [1, "x"]}});
        let path = vec![Segment::from("a"), Segment::from("b"), Segment::from(1)];
        assert_eq!(value_at(&root, &path), Some(&json!("x")));
        assert_eq!(value_at(&root, &[Segment::from("missing")]), None);
        assert_eq!(value_at(&root, &[]), Some(&root));
    }

    #[test]
    fn set_value_overwrites_and_creates_intermediates() {
        let mut root = json!({"where": {"email": "x"}});
        let written = set_value(
            &mut root,
            &[Segment::from("where"), Segment::from("emailHash"), Segment::from("equals")],
            json!("digest"),
        );
        assert!(written);
        assert_eq!(root["where"]["emailHash"]["equals"], json!("digest"));
    }

    #[test]
    fn set_value_rejects_out_of_bounds_index() {
        let mut root = json!({"items": ["a"]});
        let written = set_value(
            &mut root,
            &[Segment::from("items"), Segment::from(4)],
            json!("b"),
        );
        assert!(!written);
        assert_eq!(root, json!({"items": ["a"]}));
    }

    #[test]
    fn remove_value_deletes_keys_and_indices() {
        let mut root = json!({"orderBy": {"name": "asc", "id": "desc"}, "take": 10});
        let removed = remove_value(&mut root, &[Segment::from("orderBy"), Segment::from("name")]);
        assert_eq!(removed, Some(json!("asc")));
        assert_eq!(root["orderBy"], json!({"id": "desc"}));

        let mut list = json!(["a", "b", "c"]);
        let removed = remove_value(&mut list, &[Segment::from(1)]);
        assert_eq!(removed, Some(json!("b")));
        assert_eq!(list, json!(["a", "c"]));
    }

    #[test]
    fn remove_value_of_missing_path_is_none() {
        let mut root = json!({"a": 1});
        assert_eq!(remove_value(&mut root, &[Segment::from("b")]), None);
        assert_eq!(remove_value(&mut root, &[]), None);
    }
}
