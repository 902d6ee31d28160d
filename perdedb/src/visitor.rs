//! Locating encryptable values inside operation argument and result trees.
//!
//! The visitor walks a tree with [`traverse_tree`], tracking which model's
//! namespace the current subtree belongs to. Crossing a relation field
//! switches the namespace, so `User.posts.create.0.content` is matched
//! against `Post.content`, not `User.content`.

use crate::annotations::FieldConfig;
use crate::schema::ModelDescriptors;
use crate::walk::{traverse_tree, Item, NodeKind, Segment};
use serde_json::Value;
use tracing::trace;

/// Wrapper keys whose string child stands in for the field value in
/// argument trees (`{ equals: "..." }`, `{ set: "..." }`).
const INPUT_SPECIAL_KEYS: [&str; 2] = ["equals", "set"];

/// One matched field occurrence: where it sits, what it holds, and which
/// schema field it belongs to.
#[derive(Debug, Clone)]
pub struct TargetField {
    /// Path of the string leaf to rewrite.
    pub path: Vec<Segment>,
    /// The current string value at that path.
    pub value: String,
    /// Owning model.
    pub model: String,
    /// Schema field name.
    pub field: String,
    /// The field's encryption configuration.
    pub field_config: FieldConfig,
}

#[derive(Debug, Clone)]
struct VisitorState {
    current_model: String,
}

/// Collects configured field values from an operation's *argument* tree.
///
/// Argument trees may wrap values in `equals`/`set` objects; those wrappers
/// are unwrapped and the inner path is reported.
pub fn visit_input_target_fields(
    models: &ModelDescriptors,
    root_model: &str,
    args: &Value,
    on_target: &mut dyn FnMut(TargetField),
) {
    visit_target_fields(models, root_model, args, true, on_target);
}

/// Collects configured field values from an operation's *result* tree.
///
/// Result trees hold plain values only; wrapper keys are treated as
/// ordinary (non-matching) data.
pub fn visit_output_target_fields(
    models: &ModelDescriptors,
    root_model: &str,
    result: &Value,
    on_target: &mut dyn FnMut(TargetField),
) {
    visit_target_fields(models, root_model, result, false, on_target);
}

fn visit_target_fields(
    models: &ModelDescriptors,
    root_model: &str,
    root: &Value,
    unwrap_specials: bool,
    on_target: &mut dyn FnMut(TargetField),
) {
    let initial = VisitorState { current_model: root_model.to_string() };
    traverse_tree(
        root,
        |state: &VisitorState, item: &Item<'_, '_>| {
            let Some(descriptor) = models.get(&state.current_model) else {
                return state.clone();
            };
            let Some(key) = item.key.and_then(Segment::as_key) else {
                return state.clone();
            };

            if let Some(field_config) = descriptor.fields.get(key) {
                match item.kind {
                    NodeKind::String => {
                        if let Value::String(value) = item.node {
                            on_target(TargetField {
                                path: item.path.to_vec(),
                                value: value.clone(),
                                model: state.current_model.clone(),
                                field: key.to_string(),
                                field_config: field_config.clone(),
                            });
                        }
                        return state.clone();
                    }
                    NodeKind::Object if unwrap_specials => {
                        if let Some((special, value)) = first_special_string(item.node) {
                            let mut path = item.path.to_vec();
                            path.push(Segment::Key(special.to_string()));
                            on_target(TargetField {
                                path,
                                value: value.to_string(),
                                model: state.current_model.clone(),
                                field: key.to_string(),
                                field_config: field_config.clone(),
                            });
                            return state.clone();
                        }
                    }
                    _ => {}
                }
            }

            if matches!(item.kind, NodeKind::Object | NodeKind::Array) {
                if let Some(connection) = descriptor.connections.get(key) {
                    trace!(
                        from = state.current_model,
                        to = connection.target_model,
                        field = key,
                        "following relation"
                    );
                    return VisitorState { current_model: connection.target_model.clone() };
                }
            }
            state.clone()
        },
        initial,
    );
}

/// First `equals`/`set` sub-key holding a string, in priority order.
fn first_special_string(node: &Value) -> Option<(&'static str, &str)> {
    INPUT_SPECIAL_KEYS
        .iter()
        .find_map(|key| node.get(*key).and_then(Value::as_str).map(|value| (*key, value)))
}
