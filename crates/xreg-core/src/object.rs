//! Path-addressed get/set over nested attribute values

use std::borrow::Cow;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::path::{Path, PathPart};

/// The one namespace whose top-level keys may contain a `.`
pub const LABELS: &str = "labels";

/// Errors raised while walking an attribute tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("Can't traverse into nothing: {path}")]
    NothingToTraverse { path: String },

    #[error("Index {index} out of bounds for {path}: valid range is 0..{len}")]
    OutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },

    #[error("Attribute {path} is not {expected}")]
    NotAContainer {
        path: String,
        expected: &'static str,
    },

    #[error("Invalid attribute name \"{0}\": only \"labels.\" names may contain '.'")]
    DottedKey(String),
}

fn describe(path: &Path) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.to_string()
    }
}

fn not_container(path: &Path, part: &PathPart) -> TreeError {
    TreeError::NotAContainer {
        path: describe(path),
        expected: if part.is_index() { "an array" } else { "a map" },
    }
}

fn empty_container(part: &PathPart) -> Value {
    if part.is_index() {
        Value::Array(Vec::new())
    } else {
        Value::Object(Map::new())
    }
}

/// Expand a dotted top-level key (`labels.stage`) into its namespaced form
fn normalize(path: &Path) -> Result<Cow<'_, Path>, TreeError> {
    let Some(top) = path.top() else {
        return Ok(Cow::Borrowed(path));
    };
    if !top.contains('.') || top.starts_with('#') {
        return Ok(Cow::Borrowed(path));
    }

    let prefix = format!("{}.", LABELS);
    let Some(label) = top.strip_prefix(prefix.as_str()) else {
        return Err(TreeError::DottedKey(top.to_string()));
    };

    let mut parts = vec![
        PathPart::Key(LABELS.to_string()),
        PathPart::Key(label.to_string()),
    ];
    parts.extend(path.parts().iter().skip(1).cloned());
    Ok(Cow::Owned(Path::from_parts(parts)))
}

/// Look up the value at `path`.
///
/// A missing map key is `Ok(None)`. Asking for a child of a null value, an
/// index past the end of an array, or a key of a scalar are errors.
pub fn get<'a>(root: &'a Value, path: &Path) -> Result<Option<&'a Value>, TreeError> {
    let path = normalize(path)?;
    let mut current = root;
    let mut walked = Path::root();

    for part in path.parts() {
        current = match (part, current) {
            (_, Value::Null) => {
                return Err(TreeError::NothingToTraverse {
                    path: describe(&walked),
                })
            }
            (PathPart::Key(k), Value::Object(map)) => match map.get(k) {
                Some(v) => v,
                None => return Ok(None),
            },
            (PathPart::Index(i), Value::Array(items)) => match items.get(*i) {
                Some(v) => v,
                None => {
                    return Err(TreeError::OutOfBounds {
                        path: describe(&walked),
                        index: *i,
                        len: items.len(),
                    })
                }
            },
            (part, _) => return Err(not_container(&walked, part)),
        };
        walked = Path::from_parts(path.parts()[..walked.len() + 1].to_vec());
    }

    Ok(if current.is_null() { None } else { Some(current) })
}

/// Drop null map entries at every depth. Null array slots stay in place.
fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}

/// Store `value` at `path`, creating intermediate maps/arrays as needed.
///
/// A null value deletes: map keys are removed, array slots are nulled in
/// place. Ancestors left empty by a delete stay where they are. Nulls nested
/// inside `value` follow the same rules, so `{"b": null}` is stored as `{}`.
pub fn set(root: &mut Value, path: &Path, value: Value) -> Result<(), TreeError> {
    let path = normalize(path)?;
    let value = strip_nulls(value);
    let parts = path.parts();
    let Some((last, parents)) = parts.split_last() else {
        *root = value;
        return Ok(());
    };

    let deleting = value.is_null();
    if root.is_null() {
        *root = empty_container(&parts[0]);
    }

    let mut current = root;
    for (depth, part) in parents.iter().enumerate() {
        let walked = Path::from_parts(parts[..depth].to_vec());
        let next = &parts[depth + 1];

        current = match part {
            PathPart::Key(k) => {
                let map = current
                    .as_object_mut()
                    .ok_or_else(|| not_container(&walked, part))?;
                if deleting && map.get(k).map_or(true, Value::is_null) {
                    return Ok(());
                }
                let slot = map.entry(k.clone()).or_insert(Value::Null);
                if slot.is_null() {
                    *slot = empty_container(next);
                }
                slot
            }
            PathPart::Index(i) => {
                let items = current
                    .as_array_mut()
                    .ok_or_else(|| not_container(&walked, part))?;
                if deleting && items.get(*i).map_or(true, Value::is_null) {
                    return Ok(());
                }
                if *i >= items.len() {
                    items.resize(*i + 1, Value::Null);
                }
                if items[*i].is_null() {
                    items[*i] = empty_container(next);
                }
                &mut items[*i]
            }
        };
    }

    let walked = Path::from_parts(parents.to_vec());
    match last {
        PathPart::Key(k) => {
            let map = current
                .as_object_mut()
                .ok_or_else(|| not_container(&walked, last))?;
            if deleting {
                map.remove(k);
            } else {
                map.insert(k.clone(), value);
            }
        }
        PathPart::Index(i) => {
            let items = current
                .as_array_mut()
                .ok_or_else(|| not_container(&walked, last))?;
            if deleting {
                if let Some(slot) = items.get_mut(*i) {
                    *slot = Value::Null;
                }
            } else {
                if *i >= items.len() {
                    items.resize(*i + 1, Value::Null);
                }
                items[*i] = value;
            }
        }
    }

    Ok(())
}

/// Convenience wrapper parsing a display path first
pub fn set_display(root: &mut Value, path: &str, value: Value) -> crate::Result<()> {
    let path = Path::parse(path)?;
    set(root, &path, value)?;
    Ok(())
}
