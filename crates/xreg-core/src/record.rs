//! Flat persistence rows for entities

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::entity::{Entity, EntityKind, EntityUid};
use crate::error::{Error, Result};
use crate::object;
use crate::path::Path;

/// A typed scalar (or empty container) stored in one row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum PropValue {
    #[serde(rename = "s")]
    String(String),
    #[serde(rename = "b")]
    Bool(bool),
    #[serde(rename = "i")]
    Int(i64),
    #[serde(rename = "f")]
    Float(f64),
    #[serde(rename = "{")]
    EmptyMap,
    #[serde(rename = "[")]
    EmptyArray,
    /// Placeholder for a null array slot
    #[serde(rename = "n")]
    Null,
}

impl PropValue {
    pub fn tag(&self) -> char {
        match self {
            Self::String(_) => 's',
            Self::Bool(_) => 'b',
            Self::Int(_) => 'i',
            Self::Float(_) => 'f',
            Self::EmptyMap => '{',
            Self::EmptyArray => '[',
            Self::Null => 'n',
        }
    }

    /// Text of the value column
    pub fn text(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::EmptyMap | Self::EmptyArray | Self::Null => String::new(),
        }
    }

    /// Rebuild a value from its tag and text columns
    pub fn decode(tag: &str, text: &str) -> Result<Self> {
        let bad = || Error::Internal(format!("Corrupt property value {:?} of type {:?}", text, tag));
        Ok(match tag {
            "s" => Self::String(text.to_string()),
            "b" => Self::Bool(text.parse().map_err(|_| bad())?),
            "i" => Self::Int(text.parse().map_err(|_| bad())?),
            "f" => Self::Float(text.parse().map_err(|_| bad())?),
            "{" => Self::EmptyMap,
            "[" => Self::EmptyArray,
            "n" => Self::Null,
            _ => return Err(bad()),
        })
    }

    fn from_scalar(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Self::Int(i)),
                None => n.as_f64().map(Self::Float),
            },
            Value::Object(m) if m.is_empty() => Some(Self::EmptyMap),
            Value::Array(a) if a.is_empty() => Some(Self::EmptyArray),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Self::String(s) => Value::String(s),
            Self::Bool(b) => Value::Bool(b),
            Self::Int(i) => Value::from(i),
            Self::Float(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
            Self::EmptyMap => Value::Object(Map::new()),
            Self::EmptyArray => Value::Array(Vec::new()),
            Self::Null => Value::Null,
        }
    }
}

/// One leaf of an entity's attribute tree, keyed by its storage path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropRow {
    pub name: String,
    pub value: PropValue,
}

/// Everything persisted about one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub uid: EntityUid,
    pub kind: EntityKind,
    pub id: String,
    pub singular: String,
    pub plural: String,
    pub xid: String,
    pub parent: Option<EntityUid>,
    pub props: Vec<PropRow>,
}

/// Writes produced by one transaction
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub saved: Vec<EntityRecord>,
    pub deleted: Vec<EntityUid>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty() && self.deleted.is_empty()
    }
}

/// Flatten an attribute tree into rows. Null map entries are dropped; null
/// array slots are kept as placeholders so the array length survives.
pub fn flatten(value: &Value) -> Vec<PropRow> {
    let mut rows = Vec::new();
    if let Value::Object(map) = value {
        for (k, v) in map {
            walk(v, Path::key(k.as_str()), &mut rows);
        }
    }
    rows
}

fn walk(value: &Value, path: Path, rows: &mut Vec<PropRow>) {
    if let Some(scalar) = PropValue::from_scalar(value) {
        rows.push(PropRow {
            name: path.to_storage(),
            value: scalar,
        });
        return;
    }
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                walk(v, path.with_prop(k.as_str()), rows);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                if v.is_null() {
                    rows.push(PropRow {
                        name: path.with_index(i).to_storage(),
                        value: PropValue::Null,
                    });
                } else {
                    walk(v, path.with_index(i), rows);
                }
            }
        }
        _ => {}
    }
}

/// Rebuild an attribute map from rows
pub fn unflatten(rows: Vec<PropRow>) -> Result<Value> {
    let mut root = Value::Object(Map::new());
    let mut slots = Vec::new();
    for row in rows {
        let path = Path::from_storage(&row.name);
        if row.value == PropValue::Null {
            // grow the array first, then null the slot in place
            object::set(&mut root, &path, Value::Bool(false))?;
            slots.push(path);
        } else {
            object::set(&mut root, &path, row.value.into_value())?;
        }
    }
    for path in slots {
        object::set(&mut root, &path, Value::Null)?;
    }
    Ok(root)
}

impl EntityRecord {
    pub fn from_entity(entity: &Entity) -> Self {
        Self {
            uid: entity.uid.clone(),
            kind: entity.kind,
            id: entity.id.clone(),
            singular: entity.singular.clone(),
            plural: entity.plural.clone(),
            xid: entity.xid.clone(),
            parent: entity.parent.clone(),
            props: flatten(entity.attributes()),
        }
    }

    pub fn into_entity(self) -> Result<Entity> {
        let attributes = unflatten(self.props)?;
        Ok(Entity::restore(
            self.uid,
            self.kind,
            self.id,
            self.singular,
            self.plural,
            self.xid,
            self.parent,
            attributes,
        ))
    }
}
