//! Registry entities: identity plus an open-ended attribute tree

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::limits::{validate_attribute_name, validate_path_depth};
use crate::object::{self, LABELS};
use crate::path::{Path, PathPart};

pub const EPOCH: &str = "epoch";
pub const CREATED_AT: &str = "createdat";
pub const MODIFIED_AT: &str = "modifiedat";
pub const SELF: &str = "self";
pub const XID: &str = "xid";
pub const SPEC_VERSION: &str = "specversion";
pub const VERSION_ID: &str = "versionid";
pub const IS_LATEST: &str = "islatest";
pub const LATEST_VERSION_ID: &str = "latestversionid";
pub const LATEST_VERSION_URL: &str = "latestversionurl";
pub const LATEST_VERSION_STICKY: &str = "latestversionsticky";

/// Opaque counter used to generate version ids
pub const NEXT_VERSION_ID: &str = "#nextversionid";

/// `specversion` reported by the registry entity
pub const SPEC_VERSION_VALUE: &str = "0.5";

const COMMON_SYSTEM: &[&str] = &[EPOCH, CREATED_AT, MODIFIED_AT, SELF, XID];

/// Unique, immutable identifier of a stored entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityUid(pub Ulid);

impl EntityUid {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn from_string(s: &str) -> std::result::Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for EntityUid {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Registry,
    Group,
    Resource,
    Meta,
    Version,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::Group => "group",
            Self::Resource => "resource",
            Self::Meta => "meta",
            Self::Version => "version",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "registry" => Some(Self::Registry),
            "group" => Some(Self::Group),
            "resource" => Some(Self::Resource),
            "meta" => Some(Self::Meta),
            "version" => Some(Self::Version),
            _ => None,
        }
    }

    /// Attributes owned by the server, beyond the common ones and the id
    fn own_system_attributes(&self) -> &'static [&'static str] {
        match self {
            Self::Registry => &[SPEC_VERSION],
            Self::Group => &[],
            Self::Resource => &[
                VERSION_ID,
                IS_LATEST,
                LATEST_VERSION_ID,
                LATEST_VERSION_URL,
                "meta",
                "metaurl",
                "versions",
                "versionsurl",
                "versionscount",
            ],
            Self::Meta => &[LATEST_VERSION_ID, LATEST_VERSION_URL, LATEST_VERSION_STICKY],
            Self::Version => &[VERSION_ID, IS_LATEST],
        }
    }

    /// Whether `name` is a server-managed attribute of this kind
    pub fn is_system_attribute(&self, name: &str, id_attribute: &str) -> bool {
        name == id_attribute
            || COMMON_SYSTEM.contains(&name)
            || self.own_system_attributes().contains(&name)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    New,
    Clean,
    Dirty,
}

pub(crate) fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// A node of the registry hierarchy
#[derive(Debug, Clone)]
pub struct Entity {
    /// Internal identifier, never reused
    pub uid: EntityUid,

    pub kind: EntityKind,

    /// User-facing id, unique within the owning collection
    pub id: String,

    /// Singular name of the collection (`endpoint`, `version`); the id
    /// attribute is `<singular>id`
    pub singular: String,

    /// Collection this entity lives in (empty for the registry)
    pub plural: String,

    /// Structured path, e.g. `/endpoints/e1/messages/m1/versions/2`
    pub xid: String,

    pub parent: Option<EntityUid>,

    attributes: Value,
    change: Change,
}

impl Entity {
    /// Create a new entity with epoch 1 and fresh timestamps
    pub fn new(
        kind: EntityKind,
        id: impl Into<String>,
        singular: impl Into<String>,
        plural: impl Into<String>,
        xid: impl Into<String>,
        parent: Option<EntityUid>,
    ) -> Self {
        let id = id.into();
        let singular = singular.into();
        let now = timestamp();

        let mut attrs = Map::new();
        attrs.insert(format!("{}id", singular), Value::String(id.clone()));
        attrs.insert(EPOCH.to_string(), Value::from(1u64));
        attrs.insert(CREATED_AT.to_string(), Value::String(now.clone()));
        attrs.insert(MODIFIED_AT.to_string(), Value::String(now));

        Self {
            uid: EntityUid::new(),
            kind,
            id,
            singular,
            plural: plural.into(),
            xid: xid.into(),
            parent,
            attributes: Value::Object(attrs),
            change: Change::New,
        }
    }

    /// Rebuild an entity read back from storage
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        uid: EntityUid,
        kind: EntityKind,
        id: String,
        singular: String,
        plural: String,
        xid: String,
        parent: Option<EntityUid>,
        attributes: Value,
    ) -> Self {
        let attributes = if attributes.is_object() {
            attributes
        } else {
            Value::Object(Map::new())
        };
        Self {
            uid,
            kind,
            id,
            singular,
            plural,
            xid,
            parent,
            attributes,
            change: Change::Clean,
        }
    }

    pub fn id_attribute(&self) -> String {
        format!("{}id", self.singular)
    }

    pub fn attributes(&self) -> &Value {
        &self.attributes
    }

    fn map_mut(&mut self) -> &mut Map<String, Value> {
        if !self.attributes.is_object() {
            self.attributes = Value::Object(Map::new());
        }
        match &mut self.attributes {
            Value::Object(map) => map,
            _ => unreachable!("entity attributes are always a map"),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.attributes
            .get(EPOCH)
            .and_then(Value::as_u64)
            .unwrap_or(1)
    }

    pub fn created_at(&self) -> &str {
        self.get_str(CREATED_AT).unwrap_or_default()
    }

    pub fn get(&self, path: &Path) -> Result<Option<&Value>> {
        Ok(object::get(&self.attributes, path)?)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.attributes.get(name).and_then(Value::as_bool)
    }

    /// Fail with a conflict when the caller's expected epoch is stale
    pub fn check_epoch(&self, expected: Option<u64>) -> Result<()> {
        match expected {
            Some(expected) if expected != self.epoch() => Err(Error::EpochConflict {
                xid: self.xid.clone(),
                expected,
                actual: self.epoch(),
            }),
            _ => Ok(()),
        }
    }

    fn check_writable(&self, path: &Path) -> Result<()> {
        validate_path_depth(path.len())?;
        let top = match path.first() {
            Some(PathPart::Key(k)) => k.as_str(),
            Some(PathPart::Index(_)) | None => {
                return Err(Error::Validation(format!(
                    "\"{}\" does not name an attribute",
                    path
                )))
            }
        };

        let name = if top.starts_with(&format!("{}.", LABELS)) {
            LABELS
        } else {
            top
        };
        if self.kind.is_system_attribute(name, &self.id_attribute()) {
            return Err(Error::Validation(format!(
                "Attribute \"{}\" of {} is read-only",
                name, self.xid
            )));
        }
        if name.contains('.') {
            // rejected by the object tree with a precise message
            return Ok(());
        }
        validate_attribute_name(name)?;
        Ok(())
    }

    /// Client write of one attribute path. Null deletes.
    pub fn set(&mut self, path: &Path, value: Value) -> Result<()> {
        self.check_writable(path)?;
        object::set(&mut self.attributes, path, value)?;
        self.touch();
        Ok(())
    }

    /// Server write of a top-level attribute, bypassing read-only checks
    pub(crate) fn set_system(&mut self, name: &str, value: Value) {
        let map = self.map_mut();
        if value.is_null() {
            map.remove(name);
        } else {
            map.insert(name.to_string(), value);
        }
        self.touch();
    }

    /// Names of attributes a client may see and write
    fn is_user_attribute(&self, name: &str) -> bool {
        !name.starts_with('#') && !self.kind.is_system_attribute(name, &self.id_attribute())
    }

    pub fn user_attributes(&self) -> Map<String, Value> {
        let mut out = Map::new();
        if let Value::Object(map) = &self.attributes {
            for (k, v) in map {
                if self.is_user_attribute(k) {
                    out.insert(k.clone(), v.clone());
                }
            }
        }
        out
    }

    /// Replace every user attribute (PUT semantics)
    pub fn replace_user_attributes(&mut self, attrs: Map<String, Value>) -> Result<()> {
        for name in attrs.keys() {
            self.check_writable(&Path::key(name.as_str()))?;
        }

        let id_attribute = self.id_attribute();
        let kind = self.kind;
        self.map_mut()
            .retain(|k, _| k.starts_with('#') || kind.is_system_attribute(k, &id_attribute));
        for (name, value) in attrs {
            if !value.is_null() {
                object::set(&mut self.attributes, &Path::key(name), value)?;
            }
        }
        self.touch();
        Ok(())
    }

    /// Merge user attributes (PATCH semantics): null removes a key
    pub fn merge_user_attributes(&mut self, attrs: Map<String, Value>) -> Result<()> {
        for name in attrs.keys() {
            self.check_writable(&Path::key(name.as_str()))?;
        }
        for (name, value) in attrs {
            object::set(&mut self.attributes, &Path::key(name), value)?;
        }
        self.touch();
        Ok(())
    }

    /// Record a mutation: the epoch advances once per transaction
    pub fn touch(&mut self) {
        match self.change {
            Change::New | Change::Dirty => {}
            Change::Clean => {
                let next = self.epoch() + 1;
                let now = timestamp();
                let map = self.map_mut();
                map.insert(EPOCH.to_string(), Value::from(next));
                map.insert(MODIFIED_AT.to_string(), Value::String(now));
                self.change = Change::Dirty;
            }
        }
    }

    pub fn is_new(&self) -> bool {
        self.change == Change::New
    }

    /// New or modified since the last load/commit
    pub fn is_dirty(&self) -> bool {
        self.change != Change::Clean
    }

    pub fn mark_clean(&mut self) {
        self.change = Change::Clean;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn clean_group() -> Entity {
        let mut e = Entity::new(EntityKind::Group, "e1", "endpoint", "endpoints", "/endpoints/e1", None);
        e.mark_clean();
        e
    }

    #[test]
    fn test_entity_creation() {
        let e = Entity::new(EntityKind::Group, "e1", "endpoint", "endpoints", "/endpoints/e1", None);
        assert_eq!(e.epoch(), 1);
        assert_eq!(e.get_str("endpointid"), Some("e1"));
        assert!(e.is_new());
        assert!(e.user_attributes().is_empty());
    }

    #[test]
    fn test_set_bumps_epoch_once() {
        let mut e = clean_group();
        e.set(&Path::parse("description").unwrap(), json!("hi")).unwrap();
        e.set(&Path::parse("labels.stage").unwrap(), json!("prod")).unwrap();
        assert_eq!(e.epoch(), 2);
        assert!(e.is_dirty());

        e.mark_clean();
        e.set(&Path::parse("description").unwrap(), Value::Null).unwrap();
        assert_eq!(e.epoch(), 3);
        assert_eq!(
            Value::Object(e.user_attributes()),
            json!({"labels": {"stage": "prod"}})
        );
    }

    #[test]
    fn test_system_attributes_are_read_only() {
        let mut e = clean_group();
        for name in ["epoch", "endpointid", "xid", "createdat"] {
            assert!(e.set(&Path::key(name), json!(5)).is_err(), "{}", name);
        }
        assert!(e.set(&Path::key("#hidden"), json!(1)).is_err());
        assert!(e.set(&Path::key("Bad-Name"), json!(1)).is_err());
        assert!(e.set(&Path::root(), json!({})).is_err());
        assert_eq!(e.epoch(), 1);
        assert!(!e.is_dirty());
    }

    #[test]
    fn test_epoch_check() {
        let e = clean_group();
        assert!(e.check_epoch(None).is_ok());
        assert!(e.check_epoch(Some(1)).is_ok());
        assert!(matches!(
            e.check_epoch(Some(7)),
            Err(Error::EpochConflict {
                expected: 7,
                actual: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_replace_and_merge() {
        let mut e = clean_group();
        let attrs = json!({"a": 1, "b": {"c": 2}});
        e.replace_user_attributes(attrs.as_object().unwrap().clone()).unwrap();
        assert_eq!(Value::Object(e.user_attributes()), attrs);

        let patch = json!({"a": null, "labels.env": "dev"});
        e.merge_user_attributes(patch.as_object().unwrap().clone()).unwrap();
        assert_eq!(
            Value::Object(e.user_attributes()),
            json!({"b": {"c": 2}, "labels": {"env": "dev"}})
        );

        let replace = json!({"z": true});
        e.replace_user_attributes(replace.as_object().unwrap().clone()).unwrap();
        assert_eq!(Value::Object(e.user_attributes()), replace);
        assert_eq!(e.get_str("endpointid"), Some("e1"));
        assert_eq!(e.epoch(), 2);
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            EntityKind::Registry,
            EntityKind::Group,
            EntityKind::Resource,
            EntityKind::Meta,
            EntityKind::Version,
        ] {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
    }
}
