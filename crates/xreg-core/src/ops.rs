//! Write operations on a loaded registry tree
//!
//! Every operation validates and checks epochs before it mutates anything;
//! callers discard the tree when an operation fails.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::entity::{
    Entity, CREATED_AT, EPOCH, IS_LATEST, LATEST_VERSION_ID, LATEST_VERSION_STICKY,
    LATEST_VERSION_URL, MODIFIED_AT, SELF, SPEC_VERSION, VERSION_ID, XID,
};
use crate::error::{Error, Result};
use crate::lifecycle::LifecycleError;
use crate::model::{GroupModel, Model, ResourceModel, CAPABILITIES, META, MODEL, VERSIONS};
use crate::path::Path;
use crate::target::{GroupKey, ResourceKey, Target};
use crate::tree::{RegistryTree, ResourceNode};

/// Values a client may echo back from a GET; they are ignored on write
const ROUND_TRIP: &[&str] = &[
    SELF,
    XID,
    CREATED_AT,
    MODIFIED_AT,
    SPEC_VERSION,
    MODEL,
    CAPABILITIES,
    META,
    "metaurl",
    LATEST_VERSION_ID,
    LATEST_VERSION_URL,
    LATEST_VERSION_STICKY,
];

/// Whether a write replaces all user attributes or merges into them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Replace,
    Merge,
}

/// Request-level options of a write
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Expected epoch of the target (`?epoch=`)
    pub epoch: Option<u64>,
    /// `?setlatestversionid=`
    pub set_latest: Option<String>,
}

impl WriteOptions {
    pub fn with_epoch(mut self, epoch: u64) -> Self {
        self.epoch = Some(epoch);
        self
    }

    pub fn with_set_latest(mut self, vid: impl Into<String>) -> Self {
        self.set_latest = Some(vid.into());
        self
    }
}

/// A client body split into user attributes and control values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Incoming {
    pub attributes: Map<String, Value>,
    /// Value of the id attribute when the URL doesn't fix it
    pub id: Option<String>,
    pub epoch: Option<u64>,
    pub islatest: Option<bool>,
    /// `versionid` in a resource body
    pub versionid: Option<String>,
}

impl Incoming {
    /// Split `body`. `collections` are the nested collection names of the
    /// entity; writing through them isn't supported.
    pub fn parse(
        body: Value,
        id_attribute: &str,
        expected_id: Option<&str>,
        collections: &[&str],
    ) -> Result<Self> {
        let Value::Object(map) = body else {
            return Err(Error::Validation("Body must be a JSON object".to_string()));
        };

        let mut incoming = Incoming::default();
        for (key, value) in map {
            if key == id_attribute {
                let id = value.as_str().ok_or_else(|| {
                    Error::Validation(format!("\"{}\" must be a string", id_attribute))
                })?;
                match expected_id {
                    Some(expected) if expected != id => {
                        return Err(Error::Validation(format!(
                            "\"{}\" must be \"{}\", not \"{}\"",
                            id_attribute, expected, id
                        )))
                    }
                    Some(_) => {}
                    None => incoming.id = Some(id.to_string()),
                }
            } else if key == EPOCH {
                if !value.is_null() {
                    incoming.epoch = Some(value.as_u64().ok_or_else(|| {
                        Error::Validation("\"epoch\" must be a non-negative integer".to_string())
                    })?);
                }
            } else if key == IS_LATEST {
                if !value.is_null() {
                    incoming.islatest = Some(value.as_bool().ok_or_else(|| {
                        Error::Validation("\"islatest\" must be a boolean".to_string())
                    })?);
                }
            } else if key == VERSION_ID {
                incoming.versionid = value.as_str().map(str::to_string);
            } else if collections.contains(&key.as_str()) {
                return Err(Error::Validation(format!(
                    "Nested collection \"{}\" can't be written here",
                    key
                )));
            } else if ROUND_TRIP.contains(&key.as_str()) || is_collection_field(&key, collections)
            {
                continue;
            } else {
                incoming.attributes.insert(key, value);
            }
        }
        Ok(incoming)
    }

    fn expected_epoch(&self, opts: &WriteOptions) -> Option<u64> {
        opts.epoch.or(self.epoch)
    }
}

fn is_collection_field(key: &str, collections: &[&str]) -> bool {
    collections.iter().any(|c| {
        key.strip_prefix(c)
            .is_some_and(|rest| rest == "url" || rest == "count")
    })
}

fn apply(entity: &mut Entity, mode: WriteMode, attributes: Map<String, Value>) -> Result<()> {
    match mode {
        WriteMode::Replace => entity.replace_user_attributes(attributes),
        WriteMode::Merge => entity.merge_user_attributes(attributes),
    }
}

fn body_map(body: Value, what: &str) -> Result<Map<String, Value>> {
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(Error::Validation(format!(
            "Body must be a map of {} ids to attributes",
            what
        ))),
    }
}

fn group_model<'m>(model: &'m Model, plural: &str) -> Result<&'m GroupModel> {
    model
        .group(plural)
        .ok_or_else(|| Error::NotFound(format!("/{}", plural)))
}

fn resource_model<'m>(
    model: &'m Model,
    key: &ResourceKey,
) -> Result<(&'m GroupModel, &'m ResourceModel)> {
    let group = group_model(model, &key.group.plural)?;
    let resource = group
        .resource(&key.plural)
        .ok_or_else(|| Error::NotFound(format!("/{}/{}", key.group.plural, key.plural)))?;
    Ok((group, resource))
}

/// Client request to move the latest pointer
fn request_latest(node: &mut ResourceNode, policy: &ResourceModel, vid: &str) -> Result<()> {
    if policy.latest_is_server_controlled() {
        warn!("Rejected latest version change on {}", node.entity.xid);
        return Err(LifecycleError::LatestServerControlled(node.entity.xid.clone()).into());
    }
    node.set_latest(vid)
}

fn not_found(xid: String) -> Error {
    Error::NotFound(xid)
}

impl RegistryTree {
    /// PUT/PATCH on the registry entity
    pub fn update_registry(
        &mut self,
        model: &Model,
        body: Value,
        mode: WriteMode,
        opts: &WriteOptions,
    ) -> Result<()> {
        let collections: Vec<&str> = model.groups.keys().map(String::as_str).collect();
        let id_attribute = self.registry.id_attribute();
        let incoming = Incoming::parse(body, &id_attribute, Some(self.registry.id.as_str()), &collections)?;
        self.registry.check_epoch(incoming.expected_epoch(opts))?;
        apply(&mut self.registry, mode, incoming.attributes)
    }

    /// Create or update one group. Returns whether it was created.
    pub fn write_group(
        &mut self,
        model: &Model,
        key: &GroupKey,
        body: Value,
        mode: WriteMode,
        opts: &WriteOptions,
    ) -> Result<bool> {
        let gm = group_model(model, &key.plural)?;
        let collections: Vec<&str> = gm.resources.keys().map(String::as_str).collect();
        let incoming = Incoming::parse(
            body,
            &format!("{}id", gm.singular),
            Some(key.id.as_str()),
            &collections,
        )?;

        if let Some(existing) = self.group(key) {
            existing.entity.check_epoch(incoming.expected_epoch(opts))?;
        }
        let (node, created) = self.ensure_group(gm, key)?;
        apply(&mut node.entity, mode, incoming.attributes)?;
        debug!("{} group {}", if created { "Created" } else { "Updated" }, key.xid());
        Ok(created)
    }

    /// POST on a group collection: map of id -> attributes
    pub fn upsert_groups(&mut self, model: &Model, plural: &str, body: Value) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for (id, attrs) in body_map(body, "group")? {
            let key = GroupKey::new(plural, id.as_str());
            self.write_group(model, &key, attrs, WriteMode::Replace, &WriteOptions::default())?;
            ids.push(id);
        }
        Ok(ids)
    }

    pub fn delete_group(&mut self, key: &GroupKey, opts: &WriteOptions) -> Result<()> {
        let group = self.group(key).ok_or_else(|| not_found(key.xid()))?;
        group.entity.check_epoch(opts.epoch)?;
        self.remove_group(key);
        debug!("Deleted group {}", key.xid());
        Ok(())
    }

    /// PUT/PATCH on a resource: updates its latest version, creating the
    /// resource and a first version when needed
    pub fn write_resource(
        &mut self,
        model: &Model,
        key: &ResourceKey,
        body: Value,
        mode: WriteMode,
        opts: &WriteOptions,
    ) -> Result<bool> {
        let (gm, rm) = resource_model(model, key)?;
        let incoming = Incoming::parse(
            body,
            &format!("{}id", rm.singular),
            Some(key.id.as_str()),
            &[VERSIONS],
        )?;

        if let Some(latest) = self.resource(key).and_then(ResourceNode::latest) {
            latest.check_epoch(incoming.expected_epoch(opts))?;
            if let Some(vid) = &incoming.versionid {
                if vid != &latest.id {
                    return Err(Error::Validation(format!(
                        "\"versionid\" must be the latest version \"{}\", not \"{}\"",
                        latest.id, vid
                    )));
                }
            }
        }

        let (node, created) = self.ensure_resource(gm, rm, key)?;
        let vid = match node.latest_id() {
            Some(vid) => vid.to_string(),
            None => node.add_version(rm, incoming.versionid.as_deref(), None)?,
        };
        let version = node
            .versions
            .get_mut(&vid)
            .ok_or_else(|| not_found(key.version_xid(&vid)))?;
        apply(version, mode, incoming.attributes)?;

        if let Some(target) = &opts.set_latest {
            request_latest(node, rm, target)?;
        }
        Ok(created)
    }

    /// POST on a resource collection: map of id -> attributes
    pub fn upsert_resources(
        &mut self,
        model: &Model,
        group: &GroupKey,
        plural: &str,
        body: Value,
    ) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for (id, attrs) in body_map(body, "resource")? {
            let key = group.resource(plural, id.as_str());
            self.write_resource(model, &key, attrs, WriteMode::Replace, &WriteOptions::default())?;
            ids.push(id);
        }
        Ok(ids)
    }

    pub fn delete_resource(&mut self, key: &ResourceKey, opts: &WriteOptions) -> Result<()> {
        let node = self.resource(key).ok_or_else(|| not_found(key.xid()))?;
        if let Some(latest) = node.latest() {
            latest.check_epoch(opts.epoch)?;
        }
        self.remove_resource(key);
        debug!("Deleted resource {}", key.xid());
        Ok(())
    }

    /// POST on a resource: add a new version. Returns its id.
    pub fn add_version(
        &mut self,
        model: &Model,
        key: &ResourceKey,
        body: Value,
        opts: &WriteOptions,
    ) -> Result<String> {
        let (gm, rm) = resource_model(model, key)?;
        let mut incoming = Incoming::parse(body, VERSION_ID, None, &[])?;
        incoming.attributes.remove(&format!("{}id", rm.singular));

        let (node, _) = self.ensure_resource(gm, rm, key)?;
        let vid = node.add_version(rm, incoming.id.as_deref(), incoming.islatest)?;
        let version = node
            .versions
            .get_mut(&vid)
            .ok_or_else(|| not_found(key.version_xid(&vid)))?;
        apply(version, WriteMode::Replace, incoming.attributes)?;

        if let Some(target) = &opts.set_latest {
            request_latest(node, rm, target)?;
        }
        debug!("Added version {}", key.version_xid(&vid));
        Ok(vid)
    }

    /// Create or update one version. Returns whether it was created.
    #[allow(clippy::too_many_arguments)]
    pub fn write_version(
        &mut self,
        model: &Model,
        key: &ResourceKey,
        vid: &str,
        body: Value,
        mode: WriteMode,
        opts: &WriteOptions,
    ) -> Result<bool> {
        let (gm, rm) = resource_model(model, key)?;
        let mut incoming = Incoming::parse(body, VERSION_ID, Some(vid), &[])?;
        incoming.attributes.remove(&format!("{}id", rm.singular));
        let expected = incoming.expected_epoch(opts);

        if let Some(existing) = self.resource(key).and_then(|n| n.versions.get(vid)) {
            existing.check_epoch(expected)?;
        }

        let (node, _) = self.ensure_resource(gm, rm, key)?;
        let created = !node.versions.contains_key(vid);
        if created {
            node.add_version(rm, Some(vid), incoming.islatest)?;
        } else if let Some(flag) = incoming.islatest {
            node.apply_latest_flag(rm, vid, flag)?;
        }

        let version = node
            .versions
            .get_mut(vid)
            .ok_or_else(|| not_found(key.version_xid(vid)))?;
        apply(version, mode, incoming.attributes)?;

        if let Some(target) = &opts.set_latest {
            request_latest(node, rm, target)?;
        }
        Ok(created)
    }

    /// POST on a versions collection: map of version id -> attributes
    pub fn upsert_versions(
        &mut self,
        model: &Model,
        key: &ResourceKey,
        body: Value,
        opts: &WriteOptions,
    ) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for (vid, attrs) in body_map(body, "version")? {
            self.write_version(model, key, &vid, attrs, WriteMode::Replace, &WriteOptions::default())?;
            ids.push(vid);
        }

        if let Some(target) = &opts.set_latest {
            let (_, rm) = resource_model(model, key)?;
            let node = self.resource_mut(key).ok_or_else(|| not_found(key.xid()))?;
            request_latest(node, rm, target)?;
        }
        Ok(ids)
    }

    /// Delete one version; `opts.set_latest` names the replacement latest
    pub fn delete_version(
        &mut self,
        model: &Model,
        key: &ResourceKey,
        vid: &str,
        opts: &WriteOptions,
    ) -> Result<()> {
        let (_, rm) = resource_model(model, key)?;
        let node = self.resource_mut(key).ok_or_else(|| not_found(key.xid()))?;
        let version = node
            .versions
            .get(vid)
            .ok_or_else(|| not_found(key.version_xid(vid)))?;
        version.check_epoch(opts.epoch)?;

        if rm.latest_is_server_controlled() {
            if opts.set_latest.is_some() {
                return Err(LifecycleError::LatestServerControlled(node.entity.xid.clone()).into());
            }
            let replacement = if node.is_latest(vid) {
                node.newest_version(Some(vid)).map(str::to_string)
            } else {
                None
            };
            node.delete_version(vid, replacement.as_deref())?;
            node.unstick();
        } else {
            node.delete_version(vid, opts.set_latest.as_deref())?;
        }
        Ok(())
    }

    /// PATCH on a resource's meta: move the latest pointer or release it
    pub fn patch_meta(
        &mut self,
        model: &Model,
        key: &ResourceKey,
        body: Value,
        opts: &WriteOptions,
    ) -> Result<()> {
        let (_, rm) = resource_model(model, key)?;
        let node = self.resource_mut(key).ok_or_else(|| not_found(key.xid()))?;
        let Value::Object(map) = body else {
            return Err(Error::Validation("Body must be a JSON object".to_string()));
        };

        let id_attribute = node.meta.id_attribute();
        let mut expected = opts.epoch;
        let mut latest = None;
        let mut sticky = None;
        for (k, v) in map {
            match k.as_str() {
                LATEST_VERSION_ID => latest = v.as_str().map(str::to_string),
                LATEST_VERSION_STICKY => sticky = v.as_bool(),
                EPOCH => expected = expected.or(v.as_u64()),
                SELF | XID | CREATED_AT | MODIFIED_AT | LATEST_VERSION_URL => {}
                other if other == id_attribute => {}
                other => {
                    return Err(Error::Validation(format!(
                        "Meta attribute \"{}\" is not writable",
                        other
                    )))
                }
            }
        }
        node.meta.check_epoch(expected)?;

        match sticky {
            Some(false) => node.unstick(),
            Some(true) => {
                let current = node
                    .latest_id()
                    .map(str::to_string)
                    .ok_or_else(|| LifecycleError::LatestRequired(node.entity.xid.clone()))?;
                request_latest(node, rm, &current)?;
            }
            None => {}
        }
        if let Some(vid) = latest {
            request_latest(node, rm, &vid)?;
        }
        Ok(())
    }

    /// Set one attribute by path on the entity a target names. Resources
    /// write through to their latest version, whose epoch `opts.epoch` is
    /// checked against.
    pub fn set_attribute(
        &mut self,
        target: &Target,
        path: &Path,
        value: Value,
        opts: &WriteOptions,
    ) -> Result<()> {
        let missing = || not_found(target.to_string());
        let entity = match target {
            Target::Registry => &mut self.registry,
            Target::Group(key) => &mut self.group_mut(key).ok_or_else(missing)?.entity,
            Target::Resource(key) => self
                .resource_mut(key)
                .and_then(ResourceNode::latest_mut)
                .ok_or_else(missing)?,
            Target::Version(key, vid) => self
                .resource_mut(key)
                .and_then(|n| n.versions.get_mut(vid))
                .ok_or_else(missing)?,
            _ => {
                return Err(Error::Validation(format!(
                    "Attributes can't be set on {}",
                    target
                )))
            }
        };
        entity.check_epoch(opts.epoch)?;
        entity.set(path, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ResourceState;
    use crate::model::sample_model;
    use serde_json::json;

    fn committed(tree: &mut RegistryTree) {
        tree.mark_committed();
    }

    fn message() -> ResourceKey {
        GroupKey::new("endpoints", "e1").resource("messages", "m1")
    }

    fn schema() -> ResourceKey {
        GroupKey::new("schemagroups", "g1").resource("schemas", "s1")
    }

    #[test]
    fn test_incoming_parse() {
        let body = json!({
            "endpointid": "e1",
            "epoch": 3,
            "self": "http://x/endpoints/e1",
            "messagesurl": "http://x/endpoints/e1/messages",
            "messagescount": 0,
            "description": "d"
        });
        let incoming = Incoming::parse(body, "endpointid", Some("e1"), &["messages"]).unwrap();
        assert_eq!(incoming.epoch, Some(3));
        assert_eq!(Value::Object(incoming.attributes), json!({"description": "d"}));

        let wrong_id = json!({"endpointid": "e2"});
        assert!(Incoming::parse(wrong_id, "endpointid", Some("e1"), &[]).is_err());
        let nested = json!({"messages": {}});
        assert!(Incoming::parse(nested, "endpointid", Some("e1"), &["messages"]).is_err());
        assert!(Incoming::parse(json!([1]), "endpointid", None, &[]).is_err());
        let bad_epoch = json!({"epoch": "one"});
        assert!(Incoming::parse(bad_epoch, "endpointid", None, &[]).is_err());
    }

    #[test]
    fn test_group_write_and_epoch_guard() {
        let model = sample_model();
        let mut tree = RegistryTree::new("reg");
        let key = GroupKey::new("endpoints", "e1");
        let created = tree
            .write_group(&model, &key, json!({"name": "one"}), WriteMode::Replace, &WriteOptions::default())
            .unwrap();
        assert!(created);
        committed(&mut tree);

        let stale = WriteOptions::default().with_epoch(5);
        let err = tree
            .write_group(&model, &key, json!({"name": "two"}), WriteMode::Merge, &stale)
            .unwrap_err();
        assert!(matches!(err, Error::EpochConflict { actual: 1, .. }));
        assert_eq!(tree.group(&key).unwrap().entity.get_str("name"), Some("one"));

        let fresh = WriteOptions::default().with_epoch(1);
        tree.write_group(&model, &key, json!({"extra": true}), WriteMode::Merge, &fresh)
            .unwrap();
        let entity = &tree.group(&key).unwrap().entity;
        assert_eq!(entity.epoch(), 2);
        assert_eq!(entity.get_str("name"), Some("one"));

        assert!(tree
            .delete_group(&key, &WriteOptions::default().with_epoch(1))
            .is_err());
        tree.delete_group(&key, &WriteOptions::default()).unwrap();
        assert!(tree.group(&key).is_none());
    }

    #[test]
    fn test_resource_write_targets_latest_version() {
        let model = sample_model();
        let mut tree = RegistryTree::new("reg");
        let key = message();
        tree.write_resource(&model, &key, json!({"format": "avro"}), WriteMode::Replace, &WriteOptions::default())
            .unwrap();
        tree.add_version(&model, &key, json!({"format": "json"}), &WriteOptions::default())
            .unwrap();

        let node = tree.resource(&key).unwrap();
        assert_eq!(node.latest_id(), Some("2"));

        tree.write_resource(&model, &key, json!({"size": 1}), WriteMode::Merge, &WriteOptions::default())
            .unwrap();
        let node = tree.resource(&key).unwrap();
        assert_eq!(node.versions["2"].get_str("format"), Some("json"));
        assert_eq!(node.versions["2"].attributes()["size"], 1);
        assert!(node.versions["1"].attributes().get("size").is_none());
    }

    #[test]
    fn test_version_writes_and_latest() {
        let model = sample_model();
        let mut tree = RegistryTree::new("reg");
        let key = message();
        let opts = WriteOptions::default();
        assert!(tree.write_version(&model, &key, "v1", json!({}), WriteMode::Replace, &opts).unwrap());
        tree.write_version(&model, &key, "v2", json!({"islatest": false}), WriteMode::Replace, &opts)
            .unwrap();
        assert_eq!(tree.resource(&key).unwrap().latest_id(), Some("v1"));

        tree.write_version(&model, &key, "v2", json!({"islatest": true}), WriteMode::Merge, &opts)
            .unwrap();
        assert_eq!(tree.resource(&key).unwrap().latest_id(), Some("v2"));

        let err = tree
            .write_version(&model, &key, "v3", json!({"versionid": "other"}), WriteMode::Replace, &opts)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_delete_version_with_replacement() {
        let model = sample_model();
        let mut tree = RegistryTree::new("reg");
        let key = message();
        let opts = WriteOptions::default();
        tree.add_version(&model, &key, json!({}), &opts).unwrap();

        let err = tree.delete_version(&model, &key, "1", &opts).unwrap_err();
        assert!(matches!(err, Error::Lifecycle(LifecycleError::LatestRequired(_))));

        tree.add_version(&model, &key, json!({}), &opts).unwrap();
        tree.delete_version(&model, &key, "2", &opts.clone().with_set_latest("1"))
            .unwrap();
        let node = tree.resource(&key).unwrap();
        assert_eq!(node.latest_id(), Some("1"));
        assert!(matches!(
            tree.delete_version(&model, &key, "9", &opts),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_resource_always_keeps_a_version() {
        let model = sample_model();
        let mut tree = RegistryTree::new("reg");
        let group = GroupKey::new("endpoints", "e1");
        let opts = WriteOptions::default();

        tree.upsert_resources(&model, &group, "messages", json!({"m1": {}}))
            .unwrap();
        let key = message();
        let node = tree.resource(&key).unwrap();
        assert_eq!(node.state(), ResourceState::HasVersions { latest: "1" });

        for attempt in [opts.clone(), opts.clone().with_set_latest("1")] {
            assert!(matches!(
                tree.delete_version(&model, &key, "1", &attempt),
                Err(Error::Lifecycle(_))
            ));
        }
        assert_eq!(tree.resource(&key).unwrap().versions.len(), 1);

        tree.delete_resource(&key, &opts).unwrap();
        assert!(tree.resource(&key).is_none());
    }

    #[test]
    fn test_server_controlled_resources() {
        let model = sample_model();
        let mut tree = RegistryTree::new("reg");
        let key = schema();
        let opts = WriteOptions::default();
        tree.add_version(&model, &key, json!({}), &opts).unwrap();
        tree.add_version(&model, &key, json!({}), &opts).unwrap();

        let err = tree
            .patch_meta(&model, &key, json!({"latestversionid": "1"}), &opts)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Lifecycle(LifecycleError::LatestServerControlled(_))
        ));

        // deleting the latest lets the server pick the newest remaining
        tree.delete_version(&model, &key, "2", &opts).unwrap();
        assert_eq!(tree.resource(&key).unwrap().latest_id(), Some("1"));
        assert!(tree.delete_version(&model, &key, "1", &opts).is_err());
    }

    #[test]
    fn test_patch_meta() {
        let model = sample_model();
        let mut tree = RegistryTree::new("reg");
        let key = message();
        let opts = WriteOptions::default();
        tree.add_version(&model, &key, json!({}), &opts).unwrap();
        tree.add_version(&model, &key, json!({}), &opts).unwrap();

        tree.patch_meta(&model, &key, json!({"latestversionid": "1"}), &opts)
            .unwrap();
        let node = tree.resource(&key).unwrap();
        assert_eq!(node.latest_id(), Some("1"));
        assert!(node.is_sticky());

        tree.patch_meta(&model, &key, json!({"latestversionsticky": false}), &opts)
            .unwrap();
        let node = tree.resource(&key).unwrap();
        assert_eq!(node.latest_id(), Some("2"));
        assert!(!node.is_sticky());

        assert!(tree
            .patch_meta(&model, &key, json!({"color": "red"}), &opts)
            .is_err());
    }

    #[test]
    fn test_set_attribute_by_path() {
        let model = sample_model();
        let mut tree = RegistryTree::new("reg");
        let key = message();
        tree.add_version(&model, &key, json!({}), &WriteOptions::default())
            .unwrap();

        let opts = WriteOptions::default();
        let target = Target::Resource(key.clone());
        tree.set_attribute(&target, &Path::parse("docs.links[1]").unwrap(), json!("x"), &opts)
            .unwrap();
        let latest = tree.resource(&key).unwrap().latest().unwrap();
        assert_eq!(latest.attributes()["docs"], json!({"links": [null, "x"]}));

        assert!(tree
            .set_attribute(&Target::Model, &Path::key("x"), json!(1), &opts)
            .is_err());
        assert!(tree
            .set_attribute(
                &Target::Group(GroupKey::new("endpoints", "nope")),
                &Path::key("x"),
                json!(1),
                &opts
            )
            .is_err());
    }

    #[test]
    fn test_set_attribute_checks_epoch() {
        let model = sample_model();
        let mut tree = RegistryTree::new("reg");
        let key = message();
        tree.add_version(&model, &key, json!({"name": "a"}), &WriteOptions::default())
            .unwrap();
        committed(&mut tree);

        let target = Target::Version(key.clone(), "1".to_string());
        let stale = WriteOptions::default().with_epoch(7);
        let err = tree
            .set_attribute(&target, &Path::key("name"), json!("b"), &stale)
            .unwrap_err();
        assert!(matches!(err, Error::EpochConflict { expected: 7, actual: 1, .. }));

        let version = &tree.resource(&key).unwrap().versions["1"];
        assert_eq!(version.attributes()["name"], json!("a"));
        assert_eq!(version.epoch(), 1);
        assert!(!version.is_dirty());

        let current = WriteOptions::default().with_epoch(1);
        tree.set_attribute(&target, &Path::key("name"), json!("b"), &current)
            .unwrap();
        let version = &tree.resource(&key).unwrap().versions["1"];
        assert_eq!(version.attributes()["name"], json!("b"));
        assert_eq!(version.epoch(), 2);
    }
}
