//! Serialization of registry entities into response documents

use serde_json::{json, Map, Value};

use crate::entity::{Entity, IS_LATEST, LATEST_VERSION_STICKY, LATEST_VERSION_URL, SELF, XID};
use crate::error::{Error, Result};
use crate::filter::{Candidate, Filter, Selection};
use crate::inline::Inline;
use crate::model::{Model, CAPABILITIES, META, MODEL, VERSIONS};
use crate::path::Path;
use crate::target::{GroupKey, ResourceKey, Target};
use crate::tree::{GroupNode, RegistryTree, ResourceNode};

/// The static capabilities document
pub fn capabilities() -> Value {
    json!({
        "flags": ["epoch", "filter", "inline", "setlatestversionid"],
        "mutable": [],
        "pagination": false,
        "schemas": ["xRegistry-json/0.5"],
        "specversions": ["0.5"]
    })
}

fn child_xid(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Per-call rendering state, handed down by value
#[derive(Debug, Clone)]
pub struct RenderCtx<'a> {
    inline: &'a Inline,
    selection: &'a Selection,
    /// Collection path relative to the request target
    path: Path,
}

impl<'a> RenderCtx<'a> {
    pub fn new(inline: &'a Inline, selection: &'a Selection) -> Self {
        Self {
            inline,
            selection,
            path: Path::root(),
        }
    }

    fn expands(&self, name: &str) -> bool {
        self.inline
            .should_inline(&self.path.with_prop(name).to_abstract())
    }

    fn descend(&self, name: &str) -> Self {
        Self {
            inline: self.inline,
            selection: self.selection,
            path: self.path.with_prop(name),
        }
    }
}

/// Renders parts of a loaded registry tree
pub struct Renderer<'a> {
    model: &'a Model,
    tree: &'a RegistryTree,
    base_url: &'a str,
}

impl<'a> Renderer<'a> {
    pub fn new(model: &'a Model, tree: &'a RegistryTree, base_url: &'a str) -> Self {
        Self {
            model,
            tree,
            base_url: base_url.trim_end_matches('/'),
        }
    }

    fn url(&self, xid: &str) -> String {
        format!("{}{}", self.base_url, xid)
    }

    /// Render the document addressed by `target`
    pub fn render(&self, target: &Target, inline: &Inline, filter: &Filter) -> Result<Value> {
        match target {
            Target::Model => return Ok(serde_json::to_value(self.model)?),
            Target::Capabilities => return Ok(capabilities()),
            _ => {}
        }

        let selection = filter.select(&self.candidates(target)?);
        let ctx = RenderCtx::new(inline, &selection);
        let hidden = |e: &Entity| Error::NotFound(format!("{} (filtered)", e.xid));

        let value = match target {
            Target::Registry => self.registry_view(ctx)?,
            Target::Groups(plural) => self.groups_view(plural, ctx),
            Target::Group(key) => {
                let group = self.group(key)?;
                if !selection.is_kept(&group.entity.uid) {
                    return Err(hidden(&group.entity));
                }
                self.group_view(group, ctx)
            }
            Target::Resources(key, plural) => {
                let group = self.group(key)?;
                self.resources_view(group, plural, ctx)
            }
            Target::Resource(key) => {
                let node = self.resource(key)?;
                if !selection.is_kept(&node.entity.uid) {
                    return Err(hidden(&node.entity));
                }
                self.resource_view(node, ctx)
            }
            Target::Meta(key) => Value::Object(self.meta_attrs(self.resource(key)?)),
            Target::Versions(key) => self.versions_view(self.resource(key)?, ctx),
            Target::Version(key, vid) => {
                let node = self.resource(key)?;
                let version = self.version(node, vid)?;
                if !selection.is_kept(&version.uid) {
                    return Err(hidden(version));
                }
                Value::Object(self.version_attrs(node, version))
            }
            Target::Model | Target::Capabilities => Value::Null,
        };
        Ok(value)
    }

    fn group(&self, key: &GroupKey) -> Result<&'a GroupNode> {
        self.tree
            .group(key)
            .ok_or_else(|| Error::NotFound(key.xid()))
    }

    fn resource(&self, key: &ResourceKey) -> Result<&'a ResourceNode> {
        self.tree
            .resource(key)
            .ok_or_else(|| Error::NotFound(key.xid()))
    }

    fn version<'n>(&self, node: &'n ResourceNode, vid: &str) -> Result<&'n Entity> {
        node.versions
            .get(vid)
            .ok_or_else(|| Error::NotFound(format!("{}/{}/{}", node.entity.xid, VERSIONS, vid)))
    }

    /// Attributes shown for any entity: stored values minus internal ones
    fn entity_attrs(&self, entity: &Entity) -> Map<String, Value> {
        let mut out = Map::new();
        if let Value::Object(map) = entity.attributes() {
            for (k, v) in map {
                if !k.starts_with('#') {
                    out.insert(k.clone(), v.clone());
                }
            }
        }
        out.insert(SELF.to_string(), Value::String(self.url(&entity.xid)));
        out.insert(XID.to_string(), Value::String(entity.xid.clone()));
        out
    }

    /// A resource shows the attributes of its latest version under its own
    /// identity
    fn resource_attrs(&self, node: &ResourceNode) -> Map<String, Value> {
        let mut out = match node.latest() {
            Some(latest) => self.entity_attrs(latest),
            None => self.entity_attrs(&node.entity),
        };
        out.remove(IS_LATEST);
        out.insert(node.entity.id_attribute(), Value::String(node.entity.id.clone()));
        out.insert(SELF.to_string(), Value::String(self.url(&node.entity.xid)));
        out.insert(XID.to_string(), Value::String(node.entity.xid.clone()));
        out.insert(
            format!("{}url", META),
            Value::String(self.url(&node.meta.xid)),
        );
        out
    }

    fn meta_attrs(&self, node: &ResourceNode) -> Map<String, Value> {
        let mut out = self.entity_attrs(&node.meta);
        if let Some(latest) = node.latest() {
            out.insert(
                LATEST_VERSION_URL.to_string(),
                Value::String(self.url(&latest.xid)),
            );
        }
        out.insert(
            LATEST_VERSION_STICKY.to_string(),
            Value::Bool(node.is_sticky()),
        );
        out
    }

    fn version_attrs(&self, node: &ResourceNode, version: &Entity) -> Map<String, Value> {
        let mut out = self.entity_attrs(version);
        out.insert(node.entity.id_attribute(), Value::String(node.entity.id.clone()));
        out.insert(IS_LATEST.to_string(), Value::Bool(node.is_latest(&version.id)));
        out
    }

    /// Add `<name>url`, `<name>count` and, when inlined, `<name>` itself
    fn add_collection(
        &self,
        out: &mut Map<String, Value>,
        parent_xid: &str,
        name: &str,
        ctx: &RenderCtx<'_>,
        entries: Map<String, Value>,
    ) {
        out.insert(
            format!("{}url", name),
            Value::String(self.url(&child_xid(parent_xid, name))),
        );
        out.insert(format!("{}count", name), Value::from(entries.len()));
        if ctx.expands(name) {
            out.insert(name.to_string(), Value::Object(entries));
        }
    }

    fn registry_view(&self, ctx: RenderCtx<'_>) -> Result<Value> {
        let registry = &self.tree.registry;
        let mut out = self.entity_attrs(registry);

        for plural in self.model.groups.keys() {
            let entries = match self.groups_view(plural, ctx.descend(plural)) {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            self.add_collection(&mut out, &registry.xid, plural, &ctx, entries);
        }
        if ctx.expands(MODEL) {
            out.insert(MODEL.to_string(), serde_json::to_value(self.model)?);
        }
        if ctx.expands(CAPABILITIES) {
            out.insert(CAPABILITIES.to_string(), capabilities());
        }
        Ok(Value::Object(out))
    }

    fn groups_view(&self, plural: &str, ctx: RenderCtx<'_>) -> Value {
        let mut out = Map::new();
        if let Some(groups) = self.tree.groups.get(plural) {
            for (id, group) in groups {
                if ctx.selection.is_kept(&group.entity.uid) {
                    out.insert(id.clone(), self.group_view(group, ctx.clone()));
                }
            }
        }
        Value::Object(out)
    }

    fn group_view(&self, group: &GroupNode, ctx: RenderCtx<'_>) -> Value {
        let mut out = self.entity_attrs(&group.entity);
        let Some(model) = self.model.group(&group.entity.plural) else {
            return Value::Object(out);
        };

        for plural in model.resources.keys() {
            let entries = match self.resources_view(group, plural, ctx.descend(plural)) {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            self.add_collection(&mut out, &group.entity.xid, plural, &ctx, entries);
        }
        Value::Object(out)
    }

    fn resources_view(&self, group: &GroupNode, plural: &str, ctx: RenderCtx<'_>) -> Value {
        let mut out = Map::new();
        if let Some(resources) = group.resources.get(plural) {
            for (id, node) in resources {
                if ctx.selection.is_kept(&node.entity.uid) {
                    out.insert(id.clone(), self.resource_view(node, ctx.clone()));
                }
            }
        }
        Value::Object(out)
    }

    fn resource_view(&self, node: &ResourceNode, ctx: RenderCtx<'_>) -> Value {
        let mut out = self.resource_attrs(node);
        if ctx.expands(META) {
            out.insert(META.to_string(), Value::Object(self.meta_attrs(node)));
        }

        let entries = match self.versions_view(node, ctx.descend(VERSIONS)) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.add_collection(&mut out, &node.entity.xid, VERSIONS, &ctx, entries);
        Value::Object(out)
    }

    fn versions_view(&self, node: &ResourceNode, ctx: RenderCtx<'_>) -> Value {
        let mut out = Map::new();
        for (id, version) in &node.versions {
            if ctx.selection.is_kept(&version.uid) {
                out.insert(id.clone(), Value::Object(self.version_attrs(node, version)));
            }
        }
        Value::Object(out)
    }

    /// Flatten the entities under `target` into filter candidates
    pub fn candidates(&self, target: &Target) -> Result<Vec<Candidate>> {
        let mut out = Vec::new();
        match target {
            Target::Registry => {
                let attrs = self.entity_attrs(&self.tree.registry);
                let idx = push(&mut out, &self.tree.registry, &[], None, attrs);
                for (plural, groups) in &self.tree.groups {
                    for group in groups.values() {
                        self.add_group(&mut out, group, &[plural.clone()], Some(idx));
                    }
                }
            }
            Target::Groups(plural) => {
                for group in self.tree.groups.get(plural).into_iter().flat_map(|g| g.values()) {
                    self.add_group(&mut out, group, &[], None);
                }
            }
            Target::Group(key) => self.add_group(&mut out, self.group(key)?, &[], None),
            Target::Resources(key, plural) => {
                let group = self.group(key)?;
                for node in group.resources.get(plural).into_iter().flat_map(|r| r.values()) {
                    self.add_resource(&mut out, node, &[], None);
                }
            }
            Target::Resource(key) => self.add_resource(&mut out, self.resource(key)?, &[], None),
            Target::Versions(key) => {
                let node = self.resource(key)?;
                for version in node.versions.values() {
                    let attrs = self.version_attrs(node, version);
                    push(&mut out, version, &[], None, attrs);
                }
            }
            Target::Version(key, vid) => {
                let node = self.resource(key)?;
                let version = self.version(node, vid)?;
                let attrs = self.version_attrs(node, version);
                push(&mut out, version, &[], None, attrs);
            }
            Target::Meta(_) | Target::Model | Target::Capabilities => {}
        }
        Ok(out)
    }

    fn add_group(
        &self,
        out: &mut Vec<Candidate>,
        group: &GroupNode,
        scope: &[String],
        parent: Option<usize>,
    ) {
        let attrs = self.entity_attrs(&group.entity);
        let idx = push(out, &group.entity, scope, parent, attrs);
        for (plural, resources) in &group.resources {
            let mut child_scope = scope.to_vec();
            child_scope.push(plural.clone());
            for node in resources.values() {
                self.add_resource(out, node, &child_scope, Some(idx));
            }
        }
    }

    fn add_resource(
        &self,
        out: &mut Vec<Candidate>,
        node: &ResourceNode,
        scope: &[String],
        parent: Option<usize>,
    ) {
        let attrs = self.resource_attrs(node);
        let idx = push(out, &node.entity, scope, parent, attrs);
        let mut child_scope = scope.to_vec();
        child_scope.push(VERSIONS.to_string());
        for version in node.versions.values() {
            let attrs = self.version_attrs(node, version);
            push(out, version, &child_scope, Some(idx), attrs);
        }
    }
}

fn push(
    out: &mut Vec<Candidate>,
    entity: &Entity,
    scope: &[String],
    parent: Option<usize>,
    attributes: Map<String, Value>,
) -> usize {
    out.push(Candidate {
        uid: entity.uid.clone(),
        scope: scope.to_vec(),
        parent,
        attributes: Value::Object(attributes),
    });
    out.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{sample_model, Level};
    use serde_json::json;

    fn sample_tree(model: &Model) -> RegistryTree {
        let gm = model.group("endpoints").unwrap();
        let rm = gm.resource("messages").unwrap();
        let mut tree = RegistryTree::new("reg");
        for (gid, rid, format) in [("e1", "m1", "avro"), ("e2", "m2", "json")] {
            let key = GroupKey::new("endpoints", gid).resource("messages", rid);
            let (node, _) = tree.ensure_resource(gm, rm, &key).unwrap();
            let vid = node.add_version(rm, None, None).unwrap();
            node.versions
                .get_mut(&vid)
                .unwrap()
                .set(&Path::key("format"), json!(format))
                .unwrap();
        }
        tree
    }

    fn render(target: &str, inline: &[&str], filter: &[&str]) -> Result<Value> {
        let model = sample_model();
        let tree = sample_tree(&model);
        let target = Target::parse(target, &model)?;
        let level = target.level(&model).unwrap_or(Level::Registry);
        let inline = Inline::parse(inline, &model, level)?;
        let filter = Filter::parse(filter, &model, level)?;
        Renderer::new(&model, &tree, "http://localhost:8080/").render(&target, &inline, &filter)
    }

    #[test]
    fn test_registry_summary() {
        let doc = render("/", &[], &[]).unwrap();
        assert_eq!(doc["registryid"], "reg");
        assert_eq!(doc["self"], "http://localhost:8080/");
        assert_eq!(doc["endpointscount"], 2);
        assert_eq!(doc["endpointsurl"], "http://localhost:8080/endpoints");
        assert_eq!(doc["schemagroupscount"], 0);
        assert!(doc.get("endpoints").is_none());
        assert!(doc.get("model").is_none());
    }

    #[test]
    fn test_inline_nested() {
        let doc = render("/", &["endpoints.messages"], &[]).unwrap();
        let m1 = &doc["endpoints"]["e1"]["messages"]["m1"];
        assert_eq!(m1["messageid"], "m1");
        assert_eq!(m1["versionid"], "1");
        assert_eq!(m1["format"], "avro");
        assert_eq!(m1["versionscount"], 1);
        assert!(m1.get("versions").is_none());
        assert!(m1.get("meta").is_none());

        let doc = render("/", &["*"], &[]).unwrap();
        let m1 = &doc["endpoints"]["e1"]["messages"]["m1"];
        assert_eq!(m1["meta"]["latestversionid"], "1");
        assert_eq!(m1["versions"]["1"]["islatest"], true);
        assert!(doc.get("model").is_none());
    }

    #[test]
    fn test_filter_prunes_and_counts() {
        let doc = render(
            "/",
            &["endpoints.messages"],
            &["endpoints.messages.format=json"],
        )
        .unwrap();
        assert_eq!(doc["endpointscount"], 1);
        assert!(doc["endpoints"].get("e1").is_none());
        assert_eq!(doc["endpoints"]["e2"]["messagescount"], 1);
    }

    #[test]
    fn test_filtered_entity_is_not_found() {
        assert!(render("/endpoints/e1", &[], &["endpointid=e1"]).is_ok());
        assert!(matches!(
            render("/endpoints/e1", &[], &["endpointid=e2"]),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_leaf_targets() {
        let meta = render("/endpoints/e1/messages/m1/meta", &[], &[]).unwrap();
        assert_eq!(meta["latestversionsticky"], false);
        assert_eq!(
            meta["latestversionurl"],
            "http://localhost:8080/endpoints/e1/messages/m1/versions/1"
        );

        let versions = render("/endpoints/e1/messages/m1/versions", &[], &[]).unwrap();
        assert_eq!(versions["1"]["messageid"], "m1");

        assert!(matches!(
            render("/endpoints/e9", &[], &[]),
            Err(Error::NotFound(_))
        ));
        assert_eq!(render("/capabilities", &[], &[]).unwrap(), capabilities());
        assert!(render("/model", &[], &[]).unwrap()["groups"]["endpoints"].is_object());
    }
}
