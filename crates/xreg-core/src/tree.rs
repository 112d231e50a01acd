//! In-memory registry hierarchy loaded for one transaction

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;
use tracing::warn;

use crate::entity::{Entity, EntityKind, EntityUid, SPEC_VERSION, SPEC_VERSION_VALUE};
use crate::error::{Error, Result};
use crate::limits::validate_id;
use crate::model::{GroupModel, ResourceModel, META, VERSIONS};
use crate::record::{ChangeSet, EntityRecord};
use crate::target::{GroupKey, ResourceKey};

/// A resource with its meta entity and versions
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub entity: Entity,
    pub meta: Entity,
    pub versions: BTreeMap<String, Entity>,
}

/// A group with its resource collections (plural -> id -> node)
#[derive(Debug, Clone)]
pub struct GroupNode {
    pub entity: Entity,
    pub resources: BTreeMap<String, BTreeMap<String, ResourceNode>>,
}

/// The whole registry: registry entity plus group collections
#[derive(Debug, Clone)]
pub struct RegistryTree {
    pub registry: Entity,
    pub groups: BTreeMap<String, BTreeMap<String, GroupNode>>,
    loaded: HashSet<EntityUid>,
}

impl ResourceNode {
    fn new(key: &ResourceKey, singular: &str, parent: EntityUid) -> Self {
        let entity = Entity::new(
            EntityKind::Resource,
            key.id.as_str(),
            singular,
            key.plural.as_str(),
            key.xid(),
            Some(parent),
        );
        let meta = Entity::new(
            EntityKind::Meta,
            key.id.as_str(),
            singular,
            META,
            key.meta_xid(),
            Some(entity.uid.clone()),
        );
        Self {
            entity,
            meta,
            versions: BTreeMap::new(),
        }
    }

    pub(crate) fn new_version(&self, vid: &str) -> Entity {
        let xid = format!("{}/{}/{}", self.entity.xid, VERSIONS, vid);
        Entity::new(
            EntityKind::Version,
            vid,
            "version",
            VERSIONS,
            xid,
            Some(self.entity.uid.clone()),
        )
    }

    fn entities(&self) -> impl Iterator<Item = &Entity> {
        [&self.entity, &self.meta]
            .into_iter()
            .chain(self.versions.values())
    }

    fn entities_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        [&mut self.entity, &mut self.meta]
            .into_iter()
            .chain(self.versions.values_mut())
    }
}

impl GroupNode {
    fn entities(&self) -> impl Iterator<Item = &Entity> {
        std::iter::once(&self.entity).chain(
            self.resources
                .values()
                .flat_map(|c| c.values())
                .flat_map(|r| r.entities()),
        )
    }

    fn entities_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        std::iter::once(&mut self.entity).chain(
            self.resources
                .values_mut()
                .flat_map(|c| c.values_mut())
                .flat_map(|r| r.entities_mut()),
        )
    }
}

impl RegistryTree {
    /// A fresh, unsaved registry
    pub fn new(registry_id: &str) -> Self {
        let mut registry = Entity::new(EntityKind::Registry, registry_id, "registry", "", "/", None);
        registry.set_system(SPEC_VERSION, Value::String(SPEC_VERSION_VALUE.to_string()));
        Self {
            registry,
            groups: BTreeMap::new(),
            loaded: HashSet::new(),
        }
    }

    /// Assemble the hierarchy from stored records. An empty store yields a
    /// new registry.
    pub fn from_records(registry_id: &str, records: Vec<EntityRecord>) -> Result<Self> {
        let mut loaded = HashSet::new();
        let mut registry = None;
        let mut children: HashMap<EntityUid, Vec<Entity>> = HashMap::new();

        for record in records {
            let entity = record.into_entity()?;
            loaded.insert(entity.uid.clone());
            match (entity.parent.clone(), entity.kind) {
                (None, EntityKind::Registry) => registry = Some(entity),
                (Some(parent), _) => children.entry(parent).or_default().push(entity),
                (None, kind) => warn!("Ignoring {} {} without a parent", kind, entity.xid),
            }
        }

        let Some(registry) = registry else {
            if !loaded.is_empty() {
                return Err(Error::Internal("Stored entities have no registry".to_string()));
            }
            return Ok(Self::new(registry_id));
        };

        let mut tree = Self {
            groups: BTreeMap::new(),
            loaded,
            registry,
        };

        for group in children.remove(&tree.registry.uid).unwrap_or_default() {
            let mut node = GroupNode {
                entity: group,
                resources: BTreeMap::new(),
            };
            for resource in children.remove(&node.entity.uid).unwrap_or_default() {
                let mut meta = None;
                let mut versions = BTreeMap::new();
                for child in children.remove(&resource.uid).unwrap_or_default() {
                    match child.kind {
                        EntityKind::Meta => meta = Some(child),
                        EntityKind::Version => {
                            versions.insert(child.id.clone(), child);
                        }
                        kind => warn!("Ignoring {} {} under a resource", kind, child.xid),
                    }
                }
                let meta = meta.unwrap_or_else(|| {
                    warn!("Recreating missing meta for {}", resource.xid);
                    Entity::new(
                        EntityKind::Meta,
                        resource.id.as_str(),
                        resource.singular.as_str(),
                        META,
                        format!("{}/{}", resource.xid, META),
                        Some(resource.uid.clone()),
                    )
                });
                node.resources
                    .entry(resource.plural.clone())
                    .or_default()
                    .insert(
                        resource.id.clone(),
                        ResourceNode {
                            entity: resource,
                            meta,
                            versions,
                        },
                    );
            }
            tree.groups
                .entry(node.entity.plural.clone())
                .or_default()
                .insert(node.entity.id.clone(), node);
        }

        for orphans in children.values() {
            for orphan in orphans {
                warn!("Ignoring orphaned {} {}", orphan.kind, orphan.xid);
            }
        }

        Ok(tree)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        std::iter::once(&self.registry).chain(
            self.groups
                .values()
                .flat_map(|c| c.values())
                .flat_map(|g| g.entities()),
        )
    }

    fn entities_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        std::iter::once(&mut self.registry).chain(
            self.groups
                .values_mut()
                .flat_map(|c| c.values_mut())
                .flat_map(|g| g.entities_mut()),
        )
    }

    /// Records to save and uids to delete since the last load or commit
    pub fn changes(&self) -> ChangeSet {
        let mut present = HashSet::new();
        let mut saved = Vec::new();
        for entity in self.entities() {
            present.insert(&entity.uid);
            if entity.is_dirty() {
                saved.push(EntityRecord::from_entity(entity));
            }
        }
        let deleted = self
            .loaded
            .iter()
            .filter(|uid| !present.contains(uid))
            .cloned()
            .collect();
        ChangeSet { saved, deleted }
    }

    /// Treat the current state as persisted
    pub fn mark_committed(&mut self) {
        let mut loaded = HashSet::new();
        for entity in self.entities_mut() {
            entity.mark_clean();
            loaded.insert(entity.uid.clone());
        }
        self.loaded = loaded;
    }

    pub fn group(&self, key: &GroupKey) -> Option<&GroupNode> {
        self.groups.get(&key.plural)?.get(&key.id)
    }

    pub fn group_mut(&mut self, key: &GroupKey) -> Option<&mut GroupNode> {
        self.groups.get_mut(&key.plural)?.get_mut(&key.id)
    }

    pub fn resource(&self, key: &ResourceKey) -> Option<&ResourceNode> {
        self.group(&key.group)?
            .resources
            .get(&key.plural)?
            .get(&key.id)
    }

    pub fn resource_mut(&mut self, key: &ResourceKey) -> Option<&mut ResourceNode> {
        self.group_mut(&key.group)?
            .resources
            .get_mut(&key.plural)?
            .get_mut(&key.id)
    }

    /// Look up a group, creating it when missing. Returns whether it was created.
    pub fn ensure_group(
        &mut self,
        model: &GroupModel,
        key: &GroupKey,
    ) -> Result<(&mut GroupNode, bool)> {
        let parent = self.registry.uid.clone();
        let collection = self.groups.entry(key.plural.clone()).or_default();
        let created = !collection.contains_key(&key.id);
        if created {
            validate_id(&key.id)?;
            let entity = Entity::new(
                EntityKind::Group,
                key.id.as_str(),
                model.singular.as_str(),
                key.plural.as_str(),
                key.xid(),
                Some(parent),
            );
            collection.insert(
                key.id.clone(),
                GroupNode {
                    entity,
                    resources: BTreeMap::new(),
                },
            );
        }
        let node = collection
            .get_mut(&key.id)
            .ok_or_else(|| Error::Internal(format!("Group {} vanished", key.xid())))?;
        Ok((node, created))
    }

    /// Look up a resource, creating it (and its group) when missing
    pub fn ensure_resource(
        &mut self,
        group_model: &GroupModel,
        model: &ResourceModel,
        key: &ResourceKey,
    ) -> Result<(&mut ResourceNode, bool)> {
        let (group, _) = self.ensure_group(group_model, &key.group)?;
        let parent = group.entity.uid.clone();
        let collection = group.resources.entry(key.plural.clone()).or_default();
        let created = !collection.contains_key(&key.id);
        if created {
            validate_id(&key.id)?;
            collection.insert(key.id.clone(), ResourceNode::new(key, &model.singular, parent));
        }
        let node = collection
            .get_mut(&key.id)
            .ok_or_else(|| Error::Internal(format!("Resource {} vanished", key.xid())))?;
        Ok((node, created))
    }

    /// Remove a group and everything beneath it
    pub fn remove_group(&mut self, key: &GroupKey) -> Option<GroupNode> {
        self.groups.get_mut(&key.plural)?.remove(&key.id)
    }

    /// Remove a resource with its meta and versions
    pub fn remove_resource(&mut self, key: &ResourceKey) -> Option<ResourceNode> {
        self.group_mut(&key.group)?
            .resources
            .get_mut(&key.plural)?
            .remove(&key.id)
    }
}
